//! Update dispatch: a FIFO queue of pending handler calls and the worker
//! threads that drain it.
//!
//! The listener never runs handler code itself. It only [`DispatchSender::put`]s
//! items, so a slow or failing handler cannot stall correlation.
//!
//! | Worker | Threads | Ordering |
//! |--------|---------|----------|
//! | [`SimpleWorker`] | 1 | strict FIFO, handlers never overlap |
//! | [`PoolWorker`]   | N | none across threads; throughput over order |
//!
//! [`SimpleWorker`] is the default. Pick [`PoolWorker`] only when handlers are
//! independent of update order.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::Client;
use crate::errors::HandlerError;

/// A registered update handler.
///
/// Handlers get the client they were registered on, so replying from a
/// handler never needs a captured `Client` clone.
pub type Handler = Arc<dyn Fn(&Client, &Value) -> Result<(), HandlerError> + Send + Sync>;

type Job = Box<dyn FnOnce() -> Result<(), HandlerError> + Send>;

// ─── DispatchItem ─────────────────────────────────────────────────────────────

/// One handler invocation waiting for a worker. Consumed exactly once.
pub struct DispatchItem {
    kind: String,
    job:  Job,
}

impl DispatchItem {
    /// `kind` is the update's `@type`, used when logging failures.
    pub fn new(
        kind: impl Into<String>,
        job:  impl FnOnce() -> Result<(), HandlerError> + Send + 'static,
    ) -> Self {
        Self { kind: kind.into(), job: Box::new(job) }
    }

    /// Run the handler, logging (never propagating) errors and panics.
    pub fn run(self) {
        let Self { kind, job } = self;
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(()))  => {}
            Ok(Err(e))  => tracing::error!("[tdjson] handler for {kind} failed: {e}"),
            Err(panic)  => tracing::error!("[tdjson] handler for {kind} panicked: {}", panic_message(&*panic)),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

// ─── Queue ────────────────────────────────────────────────────────────────────

/// Create an unbounded dispatch queue.
pub fn dispatch_queue() -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DispatchSender(tx), DispatchReceiver(rx))
}

/// Producer side. Never blocks; order is kept per producer thread.
#[derive(Clone)]
pub struct DispatchSender(mpsc::UnboundedSender<DispatchItem>);

impl DispatchSender {
    /// Enqueue `item`. Returns `false` if no worker can ever receive it (the
    /// queue was closed).
    pub fn put(&self, item: DispatchItem) -> bool {
        self.0.send(item).is_ok()
    }
}

/// Consumer side, handed to a [`Worker`].
pub struct DispatchReceiver(mpsc::UnboundedReceiver<DispatchItem>);

impl DispatchReceiver {
    /// Block the current (non-async) thread until the next item, or `None`
    /// once every sender is gone.
    pub fn next_blocking(&mut self) -> Option<DispatchItem> {
        self.0.blocking_recv()
    }
}

// ─── Worker ───────────────────────────────────────────────────────────────────

/// Drains a [`DispatchReceiver`] on background threads.
///
/// Threads are detached: there is no join or drain. They exit when disabled
/// and the next item arrives, or when the queue closes.
pub trait Worker: Send + Sync {
    /// Spawn the worker thread(s). Calling it again is a no-op.
    fn run(&self) -> io::Result<()>;

    /// Stop taking new items.
    fn stop(&self);
}

fn work_loop(name: &str, enabled: &AtomicBool, mut next: impl FnMut() -> Option<DispatchItem>) {
    tracing::info!("[tdjson] {name} started");
    while enabled.load(Ordering::Acquire) {
        match next() {
            Some(item) => item.run(),
            None       => break,
        }
    }
    tracing::info!("[tdjson] {name} stopped");
}

// ─── SimpleWorker ─────────────────────────────────────────────────────────────

/// One thread; handlers run strictly in arrival order.
pub struct SimpleWorker {
    queue:   Mutex<Option<DispatchReceiver>>,
    enabled: Arc<AtomicBool>,
}

impl SimpleWorker {
    pub fn new(queue: DispatchReceiver) -> Self {
        Self { queue: Mutex::new(Some(queue)), enabled: Arc::new(AtomicBool::new(true)) }
    }
}

impl Worker for SimpleWorker {
    fn run(&self) -> io::Result<()> {
        let Some(mut queue) = self.queue.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Ok(());
        };
        let enabled = Arc::clone(&self.enabled);
        thread::Builder::new()
            .name("tdjson-worker".into())
            .spawn(move || work_loop("SimpleWorker", &enabled, || queue.next_blocking()))?;
        Ok(())
    }

    fn stop(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

// ─── PoolWorker ───────────────────────────────────────────────────────────────

/// `threads` threads sharing one queue. No ordering between handlers.
pub struct PoolWorker {
    threads: usize,
    queue:   Mutex<Option<DispatchReceiver>>,
    enabled: Arc<AtomicBool>,
}

impl PoolWorker {
    pub fn new(queue: DispatchReceiver, threads: usize) -> Self {
        Self {
            threads: threads.max(1),
            queue:   Mutex::new(Some(queue)),
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl Worker for PoolWorker {
    fn run(&self) -> io::Result<()> {
        let Some(queue) = self.queue.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return Ok(());
        };
        let queue = Arc::new(Mutex::new(queue));
        for i in 0..self.threads {
            let queue   = Arc::clone(&queue);
            let enabled = Arc::clone(&self.enabled);
            let name    = format!("PoolWorker#{i}");
            thread::Builder::new()
                .name(format!("tdjson-worker-{i}"))
                .spawn(move || {
                    work_loop(&name, &enabled, || {
                        // Hold the lock only while taking the item, not while running it.
                        queue.lock().unwrap_or_else(PoisonError::into_inner).next_blocking()
                    })
                })?;
        }
        Ok(())
    }

    fn stop(&self) {
        self.enabled.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn record(tx: &std_mpsc::Sender<i64>, n: i64) -> DispatchItem {
        let tx = tx.clone();
        DispatchItem::new("t", move || {
            tx.send(n).ok();
            Ok(())
        })
    }

    #[test]
    fn simple_worker_keeps_fifo_order() {
        let (sender, receiver) = dispatch_queue();
        let worker = SimpleWorker::new(receiver);
        let (tx, rx) = std_mpsc::channel();

        for n in 0..50 {
            assert!(sender.put(record(&tx, n)));
        }
        worker.run().unwrap();

        let seen: Vec<i64> = (0..50)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn failing_handler_does_not_stop_the_worker() {
        let (sender, receiver) = dispatch_queue();
        let worker = SimpleWorker::new(receiver);
        worker.run().unwrap();

        let (tx, rx) = std_mpsc::channel();

        sender.put(DispatchItem::new("t", || Err("boom".into())));
        sender.put(DispatchItem::new("t", || -> Result<(), HandlerError> { panic!("handler exploded") }));
        sender.put(record(&tx, 3));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 3);
    }

    #[test]
    fn pool_worker_runs_every_item() {
        let (sender, receiver) = dispatch_queue();
        let worker = PoolWorker::new(receiver, 4);
        worker.run().unwrap();

        let (tx, rx) = std_mpsc::channel();
        for n in 0..100 {
            sender.put(record(&tx, n));
        }

        let mut seen: Vec<i64> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn put_fails_once_the_queue_is_gone() {
        let (sender, receiver) = dispatch_queue();
        drop(receiver);
        assert!(!sender.put(DispatchItem::new("t", || Ok(()))));
    }

    #[test]
    fn run_twice_is_a_noop() {
        let (_sender, receiver) = dispatch_queue();
        let worker = SimpleWorker::new(receiver);
        worker.run().unwrap();
        worker.run().unwrap();
        worker.stop();
    }
}
