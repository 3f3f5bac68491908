//! The seam to the native JSON library.
//!
//! The client only ever hands whole JSON objects across this trait; the
//! encoding, transport and encryption behind it belong to the library.
//! [`MemoryBridge`] stands in for it in tests and offline demos.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;

use crate::result::lock;

/// Raw send/receive of JSON objects.
///
/// `send` may be called from any thread. `receive` is only ever called from
/// the client's single listener thread.
pub trait TdBridge: Send + Sync + 'static {
    /// Fire-and-forget an outbound request.
    fn send(&self, request: &Value);

    /// Wait up to `timeout` for the next inbound object.
    ///
    /// Must block (not spin) for roughly `timeout` when nothing is available.
    fn receive(&self, timeout: Duration) -> Option<Value>;

    /// Release the native instance. Called once from [`crate::Client::stop`].
    fn close(&self) {}
}

// ─── MemoryBridge ─────────────────────────────────────────────────────────────

type Responder = Box<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

/// An in-process bridge: records every request and serves pushed updates.
///
/// An optional responder turns each request into the updates "TDLib" answers
/// with, which lets tests and demos script whole conversations.
pub struct MemoryBridge {
    sent:      Mutex<Vec<Value>>,
    inbox:     Mutex<VecDeque<Value>>,
    arrived:   Condvar,
    responder: Option<Responder>,
    closed:    Mutex<bool>,
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self {
            sent:      Mutex::new(Vec::new()),
            inbox:     Mutex::new(VecDeque::new()),
            arrived:   Condvar::new(),
            responder: None,
            closed:    Mutex::new(false),
        }
    }

    /// Answer every request with whatever `responder` returns for it.
    pub fn with_responder(
        responder: impl Fn(&Value) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        Self { responder: Some(Box::new(responder)), ..Self::new() }
    }

    /// Queue an inbound update.
    pub fn push(&self, update: Value) {
        lock(&self.inbox).push_back(update);
        self.arrived.notify_one();
    }

    /// Every request sent so far, in order.
    pub fn sent(&self) -> Vec<Value> {
        lock(&self.sent).clone()
    }

    pub fn sent_count(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }
}

impl Default for MemoryBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl TdBridge for MemoryBridge {
    fn send(&self, request: &Value) {
        lock(&self.sent).push(request.clone());
        if let Some(responder) = &self.responder {
            for update in responder(request) {
                self.push(update);
            }
        }
    }

    fn receive(&self, timeout: Duration) -> Option<Value> {
        let inbox = lock(&self.inbox);
        let (mut inbox, _) = self.arrived
            .wait_timeout_while(inbox, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        inbox.pop_front()
    }

    fn close(&self) {
        *lock(&self.closed) = true;
    }
}
