//! # tdjson-client
//!
//! Blocking TDLib client built on the JSON interface.
//!
//! TDLib's JSON API is poll-based: requests go out with `send`, and answers
//! and updates come back, interleaved, from `receive`. This crate turns that
//! into request/response calls plus handler dispatch:
//!
//! - every request carries `@extra.request_id` and returns an [`AsyncResult`]
//!   that is filled when the matching answer arrives
//! - one listener thread polls the library and routes everything else to
//!   handlers registered with [`Client::on`]
//! - handlers run on worker threads ([`SimpleWorker`] by default), never on
//!   the listener
//! - [`Client::login`] walks the authorization handshake to ready
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tdjson_client::{Client, Config, MemoryBridge};
//!
//! # fn main() -> Result<(), tdjson_client::Error> {
//! let client = Client::new(Config {
//!     api_id:   12345,
//!     api_hash: "0123456789abcdef".into(),
//!     phone:    "+15551234567".into(),
//!     ..Default::default()
//! }, Arc::new(MemoryBridge::new()))?;
//!
//! client.on("updateNewMessage", |client, update| {
//!     let chat_id = update["message"]["chat_id"].as_i64().unwrap_or_default();
//!     client.send_message(chat_id, "pong")?;
//!     Ok(())
//! });
//!
//! client.login()?;
//! let me = client.get_me()?.wait(Duration::from_secs(10))?;
//! println!("logged in as {}", me["first_name"]);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

mod errors;
pub mod auth;
pub mod bridge;
pub mod handlers;
pub mod listener;
pub mod methods;
pub mod result;
pub mod worker;

#[cfg(feature = "tdjson")]
pub mod native;

pub use auth::{AuthInput, AuthorizationState, StaticInput, StdinInput};
pub use bridge::{MemoryBridge, TdBridge};
pub use errors::{Error, HandlerError, TdError};
pub use result::{AUTH_REQUEST_ID, AsyncResult, ResultTable};
pub use worker::{Handler, PoolWorker, SimpleWorker, Worker};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::{Value, json};

use handlers::HandlerRegistry;
use listener::Router;
use result::lock;

// ─── WorkerKind ───────────────────────────────────────────────────────────────

/// How handlers are executed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum WorkerKind {
    /// One thread; handlers see updates in arrival order.
    #[default]
    Simple,
    /// `n` threads; no ordering between handlers.
    Pool(usize),
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`Client::new`].
#[derive(Clone)]
pub struct Config {
    pub api_id:                  i32,
    pub api_hash:                String,
    pub phone:                   String,
    pub database_encryption_key: String,
    /// 2FA password. Asked from [`Config::auth_input`] when `None`.
    pub password:                Option<String>,
    /// TDLib working directory (default: `/tmp/.tdlib_files/<phone>/`).
    pub files_directory:         Option<PathBuf>,
    pub use_test_dc:             bool,
    pub use_message_database:    bool,
    pub device_model:            String,
    pub system_version:          String,
    pub application_version:     String,
    pub system_language_code:    String,
    /// How long one listener poll blocks (default: 1 s). Values below
    /// [`listener::MIN_POLL_TIMEOUT`] are raised to it.
    pub receive_timeout:         Duration,
    /// Per-step deadline during login (default: none, wait as long as TDLib takes).
    pub login_timeout:           Option<Duration>,
    pub worker:                  WorkerKind,
    /// Source of the login code and password (default: stdin prompt).
    pub auth_input:              Arc<dyn AuthInput>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_id:                  0,
            api_hash:                String::new(),
            phone:                   String::new(),
            database_encryption_key: String::new(),
            password:                None,
            files_directory:         None,
            use_test_dc:             false,
            use_message_database:    true,
            device_model:            "tdjson-client".into(),
            system_version:          "unknown".into(),
            application_version:     env!("CARGO_PKG_VERSION").into(),
            system_language_code:    "en".into(),
            receive_timeout:         Duration::from_secs(1),
            login_timeout:           None,
            worker:                  WorkerKind::Simple,
            auth_input:              Arc::new(StdinInput),
        }
    }
}

impl Config {
    /// Resolved TDLib working directory.
    pub fn files_directory(&self) -> PathBuf {
        match &self.files_directory {
            Some(dir) => dir.clone(),
            None      => PathBuf::from(format!("/tmp/.tdlib_files/{}/", self.phone)),
        }
    }
}

// ─── ClientInner ─────────────────────────────────────────────────────────────

pub(crate) struct ClientInner {
    config:     Config,
    bridge:     Arc<dyn TdBridge>,
    results:    Arc<ResultTable>,
    handlers:   Arc<HandlerRegistry>,
    worker:     Box<dyn Worker>,
    authorized: AtomicBool,
    login_lock: Mutex<()>,
    stopped:    Arc<AtomicBool>,
    listener:   Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = self.results.close();
        if closed > 0 {
            tracing::info!("[tdjson] {closed} pending request(s) cancelled");
        }
        self.worker.stop();
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            // The listener only exits between polls, so the bridge is idle
            // once it is joined.
            if listener.thread().id() != thread::current().id() && listener.join().is_err() {
                tracing::error!("[tdjson] listener thread panicked");
            }
        }
        self.bridge.close();
        tracing::info!("[tdjson] Client stopped");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─── Client ───────────────────────────────────────────────────────────────────

/// The TDLib client. Cheap to clone, internally Arc-wrapped.
///
/// Owns its pending-result table, handler table, workers and listener; the
/// last clone to drop stops them. Neither the listener nor the workers hold a
/// clone, and handlers are given the client instead of capturing it.
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Start the workers and the listener over `bridge`.
    pub fn new(config: Config, bridge: Arc<dyn TdBridge>) -> Result<Self, Error> {
        let (queue, queue_rx) = worker::dispatch_queue();
        let worker: Box<dyn Worker> = match config.worker {
            WorkerKind::Simple  => Box::new(SimpleWorker::new(queue_rx)),
            WorkerKind::Pool(n) => Box::new(PoolWorker::new(queue_rx, n)),
        };
        worker.run()?;

        let results  = ResultTable::new();
        let handlers = Arc::new(HandlerRegistry::default());
        let stopped  = Arc::new(AtomicBool::new(false));

        let poll = config.receive_timeout;
        let inner = Arc::new(ClientInner {
            config,
            bridge:     Arc::clone(&bridge),
            results:    Arc::clone(&results),
            handlers:   Arc::clone(&handlers),
            worker,
            authorized: AtomicBool::new(false),
            login_lock: Mutex::new(()),
            stopped:    Arc::clone(&stopped),
            listener:   Mutex::new(None),
        });

        let router = Router { results, handlers, queue, client: Arc::downgrade(&inner) };
        let listener = listener::spawn(bridge, router, poll, stopped)?;
        *lock(&inner.listener) = Some(listener);

        tracing::info!("[tdjson] Client started");
        Ok(Self { inner })
    }

    // ── Requests ───────────────────────────────────────────────────────────

    /// Send a prepared payload under a fresh request id.
    pub fn send_request(&self, payload: Value) -> Result<AsyncResult, Error> {
        self.send_with_id(payload, result::new_request_id())
    }

    /// Send `{"@type": method, ...params}`. `params` is an object or null.
    pub fn call_method(&self, method: &str, params: Value) -> Result<AsyncResult, Error> {
        self.send_request(methods::build(method, params)?)
    }

    pub(crate) fn send_with_id(&self, mut payload: Value, request_id: String) -> Result<AsyncResult, Error> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(Error::Stopped);
        }
        match payload.as_object_mut() {
            Some(fields) => { fields.insert("@extra".into(), json!({"request_id": request_id})); }
            None => return Err(Error::InvalidParams(format!("payload must be an object, got {payload}"))),
        }

        // Register before sending: the answer may arrive before send returns.
        let handle = self.inner.results.register(request_id)?;
        self.inner.bridge.send(&payload);
        Ok(handle)
    }

    /// Number of requests still waiting for an answer.
    pub fn pending_requests(&self) -> usize {
        self.inner.results.len()
    }

    // ── Handlers ───────────────────────────────────────────────────────────

    /// Run `handler` on a worker thread for every uncorrelated update of
    /// `update_type`. The handler is passed this client.
    pub fn on<F>(&self, update_type: &str, handler: F)
    where
        F: Fn(&Client, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.handlers.add(update_type, Arc::new(handler));
    }

    /// Run `handler` for updates no type-specific handler claims.
    pub fn on_any<F>(&self, handler: F)
    where
        F: Fn(&Client, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.handlers.add_catch_all(Arc::new(handler));
    }

    /// Shorthand for `on("updateNewMessage", handler)`.
    pub fn add_message_handler<F>(&self, handler: F)
    where
        F: Fn(&Client, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.on("updateNewMessage", handler);
    }

    /// Unregister all handlers for `update_type`. Returns how many were removed.
    pub fn remove_handlers(&self, update_type: &str) -> usize {
        self.inner.handlers.remove(update_type)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────────

    /// Stop the listener and workers and close the bridge. Idempotent.
    ///
    /// Pending handles are closed: their waits, including a `login()` blocked
    /// on another thread, fail with [`Error::Stopped`].
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(bridge: Arc<MemoryBridge>) -> Client {
        let config = Config {
            receive_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        Client::new(config, bridge).unwrap()
    }

    #[test]
    fn login_is_a_noop_once_authorized() {
        let bridge = Arc::new(MemoryBridge::new());
        let client = client(bridge.clone());
        client.inner.authorized.store(true, Ordering::Release);

        client.login().unwrap();

        assert_eq!(bridge.sent_count(), 0);
    }

    #[test]
    fn login_steps_use_the_reserved_id() {
        let bridge = Arc::new(MemoryBridge::new());
        let client = client(bridge.clone());

        let step = client.set_initial_params().unwrap();

        assert_eq!(step.id(), AUTH_REQUEST_ID);
        let sent = bridge.sent();
        assert_eq!(sent[0]["@type"], "setTdlibParameters");
        assert_eq!(sent[0]["@extra"]["request_id"], AUTH_REQUEST_ID);
    }

    #[test]
    fn requests_after_stop_fail() {
        let bridge = Arc::new(MemoryBridge::new());
        let client = client(bridge.clone());
        client.stop();
        client.stop();

        assert!(bridge.is_closed());
        assert!(matches!(client.get_me(), Err(Error::Stopped)));
        assert_eq!(bridge.sent_count(), 0);
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let client = client(Arc::new(MemoryBridge::new()));
        assert!(matches!(client.send_request(json!(42)), Err(Error::InvalidParams(_))));
        assert_eq!(client.pending_requests(), 0);
    }
}
