//! The receive loop: one thread polling the bridge and routing every inbound
//! object either to the handle waiting for it or to the dispatch queue.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::Value;

use crate::bridge::TdBridge;
use crate::handlers::HandlerRegistry;
use crate::result::{AUTH_REQUEST_ID, ResultTable};
use crate::worker::{DispatchItem, DispatchSender};
use crate::{Client, ClientInner};

/// Shortest poll the listener will ask the bridge for. Shorter configured
/// timeouts are raised to this so an idle bridge never busy-spins the loop.
pub const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// What happened to one inbound object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Stored in the waiting handle.
    Fulfilled,
    /// Queued for this many handlers.
    Dispatched(usize),
    /// `ok` acknowledgement on the login mailbox; the state push follows.
    Acknowledged,
    /// Not an object with a string `@type`.
    Malformed,
}

/// Classifies inbound objects. Owns nothing but shared references, so the
/// listener thread and tests can both drive it.
///
/// The client is held weakly: the listener must not keep it alive.
pub struct Router {
    pub(crate) results:  Arc<ResultTable>,
    pub(crate) handlers: Arc<HandlerRegistry>,
    pub(crate) queue:    DispatchSender,
    pub(crate) client:   Weak<ClientInner>,
}

impl Router {
    pub fn route(&self, update: Value) -> Route {
        let Some(kind) = update.get("@type").and_then(Value::as_str).map(str::to_owned) else {
            tracing::warn!("[tdjson] dropping malformed update: {update}");
            return Route::Malformed;
        };

        let request_id = if kind == AUTH_REQUEST_ID {
            Some(AUTH_REQUEST_ID.to_owned())
        } else {
            update.get("@extra")
                .and_then(|e| e.get("request_id"))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        let update = match request_id {
            Some(id) if id == AUTH_REQUEST_ID && kind == "ok" => {
                tracing::debug!("[tdjson] login step acknowledged");
                return Route::Acknowledged;
            }
            Some(id) => match self.results.fulfil(&id, update) {
                None => {
                    tracing::debug!("[tdjson] {kind} answered request {id}");
                    return Route::Fulfilled;
                }
                Some(update) => update,
            },
            None => update,
        };

        let handlers = self.handlers.for_type(&kind);
        for handler in &handlers {
            if !self.queue.put(self.dispatch(&kind, Arc::clone(handler), update.clone())) {
                tracing::warn!("[tdjson] dispatch queue closed, {kind} dropped");
                break;
            }
        }
        Route::Dispatched(handlers.len())
    }

    fn dispatch(&self, kind: &str, handler: crate::Handler, update: Value) -> DispatchItem {
        let client = Weak::clone(&self.client);
        DispatchItem::new(kind, move || match client.upgrade() {
            Some(inner) => handler(&Client { inner }, &update),
            None => {
                tracing::debug!("[tdjson] client gone, update not handled");
                Ok(())
            }
        })
    }
}

/// Spawn the listener thread. It exits once `stopped` is set.
///
/// `poll_timeout` is raised to at least [`MIN_POLL_TIMEOUT`].
pub(crate) fn spawn(
    bridge:       Arc<dyn TdBridge>,
    router:       Router,
    poll_timeout: Duration,
    stopped:      Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let poll_timeout = poll_timeout.max(MIN_POLL_TIMEOUT);
    thread::Builder::new()
        .name("tdjson-listener".into())
        .spawn(move || {
            tracing::info!("[tdjson] listener started");
            while !stopped.load(Ordering::Acquire) {
                if let Some(update) = bridge.receive(poll_timeout) {
                    router.route(update);
                }
            }
            tracing::info!("[tdjson] listener stopped");
        })
}
