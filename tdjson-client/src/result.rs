//! Pending results: the rendezvous point between callers and the listener.
//!
//! Every outbound request gets an [`AsyncResult`] registered in the client's
//! [`ResultTable`] under its `@extra.request_id`. The listener thread looks the
//! id up when TDLib answers, stores the answer in the handle, removes the
//! entry and wakes whoever is blocked in [`AsyncResult::wait`].
//!
//! All authorization traffic shares the reserved id [`AUTH_REQUEST_ID`], so the
//! spontaneous `updateAuthorizationState` pushes and the explicit login calls
//! land on one mailbox.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::errors::{Error, TdError};

/// Request id reserved for the login chain.
pub const AUTH_REQUEST_ID: &str = "updateAuthorizationState";

/// A fresh opaque request id (32 lowercase hex chars).
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Lock `m`, recovering the guard if a panicking thread poisoned it.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── AsyncResult ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct State {
    update: Option<Value>,
    closed: bool,
}

impl State {
    fn settled(&self) -> bool {
        self.update.is_some() || self.closed
    }
}

struct Slot {
    state: Mutex<State>,
    ready: Condvar,
}

/// Handle to one in-flight request. Cheap to clone; clones observe the same
/// answer.
///
/// Filled exactly once by the listener thread; a handle whose caller gave up
/// waiting is still filled, the answer just has no reader. Stopping the client
/// closes every handle still pending, which wakes its waiters with
/// [`Error::Stopped`].
#[derive(Clone)]
pub struct AsyncResult {
    id:    String,
    slot:  Arc<Slot>,
    table: Weak<ResultTable>,
}

impl AsyncResult {
    /// A handle that belongs to no table. Useful for scripting answers.
    pub fn detached(id: impl Into<String>) -> Self {
        Self::with_table(id.into(), Weak::new())
    }

    fn with_table(id: String, table: Weak<ResultTable>) -> Self {
        Self {
            id,
            slot: Arc::new(Slot { state: Mutex::new(State::default()), ready: Condvar::new() }),
            table,
        }
    }

    /// The `@extra.request_id` this handle answers to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The answer, if it already arrived.
    pub fn update(&self) -> Option<Value> {
        lock(&self.slot.state).update.clone()
    }

    /// `true` once an answer has been stored.
    pub fn is_ready(&self) -> bool {
        lock(&self.slot.state).update.is_some()
    }

    /// Block until the answer arrives or `timeout` elapses.
    ///
    /// A zero timeout only checks. TDLib `error` answers come back as
    /// [`Error::Td`], a handle closed by [`crate::Client::stop`] as
    /// [`Error::Stopped`].
    pub fn wait(&self, timeout: Duration) -> Result<Value, Error> {
        let guard = lock(&self.slot.state);
        let (guard, _) = self.slot.ready
            .wait_timeout_while(guard, timeout, |s| !s.settled())
            .unwrap_or_else(PoisonError::into_inner);
        match (&guard.update, guard.closed) {
            (Some(update), _) => Self::answer(update),
            (None, true)      => Err(Error::Stopped),
            (None, false)     => Err(Error::Timeout { request_id: self.id.clone(), after: timeout }),
        }
    }

    /// Block until the answer arrives or the handle is closed, however long
    /// that takes.
    pub fn wait_indefinitely(&self) -> Result<Value, Error> {
        let guard = lock(&self.slot.state);
        let guard = self.slot.ready
            .wait_while(guard, |s| !s.settled())
            .unwrap_or_else(PoisonError::into_inner);
        match &guard.update {
            Some(update) => Self::answer(update),
            None         => Err(Error::Stopped),
        }
    }

    fn answer(update: &Value) -> Result<Value, Error> {
        match TdError::from_update(update) {
            Some(e) => Err(Error::Td(e)),
            None    => Ok(update.clone()),
        }
    }

    /// Store the answer and wake all waiters. Returns `false` if the handle
    /// was already filled; the first answer wins.
    pub fn fulfil(&self, update: Value) -> bool {
        let mut state = lock(&self.slot.state);
        if state.settled() {
            return false;
        }
        state.update = Some(update);
        drop(state);
        self.slot.ready.notify_all();
        true
    }

    /// Give up on the answer for good: current and future waits fail with
    /// [`Error::Stopped`] unless an answer was already stored.
    pub fn close(&self) {
        lock(&self.slot.state).closed = true;
        self.slot.ready.notify_all();
    }

    /// Stop expecting an answer: drop this handle's entry from its table if it
    /// is still pending. A late answer is then treated as uncorrelated.
    pub fn discard(&self) {
        if let Some(table) = self.table.upgrade() {
            table.remove(self);
        }
    }
}

impl PartialEq for AsyncResult {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncResult")
            .field("id", &self.id)
            .field("update", &self.update())
            .finish()
    }
}

// ─── ResultTable ──────────────────────────────────────────────────────────────

/// request_id → pending handle. Shared by caller threads (insert) and the
/// listener thread (lookup + remove).
#[derive(Default)]
pub struct ResultTable {
    pending: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    handles: HashMap<String, AsyncResult>,
    closed:  bool,
}

impl ResultTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a handle for `id` and register it.
    ///
    /// Fails with [`Error::Stopped`] once the table is closed.
    pub fn register(self: &Arc<Self>, id: impl Into<String>) -> Result<AsyncResult, Error> {
        let handle = AsyncResult::with_table(id.into(), Arc::downgrade(self));
        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(Error::Stopped);
        }
        if pending.handles.contains_key(handle.id()) {
            tracing::error!("[tdjson] request id {} registered twice", handle.id());
            return Err(Error::DuplicateRequestId(handle.id.clone()));
        }
        pending.handles.insert(handle.id.clone(), handle.clone());
        Ok(handle)
    }

    /// Hand `update` to the handle waiting on `request_id`, removing it.
    ///
    /// Returns the update back when nobody is waiting for that id.
    pub fn fulfil(&self, request_id: &str, update: Value) -> Option<Value> {
        let handle = lock(&self.pending).handles.remove(request_id);
        match handle {
            Some(handle) => {
                if !handle.fulfil(update) {
                    tracing::warn!("[tdjson] handle {request_id} was already filled, answer dropped");
                }
                None
            }
            None => Some(update),
        }
    }

    /// Remove `handle` if it is still the pending entry for its id.
    pub fn remove(&self, handle: &AsyncResult) -> bool {
        let mut pending = lock(&self.pending);
        let current = pending.handles.get(handle.id()).is_some_and(|c| c == handle);
        if current {
            pending.handles.remove(handle.id());
        }
        current
    }

    /// Refuse further registrations and close every pending handle.
    /// Returns how many were closed.
    pub fn close(&self) -> usize {
        let drained: Vec<AsyncResult> = {
            let mut pending = lock(&self.pending);
            pending.closed = true;
            pending.handles.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &drained {
            handle.close();
        }
        drained.len()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        lock(&self.pending).handles.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
