//! `libtdjson` binding (cargo feature `tdjson`).
//!
//! TDLib's JSON interface is thread-safe for `send`, and `receive` must only
//! be called from one thread at a time, which the listener guarantees.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString, c_char, c_double, c_void};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use serde_json::{Value, json};

use crate::bridge::TdBridge;

#[link(name = "tdjson")]
unsafe extern "C" {
    fn td_json_client_create() -> *mut c_void;
    fn td_json_client_send(client: *mut c_void, request: *const c_char);
    fn td_json_client_receive(client: *mut c_void, timeout: c_double) -> *const c_char;
    fn td_json_client_execute(client: *mut c_void, request: *const c_char) -> *const c_char;
    fn td_json_client_destroy(client: *mut c_void);
}

struct RawClient(*mut c_void);

// SAFETY: TDLib clients may be used from any thread; destroy is serialised
// behind the write lock below.
unsafe impl Send for RawClient {}
unsafe impl Sync for RawClient {}

/// A live TDLib instance.
pub struct TdJson {
    client: RwLock<RawClient>,
}

impl TdJson {
    /// Create a TDLib instance, setting its internal log verbosity first
    /// (0 = fatal only … 5 = debug).
    pub fn new(verbosity: u8) -> Self {
        // SAFETY: no preconditions.
        let client = unsafe { td_json_client_create() };
        let this = Self { client: RwLock::new(RawClient(client)) };
        this.execute(&json!({"@type": "setLogVerbosityLevel", "new_verbosity_level": verbosity}));
        this
    }

    /// Run a synchronous TDLib request.
    pub fn execute(&self, request: &Value) -> Option<Value> {
        let request = encode(request)?;
        let client = self.client.read().unwrap_or_else(PoisonError::into_inner);
        if client.0.is_null() {
            return None;
        }
        // SAFETY: the pointer is live while the read lock is held; the
        // returned string stays valid until the next call on this thread.
        let raw = unsafe { td_json_client_execute(client.0, request.as_ptr()) };
        decode(raw)
    }
}

impl TdBridge for TdJson {
    fn send(&self, request: &Value) {
        let Some(request) = encode(request) else { return };
        let client = self.client.read().unwrap_or_else(PoisonError::into_inner);
        if client.0.is_null() {
            tracing::warn!("[tdjson] send after close ignored");
            return;
        }
        // SAFETY: live pointer (read lock held), NUL-terminated request.
        unsafe { td_json_client_send(client.0, request.as_ptr()) };
    }

    fn receive(&self, timeout: Duration) -> Option<Value> {
        let client = self.client.read().unwrap_or_else(PoisonError::into_inner);
        if client.0.is_null() {
            std::thread::sleep(timeout);
            return None;
        }
        // SAFETY: live pointer (read lock held); the result is copied out
        // before anything else runs on this thread.
        let raw = unsafe { td_json_client_receive(client.0, timeout.as_secs_f64()) };
        decode(raw)
    }

    fn close(&self) {
        let mut client = self.client.write().unwrap_or_else(PoisonError::into_inner);
        if !client.0.is_null() {
            // SAFETY: exclusive access; the pointer is nulled so it is never reused.
            unsafe { td_json_client_destroy(client.0) };
            client.0 = std::ptr::null_mut();
        }
    }
}

impl Drop for TdJson {
    fn drop(&mut self) {
        self.close();
    }
}

fn encode(request: &Value) -> Option<CString> {
    match CString::new(request.to_string()) {
        Ok(s)  => Some(s),
        Err(e) => {
            tracing::error!("[tdjson] request contains a NUL byte: {e}");
            None
        }
    }
}

fn decode(raw: *const c_char) -> Option<Value> {
    if raw.is_null() {
        return None;
    }
    // SAFETY: TDLib returns a NUL-terminated UTF-8 string.
    let text = unsafe { CStr::from_ptr(raw) }.to_string_lossy();
    match serde_json::from_str(&text) {
        Ok(v)  => Some(v),
        Err(e) => {
            tracing::warn!("[tdjson] dropping unparseable update ({e}): {text}");
            None
        }
    }
}
