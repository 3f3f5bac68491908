//! Update-type → handler table.
//!
//! Handlers registered for an update's `@type` run for it; when none are,
//! the catch-all handlers run instead.

use std::collections::HashMap;
use std::sync::{RwLock, PoisonError};

use crate::worker::Handler;

#[derive(Default)]
pub struct HandlerRegistry {
    by_type:   RwLock<HashMap<String, Vec<Handler>>>,
    catch_all: RwLock<Vec<Handler>>,
}

impl HandlerRegistry {
    pub fn add(&self, update_type: impl Into<String>, handler: Handler) {
        self.by_type.write().unwrap_or_else(PoisonError::into_inner)
            .entry(update_type.into())
            .or_default()
            .push(handler);
    }

    pub fn add_catch_all(&self, handler: Handler) {
        self.catch_all.write().unwrap_or_else(PoisonError::into_inner).push(handler);
    }

    /// Drop every handler registered for `update_type`. Returns how many.
    pub fn remove(&self, update_type: &str) -> usize {
        self.by_type.write().unwrap_or_else(PoisonError::into_inner)
            .remove(update_type)
            .map_or(0, |v| v.len())
    }

    /// The handlers an update of `update_type` goes to, in registration order.
    pub fn for_type(&self, update_type: &str) -> Vec<Handler> {
        let by_type = self.by_type.read().unwrap_or_else(PoisonError::into_inner);
        match by_type.get(update_type) {
            Some(handlers) if !handlers.is_empty() => handlers.clone(),
            _ => self.catch_all.read().unwrap_or_else(PoisonError::into_inner).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Client;
    use crate::errors::HandlerError;
    use serde_json::Value;
    use std::sync::Arc;

    fn noop() -> Handler {
        Arc::new(|_: &Client, _: &Value| -> Result<(), HandlerError> { Ok(()) })
    }

    #[test]
    fn specific_handlers_shadow_catch_all() {
        let reg = HandlerRegistry::default();
        let specific = noop();
        let fallback = noop();
        reg.add("updateNewMessage", specific.clone());
        reg.add_catch_all(fallback.clone());

        let got = reg.for_type("updateNewMessage");
        assert_eq!(got.len(), 1);
        assert!(Arc::ptr_eq(&got[0], &specific));

        let got = reg.for_type("updateUser");
        assert_eq!(got.len(), 1);
        assert!(Arc::ptr_eq(&got[0], &fallback));
    }

    #[test]
    fn nothing_registered_means_nothing_to_run() {
        let reg = HandlerRegistry::default();
        assert!(reg.for_type("updateNewMessage").is_empty());
    }

    #[test]
    fn remove_falls_back_to_catch_all() {
        let reg = HandlerRegistry::default();
        reg.add("updateChatTitle", noop());
        reg.add("updateChatTitle", noop());
        assert_eq!(reg.remove("updateChatTitle"), 2);
        assert_eq!(reg.remove("updateChatTitle"), 0);
        assert!(reg.for_type("updateChatTitle").is_empty());
    }
}
