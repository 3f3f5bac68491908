//! Request payloads.
//!
//! Every request is `{"@type": method, ...params}`; the client adds
//! `@extra.request_id` itself when sending. The typed helpers below are thin
//! wrappers over [`build`] for the calls applications use most.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::errors::Error;
use crate::result::AsyncResult;
use crate::{Client, Config};

/// Build `{"@type": method, ...params}`. `params` must be an object or null.
pub fn build(method: &str, params: Value) -> Result<Value, Error> {
    let mut payload = match params {
        Value::Null      => Map::new(),
        Value::Object(m) => m,
        other => return Err(Error::InvalidParams(format!("expected an object, got {other}"))),
    };
    payload.insert("@type".into(), Value::String(method.into()));
    Ok(Value::Object(payload))
}

// ─── TdlibParameters ──────────────────────────────────────────────────────────

/// The `parameters` object of `setTdlibParameters`.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct TdlibParameters {
    pub use_test_dc:          bool,
    pub api_id:               i32,
    pub api_hash:             String,
    pub device_model:         String,
    pub system_version:       String,
    pub application_version:  String,
    pub system_language_code: String,
    pub database_directory:   String,
    pub use_message_database: bool,
    pub files_directory:      String,
}

impl TdlibParameters {
    pub fn from_config(config: &Config) -> Self {
        let base = config.files_directory();
        Self {
            use_test_dc:          config.use_test_dc,
            api_id:               config.api_id,
            api_hash:             config.api_hash.clone(),
            device_model:         config.device_model.clone(),
            system_version:       config.system_version.clone(),
            application_version:  config.application_version.clone(),
            system_language_code: config.system_language_code.clone(),
            database_directory:   base.join("database").display().to_string(),
            use_message_database: config.use_message_database,
            files_directory:      base.join("files").display().to_string(),
        }
    }
}

// ─── Typed calls ──────────────────────────────────────────────────────────────

impl Client {
    /// Send a plain-text message.
    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<AsyncResult, Error> {
        self.call_method("sendMessage", json!({
            "chat_id": chat_id,
            "input_message_content": {
                "@type": "inputMessageText",
                "text": {"@type": "formattedText", "text": text},
            },
        }))
    }

    pub fn get_chat(&self, chat_id: i64) -> Result<AsyncResult, Error> {
        self.call_method("getChat", json!({"chat_id": chat_id}))
    }

    /// Page through the chat list, starting after (`offset_order`, `offset_chat_id`).
    pub fn get_chats(
        &self,
        offset_order:   i64,
        offset_chat_id: i64,
        limit:          i32,
    ) -> Result<AsyncResult, Error> {
        self.call_method("getChats", json!({
            "offset_order":   offset_order,
            "offset_chat_id": offset_chat_id,
            "limit":          limit,
        }))
    }

    /// Messages of a chat, newest first, starting at `from_message_id`.
    pub fn get_chat_history(
        &self,
        chat_id:         i64,
        limit:           i32,
        from_message_id: i64,
        offset:          i32,
        only_local:      bool,
    ) -> Result<AsyncResult, Error> {
        self.call_method("getChatHistory", json!({
            "chat_id":         chat_id,
            "limit":           limit,
            "from_message_id": from_message_id,
            "offset":          offset,
            "only_local":      only_local,
        }))
    }

    pub fn get_web_page_instant_view(&self, url: &str, force_full: bool) -> Result<AsyncResult, Error> {
        self.call_method("getWebPageInstantView", json!({"url": url, "force_full": force_full}))
    }

    /// The logged-in user.
    pub fn get_me(&self) -> Result<AsyncResult, Error> {
        self.call_method("getMe", Value::Null)
    }

    pub fn get_user(&self, user_id: i64) -> Result<AsyncResult, Error> {
        self.call_method("getUser", json!({"user_id": user_id}))
    }

    /// Ask for the current authorization state outside the login flow.
    pub fn get_authorization_state(&self) -> Result<AsyncResult, Error> {
        self.call_method("getAuthorizationState", Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn build_merges_params_under_type() {
        let payload = build("someMethod", json!({"param_1": "value_1", "param_2": 2})).unwrap();
        assert_eq!(payload, json!({"@type": "someMethod", "param_1": "value_1", "param_2": 2}));
    }

    #[test]
    fn build_accepts_null_params() {
        assert_eq!(build("getMe", Value::Null).unwrap(), json!({"@type": "getMe"}));
    }

    #[test]
    fn build_rejects_non_objects() {
        assert!(matches!(build("getMe", json!([1, 2])), Err(Error::InvalidParams(_))));
    }

    #[test]
    fn tdlib_parameters_layout() {
        let config = Config {
            api_id:   1,
            api_hash: "hash".into(),
            phone:    "+71234567890".into(),
            ..Default::default()
        };
        let params = serde_json::to_value(TdlibParameters::from_config(&config)).unwrap();
        assert_eq!(params["database_directory"], "/tmp/.tdlib_files/+71234567890/database");
        assert_eq!(params["files_directory"], "/tmp/.tdlib_files/+71234567890/files");
        assert_eq!(params["use_message_database"], true);
        assert_eq!(params["use_test_dc"], false);
        assert_eq!(params["system_language_code"], "en");
    }

    #[test]
    fn custom_files_directory() {
        let config = Config { files_directory: Some(PathBuf::from("/var/td")), ..Default::default() };
        let params = TdlibParameters::from_config(&config);
        assert_eq!(params.database_directory, "/var/td/database");
        assert_eq!(params.files_directory, "/var/td/files");
    }
}
