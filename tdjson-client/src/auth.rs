//! The login handshake.
//!
//! [`Client::login`] walks TDLib's authorization states one request at a
//! time: parameters → encryption key → phone number → code → password, until
//! TDLib reports `authorizationStateReady`. Every step is sent under the
//! reserved [`AUTH_REQUEST_ID`] and answered by the next
//! `updateAuthorizationState` push.

use std::io::{self, BufRead, Write};
use std::sync::atomic::Ordering;

use serde_json::{Value, json};

use crate::Client;
use crate::errors::Error;
use crate::methods::{TdlibParameters, build};
use crate::result::{AUTH_REQUEST_ID, AsyncResult, lock};

// ─── AuthorizationState ───────────────────────────────────────────────────────

/// TDLib's `AuthorizationState`, as far as login is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationState {
    WaitTdlibParameters,
    WaitEncryptionKey,
    WaitPhoneNumber,
    WaitCode,
    WaitPassword,
    Ready,
    /// Anything login has no step for (registration, logging out, closed, …).
    Other(String),
}

impl AuthorizationState {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "authorizationStateWaitTdlibParameters" => Self::WaitTdlibParameters,
            "authorizationStateWaitEncryptionKey"   => Self::WaitEncryptionKey,
            "authorizationStateWaitPhoneNumber"     => Self::WaitPhoneNumber,
            "authorizationStateWaitCode"            => Self::WaitCode,
            "authorizationStateWaitPassword"        => Self::WaitPassword,
            "authorizationStateReady"               => Self::Ready,
            other                                   => Self::Other(other.to_string()),
        }
    }

    /// Read the state out of an `updateAuthorizationState` push, or out of a
    /// bare `authorizationState*` object (the answer to `getAuthorizationState`).
    pub fn from_update(update: &Value) -> Result<Self, Error> {
        let kind = update.get("@type").and_then(Value::as_str);
        let state = if kind == Some(AUTH_REQUEST_ID) {
            update.get("authorization_state").and_then(|s| s.get("@type")).and_then(Value::as_str)
        } else {
            kind.filter(|k| k.starts_with("authorizationState"))
        };
        state.map(Self::from_type).ok_or(Error::MissingAuthorizationState)
    }
}

// ─── AuthInput ────────────────────────────────────────────────────────────────

/// Where login gets the secrets TDLib only asks for on demand.
pub trait AuthInput: Send + Sync + 'static {
    /// The login code Telegram just sent.
    fn code(&self) -> io::Result<String>;
    /// The 2FA password, when none is configured.
    fn password(&self) -> io::Result<String>;
}

/// Prompt on the terminal.
pub struct StdinInput;

impl AuthInput for StdinInput {
    fn code(&self) -> io::Result<String> {
        prompt("Enter the code you received: ")
    }

    fn password(&self) -> io::Result<String> {
        prompt("Enter your 2FA password: ")
    }
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{msg}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
    }
    Ok(line.trim().to_string())
}

/// Fixed answers, for scripted logins.
#[derive(Clone, Debug, Default)]
pub struct StaticInput {
    pub code:     String,
    pub password: String,
}

impl AuthInput for StaticInput {
    fn code(&self) -> io::Result<String> {
        Ok(self.code.clone())
    }

    fn password(&self) -> io::Result<String> {
        Ok(self.password.clone())
    }
}

// ─── Login ────────────────────────────────────────────────────────────────────

impl Client {
    /// `true` once login has seen `authorizationStateReady`.
    pub fn is_authorized(&self) -> bool {
        self.inner.authorized.load(Ordering::Acquire)
    }

    /// Drive the login handshake until TDLib reports ready.
    ///
    /// A no-op once authorized. Concurrent calls are serialised: only one
    /// login is in flight, later callers wait for it and then return.
    ///
    /// Parameters are sent up front. A `WaitTdlibParameters` state arriving
    /// right after that is TDLib's startup push, not a rejection, so login
    /// keeps waiting for the answer to the parameters already sent.
    pub fn login(&self) -> Result<(), Error> {
        let _login = lock(&self.inner.login_lock);
        if self.is_authorized() {
            return Ok(());
        }

        let mut state = None;
        let mut params_in_flight = false;
        loop {
            let startup_push = std::mem::take(&mut params_in_flight);
            let step = match &state {
                None => {
                    params_in_flight = true;
                    self.set_initial_params()?
                }
                Some(AuthorizationState::WaitTdlibParameters) if startup_push => {
                    tracing::debug!("[tdjson] startup push, parameters already sent");
                    self.inner.results.register(AUTH_REQUEST_ID)?
                }
                Some(AuthorizationState::WaitTdlibParameters) => self.set_initial_params()?,
                Some(AuthorizationState::WaitEncryptionKey) => self.send_encryption_key()?,
                Some(AuthorizationState::WaitPhoneNumber)   => self.send_phone_number()?,
                Some(AuthorizationState::WaitCode)          => self.send_code()?,
                Some(AuthorizationState::WaitPassword)      => self.send_password()?,
                Some(AuthorizationState::Ready) => {
                    self.inner.authorized.store(true, Ordering::Release);
                    tracing::info!("[tdjson] Authorized ✓");
                    return Ok(());
                }
                Some(AuthorizationState::Other(kind)) => {
                    return Err(Error::UnsupportedAuthorizationState(kind.clone()));
                }
            };

            let update = match self.inner.config.login_timeout {
                Some(timeout) => step.wait(timeout),
                None          => step.wait_indefinitely(),
            };
            let update = update.inspect_err(|_| step.discard())?;
            let next = AuthorizationState::from_update(&update)?;
            tracing::debug!("[tdjson] authorization state: {next:?}");
            state = Some(next);
        }
    }

    fn send_auth_step(&self, method: &str, params: Value) -> Result<AsyncResult, Error> {
        tracing::info!("[tdjson] login: {method}");
        self.send_with_id(build(method, params)?, AUTH_REQUEST_ID.to_string())
    }

    pub(crate) fn set_initial_params(&self) -> Result<AsyncResult, Error> {
        let parameters = TdlibParameters::from_config(&self.inner.config);
        self.send_auth_step("setTdlibParameters", json!({"parameters": parameters}))
    }

    pub(crate) fn send_encryption_key(&self) -> Result<AsyncResult, Error> {
        let key = self.inner.config.database_encryption_key.clone();
        self.send_auth_step("checkDatabaseEncryptionKey", json!({"encryption_key": key}))
    }

    pub(crate) fn send_phone_number(&self) -> Result<AsyncResult, Error> {
        let phone = self.inner.config.phone.clone();
        self.send_auth_step("setAuthenticationPhoneNumber", json!({
            "phone_number":           phone,
            "allow_flash_call":       false,
            "is_current_phone_number": true,
        }))
    }

    pub(crate) fn send_code(&self) -> Result<AsyncResult, Error> {
        let code = self.inner.config.auth_input.code()?;
        self.send_auth_step("checkAuthenticationCode", json!({"code": code}))
    }

    pub(crate) fn send_password(&self) -> Result<AsyncResult, Error> {
        let password = match &self.inner.config.password {
            Some(p) => p.clone(),
            None    => self.inner.config.auth_input.password()?,
        };
        self.send_auth_step("checkAuthenticationPassword", json!({"password": password}))
    }
}
