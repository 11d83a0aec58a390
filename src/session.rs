//! Authenticated exchange session.
//!
//! [`Session`] owns the session key and wires the auth provider, the
//! invocation transport and the optional emulation provider together. Every
//! catalogue operation goes through [`Session::invoke`], which validates the
//! params, snapshots the current session key into an [`Invocation`] and hands
//! it to the transport.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, trace};

use crate::auth::{AuthError, AuthProvider, AuthResponse, AuthUrls, HttpAuthProvider};
use crate::catalogue::Operation;
use crate::emulator::{EmulationProvider, EmulatorLogLevel, EmulatorOptions, MarketEmulator};
use crate::invocation::{
    HttpInvocationTransport, Invocation, InvocationTransport, TransportError, TransportOptions,
};
use crate::invocation_log::InvocationLogger;

/// Session construction options.
///
/// Deserializes from the camelCase option object
/// (`{"emulator": true, "emulatorLogLevel": "debug", "authUrls": {...}}`).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    /// Attach a [`MarketEmulator`].
    pub emulator: bool,
    pub emulator_log_level: EmulatorLogLevel,
    pub emulator_log_file: Option<PathBuf>,
    /// Overrides the identity service endpoints.
    pub auth_urls: Option<AuthUrls>,
    #[serde(skip)]
    pub transport: TransportOptions,
}

impl SessionOptions {
    fn emulator_options(&self) -> EmulatorOptions {
        EmulatorOptions {
            log_level: self.emulator_log_level,
            log_file: self.emulator_log_file.clone(),
        }
    }
}

/// Shared cell holding the current session key.
///
/// Reads and writes are not ordered against in-flight calls: an invocation
/// carries whatever key was stored when it was built.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    session_key: Arc<RwLock<Option<SecretString>>>,
}

impl SessionState {
    pub fn session_key(&self) -> Option<SecretString> {
        match self.session_key.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace(&self, session_key: Option<SecretString>) {
        match self.session_key.write() {
            Ok(mut guard) => *guard = session_key,
            Err(poisoned) => *poisoned.into_inner() = session_key,
        }
    }

    /// Stores `next` only while the cell still holds `expected`.
    ///
    /// Returns whether the write happened.
    fn replace_if(&self, expected: Option<&SecretString>, next: Option<SecretString>) -> bool {
        let mut guard = match self.session_key.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !same_key(guard.as_ref(), expected) {
            return false;
        }
        *guard = next;
        true
    }
}

fn same_key(current: Option<&SecretString>, expected: Option<&SecretString>) -> bool {
    match (current, expected) {
        (Some(current), Some(expected)) => current.expose_secret() == expected.expose_secret(),
        (None, None) => true,
        _ => false,
    }
}

/// Errors surfaced by [`Session`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Params did not serialize to a JSON object. Raised before dispatch.
    #[error("invalid params for {operation}: {reason}")]
    Validation {
        operation: &'static str,
        reason: String,
    },

    #[error("emulator is not enabled")]
    EmulatorNotEnabled,

    #[error("session configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{operation} failed: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: TransportError,
    },
}

/// In-flight catalogue call.
///
/// The invocation is already built when this value exists; awaiting it only
/// waits for the transport's outcome.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    operation: Operation,
    inner: BoxFuture<'static, Result<Value, SessionError>>,
}

impl PendingCall {
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl Future for PendingCall {
    type Output = Result<Value, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("operation", &self.operation)
            .finish()
    }
}

/// Authenticated session against the exchange.
pub struct Session {
    application_key: String,
    state: SessionState,
    auth: Arc<dyn AuthProvider>,
    transport: Arc<dyn InvocationTransport>,
    emulator: Option<Arc<dyn EmulationProvider>>,
}

impl Session {
    /// Creates a session with the default HTTP collaborators.
    pub fn new(application_key: impl Into<String>) -> Result<Self, SessionError> {
        Self::with_options(application_key, SessionOptions::default())
    }

    pub fn with_options(
        application_key: impl Into<String>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let application_key = application_key.into();
        let auth = HttpAuthProvider::with_options(
            application_key.as_str(),
            options.auth_urls.clone().unwrap_or_default(),
            &options.transport,
        )
        .map_err(|err| SessionError::Configuration(err.to_string()))?;
        let transport = HttpInvocationTransport::with_options(options.transport.clone())
            .map_err(|err| SessionError::Configuration(err.to_string()))?;

        Self::with_providers(application_key, &options, Arc::new(auth), Arc::new(transport))
    }

    /// Creates a session over caller-supplied collaborators.
    ///
    /// `options.auth_urls` and `options.transport` are ignored here; they only
    /// configure the default HTTP collaborators.
    pub fn with_providers(
        application_key: impl Into<String>,
        options: &SessionOptions,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn InvocationTransport>,
    ) -> Result<Self, SessionError> {
        let application_key = application_key.into();
        transport.set_application_key(&application_key);

        let session = Self {
            application_key,
            state: SessionState::default(),
            auth,
            transport,
            emulator: None,
        };

        if !options.emulator {
            return Ok(session);
        }
        let emulator = MarketEmulator::new(&options.emulator_options()).map_err(|err| {
            SessionError::Configuration(format!("cannot open emulator log: {err}"))
        })?;
        Ok(session.with_emulation_provider(Arc::new(emulator)))
    }

    /// Attaches an emulation provider and registers it with the transport.
    pub fn with_emulation_provider(mut self, emulator: Arc<dyn EmulationProvider>) -> Self {
        self.transport.set_emulator(Some(Arc::clone(&emulator)));
        self.emulator = Some(emulator);
        self
    }

    pub fn application_key(&self) -> &str {
        &self.application_key
    }

    /// Handle to the shared session key cell.
    pub fn state(&self) -> SessionState {
        self.state.clone()
    }

    pub fn session_key(&self) -> Option<SecretString> {
        self.state.session_key()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session_key().is_some()
    }

    /// Logs in and adopts the session key reported by the auth provider.
    ///
    /// On failure the stored key is left untouched.
    pub async fn login(
        &self,
        identity: &str,
        secret: &SecretString,
    ) -> Result<AuthResponse, SessionError> {
        let response = self.auth.login_interactive(identity, secret).await?;
        self.state.replace(response.session_key.clone());
        debug!(
            event = "session_authenticated",
            authenticated = response.session_key.is_some()
        );
        Ok(response)
    }

    /// Extends the current session; adopts a refreshed key when one is
    /// reported.
    ///
    /// A key stored by a login that completed meanwhile is kept.
    pub async fn keep_alive(&self) -> Result<AuthResponse, SessionError> {
        let sent = self.state.session_key();
        let response = self.auth.keep_alive(sent.clone()).await?;
        if let Some(session_key) = response.session_key.clone() {
            let adopted = self.state.replace_if(sent.as_ref(), Some(session_key));
            debug!(event = "session_kept_alive", adopted);
        }
        Ok(response)
    }

    /// Ends the current session and clears the stored key on success.
    ///
    /// The key is only cleared if it is still the one that was logged out.
    pub async fn logout(&self) -> Result<AuthResponse, SessionError> {
        let sent = self.state.session_key();
        let response = self.auth.logout(sent.clone()).await?;
        let cleared = self.state.replace_if(sent.as_ref(), None);
        debug!(event = "session_logged_out", cleared);
        Ok(response)
    }

    pub fn start_invocation_log(&self, logger: Arc<dyn InvocationLogger>) {
        self.auth.start_invocation_log(Arc::clone(&logger));
        self.transport.start_invocation_log(logger);
    }

    pub fn stop_invocation_log(&self) {
        self.auth.stop_invocation_log();
        self.transport.stop_invocation_log();
    }

    pub fn enable_emulation_for_market(&self, market_id: &str) -> Result<(), SessionError> {
        self.emulator()?.enable_emulation_for_market(market_id);
        Ok(())
    }

    pub fn disable_emulation_for_market(&self, market_id: &str) -> Result<(), SessionError> {
        self.emulator()?.disable_emulation_for_market(market_id);
        Ok(())
    }

    pub fn is_emulated_market(&self, market_id: &str) -> Result<bool, SessionError> {
        Ok(self.emulator()?.is_emulated_market(market_id))
    }

    /// Dispatches any catalogue operation.
    ///
    /// Validation and the session key snapshot happen here, before the
    /// returned [`PendingCall`] is polled.
    pub fn invoke<P>(&self, operation: Operation, params: &P) -> Result<PendingCall, SessionError>
    where
        P: Serialize + ?Sized,
    {
        let params = object_params(operation, params)?;
        let invocation = Invocation::new(operation, self.state.session_key(), params);
        trace!(
            event = "invocation_dispatched",
            api = %operation.family(),
            method = operation.name(),
            authenticated = invocation.session_key.is_some()
        );

        let transport = Arc::clone(&self.transport);
        let inner = async move {
            transport
                .execute(invocation)
                .await
                .map_err(|source| SessionError::Remote {
                    operation: operation.name(),
                    source,
                })
        }
        .boxed();

        Ok(PendingCall { operation, inner })
    }

    fn emulator(&self) -> Result<&Arc<dyn EmulationProvider>, SessionError> {
        self.emulator.as_ref().ok_or(SessionError::EmulatorNotEnabled)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("application_key", &self.application_key)
            .field("authenticated", &self.is_authenticated())
            .field("emulator", &self.emulator.is_some())
            .finish()
    }
}

fn object_params<P>(operation: Operation, params: &P) -> Result<Map<String, Value>, SessionError>
where
    P: Serialize + ?Sized,
{
    let invalid = |reason: String| SessionError::Validation {
        operation: operation.name(),
        reason,
    };

    match serde_json::to_value(params).map_err(|err| invalid(err.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(invalid(format!(
            "params should be an object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
