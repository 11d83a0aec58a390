//! Remote invocations and the transport that executes them.
//!
//! An [`Invocation`] is built once per call by the session and handed to an
//! [`InvocationTransport`]. [`HttpInvocationTransport`] posts it as a
//! JSON-RPC 2.0 request to the endpoint of its API family, or hands it to the
//! configured emulation provider when the invocation targets an emulated
//! market.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::trace;

use crate::catalogue::{ApiFamily, Operation};
use crate::emulator::EmulationProvider;
use crate::invocation_log::{InvocationLog, InvocationLogger, InvocationRecord};
use crate::retry::{retry_async, RetryPolicy};

const ERROR_BODY_SNIPPET_LEN: usize = 220;

pub const BETTING_API_URL: &str = "https://api.betfair.com/exchange/betting/json-rpc/v1";
pub const ACCOUNTS_API_URL: &str = "https://api.betfair.com/exchange/account/json-rpc/v1";
pub const HEARTBEAT_API_URL: &str = "https://api.betfair.com/exchange/heartbeat/json-rpc/v1";
pub const SCORES_API_URL: &str = "https://api.betfair.com/exchange/scores/json-rpc/v1";

/// One remote call: operation, session key snapshot and object params.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub operation: Operation,
    /// Session key current when the invocation was built.
    pub session_key: Option<SecretString>,
    pub params: Map<String, Value>,
}

impl Invocation {
    pub fn new(
        operation: Operation,
        session_key: Option<SecretString>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            operation,
            session_key,
            params,
        }
    }

    pub fn api(&self) -> ApiFamily {
        self.operation.family()
    }

    pub fn method_name(&self) -> &'static str {
        self.operation.name()
    }

    /// Market ids referenced by `marketId` or `marketIds`.
    pub fn market_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if let Some(id) = self.params.get("marketId").and_then(Value::as_str) {
            ids.push(id);
        }
        if let Some(list) = self.params.get("marketIds").and_then(Value::as_array) {
            ids.extend(list.iter().filter_map(Value::as_str));
        }
        ids
    }
}

/// Executes invocations against the exchange.
///
/// Configuration hooks take `&self`; implementations keep their
/// [`TransportConfig`] behind interior mutability so one transport can be
/// shared by every call of a session.
#[async_trait]
pub trait InvocationTransport: Send + Sync {
    async fn execute(&self, invocation: Invocation) -> Result<Value, TransportError>;

    fn set_application_key(&self, application_key: &str);

    fn set_emulator(&self, emulator: Option<Arc<dyn EmulationProvider>>);

    fn start_invocation_log(&self, logger: Arc<dyn InvocationLogger>);

    fn stop_invocation_log(&self);
}

/// Per-transport configuration set by the owning session.
#[derive(Clone, Default)]
pub struct TransportConfig {
    pub application_key: Option<String>,
    pub emulator: Option<Arc<dyn EmulationProvider>>,
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("application_key", &self.application_key)
            .field("emulator", &self.emulator.is_some())
            .finish()
    }
}

/// Endpoint of each API family.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiEndpoints {
    pub betting: String,
    pub accounts: String,
    pub heartbeat: String,
    pub scores: String,
}

impl ApiEndpoints {
    /// Standard exchange paths under an alternative origin.
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim().trim_end_matches('/');
        Self {
            betting: format!("{base}/exchange/betting/json-rpc/v1"),
            accounts: format!("{base}/exchange/account/json-rpc/v1"),
            heartbeat: format!("{base}/exchange/heartbeat/json-rpc/v1"),
            scores: format!("{base}/exchange/scores/json-rpc/v1"),
        }
    }

    pub fn for_family(&self, api: ApiFamily) -> &str {
        match api {
            ApiFamily::Betting => &self.betting,
            ApiFamily::Accounts => &self.accounts,
            ApiFamily::Heartbeat => &self.heartbeat,
            ApiFamily::Scores => &self.scores,
        }
    }
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            betting: BETTING_API_URL.to_string(),
            accounts: ACCOUNTS_API_URL.to_string(),
            heartbeat: HEARTBEAT_API_URL.to_string(),
            scores: SCORES_API_URL.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransportDefaults;

impl TransportDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const MAX_ATTEMPTS: usize = 2;
    pub const BACKOFF: Duration = Duration::from_millis(100);
    pub const MAX_BACKOFF: Duration = Duration::from_millis(400);
    pub const JITTER: Duration = Duration::from_millis(50);
}

/// HTTP settings shared by the auth and invocation transports.
#[derive(Clone, Debug)]
pub struct TransportOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Applied to non-transactional operations only.
    pub retry_policy: RetryPolicy,
    pub endpoints: ApiEndpoints,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: TransportDefaults::CONNECT_TIMEOUT,
            request_timeout: TransportDefaults::REQUEST_TIMEOUT,
            retry_policy: RetryPolicy {
                max_attempts: TransportDefaults::MAX_ATTEMPTS,
                initial_backoff: TransportDefaults::BACKOFF,
                max_backoff: TransportDefaults::MAX_BACKOFF,
                jitter: TransportDefaults::JITTER,
            },
            endpoints: ApiEndpoints::default(),
        }
    }
}

pub(crate) fn build_http_client(options: &TransportOptions) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(options.connect_timeout)
        .timeout(options.request_timeout)
        .build()
}

/// JSON-RPC over HTTPS transport.
pub struct HttpInvocationTransport {
    http: Client,
    options: TransportOptions,
    config: RwLock<TransportConfig>,
    log: InvocationLog,
}

impl HttpInvocationTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_options(TransportOptions::default())
    }

    pub fn with_options(options: TransportOptions) -> Result<Self, TransportError> {
        let http = build_http_client(&options).map_err(TransportError::Transport)?;
        Ok(Self {
            http,
            options,
            config: RwLock::new(TransportConfig::default()),
            log: InvocationLog::default(),
        })
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> TransportConfig {
        match self.config.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn configure<F: FnOnce(&mut TransportConfig)>(&self, change: F) {
        match self.config.write() {
            Ok(mut guard) => change(&mut guard),
            Err(poisoned) => change(&mut poisoned.into_inner()),
        }
    }

    async fn call_remote(
        &self,
        config: &TransportConfig,
        invocation: &Invocation,
    ) -> Result<Value, TransportError> {
        let operation = invocation.operation;
        let endpoint = self.options.endpoints.for_family(operation.family());
        let payload = json!({
            "jsonrpc": "2.0",
            "method": operation.rpc_method(),
            "params": invocation.params,
            "id": 1,
        });
        let policy = if operation.is_transactional() {
            RetryPolicy::single_attempt()
        } else {
            self.options.retry_policy.clone()
        };

        retry_async(
            &policy,
            operation.name(),
            |_| self.send_attempt(endpoint, config, invocation, &payload),
            TransportError::is_retryable,
        )
        .await
    }

    async fn send_attempt(
        &self,
        endpoint: &str,
        config: &TransportConfig,
        invocation: &Invocation,
        payload: &Value,
    ) -> Result<Value, TransportError> {
        let mut builder = self.http.post(endpoint).json(payload);
        if let Some(application_key) = config.application_key.as_deref() {
            builder = builder.header("X-Application", application_key);
        }
        if let Some(session_key) = invocation.session_key.as_ref() {
            builder = builder.header("X-Authentication", session_key.expose_secret().as_str());
        }

        let response = builder.send().await.map_err(TransportError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(TransportError::Transport)?;

        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status,
                body: summarize_body(&body),
            });
        }

        parse_rpc_response(&body)
    }
}

impl fmt::Debug for HttpInvocationTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpInvocationTransport")
            .field("options", &self.options)
            .field("config", &self.config())
            .field("log", &self.log)
            .finish()
    }
}

#[async_trait]
impl InvocationTransport for HttpInvocationTransport {
    async fn execute(&self, invocation: Invocation) -> Result<Value, TransportError> {
        let config = self.config();
        let started = Instant::now();
        let emulator = emulator_for(&config, &invocation);
        let emulated = emulator.is_some();
        trace!(
            event = "invocation_execute",
            api = %invocation.api(),
            method = invocation.method_name(),
            emulated
        );

        let result = match emulator {
            Some(emulator) => emulator.execute(&invocation).await,
            None => self.call_remote(&config, &invocation).await,
        };

        self.log.record_with(|| InvocationRecord {
            service: invocation.api().as_str(),
            method: invocation.method_name(),
            request: Value::Object(invocation.params.clone()),
            outcome: match &result {
                Ok(value) => Ok(value.clone()),
                Err(error) => Err(error.to_string()),
            },
            elapsed: started.elapsed(),
            emulated,
        });
        result
    }

    fn set_application_key(&self, application_key: &str) {
        let application_key = application_key.to_string();
        self.configure(|config| config.application_key = Some(application_key));
    }

    fn set_emulator(&self, emulator: Option<Arc<dyn EmulationProvider>>) {
        self.configure(|config| config.emulator = emulator);
    }

    fn start_invocation_log(&self, logger: Arc<dyn InvocationLogger>) {
        self.log.start(logger);
    }

    fn stop_invocation_log(&self) {
        self.log.stop();
    }
}

fn emulator_for(
    config: &TransportConfig,
    invocation: &Invocation,
) -> Option<Arc<dyn EmulationProvider>> {
    let emulator = config.emulator.as_ref()?;
    if !invocation.operation.is_emulatable() {
        return None;
    }
    invocation
        .market_ids()
        .into_iter()
        .any(|market_id| emulator.is_emulated_market(market_id))
        .then(|| Arc::clone(emulator))
}

/// Failure of a single remote operation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("json-rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("failed to parse response: {0}")]
    Parse(String),

    #[error("emulation failed: {0}")]
    Emulation(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Rpc { .. } | Self::Parse(_) | Self::Emulation(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

fn parse_rpc_response(body: &str) -> Result<Value, TransportError> {
    let mut envelope: Map<String, Value> =
        serde_json::from_str(body).map_err(|err| TransportError::Parse(err.to_string()))?;

    if let Some(error) = envelope.remove("error").filter(|error| !error.is_null()) {
        let error: RpcErrorBody = serde_json::from_value(error)
            .map_err(|err| TransportError::Parse(format!("malformed json-rpc error: {err}")))?;
        return Err(TransportError::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        });
    }

    envelope
        .remove("result")
        .ok_or_else(|| TransportError::Parse("json-rpc response has no result".to_string()))
}

pub(crate) fn summarize_body(body: &str) -> String {
    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}
