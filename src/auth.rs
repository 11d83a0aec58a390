//! Identity service: interactive login, keep-alive and logout.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::invocation::{build_http_client, summarize_body, TransportOptions};
use crate::invocation_log::{InvocationLog, InvocationLogger, InvocationRecord};

pub const LOGIN_URL: &str = "https://identitysso.betfair.com/api/login";
pub const KEEP_ALIVE_URL: &str = "https://identitysso.betfair.com/api/keepAlive";
pub const LOGOUT_URL: &str = "https://identitysso.betfair.com/api/logout";

/// Capability set of the identity service.
///
/// `keep_alive` and `logout` receive whatever session key the caller holds,
/// including none; rejecting an absent key is left to the remote side.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn login_interactive(
        &self,
        identity: &str,
        secret: &SecretString,
    ) -> Result<AuthResponse, AuthError>;

    async fn keep_alive(&self, session_key: Option<SecretString>)
        -> Result<AuthResponse, AuthError>;

    async fn logout(&self, session_key: Option<SecretString>) -> Result<AuthResponse, AuthError>;

    fn start_invocation_log(&self, logger: Arc<dyn InvocationLogger>);

    fn stop_invocation_log(&self);
}

/// Identity service endpoints.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthUrls {
    pub login: String,
    pub keep_alive: String,
    pub logout: String,
}

impl AuthUrls {
    /// Standard `/api/*` paths under an alternative origin.
    pub fn with_base_url(base_url: &str) -> Self {
        let base = base_url.trim().trim_end_matches('/');
        Self {
            login: format!("{base}/api/login"),
            keep_alive: format!("{base}/api/keepAlive"),
            logout: format!("{base}/api/logout"),
        }
    }
}

impl Default for AuthUrls {
    fn default() -> Self {
        Self {
            login: LOGIN_URL.to_string(),
            keep_alive: KEEP_ALIVE_URL.to_string(),
            logout: LOGOUT_URL.to_string(),
        }
    }
}

/// Successful identity service reply.
#[derive(Clone, Debug)]
pub struct AuthResponse {
    /// Session key issued or confirmed by the service.
    pub session_key: Option<SecretString>,
    pub product: Option<String>,
    pub status: String,
}

impl AuthResponse {
    /// Loggable form with the session key removed.
    pub fn redacted(&self) -> Value {
        json!({
            "status": self.status,
            "product": self.product,
            "sessionKey": self.session_key.as_ref().map(|_| "<redacted>"),
        })
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("identity request failed: {0}")]
    Transport(reqwest::Error),

    #[error("identity http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("identity service returned {status}: {error}")]
    Rejected { status: String, error: String },

    #[error("login succeeded without a session key")]
    MissingSessionKey,

    #[error("failed to parse identity response: {0}")]
    Parse(String),
}

/// [`AuthProvider`] backed by the identity service's form API.
pub struct HttpAuthProvider {
    http: Client,
    application_key: String,
    urls: AuthUrls,
    log: InvocationLog,
}

impl HttpAuthProvider {
    pub fn new(application_key: impl Into<String>) -> Result<Self, AuthError> {
        Self::with_options(
            application_key,
            AuthUrls::default(),
            &TransportOptions::default(),
        )
    }

    pub fn with_options(
        application_key: impl Into<String>,
        urls: AuthUrls,
        options: &TransportOptions,
    ) -> Result<Self, AuthError> {
        let http = build_http_client(options).map_err(AuthError::Transport)?;
        Ok(Self {
            http,
            application_key: application_key.into(),
            urls,
            log: InvocationLog::default(),
        })
    }

    pub fn urls(&self) -> &AuthUrls {
        &self.urls
    }

    async fn send(
        &self,
        url: &str,
        session_key: Option<&SecretString>,
        form: Option<&[(&str, &str)]>,
    ) -> Result<AuthResponse, AuthError> {
        let mut builder = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .header("X-Application", self.application_key.as_str());
        if let Some(session_key) = session_key {
            builder = builder.header("X-Authentication", session_key.expose_secret().as_str());
        }
        if let Some(form) = form {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(AuthError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(AuthError::Transport)?;

        if !status.is_success() {
            return Err(AuthError::HttpStatus {
                status,
                body: summarize_body(&body),
            });
        }

        parse_auth_response(&body)
    }

    fn record(
        &self,
        method: &'static str,
        request: Value,
        result: &Result<AuthResponse, AuthError>,
        started: Instant,
    ) {
        self.log.record_with(|| InvocationRecord {
            service: "auth",
            method,
            request,
            outcome: match result {
                Ok(response) => Ok(response.redacted()),
                Err(error) => Err(error.to_string()),
            },
            elapsed: started.elapsed(),
            emulated: false,
        });
    }
}

impl fmt::Debug for HttpAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAuthProvider")
            .field("urls", &self.urls)
            .field("log", &self.log)
            .finish()
    }
}

#[async_trait]
impl AuthProvider for HttpAuthProvider {
    async fn login_interactive(
        &self,
        identity: &str,
        secret: &SecretString,
    ) -> Result<AuthResponse, AuthError> {
        let started = Instant::now();
        let form = [
            ("username", identity),
            ("password", secret.expose_secret().as_str()),
        ];
        let result = match self.send(&self.urls.login, None, Some(&form[..])).await {
            Ok(response) if response.session_key.is_none() => Err(AuthError::MissingSessionKey),
            other => other,
        };
        debug!(event = "login_completed", ok = result.is_ok());
        self.record("login", json!({ "username": identity }), &result, started);
        result
    }

    async fn keep_alive(
        &self,
        session_key: Option<SecretString>,
    ) -> Result<AuthResponse, AuthError> {
        let started = Instant::now();
        let result = self
            .send(&self.urls.keep_alive, session_key.as_ref(), None)
            .await;
        debug!(event = "keep_alive_completed", ok = result.is_ok());
        self.record("keepAlive", json!({}), &result, started);
        result
    }

    async fn logout(&self, session_key: Option<SecretString>) -> Result<AuthResponse, AuthError> {
        let started = Instant::now();
        let result = self.send(&self.urls.logout, session_key.as_ref(), None).await;
        debug!(event = "logout_completed", ok = result.is_ok());
        self.record("logout", json!({}), &result, started);
        result
    }

    fn start_invocation_log(&self, logger: Arc<dyn InvocationLogger>) {
        self.log.start(logger);
    }

    fn stop_invocation_log(&self) {
        self.log.stop();
    }
}

#[derive(Debug, Deserialize)]
struct IdentityBody {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    product: Option<String>,
    status: String,
    #[serde(default)]
    error: Option<String>,
}

fn parse_auth_response(body: &str) -> Result<AuthResponse, AuthError> {
    let parsed: IdentityBody =
        serde_json::from_str(body).map_err(|err| AuthError::Parse(err.to_string()))?;

    if !parsed.status.eq_ignore_ascii_case("SUCCESS") {
        return Err(AuthError::Rejected {
            status: parsed.status,
            error: parsed
                .error
                .filter(|error| !error.is_empty())
                .unwrap_or_else(|| "unknown failure".to_string()),
        });
    }

    Ok(AuthResponse {
        session_key: parsed
            .token
            .filter(|token| !token.is_empty())
            .map(SecretString::new),
        product: parsed.product.filter(|product| !product.is_empty()),
        status: parsed.status,
    })
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::{parse_auth_response, AuthError, AuthUrls, LOGIN_URL};

    #[test]
    fn parse_successful_login() {
        let body = r#"{"token":"SESSION","product":"APP","status":"SUCCESS","error":""}"#;
        let parsed = parse_auth_response(body).expect("parse success");
        assert_eq!(
            parsed.session_key.as_ref().map(|key| key.expose_secret().as_str()),
            Some("SESSION")
        );
        assert_eq!(parsed.product.as_deref(), Some("APP"));
    }

    #[test]
    fn parse_failure_as_rejection() {
        let body = r#"{"token":"","product":"APP","status":"FAIL","error":"INVALID_USERNAME_OR_PASSWORD"}"#;
        match parse_auth_response(body).expect_err("fail status") {
            AuthError::Rejected { status, error } => {
                assert_eq!(status, "FAIL");
                assert_eq!(error, "INVALID_USERNAME_OR_PASSWORD");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn empty_token_is_treated_as_absent() {
        let parsed = parse_auth_response(r#"{"token":"","status":"SUCCESS"}"#).expect("parse");
        assert!(parsed.session_key.is_none());
    }

    #[test]
    fn redacted_response_hides_session_key() {
        let parsed = parse_auth_response(r#"{"token":"SESSION","status":"SUCCESS"}"#)
            .expect("parse");
        let rendered = parsed.redacted().to_string();
        assert!(!rendered.contains("SESSION"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn urls_default_to_identity_service() {
        assert_eq!(AuthUrls::default().login, LOGIN_URL);
        let local = AuthUrls::with_base_url("http://127.0.0.1:8080/");
        assert_eq!(local.keep_alive, "http://127.0.0.1:8080/api/keepAlive");
    }

    #[test]
    fn partial_url_override_keeps_defaults() {
        let urls: AuthUrls =
            serde_json::from_str(r#"{"login":"https://identitysso.betfair.es/api/login"}"#)
                .expect("parse urls");
        assert_eq!(urls.login, "https://identitysso.betfair.es/api/login");
        assert_eq!(urls.logout, super::LOGOUT_URL);
    }
}
