//! Async Rust client for the Betfair Exchange JSON-RPC APIs.
//!
//! The crate is organized around a [`Session`]:
//! - `catalogue`: the remote operations of the betting, accounts, heartbeat
//!   and scores APIs, each exposed as a typed method on `Session`.
//! - `session`: session key lifecycle and generic invocation dispatch.
//! - `auth`: identity service login, keep-alive and logout.
//! - `invocation`: invocation values and the JSON-RPC transport.
//! - `emulator`: per-market emulation hooks.
//! - `invocation_log`: observer hook for every outbound call.
//! - `retry`: backoff helper used by the transport.
//!
//! ```no_run
//! use betfair_sdk::{Session, SessionOptions};
//! use secrecy::SecretString;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), betfair_sdk::SessionError> {
//! let session = Session::with_options("APP_KEY", SessionOptions::default())?;
//! session
//!     .login("user", &SecretString::new("password".to_string()))
//!     .await?;
//!
//! let event_types = session
//!     .list_event_types(&json!({ "filter": {} }))?
//!     .await?;
//! println!("{event_types}");
//! # Ok(())
//! # }
//! ```

/// Remote operation catalogue.
pub mod catalogue;
/// Identity service client.
pub mod auth;
/// Per-market emulation.
pub mod emulator;
/// Invocation values and transports.
pub mod invocation;
/// Invocation logging hook.
pub mod invocation_log;
/// Retry helpers used by the HTTP transport.
pub mod retry;
/// Session lifecycle and dispatch.
pub mod session;

pub use auth::{AuthError, AuthProvider, AuthResponse, AuthUrls, HttpAuthProvider};
pub use catalogue::{ApiFamily, Operation};
pub use emulator::{EmulationProvider, EmulatorLogLevel, MarketEmulator};
pub use invocation::{
    ApiEndpoints, HttpInvocationTransport, Invocation, InvocationTransport, TransportError,
    TransportOptions,
};
pub use invocation_log::{InvocationLogger, InvocationRecord, TracingInvocationLogger};
pub use session::{PendingCall, Session, SessionError, SessionOptions};
