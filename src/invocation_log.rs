//! Observer hook for outbound invocations and auth operations.
//!
//! Loggers are registered and removed at runtime. Registration never changes
//! call results; a record is only built when a logger is active.

use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

/// One completed call, as seen by an [`InvocationLogger`].
#[derive(Clone, Debug, PartialEq)]
pub struct InvocationRecord {
    /// `auth` for identity calls, otherwise the API family name.
    pub service: &'static str,
    /// Remote method name, e.g. `listMarketBook` or `keepAlive`.
    pub method: &'static str,
    /// Request parameters with credentials removed.
    pub request: Value,
    /// Result payload or rendered error.
    pub outcome: Result<Value, String>,
    pub elapsed: Duration,
    /// Whether the call was answered by an emulation provider.
    pub emulated: bool,
}

/// Receives a record for every logged call.
pub trait InvocationLogger: Send + Sync {
    fn log_invocation(&self, record: &InvocationRecord);
}

/// Emits each record as a `tracing` event under the `betfair::invocation`
/// target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingInvocationLogger;

impl InvocationLogger for TracingInvocationLogger {
    fn log_invocation(&self, record: &InvocationRecord) {
        let elapsed_ms = record.elapsed.as_millis() as u64;
        match &record.outcome {
            Ok(_) => info!(
                target: "betfair::invocation",
                event = "invocation_completed",
                service = record.service,
                method = record.method,
                emulated = record.emulated,
                elapsed_ms
            ),
            Err(error) => warn!(
                target: "betfair::invocation",
                event = "invocation_failed",
                service = record.service,
                method = record.method,
                emulated = record.emulated,
                elapsed_ms,
                error = %error
            ),
        }
        debug!(
            target: "betfair::invocation",
            event = "invocation_payload",
            method = record.method,
            request = %record.request
        );
    }
}

/// Shared registration slot for an optional logger.
///
/// Clones share the slot, so a logger started through one handle is seen by
/// every other.
#[derive(Clone, Default)]
pub struct InvocationLog {
    logger: Arc<RwLock<Option<Arc<dyn InvocationLogger>>>>,
}

impl InvocationLog {
    pub fn start(&self, logger: Arc<dyn InvocationLogger>) {
        match self.logger.write() {
            Ok(mut guard) => *guard = Some(logger),
            Err(poisoned) => *poisoned.into_inner() = Some(logger),
        }
    }

    pub fn stop(&self) {
        match self.logger.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// Builds and delivers a record when a logger is registered.
    pub fn record_with<F>(&self, build: F)
    where
        F: FnOnce() -> InvocationRecord,
    {
        if let Some(logger) = self.current() {
            logger.log_invocation(&build());
        }
    }

    fn current(&self) -> Option<Arc<dyn InvocationLogger>> {
        match self.logger.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl fmt::Debug for InvocationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationLog")
            .field("active", &self.is_active())
            .finish()
    }
}
