//! Per-market emulation.
//!
//! An [`EmulationProvider`] decides which markets are answered locally and
//! answers the invocations a transport routes to it. [`MarketEmulator`] is
//! the default provider: it keeps the set of emulated markets and writes its
//! diagnostics through a dedicated `tracing` dispatcher, but has no matching
//! engine attached.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::level_filters::LevelFilter;
use tracing::{debug, dispatcher, info, warn, Dispatch};

use crate::invocation::{Invocation, TransportError};

/// Capability set of a local market simulation.
#[async_trait]
pub trait EmulationProvider: Send + Sync {
    fn enable_emulation_for_market(&self, market_id: &str);

    fn disable_emulation_for_market(&self, market_id: &str);

    fn is_emulated_market(&self, market_id: &str) -> bool;

    /// Answers an invocation routed away from the network.
    async fn execute(&self, invocation: &Invocation) -> Result<Value, TransportError> {
        Err(TransportError::Emulation(format!(
            "no simulation engine can answer {}",
            invocation.method_name()
        )))
    }
}

/// Verbosity of emulator diagnostics.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum EmulatorLogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl EmulatorLogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct EmulatorOptions {
    pub log_level: EmulatorLogLevel,
    /// Diagnostics are appended here instead of stderr when set.
    pub log_file: Option<PathBuf>,
}

/// Registry-only emulation provider.
pub struct MarketEmulator {
    markets: RwLock<HashSet<String>>,
    diagnostics: Dispatch,
}

impl MarketEmulator {
    pub fn new(options: &EmulatorOptions) -> std::io::Result<Self> {
        let builder = tracing_subscriber::fmt()
            .with_max_level(options.log_level.filter())
            .with_ansi(false)
            .with_target(false);

        let diagnostics = match &options.log_file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Dispatch::new(builder.with_writer(Mutex::new(file)).finish())
            }
            None => Dispatch::new(builder.with_writer(std::io::stderr).finish()),
        };

        Ok(Self {
            markets: RwLock::new(HashSet::new()),
            diagnostics,
        })
    }

    /// Markets currently routed to emulation, sorted.
    pub fn emulated_markets(&self) -> Vec<String> {
        let mut markets: Vec<String> = match self.markets.read() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        markets.sort();
        markets
    }

    fn update<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut HashSet<String>) -> bool,
    {
        match self.markets.write() {
            Ok(mut guard) => change(&mut guard),
            Err(poisoned) => change(&mut poisoned.into_inner()),
        }
    }

    fn diagnose<F: FnOnce()>(&self, emit: F) {
        dispatcher::with_default(&self.diagnostics, emit);
    }
}

impl Default for MarketEmulator {
    fn default() -> Self {
        Self {
            markets: RwLock::new(HashSet::new()),
            diagnostics: Dispatch::none(),
        }
    }
}

impl std::fmt::Debug for MarketEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketEmulator")
            .field("markets", &self.emulated_markets())
            .finish()
    }
}

#[async_trait]
impl EmulationProvider for MarketEmulator {
    fn enable_emulation_for_market(&self, market_id: &str) {
        let added = self.update(|markets| markets.insert(market_id.to_string()));
        self.diagnose(|| info!(event = "market_emulation_enabled", market_id, added));
    }

    fn disable_emulation_for_market(&self, market_id: &str) {
        let removed = self.update(|markets| markets.remove(market_id));
        self.diagnose(|| info!(event = "market_emulation_disabled", market_id, removed));
    }

    fn is_emulated_market(&self, market_id: &str) -> bool {
        let emulated = match self.markets.read() {
            Ok(guard) => guard.contains(market_id),
            Err(poisoned) => poisoned.into_inner().contains(market_id),
        };
        self.diagnose(|| debug!(event = "market_emulation_query", market_id, emulated));
        emulated
    }

    async fn execute(&self, invocation: &Invocation) -> Result<Value, TransportError> {
        let method = invocation.method_name();
        self.diagnose(|| warn!(event = "emulated_invocation_unanswered", method));
        Err(TransportError::Emulation(format!(
            "market emulator has no matching engine for {method}"
        )))
    }
}
