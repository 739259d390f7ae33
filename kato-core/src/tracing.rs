//! Structured logging setup and correlation IDs
//!
//! Utilities for wiring a `tracing` subscriber and tagging spans with
//! a per-request correlation ID, so one observation or prediction can
//! be followed across backend calls.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// UUID-based correlation ID for request tracing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub uuid::Uuid);

impl CorrelationId {
    /// Create a new correlation ID with a randomly generated UUID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Initialize the tracing subscriber with structured key-value output.
///
/// Safe to call more than once; only the first call installs the
/// subscriber.
///
/// # Arguments
///
/// * `filter` - Optional environment filter string
///   (e.g., `kato_core=debug,info`)
pub fn init_tracing(filter: Option<&str>) {
    INIT.call_once(|| {
        let filter = filter
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::try_new("info").unwrap_or_else(|_| EnvFilter::new("info")));

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    });
}
