//! Prometheus metrics registry and instruments.
//!
//! Counters are usable without registration; `init_metrics` only makes
//! them visible through `REGISTRY`.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Mock server
    pub static ref MOCK_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisim_mock_requests_total", "Requests received by the mock federation server"),
        &["method", "status"]
    ).expect("metric can be created");

    // Signatures
    pub static ref SIGNATURES_VERIFIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisim_signatures_verified_total", "HTTP signature verifications"),
        &["outcome"]
    ).expect("metric can be created");

    // Polling
    pub static ref POLL_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedisim_poll_attempts_total", "Collection polling attempts"),
        &["outcome"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(MOCK_REQUESTS_TOTAL.clone()))
        .expect("MOCK_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(SIGNATURES_VERIFIED_TOTAL.clone()))
        .expect("SIGNATURES_VERIFIED_TOTAL can be registered");
    REGISTRY
        .register(Box::new(POLL_ATTEMPTS_TOTAL.clone()))
        .expect("POLL_ATTEMPTS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
