//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::time::Duration;

use fedisim::TestSession;
use fedisim::config::{HarnessConfig, PollingConfig, RemoteConfig};

/// Session bound to an ephemeral port with small keys and short waits
pub struct TestHarness {
    pub session: TestSession,
    pub client: reqwest::blocking::Client,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: HarnessConfig) -> Self {
        let session = TestSession::start(config).expect("session starts");
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap();
        Self { session, client }
    }

    /// Get full URL on the mock server for a path
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.session.base_url().unwrap(), path)
    }
}

pub fn test_config() -> HarnessConfig {
    HarnessConfig {
        remote: RemoteConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Let OS assign port
            post_timeout_secs: 5,
            key_bits: 1024,
            ..RemoteConfig::default()
        },
        polling: PollingConfig {
            tries: 3,
            period_ms: 20,
        },
        ..HarnessConfig::default()
    }
}
