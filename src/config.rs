//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/testsuite.toml)
//! 3. Environment variables (override, `APTEST__SECTION__KEY`)

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;

use crate::error::HarnessError;
use crate::media::parse_content_type;
use crate::vocab::DEFAULT_AP_MEDIA_TYPE;

/// Legacy switch that disables the post-wait timeout
const DEBUGGING_ENV: &str = "APTEST_DEBUGGING";

/// Main harness configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Mock federation server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Bind host; also used in served URLs
    pub host: String,
    /// Port number (0 picks a free port)
    pub port: u16,
    /// Advertised base URL when it differs from `http://host:port`
    pub public_base_url: Option<String>,
    /// How long to wait for the server-under-test to POST
    pub post_timeout_secs: u64,
    /// Wait forever instead (for stepping through a server in a debugger)
    pub debugging: bool,
    /// RSA key size for simulated actors
    pub key_bits: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
            public_base_url: None,
            post_timeout_secs: 5,
            debugging: false,
            key_bits: crate::federation::KEY_BITS,
        }
    }
}

impl RemoteConfig {
    /// Post wait timeout; `None` (no deadline) in debugging mode or when
    /// `post_timeout_secs` is zero
    pub fn post_wait_timeout(&self) -> Option<Duration> {
        if self.debugging || self.post_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.post_timeout_secs))
        }
    }
}

/// Collection polling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub tries: u32,
    pub period_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            tries: 5,
            period_ms: 1000,
        }
    }
}

impl PollingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Outgoing HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Sent as `Accept` on GET and `Content-Type` on POST
    pub media_type: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Test servers commonly run with self-signed certificates
    pub accept_invalid_certs: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            media_type: DEFAULT_AP_MEDIA_TYPE.to_string(),
            timeout_secs: 30,
            user_agent: format!("fedisim/{}", env!("CARGO_PKG_VERSION")),
            accept_invalid_certs: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format ("json" or "pretty")
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from config/testsuite.toml and the environment
    pub fn load() -> Result<Self, HarnessError> {
        let builder = Self::defaults()?
            // Load from config/testsuite.toml if it exists
            .add_source(File::with_name("config/testsuite").required(false));
        Self::finish(builder)
    }

    /// Load configuration from an explicit file plus the environment
    pub fn load_from(path: &Path) -> Result<Self, HarnessError> {
        let builder = Self::defaults()?.add_source(File::from(path).required(true));
        Self::finish(builder)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, HarnessError> {
        let remote = RemoteConfig::default();
        let polling = PollingConfig::default();
        let client = ClientConfig::default();
        let logging = LoggingConfig::default();

        Ok(Config::builder()
            .set_default("remote.host", remote.host)?
            .set_default("remote.port", i64::from(remote.port))?
            .set_default("remote.post_timeout_secs", remote.post_timeout_secs as i64)?
            .set_default("remote.debugging", remote.debugging)?
            .set_default("remote.key_bits", remote.key_bits as i64)?
            .set_default("polling.tries", i64::from(polling.tries))?
            .set_default("polling.period_ms", polling.period_ms as i64)?
            .set_default("client.media_type", client.media_type)?
            .set_default("client.timeout_secs", client.timeout_secs as i64)?
            .set_default("client.user_agent", client.user_agent)?
            .set_default("client.accept_invalid_certs", client.accept_invalid_certs)?
            .set_default("logging.level", logging.level)?
            .set_default("logging.format", logging.format)?)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self, HarnessError> {
        let config = builder
            // Load from environment variables (APTEST__*)
            .add_source(
                Environment::with_prefix("APTEST")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut harness_config: Self = config.try_deserialize()?;
        if legacy_debugging_enabled(std::env::var(DEBUGGING_ENV).ok().as_deref()) {
            harness_config.remote.debugging = true;
        }
        harness_config.validate()?;
        Ok(harness_config)
    }

    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.polling.tries == 0 {
            return Err(HarnessError::Config(
                "polling.tries must be greater than 0".to_string(),
            ));
        }

        if self.remote.key_bits < 1024 {
            return Err(HarnessError::Config(
                "remote.key_bits must be at least 1024".to_string(),
            ));
        }

        if let Some(base_url) = &self.remote.public_base_url {
            url::Url::parse(base_url).map_err(|e| {
                HarnessError::Config(format!("remote.public_base_url is invalid: {}", e))
            })?;
        }

        parse_content_type(&self.client.media_type).map_err(|e| {
            HarnessError::Config(format!("client.media_type is invalid: {}", e))
        })?;

        if self.remote.debugging {
            tracing::warn!("Debugging mode: waiting for posts without a timeout");
        }

        Ok(())
    }
}

fn legacy_debugging_enabled(value: Option<&str>) -> bool {
    matches!(value, Some(v) if v.eq_ignore_ascii_case("true") || v == "1")
}
