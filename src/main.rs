//! fedisim binary entry point
//!
//! Runs the mock federation server on its own so a server-under-test can be
//! driven by hand.

use std::sync::Arc;

use fedisim::config::HarnessConfig;
use fedisim::remote::{LoggingObserver, MockFederationServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging
/// 3. Initialize metrics
/// 4. Start the mock server with a logging observer
/// 5. Run until Ctrl-C
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration
    let config = HarnessConfig::load()?;

    // 2. Initialize tracing/logging
    let default_filter = format!("fedisim={},tower_http=debug", config.logging.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting fedisim mock peer...");

    // 3. Initialize metrics
    fedisim::metrics::init_metrics();

    // 4. Start mock server
    let mut server = MockFederationServer::new(config.remote.host.clone(), config.remote.port);
    if let Some(base_url) = &config.remote.public_base_url {
        server = server.with_public_base_url(base_url.clone());
    }
    let server = Arc::new(server);
    server.add_observer(Arc::new(LoggingObserver));

    let start_server = server.clone();
    let local_addr = tokio::task::spawn_blocking(move || start_server.start()).await??;
    tracing::info!(%local_addr, base_url = %server.base_url()?, "Mock peer listening");

    // 5. Run until Ctrl-C
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    tokio::task::spawn_blocking(move || server.stop()).await?;
    Ok(())
}
