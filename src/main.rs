//! NodeBridge server - Main Entry Point
//!
//! Runs the bridge with the in-memory recording node space and the built-in
//! simulation modules, scanning the configured modules directory for more.

use anyhow::Context;
use nodebridge_rs::{
    config::BridgeConfig,
    engine::RecordingNodeSpace,
    module::{CounterFactory, CounterModule, SineFactory, SineModule},
    server::NodeBridgeServer,
};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const CONFIG_FILE: &str = "nodebridge.toml";
const LOG_DIR: &str = "logs";
const STATUS_PERIOD: Duration = Duration::from_secs(10);

fn main() -> anyhow::Result<()> {
    // Initialize logging: console plus a daily-rotated file
    let file_appender = tracing_appender::rolling::daily(LOG_DIR, "nodebridge.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nodebridge_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    tracing::info!("Starting NodeBridge server");

    let config = BridgeConfig::load_or_default(CONFIG_FILE);
    let node_space = RecordingNodeSpace::new();
    let mut server = NodeBridgeServer::new(config, Box::new(node_space.clone()));

    // Factories for directory-discovered modules
    server.register_factory(Box::new(SineFactory))?;
    server.register_factory(Box::new(CounterFactory))?;

    // Built-in demo producers
    server
        .install_module(
            "sine-demo",
            Box::new(
                SineModule::new("sine-demo")
                    .with_interval(Duration::from_millis(500))
                    .with_amplitude(10.0),
            ),
        )
        .context("failed to install sine demo module")?;
    server
        .install_module(
            "counter-demo",
            Box::new(CounterModule::new("counter-demo").with_interval(Duration::from_secs(1))),
        )
        .context("failed to install counter demo module")?;

    server.start().context("failed to start server")?;

    loop {
        std::thread::sleep(STATUS_PERIOD);
        let spaces = server.spaces()?;
        let (folders, variables) = node_space.live_counts();
        tracing::info!(
            spaces = spaces.len(),
            folders,
            variables,
            queued = server.mailbox().len(),
            "Bridge status"
        );
    }
}
