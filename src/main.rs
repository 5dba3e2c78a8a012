//! MongoDB Audit Proxy
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │              MONGO AUDIT PROXY               │
//!                      │                                              │
//!   Client (driver)    │  ┌─────────┐   ┌───────────────────────────┐ │
//!   ───────────────────┼─▶│   net   │──▶│ session                   │ │
//!                      │  │listener │   │  client → upstream pump   │─┼──▶ MongoDB
//!                      │  └─────────┘   │    └ RequestInspector     │ │
//!   ◀──────────────────┼────────────────│  upstream → client pump   │◀┼─── server
//!                      │                │    └ ResponseInspector    │ │
//!                      │                └─────────────┬─────────────┘ │
//!                      │                              │               │
//!                      │   wire (framing, OP_MSG)     ▼               │
//!                      │   correlation table     audit sink           │
//!                      │                         (log, enrichment)    │
//!                      └──────────────────────────────────────────────┘
//! ```

use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use mongo_audit_proxy::audit::build_sink;
use mongo_audit_proxy::config::{resolve_config, Overrides};
use mongo_audit_proxy::lifecycle::signals::wait_for_signal;
use mongo_audit_proxy::lifecycle::Shutdown;
use mongo_audit_proxy::net::listener::Listener;
use mongo_audit_proxy::observability::{logging, metrics};
use mongo_audit_proxy::ProxyServer;

/// Transparent MongoDB proxy that audits write commands.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "MONGO_AUDIT_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on, on the configured bind host
    #[arg(long, env = "LISTEN_PORT")]
    listen_port: Option<u16>,

    /// Upstream connection string (e.g. "mongodb://localhost:27017")
    #[arg(long, env = "MONGO_CONNECTION_STRING")]
    upstream: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let overrides = Overrides {
        listen_port: cli.listen_port,
        upstream_uri: cli.upstream,
        log_level: cli.log_level,
    };
    let config = resolve_config(cli.config.as_deref(), &overrides)?;

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.uri,
        capture = config.capture.enabled,
        enrichment = config.audit.enrichment,
        "Starting mongo-audit-proxy"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let sink = build_sink(&config.audit, &config.upstream).await;
    let server = ProxyServer::new(&config, sink)?;
    let listener = Listener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("Shutdown requested");
        signal_shutdown.trigger();
    });

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
