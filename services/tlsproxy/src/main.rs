//! tlsproxy
//!
//! Transparent TCP proxy with SNI routing.
//!
//! This service:
//! - Accepts TCP connections on the TLS listener (and optionally an HTTP one)
//! - Reads the hostname from the ClientHello SNI or the HTTP `Host`
//! - Dials the configured destination for that hostname
//! - Replays the bytes it read and relays the connection untouched

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tlsproxy::config::Config;
use tlsproxy::{FrontEnd, Listener};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    // Initialize tracing (prefer RUST_LOG, fallback to TLSPROXY_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting tlsproxy");

    let table = Arc::new(config.destination_table()?);
    let tls_addr = config.tls_listen_addr()?;
    let http_addr = config.http_listen_addr()?;

    info!(
        tls_listen = %tls_addr,
        http_listen = ?http_addr,
        destination_count = table.len(),
        "Configuration loaded"
    );
    if table.is_empty() {
        warn!("No destinations configured, every connection will be closed");
    }

    if let Some(http_addr) = http_addr {
        let listener = Listener::bind(
            config.listener_config(http_addr, FrontEnd::Http),
            Arc::clone(&table),
        )
        .await
        .with_context(|| format!("failed to bind HTTP listener on {http_addr}"))?;

        let listener = Arc::new(listener);
        tokio::spawn(async move {
            if let Err(e) = listener.run().await {
                error!(error = %e, "HTTP listener error");
            }
        });
    }

    let listener = Listener::bind(config.listener_config(tls_addr, FrontEnd::Tls), table)
        .await
        .with_context(|| format!("failed to bind TLS listener on {tls_addr}"))?;

    Arc::new(listener)
        .run()
        .await
        .context("TLS listener failed")
}
