//! Proxy configuration.
//!
//! Flags come from the command line with environment fallbacks. Destination
//! entries can also be listed in a TOML file; file entries are applied first
//! so command-line entries override them.

use std::net::{Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use tlsproxy_sniff::http::DEFAULT_MAX_HEADER_BYTES;
use tlsproxy_sniff::tls::DEFAULT_MAX_HANDSHAKE_LEN;
use tlsproxy_sniff::{HostConfig, SniConfig};

use crate::proxy::{DestinationTable, FrontEnd, ListenerConfig, DEFAULT_HTTP_PORT, DEFAULT_TLS_PORT};

/// Transparent TCP proxy that routes TLS connections by SNI.
#[derive(Debug, Clone, Parser)]
#[command(name = "tlsproxy", version, about, long_about = None)]
pub struct Config {
    /// Address for the TLS listener (`host:port`, `:port`, a port, or `https`).
    #[arg(long, env = "TLSPROXY_TLS_LISTEN", default_value = "https")]
    pub tls_listen: String,

    /// Address for the optional plain-HTTP listener.
    #[arg(long, env = "TLSPROXY_HTTP_LISTEN")]
    pub http_listen: Option<String>,

    /// TOML file with a `destinations = [...]` list.
    #[arg(long, env = "TLSPROXY_DESTINATIONS_FILE")]
    pub destinations_file: Option<PathBuf>,

    /// Time allowed for the client to send its ClientHello or request head.
    #[arg(long, env = "TLSPROXY_HANDSHAKE_TIMEOUT_MS", default_value_t = 10_000)]
    pub handshake_timeout_ms: u64,

    /// Backend connect timeout.
    #[arg(long, env = "TLSPROXY_CONNECT_TIMEOUT_MS", default_value_t = 2_000)]
    pub connect_timeout_ms: u64,

    /// Close relays idle for this long (no limit when unset).
    #[arg(long, env = "TLSPROXY_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: Option<u64>,

    /// Largest ClientHello accepted.
    #[arg(long, default_value_t = DEFAULT_MAX_HANDSHAKE_LEN)]
    pub max_handshake_bytes: usize,

    /// Largest HTTP request head accepted.
    #[arg(long, default_value_t = DEFAULT_MAX_HEADER_BYTES)]
    pub max_header_bytes: usize,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[arg(long, env = "TLSPROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Destination entries.
    #[arg(value_name = "HOSTNAME[:DESTINATION[:PORT]]")]
    pub destinations: Vec<String>,
}

/// On-disk destination list.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DestinationsFile {
    #[serde(default)]
    destinations: Vec<String>,
}

impl Config {
    /// Parsed TLS listen address.
    pub fn tls_listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.tls_listen)
            .with_context(|| format!("invalid --tls-listen `{}`", self.tls_listen))
    }

    /// Parsed HTTP listen address, if the HTTP front end is enabled.
    pub fn http_listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.http_listen
            .as_deref()
            .map(|value| {
                parse_listen_addr(value).with_context(|| format!("invalid --http-listen `{value}`"))
            })
            .transpose()
    }

    /// Build the destination table from the file (if any) and then the
    /// command-line entries.
    pub fn destination_table(&self) -> Result<DestinationTable> {
        let mut entries = match &self.destinations_file {
            Some(path) => load_destinations_file(path)?,
            None => Vec::new(),
        };
        entries.extend(self.destinations.iter().cloned());

        DestinationTable::from_entries(&entries).context("invalid destination entry")
    }

    /// Listener configuration for one front end.
    pub fn listener_config(&self, bind_addr: SocketAddr, front_end: FrontEnd) -> ListenerConfig {
        let handshake_timeout = Duration::from_millis(self.handshake_timeout_ms);

        let mut config = ListenerConfig::new(bind_addr, front_end);
        config.sni_config = SniConfig {
            timeout: handshake_timeout,
            max_handshake_len: self.max_handshake_bytes,
        };
        config.host_config = HostConfig {
            timeout: handshake_timeout,
            max_header_bytes: self.max_header_bytes,
        };
        config.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        config.idle_timeout = self.idle_timeout_secs.map(Duration::from_secs);
        config
    }
}

/// Read the `destinations` list from a TOML file.
pub fn load_destinations_file(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read destinations file {}", path.display()))?;
    let file: DestinationsFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse destinations file {}", path.display()))?;
    Ok(file.destinations)
}

/// Parse a listen address.
///
/// Accepts `host:port`, `[v6]:port`, `:port` and a bare port; a missing host
/// binds the IPv6 unspecified address, which also accepts IPv4 clients on
/// dual-stack hosts. The port may be `https` or `http`.
pub fn parse_listen_addr(value: &str) -> Result<SocketAddr> {
    let value = value.trim();
    if value.is_empty() {
        bail!("empty listen address");
    }

    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let (host, port) = match value.rsplit_once(':') {
        Some((host, port)) => (host, port),
        None => ("", value),
    };
    let port = parse_port(port)?;

    if host.is_empty() {
        return Ok(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)));
    }

    let host = host.trim_start_matches('[').trim_end_matches(']');
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve listen host `{host}`"))?
        .next()
        .with_context(|| format!("listen host `{host}` has no addresses"))
}

fn parse_port(value: &str) -> Result<u16> {
    match value {
        "https" => Ok(DEFAULT_TLS_PORT),
        "http" => Ok(DEFAULT_HTTP_PORT),
        _ => value
            .parse::<u16>()
            .with_context(|| format!("invalid port `{value}`")),
    }
}
