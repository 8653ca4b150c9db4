//! TCP listener and connection handling.
//!
//! This module accepts TCP connections, extracts the hostname from the
//! client's first bytes, resolves it against the destination table, dials
//! the backend and relays the connection. Each accepted connection runs on
//! its own task and shares nothing with other connections except the
//! read-only destination table.
//!
//! Per connection:
//! - TLS front end: hostname from the ClientHello SNI extension
//! - HTTP front end: hostname from the request's `Host`
//! - Every byte read while sniffing is replayed to the backend first
//! - One log line when the connection closes, one per failure

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument, Level};

use tlsproxy_sniff::{CaptureReader, HostConfig, HostInspector, SniConfig, SniInspector};

use super::relay::relay;
use super::router::{RoutingDecision, SharedDestinationTable, DEFAULT_HTTP_PORT, DEFAULT_TLS_PORT};
use crate::error::ProxyError;

/// Default connect timeout for backend connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default idle timeout (none: relays wait for the peers to close).
pub const DEFAULT_IDLE_TIMEOUT: Option<Duration> = None;

/// Pause after a failed accept before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How a listener learns the hostname of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEnd {
    /// SNI from the TLS ClientHello.
    Tls,
    /// `Host` of a plain HTTP/1.x request.
    Http,
}

impl FrontEnd {
    /// Backend port used when a destination has none.
    pub fn default_port(self) -> u16 {
        match self {
            FrontEnd::Tls => DEFAULT_TLS_PORT,
            FrontEnd::Http => DEFAULT_HTTP_PORT,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrontEnd::Tls => "tls",
            FrontEnd::Http => "http",
        }
    }
}

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Hostname extraction method.
    pub front_end: FrontEnd,
    /// SNI inspection configuration (TLS front end).
    pub sni_config: SniConfig,
    /// Host inspection configuration (HTTP front end).
    pub host_config: HostConfig,
    /// Backend connect timeout.
    pub connect_timeout: Duration,
    /// Idle timeout for relayed connections.
    pub idle_timeout: Option<Duration>,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr, front_end: FrontEnd) -> Self {
        Self {
            bind_addr,
            front_end,
            sni_config: SniConfig::default(),
            host_config: HostConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// A TCP listener for the proxy.
pub struct Listener {
    /// Listener configuration.
    config: ListenerConfig,
    /// The TCP listener.
    listener: TcpListener,
    /// Destination table for routing decisions.
    table: SharedDestinationTable,
    /// SNI inspector.
    sni_inspector: SniInspector,
    /// Host inspector.
    host_inspector: HostInspector,
}

impl Listener {
    /// Bind a new listener.
    pub async fn bind(config: ListenerConfig, table: SharedDestinationTable) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            front_end = config.front_end.as_str(),
            "Listener bound"
        );

        Ok(Self {
            sni_inspector: SniInspector::with_config(config.sni_config.clone()),
            host_inspector: HostInspector::with_config(config.host_config.clone()),
            listener,
            config,
            table,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the listener, accepting and handling connections.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(
            bind_addr = %local_addr,
            front_end = self.config.front_end.as_str(),
            "Listener started"
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let listener = Arc::clone(&self);

                    tokio::spawn(
                        async move {
                            if let Err(e) = listener.handle_connection(stream, peer_addr).await {
                                log_connection_error(&e);
                            }
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Handle a single connection.
    async fn handle_connection(
        &self,
        client: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ProxyError> {
        debug!(peer_addr = %peer_addr, "Handling connection");

        let mut reader = CaptureReader::new(client);

        let hostname = match self.config.front_end {
            FrontEnd::Tls => self.sni_inspector.inspect(&mut reader).await?.server_name,
            FrontEnd::Http => self.host_inspector.inspect(&mut reader).await?.host,
        }
        .unwrap_or_default();

        let destination = match self.table.resolve(&hostname) {
            RoutingDecision::Matched { destination } => destination,
            RoutingDecision::NoMatch { reason } => {
                return Err(ProxyError::NoDestination { hostname, reason });
            }
        };

        let addr = destination.address(self.config.front_end.default_port());
        debug!(hostname = %hostname, backend_addr = %addr, "Connecting to backend");

        let backend = dial(&addr, self.config.connect_timeout).await?;

        let (client, captured) = reader.into_parts();
        let stats = relay(client, backend, &captured, self.config.idle_timeout).await?;

        info!(
            hostname = %hostname,
            destination = %addr,
            bytes_in = stats.to_upstream,
            bytes_out = stats.from_upstream,
            "Connection closed"
        );

        Ok(())
    }
}

/// Connect to a backend within `connect_timeout`.
async fn dial(addr: &str, connect_timeout: Duration) -> Result<TcpStream, ProxyError> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ProxyError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(ProxyError::ConnectTimeout {
            addr: addr.to_string(),
        }),
    }
}

/// Level a connection failure is logged at.
///
/// Clients that hang up or stall before sending a hostname are routine;
/// undecodable bytes and backend failures are not.
fn connection_error_level(e: &ProxyError) -> Level {
    match e {
        ProxyError::NoDestination { .. } => Level::INFO,
        ProxyError::Sniff(sniff) if sniff.is_transport() => Level::DEBUG,
        _ => Level::WARN,
    }
}

fn log_connection_error(e: &ProxyError) {
    if let ProxyError::NoDestination { hostname, reason } = e {
        info!(hostname = %hostname, reason = %reason, "No destination");
    } else if connection_error_level(e) == Level::DEBUG {
        debug!(error = %e, reason = e.reason_code(), "Client left before sending a hostname");
    } else {
        warn!(error = %e, reason = e.reason_code(), "Connection aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlsproxy_sniff::SniffError;

    #[test]
    fn test_listener_config_default() {
        let config = ListenerConfig::new("[::]:443".parse().unwrap(), FrontEnd::Tls);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert!(config.idle_timeout.is_none());
    }

    #[test]
    fn test_front_end_default_ports() {
        assert_eq!(FrontEnd::Tls.default_port(), 443);
        assert_eq!(FrontEnd::Http.default_port(), 80);
    }

    #[test]
    fn test_connection_error_levels() {
        let eof = SniffError::Io(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert_eq!(connection_error_level(&eof.into()), Level::DEBUG);
        assert_eq!(
            connection_error_level(&SniffError::Timeout.into()),
            Level::DEBUG
        );
        assert_eq!(
            connection_error_level(&SniffError::UnexpectedRecordType(0x47).into()),
            Level::WARN
        );

        let miss = ProxyError::NoDestination {
            hostname: "unknown.example".to_string(),
            reason: "no match".to_string(),
        };
        assert_eq!(connection_error_level(&miss), Level::INFO);

        let timeout = ProxyError::ConnectTimeout {
            addr: "10.0.0.5:443".to_string(),
        };
        assert_eq!(connection_error_level(&timeout), Level::WARN);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = unused.local_addr().unwrap().to_string();
        drop(unused);

        let err = dial(&addr, DEFAULT_CONNECT_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, ProxyError::Connect { .. }));
        assert_eq!(err.reason_code(), "connect_failed");
    }
}
