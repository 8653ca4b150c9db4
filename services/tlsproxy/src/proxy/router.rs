//! Destination table and routing decisions.
//!
//! The table maps a hostname (from SNI or the HTTP `Host` header) to the
//! backend that serves it:
//! - Exact, case-sensitive hostname match only (no wildcards, no suffixes)
//! - No default backend: an empty or unknown hostname is a routing miss
//! - Built once at startup and shared read-only between connections
//!
//! Entries are written `hostname[:destination[:port]]`. Without a
//! destination the hostname itself is dialed; without a port the listener's
//! default port is used.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

/// Default backend port for destinations reached through the TLS listener.
pub const DEFAULT_TLS_PORT: u16 = 443;

/// Default backend port for destinations reached through the HTTP listener.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Errors in a destination entry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DestinationError {
    #[error("destination entry `{0}` has an empty hostname")]
    EmptyHostname(String),

    #[error("destination entry `{0}` has an empty destination")]
    EmptyDestination(String),

    #[error("destination `{0}` has an invalid host (bracket IPv6 literals)")]
    InvalidHost(String),

    #[error("destination `{entry}` has an invalid port `{port}`")]
    InvalidPort { entry: String, port: String },
}

/// A backend address, possibly without a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Hostname, IPv4 literal or bracketed IPv6 literal.
    pub host: String,
    pub port: Option<u16>,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` to dial, filling in `default_port` when none was configured.
    pub fn address(&self, default_port: u16) -> String {
        format!("{}:{}", self.host, self.port.unwrap_or(default_port))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

impl FromStr for Destination {
    type Err = DestinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DestinationError::EmptyDestination(s.to_string()));
        }

        let (host, port) = if s.starts_with('[') {
            let Some(end) = s.find(']') else {
                return Err(DestinationError::InvalidHost(s.to_string()));
            };
            let (host, rest) = s.split_at(end + 1);
            match rest {
                "" => (host, None),
                _ => match rest.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => return Err(DestinationError::InvalidHost(s.to_string())),
                },
            }
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() || (!host.starts_with('[') && host.contains(':')) {
            return Err(DestinationError::InvalidHost(s.to_string()));
        }

        let port = port
            .map(|p| {
                p.parse::<u16>()
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or_else(|| DestinationError::InvalidPort {
                        entry: s.to_string(),
                        port: p.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self::new(host, port))
    }
}

/// Parse one `hostname[:destination[:port]]` entry.
pub fn parse_entry(entry: &str) -> Result<(String, Destination), DestinationError> {
    let (hostname, destination) = match entry.split_once(':') {
        Some((hostname, destination)) => {
            if destination.is_empty() {
                return Err(DestinationError::EmptyDestination(entry.to_string()));
            }
            (hostname, destination.parse::<Destination>()?)
        }
        None => (entry, Destination::new(entry, None)),
    };

    if hostname.is_empty() {
        return Err(DestinationError::EmptyHostname(entry.to_string()));
    }

    Ok((hostname.to_string(), destination))
}

/// Result of a routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Destination found, proceed with the dial.
    Matched { destination: Destination },
    /// No destination for this hostname.
    NoMatch { reason: String },
}

/// Hostname to destination table.
#[derive(Debug, Clone, Default)]
pub struct DestinationTable {
    routes: HashMap<String, Destination>,
}

/// Table shared by every connection task.
pub type SharedDestinationTable = Arc<DestinationTable>;

impl DestinationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from entries in order; a later entry for the same
    /// hostname replaces the earlier one.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, DestinationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::new();
        for entry in entries {
            let (hostname, destination) = parse_entry(entry.as_ref())?;
            table.insert(hostname, destination);
        }
        Ok(table)
    }

    /// Add a route, returning the destination it replaced.
    pub fn insert(
        &mut self,
        hostname: impl Into<String>,
        destination: Destination,
    ) -> Option<Destination> {
        let hostname = hostname.into();
        let previous = self.routes.insert(hostname.clone(), destination);
        if let Some(previous) = &previous {
            debug!(hostname = %hostname, replaced = %previous, "Destination overridden");
        }
        previous
    }

    /// Look up the destination for a hostname.
    pub fn get(&self, hostname: &str) -> Option<&Destination> {
        self.routes.get(hostname)
    }

    /// Make a routing decision for a hostname.
    pub fn resolve(&self, hostname: &str) -> RoutingDecision {
        if hostname.is_empty() {
            return RoutingDecision::NoMatch {
                reason: "client sent no hostname".to_string(),
            };
        }

        match self.routes.get(hostname) {
            Some(destination) => RoutingDecision::Matched {
                destination: destination.clone(),
            },
            None => RoutingDecision::NoMatch {
                reason: format!("`{hostname}` does not match any destination host"),
            },
        }
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
