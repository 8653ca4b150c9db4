//! Error types for proxied connections.

use std::io;

use thiserror::Error;
use tlsproxy_sniff::SniffError;

/// Reasons a single proxied connection ends early.
///
/// None of these are fatal to the process; each aborts one connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The hostname could not be extracted from the client's first bytes.
    #[error("sniff failed: {0}")]
    Sniff(#[from] SniffError),

    /// The hostname is absent or not configured.
    #[error("no destination: {reason}")]
    NoDestination { hostname: String, reason: String },

    /// The backend refused or failed the TCP connect.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The backend did not accept within the connect timeout.
    #[error("connect to {addr} timed out")]
    ConnectTimeout { addr: String },

    /// Writing the captured prefix to the backend failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Short, stable reason code for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            ProxyError::Sniff(e) => e.reason_code(),
            ProxyError::NoDestination { .. } => "no_destination",
            ProxyError::Connect { .. } => "connect_failed",
            ProxyError::ConnectTimeout { .. } => "connect_timeout",
            ProxyError::Io(_) => "io_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        let err = ProxyError::from(SniffError::UnexpectedRecordType(0x47));
        assert_eq!(err.reason_code(), "unexpected_record_type");

        let err = ProxyError::NoDestination {
            hostname: "unknown.example".to_string(),
            reason: "`unknown.example` does not match any destination host".to_string(),
        };
        assert_eq!(err.reason_code(), "no_destination");
        assert!(err.to_string().contains("unknown.example"));
    }
}
