//! Error types for sniffing.

use std::io;

use thiserror::Error;

/// Errors raised while extracting a hostname from the first bytes of a
/// connection.
#[derive(Debug, Error)]
pub enum SniffError {
    /// The underlying transport failed, including EOF before the message
    /// was complete.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The deadline expired before the message was complete.
    #[error("timed out waiting for client hello")]
    Timeout,

    /// A record other than handshake arrived before the ClientHello was
    /// complete.
    #[error("unexpected_record_type: {0:#04x}")]
    UnexpectedRecordType(u8),

    /// The first handshake message is not a ClientHello.
    #[error("unexpected_handshake_type: {0:#04x}")]
    UnexpectedHandshakeType(u8),

    /// Record length exceeds the TLS ciphertext limit.
    #[error("record_too_large: {len} bytes (max {max})")]
    RecordTooLarge { len: usize, max: usize },

    /// Handshake message length exceeds the configured limit.
    #[error("handshake_too_large: {len} bytes (max {max})")]
    HandshakeTooLarge { len: usize, max: usize },

    /// A length field or structure in the ClientHello is inconsistent.
    #[error("malformed client hello: {0}")]
    Malformed(&'static str),

    /// The HTTP request head could not be parsed.
    #[error("malformed http request: {0}")]
    Http(#[from] httparse::Error),

    /// The HTTP request head did not fit in the configured limit.
    #[error("headers_too_large: more than {max} bytes")]
    HeadersTooLarge { max: usize },
}

impl SniffError {
    /// Whether this error came from the transport rather than the bytes the
    /// peer sent.
    pub fn is_transport(&self) -> bool {
        matches!(self, SniffError::Io(_) | SniffError::Timeout)
    }

    /// Short, stable reason code for logs.
    pub fn reason_code(&self) -> &'static str {
        match self {
            SniffError::Io(_) => "io_error",
            SniffError::Timeout => "timeout",
            SniffError::UnexpectedRecordType(_) => "unexpected_record_type",
            SniffError::UnexpectedHandshakeType(_) => "unexpected_handshake_type",
            SniffError::RecordTooLarge { .. } => "record_too_large",
            SniffError::HandshakeTooLarge { .. } => "handshake_too_large",
            SniffError::Malformed(_) => "malformed_client_hello",
            SniffError::Http(_) => "malformed_http_request",
            SniffError::HeadersTooLarge { .. } => "headers_too_large",
        }
    }
}
