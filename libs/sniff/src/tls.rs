//! SNI (Server Name Indication) extraction from TLS ClientHello.
//!
//! This module reads TLS records from the start of a connection until one
//! complete ClientHello handshake message has been assembled, then decodes
//! it far enough to find the `server_name` extension.
//!
//! The reader is consumed record by record: the 5-byte record header, then
//! exactly the declared payload. Nothing past the record that completes the
//! ClientHello is read, so wrapping the stream in a
//! [`CaptureReader`](crate::CaptureReader) yields exactly the bytes that have
//! to be replayed to the backend.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::SniffError;

/// Default time allowed for the client to deliver its ClientHello.
pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_secs(10);

/// Default upper bound on the ClientHello body length.
pub const DEFAULT_MAX_HANDSHAKE_LEN: usize = 65536;

/// Largest record payload a peer may send (2^14 plus expansion allowance).
pub const MAX_RECORD_LEN: usize = 16384 + 2048;

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

const RANDOM_LEN: usize = 32;
const MAX_SESSION_ID_LEN: usize = 32;

/// The parts of a ClientHello the proxy cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloSummary {
    /// First `host_name` entry of the `server_name` extension, if any.
    pub server_name: Option<String>,
    /// `legacy_version` field of the ClientHello body.
    pub client_version: u16,
    /// Length of the ClientHello body as declared in the handshake header.
    pub handshake_len: usize,
}

impl ClientHelloSummary {
    /// The hostname to route on; empty when the client sent no SNI.
    pub fn hostname(&self) -> &str {
        self.server_name.as_deref().unwrap_or("")
    }
}

/// Configuration for SNI inspection.
#[derive(Debug, Clone)]
pub struct SniConfig {
    /// Maximum time to wait for a complete ClientHello.
    pub timeout: Duration,
    /// Maximum accepted ClientHello body length.
    pub max_handshake_len: usize,
}

impl Default for SniConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SNIFF_TIMEOUT,
            max_handshake_len: DEFAULT_MAX_HANDSHAKE_LEN,
        }
    }
}

/// SNI inspector for TLS ClientHello parsing.
#[derive(Debug, Clone, Default)]
pub struct SniInspector {
    config: SniConfig,
}

impl SniInspector {
    /// Create a new SNI inspector with custom configuration.
    pub fn with_config(config: SniConfig) -> Self {
        Self { config }
    }

    /// Read one ClientHello from `reader` within the configured deadline.
    pub async fn inspect<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<ClientHelloSummary, SniffError> {
        match timeout(
            self.config.timeout,
            read_client_hello(reader, self.config.max_handshake_len),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SniffError::Timeout),
        }
    }
}

/// Read TLS records until a full ClientHello is assembled and decode it.
///
/// Fails on the first record that is not a handshake record, on a first
/// handshake message that is not a ClientHello, and on any length that
/// exceeds [`MAX_RECORD_LEN`] or `max_handshake_len`.
pub async fn read_client_hello<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_handshake_len: usize,
) -> Result<ClientHelloSummary, SniffError> {
    let mut message: Vec<u8> = Vec::new();
    let mut message_len: Option<usize> = None;
    let mut records = 0usize;

    loop {
        let mut header = [0u8; RECORD_HEADER_LEN];
        reader.read_exact(&mut header).await?;

        if header[0] != CONTENT_TYPE_HANDSHAKE {
            return Err(SniffError::UnexpectedRecordType(header[0]));
        }

        let record_len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if record_len > MAX_RECORD_LEN {
            return Err(SniffError::RecordTooLarge {
                len: record_len,
                max: MAX_RECORD_LEN,
            });
        }
        if record_len == 0 {
            return Err(SniffError::Malformed("empty handshake record"));
        }

        let start = message.len();
        message.resize(start + record_len, 0);
        reader.read_exact(&mut message[start..]).await?;
        records += 1;

        if start == 0 && message[0] != HANDSHAKE_TYPE_CLIENT_HELLO {
            return Err(SniffError::UnexpectedHandshakeType(message[0]));
        }

        if message_len.is_none() && message.len() >= HANDSHAKE_HEADER_LEN {
            let body_len = u24(&message[1..HANDSHAKE_HEADER_LEN]);
            if body_len > max_handshake_len {
                return Err(SniffError::HandshakeTooLarge {
                    len: body_len,
                    max: max_handshake_len,
                });
            }
            message_len = Some(HANDSHAKE_HEADER_LEN + body_len);
        }

        if let Some(total) = message_len {
            if message.len() >= total {
                let summary = parse_client_hello(&message[HANDSHAKE_HEADER_LEN..total])?;
                debug!(
                    server_name = ?summary.server_name,
                    records = records,
                    handshake_len = summary.handshake_len,
                    "ClientHello parsed"
                );
                return Ok(summary);
            }
        }
    }
}

/// Decode a ClientHello body (the bytes after the 4-byte handshake header).
///
/// ClientHello:
/// - 2 bytes: client version
/// - 32 bytes: random
/// - 1 byte + variable: session ID
/// - 2 bytes + variable: cipher suites
/// - 1 byte + variable: compression methods
/// - optional 2 bytes + variable: extensions
pub fn parse_client_hello(body: &[u8]) -> Result<ClientHelloSummary, SniffError> {
    let mut hello = Cursor::new(body);

    let client_version = hello.u16("client version")?;
    hello.take(RANDOM_LEN, "random")?;

    let session_id = hello.u8_prefixed("session id")?;
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(SniffError::Malformed("session id longer than 32 bytes"));
    }

    let cipher_suites = hello.u16_prefixed("cipher suites")?;
    if cipher_suites.len() % 2 != 0 {
        return Err(SniffError::Malformed("odd cipher suites length"));
    }

    hello.u8_prefixed("compression methods")?;

    let mut server_name = None;

    // Extensions are optional; a hello may end right after compression methods.
    if !hello.is_empty() {
        let mut extensions = Cursor::new(hello.u16_prefixed("extensions")?);
        if !hello.is_empty() {
            return Err(SniffError::Malformed("trailing bytes after extensions"));
        }

        while !extensions.is_empty() {
            let ext_type = extensions.u16("extension type")?;
            let payload = extensions.u16_prefixed("extension data")?;

            if ext_type == EXTENSION_SERVER_NAME && server_name.is_none() {
                server_name = parse_server_name(payload)?;
            }
        }
    }

    Ok(ClientHelloSummary {
        server_name,
        client_version,
        handshake_len: body.len(),
    })
}

/// Parse the SNI extension value.
///
/// SNI extension structure:
/// - 2 bytes: list length
/// - for each entry:
///   - 1 byte: name type (0 = hostname)
///   - 2 bytes: name length
///   - variable: name
fn parse_server_name(payload: &[u8]) -> Result<Option<String>, SniffError> {
    let mut ext = Cursor::new(payload);
    let mut list = Cursor::new(ext.u16_prefixed("server name list")?);
    if !ext.is_empty() {
        return Err(SniffError::Malformed("trailing bytes after server name list"));
    }

    while !list.is_empty() {
        let name_type = list.u8("server name type")?;
        let name = list.u16_prefixed("server name")?;

        if name_type == NAME_TYPE_HOST_NAME {
            if name.is_empty() {
                return Ok(None);
            }
            // Invalid UTF-8 is kept (replaced) so it misses routing instead of
            // failing the parse.
            return Ok(Some(String::from_utf8_lossy(name).into_owned()));
        }
    }

    Ok(None)
}

fn u24(bytes: &[u8]) -> usize {
    ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize)
}

/// Bounds-checked reader over an untrusted byte slice.
struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8], SniffError> {
        if self.data.len() < n {
            return Err(SniffError::Malformed(what));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, SniffError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, SniffError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u8_prefixed(&mut self, what: &'static str) -> Result<&'a [u8], SniffError> {
        let len = self.u8(what)? as usize;
        self.take(len, what)
    }

    fn u16_prefixed(&mut self, what: &'static str) -> Result<&'a [u8], SniffError> {
        let len = self.u16(what)? as usize;
        self.take(len, what)
    }
}
