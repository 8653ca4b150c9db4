//! HTTP Host extraction for the plain-HTTP front end.
//!
//! Reads the request head of one HTTP/1.x request and reports the host the
//! client asked for. Reads happen in chunks, so bytes after the head (a
//! request body, or a pipelined request) may be read too; when the stream is
//! wrapped in a [`CaptureReader`](crate::CaptureReader) those bytes are
//! captured and forwarded along with the head.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::SniffError;

/// Default time allowed for the client to deliver its request head.
pub const DEFAULT_HOST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum size of a request head.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;

const READ_CHUNK_LEN: usize = 1024;
const MAX_HEADERS: usize = 64;

/// Request line and host of a parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    /// Host from an absolute-form target, else the `Host` header value.
    pub host: Option<String>,
    pub method: String,
    pub path: String,
    /// Length of the request head including the terminating blank line.
    pub head_len: usize,
}

impl RequestSummary {
    /// The hostname to route on; empty when the request named no host.
    pub fn hostname(&self) -> &str {
        self.host.as_deref().unwrap_or("")
    }
}

/// Configuration for Host inspection.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Maximum time to wait for a complete request head.
    pub timeout: Duration,
    /// Maximum request head size.
    pub max_header_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_HOST_TIMEOUT,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

/// Host inspector for HTTP/1.x request heads.
#[derive(Debug, Clone, Default)]
pub struct HostInspector {
    config: HostConfig,
}

impl HostInspector {
    pub fn with_config(config: HostConfig) -> Self {
        Self { config }
    }

    /// Read one request head from `reader` within the configured deadline.
    pub async fn inspect<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
    ) -> Result<RequestSummary, SniffError> {
        match timeout(
            self.config.timeout,
            read_request_head(reader, self.config.max_header_bytes),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SniffError::Timeout),
        }
    }
}

/// Read until a complete request head is available and summarize it.
///
/// Never reads more than `max_header_bytes` in total.
pub async fn read_request_head<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_header_bytes: usize,
) -> Result<RequestSummary, SniffError> {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK_LEN);
    let mut chunk = [0u8; READ_CHUNK_LEN];

    loop {
        let want = READ_CHUNK_LEN.min(max_header_bytes - buf.len());
        if want == 0 {
            return Err(SniffError::HeadersTooLarge {
                max: max_header_bytes,
            });
        }

        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(SniffError::Io(std::io::ErrorKind::UnexpectedEof.into()));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(summary) = parse_request_head(&buf)? {
            debug!(
                host = ?summary.host,
                method = %summary.method,
                head_len = summary.head_len,
                "Request head parsed"
            );
            return Ok(summary);
        }
    }
}

/// Parse a request head; `Ok(None)` means more bytes are needed.
pub fn parse_request_head(buf: &[u8]) -> Result<Option<RequestSummary>, SniffError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let method = req.method.unwrap_or_default().to_string();
    let path = req.path.unwrap_or_default().to_string();
    let host = absolute_authority(&path)
        .map(str::to_string)
        .or_else(|| host_header(req.headers));

    Ok(Some(RequestSummary {
        host,
        method,
        path,
        head_len,
    }))
}

fn host_header(headers: &[httparse::Header<'_>]) -> Option<String> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .and_then(|h| std::str::from_utf8(h.value).ok())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Authority of an absolute-form request target (`http://host:port/path`),
/// without userinfo.
fn absolute_authority(target: &str) -> Option<&str> {
    if target.starts_with('/') {
        return None;
    }
    let (_, rest) = target.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;
    (!authority.is_empty()).then_some(authority)
}
