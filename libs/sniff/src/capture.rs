//! Capture-on-read stream adapter.
//!
//! `CaptureReader` sits between a sniffer and the client socket. Every byte
//! the sniffer reads is also appended to a replay buffer, so the proxy can
//! forward exactly what the client sent once a routing decision is made.
//! It is a tee, not a peek buffer: it never reads more than the caller asked
//! for.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Initial capacity of the replay buffer. Most ClientHellos fit.
const INITIAL_CAPTURE_CAPACITY: usize = 1024;

/// Stream adapter that records every byte read through it.
///
/// Writes are rejected: the capture holds inbound bytes only.
#[derive(Debug)]
pub struct CaptureReader<S> {
    inner: S,
    captured: Vec<u8>,
}

impl<S> CaptureReader<S> {
    /// Wrap a stream. Capture starts immediately.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            captured: Vec::with_capacity(INITIAL_CAPTURE_CAPACITY),
        }
    }

    /// Bytes read so far, in order.
    pub fn captured(&self) -> &[u8] {
        &self.captured
    }

    /// Stop capturing and return the stream together with the replay buffer.
    pub fn into_parts(self) -> (S, Vec<u8>) {
        (self.inner, self.captured)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for CaptureReader<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.captured.extend_from_slice(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for CaptureReader<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "capture reader is not writable",
        )))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_captures_every_read() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"hello world").await.unwrap();

        let mut reader = CaptureReader::new(server);
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(reader.captured(), b"hello");

        let mut rest = [0u8; 6];
        reader.read_exact(&mut rest).await.unwrap();
        assert_eq!(reader.captured(), b"hello world");
    }

    #[tokio::test]
    async fn test_does_not_read_ahead() {
        let source: &[u8] = b"0123456789";
        let mut reader = CaptureReader::new(source);

        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();

        let (remaining, captured) = reader.into_parts();
        assert_eq!(captured, b"012");
        assert_eq!(remaining, b"3456789");
    }

    #[tokio::test]
    async fn test_write_is_rejected() {
        let (_client, server) = tokio::io::duplex(64);
        let mut reader = CaptureReader::new(server);

        let err = reader.write_all(b"nope").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
        assert!(reader.captured().is_empty());
    }

    #[tokio::test]
    async fn test_eof_captures_nothing() {
        let source: &[u8] = b"";
        let mut reader = CaptureReader::new(source);
        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
        assert!(reader.captured().is_empty());
    }

    #[tokio::test]
    async fn test_into_parts_keeps_stream_usable() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"abc").await.unwrap();

        let mut reader = CaptureReader::new(server);
        let mut buf = [0u8; 3];
        reader.read_exact(&mut buf).await.unwrap();

        let (mut server, captured) = reader.into_parts();
        assert_eq!(captured, b"abc");

        server.write_all(b"reply").await.unwrap();
        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"reply");
    }
}
