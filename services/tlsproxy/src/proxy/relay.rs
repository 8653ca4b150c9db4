//! Bidirectional byte relay between the client and the backend.
//!
//! The captured prefix goes upstream first, then both directions are copied
//! concurrently. The client-to-backend copy runs on its own task and reports
//! back over a oneshot channel; the backend-to-client copy runs on the
//! calling task. The relay returns only after both directions have finished.
//!
//! The idle timeout covers the connection as a whole: a direction gives up
//! only when neither direction has moved a byte for the full limit.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

const COPY_BUF_LEN: usize = 8192;

/// Last time either direction moved bytes.
#[derive(Debug)]
struct Activity {
    start: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn idle_deadline(&self, limit: Duration) -> Instant {
        self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed)) + limit
    }
}

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to backend, including the replayed prefix.
    pub to_upstream: u64,
    /// Backend to client.
    pub from_upstream: u64,
}

/// Replay `prefix` to `upstream`, then relay until both directions end.
///
/// Only a failure to write the prefix is returned as an error. Errors while
/// copying end their own direction and are logged; the other direction keeps
/// running. Both streams are dropped (closed) before this returns.
pub async fn relay<D, U>(
    downstream: D,
    mut upstream: U,
    prefix: &[u8],
    idle_timeout: Option<Duration>,
) -> io::Result<RelayStats>
where
    D: AsyncRead + AsyncWrite + Send + 'static,
    U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if !prefix.is_empty() {
        upstream.write_all(prefix).await?;
    }

    let (down_read, mut down_write) = tokio::io::split(downstream);
    let (mut up_read, up_write) = tokio::io::split(upstream);

    let activity = Arc::new(Activity::new());

    let (done_tx, done_rx) = oneshot::channel();
    let upstream_activity = Arc::clone(&activity);
    tokio::spawn(async move {
        let mut down_read = down_read;
        let mut up_write = up_write;
        let count = copy_direction(
            &mut down_read,
            &mut up_write,
            idle_timeout,
            &upstream_activity,
            "to_upstream",
        )
        .await;
        let _ = done_tx.send(count);
    });

    let from_upstream = copy_direction(
        &mut up_read,
        &mut down_write,
        idle_timeout,
        &activity,
        "from_upstream",
    )
    .await;

    // A dropped sender means the task panicked; count what we know.
    let to_upstream = done_rx.await.unwrap_or(0);

    Ok(RelayStats {
        to_upstream: prefix.len() as u64 + to_upstream,
        from_upstream,
    })
}

/// Copy until EOF or error, then half-close the destination.
///
/// Returns the number of bytes written to `writer`.
async fn copy_direction<R, W>(
    reader: &mut R,
    writer: &mut W,
    idle_timeout: Option<Duration>,
    activity: &Activity,
    direction: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; COPY_BUF_LEN];

    loop {
        match read_until_idle(reader, &mut buf, idle_timeout, activity).await {
            Ok(0) => break,
            Ok(n) => {
                activity.touch();
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    debug!(direction, error = %e, "Relay write failed");
                    return total;
                }
                activity.touch();
                total += n as u64;
            }
            Err(e) => {
                debug!(direction, error = %e, "Relay read failed");
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(direction, error = %e, "Relay shutdown failed");
    }
    total
}

/// Read once, failing with `TimedOut` only when the whole connection has
/// been idle for `idle_timeout`.
async fn read_until_idle<R>(
    reader: &mut R,
    buf: &mut [u8],
    idle_timeout: Option<Duration>,
    activity: &Activity,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let Some(limit) = idle_timeout else {
        return reader.read(buf).await;
    };

    loop {
        match tokio::time::timeout_at(activity.idle_deadline(limit), reader.read(buf)).await {
            Ok(result) => return result,
            // The other direction moved bytes meanwhile; wait out the new deadline.
            Err(_) if Instant::now() < activity.idle_deadline(limit) => continue,
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "idle timeout")),
        }
    }
}
