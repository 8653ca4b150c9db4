//! Passive hostname extraction for a routing TCP proxy.
//!
//! This library provides:
//! - [`CaptureReader`], a read-side tee that records every byte the sniffers
//!   consume so they can be replayed to the backend
//! - TLS ClientHello parsing (record reassembly and the `server_name`
//!   extension) in [`tls`]
//! - HTTP/1.x `Host` extraction in [`http`]
//!
//! Nothing here writes to the client or completes any handshake.
//!
//! ## Usage
//!
//! ```ignore
//! let mut reader = CaptureReader::new(stream);
//! let hello = SniInspector::default().inspect(&mut reader).await?;
//! let (stream, captured) = reader.into_parts();
//! // dial the backend for hello.hostname(), write `captured`, then relay
//! ```

mod capture;
mod error;
pub mod http;
pub mod tls;

pub use capture::CaptureReader;
pub use error::SniffError;
pub use http::{HostConfig, HostInspector, RequestSummary};
pub use tls::{ClientHelloSummary, SniConfig, SniInspector};
