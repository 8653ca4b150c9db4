//! Hostname-routing TCP proxy.
//!
//! This module provides:
//! - TCP listener management
//! - Hostname extraction (TLS SNI or HTTP `Host`) without terminating TLS
//! - Destination lookup by exact hostname
//! - Connection relaying with replay of the sniffed bytes
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> CaptureReader -> SNI / Host Inspector -> DestinationTable
//!                            |                                         |
//!                     captured bytes ---------> Relay <---------- Backend dial
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::{DestinationTable, FrontEnd, Listener, ListenerConfig};
//!
//! let table = Arc::new(DestinationTable::from_entries(["example.com:10.0.0.5"])?);
//! let config = ListenerConfig::new("[::]:443".parse()?, FrontEnd::Tls);
//! let listener = Arc::new(Listener::bind(config, table).await?);
//! listener.run().await?;
//! ```

mod listener;
mod relay;
mod router;

pub use listener::{FrontEnd, Listener, ListenerConfig, DEFAULT_CONNECT_TIMEOUT};
pub use relay::{relay, RelayStats};
pub use router::{
    parse_entry, Destination, DestinationError, DestinationTable, RoutingDecision,
    SharedDestinationTable, DEFAULT_HTTP_PORT, DEFAULT_TLS_PORT,
};
