//! tlsproxy
//!
//! Transparent TCP proxy that routes connections by hostname.
//!
//! The TLS listener reads the SNI extension from the client's ClientHello,
//! the optional HTTP listener reads the request's `Host`. Either way the
//! proxy never terminates TLS or rewrites bytes: it dials the configured
//! destination, replays what it already read and relays the rest.

pub mod config;
pub mod error;
pub mod proxy;

pub use error::ProxyError;
pub use proxy::{
    Destination, DestinationTable, FrontEnd, Listener, ListenerConfig, RoutingDecision,
    SharedDestinationTable,
};
