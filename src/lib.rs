//! # Virtual Tunnel
//!
//! In-process duplex connections that behave like sockets but are backed by
//! bounded message queues.
//!
//! ## Features
//!
//! - **Socket-style endpoints** with read/write/close and absolute deadlines
//! - **Message framing**: every write is delivered to exactly one read
//! - **Loopback bridges** built from two cross-wired relay tasks
//! - **Interchangeability** with real sockets through [`transport::Conn`] and
//!   tokio's `AsyncRead`/`AsyncWrite`
//!
//! ## Architecture
//!
//! ```text
//!   caller ──write──▶ A.input  ───relay A→B───▶ B.output ──read──▶ caller
//!   caller ◀──read─── A.output ◀──relay B→A──── B.input  ◀──write── caller
//! ```
//!
//! Closing either bridged tunnel closes the other at once. Reads and writes on
//! a closed tunnel return `Ok(0)`; the only error is a timeout.

pub mod config;
pub mod transport;
pub mod tunnel;

pub use config::Config;
pub use tunnel::{Bridge, Tunnel, TunnelError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
