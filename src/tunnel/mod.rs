//! Tunnel layer - in-process duplex connections
//!
//! Provides:
//! - Socket-style endpoints backed by bounded unit queues
//! - Per-direction absolute deadlines
//! - Relays that cross-wire two tunnels into a loopback bridge
//! - A tokio `AsyncRead`/`AsyncWrite` adapter

mod bridge;
mod endpoint;
mod io;
mod queue;
mod relay;

pub use crate::config::TunnelConfig;
pub use bridge::Bridge;
pub use endpoint::Tunnel;
pub use io::TunnelIo;
pub use relay::{spawn_relay, RelayHandle, RelayState, RelayStats};

use thiserror::Error;

/// Tunnel layer errors
///
/// Closure is not an error: reads and writes on a closed tunnel return `Ok(0)`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TunnelError {
    #[error("read from tunnel timeout")]
    ReadTimeout,

    #[error("send to tunnel timeout")]
    WriteTimeout,
}

impl TunnelError {
    /// Check whether the error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout | Self::WriteTimeout)
    }
}

impl From<TunnelError> for std::io::Error {
    fn from(e: TunnelError) -> Self {
        std::io::Error::new(std::io::ErrorKind::TimedOut, e)
    }
}

/// Default queue capacity in units
pub const DEFAULT_CAPACITY: usize = 1024;
