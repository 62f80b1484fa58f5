//! Loopback bridge between two tunnels

use super::relay::{spawn_relay, RelayHandle, RelayStats};
use super::{Tunnel, TunnelConfig};
use std::sync::Arc;
use tracing::debug;

/// Two tunnels cross-wired by a pair of relays
///
/// Bytes written to `a` are read from `b` and vice versa. The tunnels are
/// paired: closing either one closes the other before `close` returns.
pub struct Bridge {
    a: Arc<Tunnel>,
    b: Arc<Tunnel>,
    a_to_b: RelayHandle,
    b_to_a: RelayHandle,
}

impl Bridge {
    /// Create both tunnels and start the relays
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(capacity: usize) -> Self {
        Self::connect(Arc::new(Tunnel::new(capacity)), Arc::new(Tunnel::new(capacity)))
    }

    /// Create a bridge sized from configuration
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Bridge two existing tunnels
    pub fn connect(a: Arc<Tunnel>, b: Arc<Tunnel>) -> Self {
        a.pair_with(&b);
        b.pair_with(&a);
        let a_to_b = spawn_relay(a.clone(), b.clone());
        let b_to_a = spawn_relay(b.clone(), a.clone());
        debug!(capacity = a.capacity(), "Bridge started");

        Self { a, b, a_to_b, b_to_a }
    }

    pub fn a(&self) -> &Arc<Tunnel> {
        &self.a
    }

    pub fn b(&self) -> &Arc<Tunnel> {
        &self.b
    }

    /// Relay carrying A's writes to B
    pub fn a_to_b(&self) -> &RelayHandle {
        &self.a_to_b
    }

    /// Relay carrying B's writes to A
    pub fn b_to_a(&self) -> &RelayHandle {
        &self.b_to_a
    }

    /// Close both ends
    pub fn close(&self) {
        self.a.close();
        self.b.close();
    }

    /// Close both ends and wait for the relays, returning (A to B, B to A)
    pub async fn shutdown(self) -> (RelayStats, RelayStats) {
        self.close();
        let a_to_b = self.a_to_b.join().await;
        let b_to_a = self.b_to_a.join().await;
        debug!(
            a_to_b_bytes = a_to_b.bytes,
            b_to_a_bytes = b_to_a.bytes,
            "Bridge shut down"
        );
        (a_to_b, b_to_a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::RelayState;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_bridge_duplex() {
        let bridge = Bridge::new(8);

        bridge.a().write(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        let n = timeout(WAIT, bridge.b().read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"ping");

        bridge.b().write(b"pong").await.unwrap();
        let n = timeout(WAIT, bridge.a().read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf[..n], b"pong");

        let (a_to_b, b_to_a) = timeout(WAIT, bridge.shutdown()).await.unwrap();
        assert_eq!(a_to_b.bytes, 4);
        assert_eq!(b_to_a.bytes, 4);
    }

    #[tokio::test]
    async fn test_closing_one_side_closes_the_other() {
        let bridge = Bridge::new(8);
        bridge.b().close();

        timeout(WAIT, bridge.a().closed()).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(bridge.a().read(&mut buf).await.unwrap(), 0);
        assert_eq!(bridge.a().write(b"late").await.unwrap(), 0);

        let (a_to_b, b_to_a) = timeout(WAIT, bridge.shutdown()).await.unwrap();
        assert_eq!(a_to_b, RelayStats::default());
        assert_eq!(b_to_a, RelayStats::default());
    }

    #[tokio::test]
    async fn test_peer_refuses_writes_right_after_close() {
        let bridge = Bridge::new(8);
        bridge.a().close();

        // No yield in between: the relays have not run yet.
        assert!(bridge.b().is_closed());
        assert_eq!(bridge.b().write(&[1, 2, 3]).await.unwrap(), 0);
        let mut buf = [0u8; 4];
        assert_eq!(bridge.b().read(&mut buf).await.unwrap(), 0);

        let (a_to_b, b_to_a) = timeout(WAIT, bridge.shutdown()).await.unwrap();
        assert_eq!(a_to_b, RelayStats::default());
        assert_eq!(b_to_a, RelayStats::default());
    }

    #[tokio::test]
    async fn test_relays_stop_after_close() {
        let bridge = Bridge::from_config(&TunnelConfig::default());
        assert_eq!(bridge.a().capacity(), 1024);
        bridge.close();

        timeout(WAIT, async {
            while bridge.a_to_b().state() != RelayState::Stopped
                || bridge.b_to_a().state() != RelayState::Stopped
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }
}
