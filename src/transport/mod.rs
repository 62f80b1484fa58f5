//! Connection abstraction shared by tunnels and real sockets
//!
//! Code that proxies bytes only needs [`Conn`]; it cannot tell a
//! [`crate::tunnel::Tunnel`] from a [`TcpConn`].

mod tcp;

pub use tcp::TcpConn;

use crate::tunnel::Tunnel;
use async_trait::async_trait;
use std::io;
use tokio::time::Instant;

/// A deadline-aware stream connection
///
/// `Ok(0)` from `read` or `write` means the connection is finished. Deadline
/// expiry is reported as `ErrorKind::TimedOut`.
#[async_trait]
pub trait Conn: Send + Sync {
    /// Read into `buf`
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`
    async fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Close the connection
    async fn close(&self) -> io::Result<()>;

    /// Set the absolute read deadline
    fn set_read_deadline(&self, deadline: Option<Instant>);

    /// Set the absolute write deadline
    fn set_write_deadline(&self, deadline: Option<Instant>);

    /// Set both deadlines
    fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }
}

#[async_trait]
impl Conn for Tunnel {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(Tunnel::read(self, buf).await?)
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(Tunnel::write(self, buf).await?)
    }

    async fn close(&self) -> io::Result<()> {
        Tunnel::close(self);
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        Tunnel::set_read_deadline(self, deadline);
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) {
        Tunnel::set_write_deadline(self, deadline);
    }

    fn set_deadline(&self, deadline: Option<Instant>) {
        Tunnel::set_deadline(self, deadline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::Bridge;
    use std::time::Duration;

    async fn exchange(left: &dyn Conn, right: &dyn Conn, payload: &[u8]) -> Vec<u8> {
        assert_eq!(left.write(payload).await.unwrap(), payload.len());
        let mut buf = vec![0u8; payload.len()];
        let n = right.read(&mut buf).await.unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn test_tunnel_as_conn() {
        let bridge = Bridge::new(4);
        let a: &dyn Conn = &**bridge.a();
        let b: &dyn Conn = &**bridge.b();

        assert_eq!(exchange(a, b, b"through the trait").await, b"through the trait");

        b.set_deadline(Some(Instant::now() + Duration::from_millis(10)));
        let mut buf = [0u8; 4];
        let err = b.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        a.close().await.unwrap();
        b.set_deadline(None);
        tokio::time::timeout(Duration::from_secs(5), bridge.b().closed())
            .await
            .unwrap();
        assert_eq!(b.read(&mut buf).await.unwrap(), 0);
        assert_eq!(b.write(b"x").await.unwrap(), 0);
    }
}
