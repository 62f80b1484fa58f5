//! tokio I/O adapter for tunnels
//!
//! [`TunnelIo`] lets a tunnel stand in for a socket wherever tokio expects
//! `AsyncRead + AsyncWrite`, e.g. `tokio::io::copy_bidirectional`.

use super::{Tunnel, TunnelError};
use bytes::Bytes;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Byte-stream view of a tunnel
///
/// Unlike [`Tunnel::read`], a unit larger than the caller's buffer is not
/// truncated: the rest is served by the following reads. A closed tunnel reads
/// as EOF and fails writes with `BrokenPipe`.
///
/// A write that returned `Pending` finishes with the bytes it was first given.
pub struct TunnelIo {
    tunnel: Arc<Tunnel>,
    leftover: Bytes,
    reading: Option<BoxFuture<Result<Option<Bytes>, TunnelError>>>,
    writing: Option<BoxFuture<Result<usize, TunnelError>>>,
}

impl TunnelIo {
    pub fn new(tunnel: Arc<Tunnel>) -> Self {
        Self {
            tunnel,
            leftover: Bytes::new(),
            reading: None,
            writing: None,
        }
    }

    pub fn tunnel(&self) -> &Arc<Tunnel> {
        &self.tunnel
    }

    /// Unwrap the adapter; buffered bytes of a partly read unit are dropped
    pub fn into_inner(self) -> Arc<Tunnel> {
        self.tunnel
    }
}

fn closed_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "tunnel closed")
}

impl AsyncRead for TunnelIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.leftover.is_empty() {
            let tunnel = &this.tunnel;
            let reading = this.reading.get_or_insert_with(|| {
                let tunnel = tunnel.clone();
                Box::pin(async move { tunnel.recv().await })
            });

            let result = ready!(reading.as_mut().poll(cx));
            this.reading = None;

            match result.map_err(io::Error::from)? {
                Some(unit) => this.leftover = unit,
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = this.leftover.len().min(buf.remaining());
        buf.put_slice(&this.leftover.split_to(n));
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for TunnelIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let tunnel = &this.tunnel;
        let writing = this.writing.get_or_insert_with(|| {
            let tunnel = tunnel.clone();
            let unit = Bytes::copy_from_slice(buf);
            Box::pin(async move { tunnel.send(unit).await })
        });

        let result = ready!(writing.as_mut().poll(cx));
        this.writing = None;

        match result {
            Ok(0) => Poll::Ready(Err(closed_pipe())),
            Ok(n) => Poll::Ready(Ok(n)),
            Err(e) => Poll::Ready(Err(e.into())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.tunnel.close();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::Bridge;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::{timeout, Instant};

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_large_unit_spans_reads() {
        let bridge = Bridge::new(8);
        let mut a = TunnelIo::new(bridge.a().clone());
        let mut b = TunnelIo::new(bridge.b().clone());

        a.write_all(b"hello world").await.unwrap();

        let mut head = [0u8; 5];
        timeout(WAIT, b.read_exact(&mut head)).await.unwrap().unwrap();
        assert_eq!(&head, b"hello");

        let mut tail = [0u8; 6];
        timeout(WAIT, b.read_exact(&mut tail)).await.unwrap().unwrap();
        assert_eq!(&tail, b" world");
    }

    #[tokio::test]
    async fn test_shutdown_reads_as_eof() {
        let bridge = Bridge::new(8);
        let mut a = TunnelIo::new(bridge.a().clone());
        let mut b = TunnelIo::new(bridge.b().clone());

        a.shutdown().await.unwrap();

        let mut rest = Vec::new();
        let n = timeout(WAIT, b.read_to_end(&mut rest)).await.unwrap().unwrap();
        assert_eq!(n, 0);

        let err = b.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[tokio::test]
    async fn test_deadline_surfaces_as_timed_out() {
        let tunnel = Arc::new(Tunnel::new(1));
        tunnel.set_read_deadline(Some(Instant::now() + Duration::from_millis(10)));
        let mut io = TunnelIo::new(tunnel);

        let mut buf = [0u8; 4];
        let err = io.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(err.to_string(), "read from tunnel timeout");
    }
}
