//! TCP connection with tunnel-style deadlines and close semantics

use super::Conn;
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// A TCP stream behind the [`Conn`] contract
///
/// Deadlines are read once when a call starts. After `close`, reads and
/// writes return `Ok(0)`.
pub struct TcpConn {
    reader: tokio::sync::Mutex<OwnedReadHalf>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
    closed: AtomicBool,
    closed_notify: Notify,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
}

impl TcpConn {
    /// Connect to `addr`, giving up after `connect_timeout`
    pub async fn connect(addr: &str, connect_timeout: Duration) -> io::Result<Self> {
        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timeout"))??;

        Self::from_stream(stream)
    }

    /// Wrap an accepted or connected stream
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            reader: tokio::sync::Mutex::new(reader),
            writer: tokio::sync::Mutex::new(writer),
            peer,
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn closed(&self) {
        loop {
            let notified = self.closed_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    fn deadline(slot: &Mutex<Option<Instant>>) -> Option<Instant> {
        *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store_deadline(slot: &Mutex<Option<Instant>>, deadline: Option<Instant>) {
        *slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = deadline;
    }
}

fn timed_out(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, message)
}

/// Run `op` until it finishes, the connection closes (`Ok(0)`), or `deadline` passes
async fn bounded<F>(
    conn: &TcpConn,
    deadline: Option<Instant>,
    message: &'static str,
    op: F,
) -> io::Result<usize>
where
    F: std::future::Future<Output = io::Result<usize>>,
{
    if deadline.is_some_and(|at| Instant::now() >= at) {
        return Err(timed_out(message));
    }

    let raced = async {
        tokio::select! {
            result = op => result,
            _ = conn.closed() => Ok(0),
        }
    };

    match deadline {
        Some(at) => timeout_at(at, raced).await.map_err(|_| timed_out(message))?,
        None => raced.await,
    }
}

#[async_trait]
impl Conn for TcpConn {
    async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }

        let deadline = Self::deadline(&self.read_deadline);
        bounded(self, deadline, "read from connection timeout", async {
            self.reader.lock().await.read(buf).await
        })
        .await
    }

    async fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }

        let deadline = Self::deadline(&self.write_deadline);
        bounded(self, deadline, "send to connection timeout", async {
            self.writer.lock().await.write(buf).await
        })
        .await
    }

    async fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.closed_notify.notify_waiters();
        debug!(peer = %self.peer, "TCP connection closed");

        // Pending writes have let go of the lock by now.
        self.writer.lock().await.shutdown().await.ok();
        Ok(())
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) {
        Self::store_deadline(&self.read_deadline, deadline);
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) {
        Self::store_deadline(&self.write_deadline, deadline);
    }
}
