//! Tunnel endpoint: a socket-like connection backed by two unit queues

use super::queue::UnitQueue;
use super::{TunnelConfig, TunnelError};
use bytes::Bytes;
use std::fmt;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::{watch, Notify};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace};

/// Outcome of parking on one of the queues
enum Waited<T> {
    Ready(T),
    Closed,
    Expired,
}

/// A virtual duplex connection
///
/// Writes land on `input` and reads drain `output`; nothing moves between the
/// two unless a relay is attached. Every operation takes `&self`, so one
/// tunnel is normally shared as `Arc<Tunnel>` between callers and relays.
///
/// Reads and writes on a closed tunnel return `Ok(0)`. The only error is a
/// deadline timeout.
pub struct Tunnel {
    input: UnitQueue,
    output: UnitQueue,
    closed: AtomicBool,
    closed_notify: Notify,
    /// Bridged partner, closed together with this tunnel
    peer: OnceLock<Weak<Tunnel>>,
    read_deadline: watch::Sender<Option<Instant>>,
    write_deadline: watch::Sender<Option<Instant>>,
}

impl Tunnel {
    /// Create an open tunnel whose queues each hold `capacity` units
    pub fn new(capacity: usize) -> Self {
        Self {
            input: UnitQueue::new(capacity),
            output: UnitQueue::new(capacity),
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            peer: OnceLock::new(),
            read_deadline: watch::channel(None).0,
            write_deadline: watch::channel(None).0,
        }
    }

    /// Create a tunnel sized from configuration
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(config.capacity)
    }

    /// Queue capacity in units
    pub fn capacity(&self) -> usize {
        self.input.capacity()
    }

    /// Units written but not yet picked up by a relay
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    /// Units delivered but not yet read
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Write `buf` as a single unit
    ///
    /// Waits while the input queue is full. Returns `Ok(0)` if the tunnel is or
    /// becomes closed, and [`TunnelError::WriteTimeout`] once the write
    /// deadline passes.
    pub async fn write(&self, buf: &[u8]) -> Result<usize, TunnelError> {
        if self.is_closed() {
            return Ok(0);
        }
        self.send(Bytes::copy_from_slice(buf)).await
    }

    /// Write an owned unit without copying it
    pub async fn send(&self, unit: Bytes) -> Result<usize, TunnelError> {
        if unit.is_empty() {
            return Ok(0);
        }

        let len = unit.len();
        let waited = self
            .wait_on(
                &self.input.writable,
                Some(self.write_deadline.subscribe()),
                || self.input.try_push(&unit).then_some(()),
            )
            .await;

        match waited {
            Waited::Ready(()) => Ok(len),
            Waited::Closed => Ok(0),
            Waited::Expired => Err(TunnelError::WriteTimeout),
        }
    }

    /// Read one unit into `buf`
    ///
    /// A unit longer than `buf` is truncated to fit and the rest of it is
    /// dropped. Use [`Tunnel::recv`] to take whole units.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        let Some(unit) = self.recv().await? else {
            return Ok(0);
        };

        let n = unit.len().min(buf.len());
        buf[..n].copy_from_slice(&unit[..n]);
        if n < unit.len() {
            trace!(unit = unit.len(), read = n, "Unit truncated by read buffer");
        }
        Ok(n)
    }

    /// Take the next whole unit, or `None` once the tunnel is closed
    pub async fn recv(&self) -> Result<Option<Bytes>, TunnelError> {
        let waited = self
            .wait_on(
                &self.output.readable,
                Some(self.read_deadline.subscribe()),
                || self.output.try_pop(),
            )
            .await;

        match waited {
            Waited::Ready(unit) => Ok(Some(unit)),
            Waited::Closed => Ok(None),
            Waited::Expired => Err(TunnelError::ReadTimeout),
        }
    }

    /// Close the tunnel and release every pending call
    ///
    /// A bridged peer is closed too before this returns. Safe to call more
    /// than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!(
            pending_input = self.input.len(),
            pending_output = self.output.len(),
            "Tunnel closed"
        );
        self.input.wake_all();
        self.output.wake_all();
        self.closed_notify.notify_waiters();

        if let Some(peer) = self.peer.get().and_then(Weak::upgrade) {
            peer.close();
        }
    }

    /// Tie this tunnel's closure to `peer`; only the first pairing sticks
    pub(crate) fn pair_with(&self, peer: &Arc<Tunnel>) {
        let _ = self.peer.set(Arc::downgrade(peer));
    }

    /// Check whether the tunnel has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the tunnel is closed
    pub async fn closed(&self) {
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

    /// Set the absolute read deadline, `None` to wait indefinitely
    ///
    /// Applies to reads already waiting as well as later ones.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.read_deadline.send_replace(deadline);
    }

    /// Set the absolute write deadline, `None` to wait indefinitely
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.write_deadline.send_replace(deadline);
    }

    /// Set both deadlines
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    pub fn read_deadline(&self) -> Option<Instant> {
        *self.read_deadline.borrow()
    }

    pub fn write_deadline(&self) -> Option<Instant> {
        *self.write_deadline.borrow()
    }

    /// Pop from the input queue on behalf of a relay
    pub(crate) async fn take_input(&self) -> Option<Bytes> {
        match self
            .wait_on(&self.input.readable, None, || self.input.try_pop())
            .await
        {
            Waited::Ready(unit) => Some(unit),
            Waited::Closed | Waited::Expired => None,
        }
    }

    /// Push onto the output queue on behalf of a relay, `false` if closed first
    pub(crate) async fn deliver_output(&self, unit: &Bytes) -> bool {
        matches!(
            self.wait_on(&self.output.writable, None, || {
                self.output.try_push(unit).then_some(())
            })
            .await,
            Waited::Ready(())
        )
    }

    /// Push onto the output queue only if there is room right now
    #[cfg(test)]
    pub(crate) fn offer_output(&self, unit: &Bytes) -> bool {
        !self.is_closed() && self.output.try_push(unit)
    }

    /// Park on `notify` until `attempt` succeeds, the tunnel closes, or the
    /// deadline passes
    ///
    /// The deadline is re-read on every wakeup, and a change to it wakes the
    /// waiter, so a new deadline applies to a call that is already parked.
    async fn wait_on<T>(
        &self,
        notify: &Notify,
        mut deadline: Option<watch::Receiver<Option<Instant>>>,
        mut attempt: impl FnMut() -> Option<T>,
    ) -> Waited<T> {
        loop {
            // Register before checking state so a wakeup in between is not lost.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Waited::Closed;
            }

            let expiry = match deadline.as_mut() {
                Some(rx) => *rx.borrow_and_update(),
                None => None,
            };
            if expiry.is_some_and(|at| Instant::now() >= at) {
                return Waited::Expired;
            }

            if let Some(value) = attempt() {
                return Waited::Ready(value);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until_some(expiry) => {}
                _ = deadline_changed(deadline.as_mut()) => {}
            }
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn deadline_changed(rx: Option<&mut watch::Receiver<Option<Instant>>>) {
    if let Some(rx) = rx {
        if rx.changed().await.is_ok() {
            return;
        }
    }
    pending().await
}

impl fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tunnel")
            .field("capacity", &self.capacity())
            .field("pending_input", &self.input.len())
            .field("pending_output", &self.output.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
