//! Relay task: moves units from one tunnel's input to another tunnel's output
//!
//! A relay runs one direction only. Two relays cross-wired between tunnels A
//! and B give a full duplex bridge (see [`super::Bridge`]).

use super::Tunnel;
use bytes::Bytes;
use std::future::pending;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Relay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Forwarding units
    Running,
    /// Source closed or stop requested; the in-flight unit is discarded and
    /// the destination closed
    Draining,
    /// Destination closed, task finished
    Stopped,
}

/// Totals for one relay direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Units delivered to the destination
    pub units: u64,
    /// Bytes delivered to the destination
    pub bytes: u64,
}

impl RelayStats {
    fn record(&mut self, unit: &Bytes) {
        self.units += 1;
        self.bytes += unit.len() as u64;
    }
}

/// Handle to a running relay task
///
/// Dropping the handle detaches the relay; it keeps forwarding until the
/// source closes.
pub struct RelayHandle {
    history: watch::Receiver<Vec<RelayState>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<RelayStats>,
}

impl RelayHandle {
    /// Current lifecycle state
    pub fn state(&self) -> RelayState {
        current(&self.history.borrow())
    }

    /// Every state entered so far, oldest first
    pub fn history(&self) -> Vec<RelayState> {
        self.history.borrow().clone()
    }

    /// Ask the relay to stop; the destination tunnel is closed as it exits
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Check if the task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the relay to reach [`RelayState::Stopped`]
    pub async fn stopped(&mut self) {
        loop {
            if current(&self.history.borrow_and_update()) == RelayState::Stopped {
                return;
            }
            if self.history.changed().await.is_err() {
                // Task gone without publishing; it can only have stopped.
                return;
            }
        }
    }

    /// Wait for the task and return what it forwarded
    pub async fn join(self) -> RelayStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Relay task failed: {}", e);
                RelayStats::default()
            }
        }
    }
}

/// Spawn a relay forwarding `src` input to `dst` output
///
/// Must be called from within a tokio runtime.
pub fn spawn_relay(src: Arc<Tunnel>, dst: Arc<Tunnel>) -> RelayHandle {
    let (history_tx, history_rx) = watch::channel(vec![RelayState::Running]);
    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(relay(src, dst, stop_rx, history_tx));

    RelayHandle {
        history: history_rx,
        stop_tx,
        task,
    }
}

async fn relay(
    src: Arc<Tunnel>,
    dst: Arc<Tunnel>,
    mut stop: watch::Receiver<bool>,
    history: watch::Sender<Vec<RelayState>>,
) -> RelayStats {
    let mut stats = RelayStats::default();
    let mut in_flight = None;
    let enter = |next: RelayState| history.send_modify(|states| states.push(next));

    loop {
        let unit = tokio::select! {
            biased;
            _ = stop_requested(&mut stop) => break,
            unit = src.take_input() => match unit {
                Some(unit) => unit,
                None => break,
            },
        };

        tokio::select! {
            biased;
            delivered = dst.deliver_output(&unit) => {
                if !delivered {
                    trace!("Destination closed, dropping in-flight unit");
                    break;
                }
                trace!(bytes = unit.len(), "Forwarded unit");
                stats.record(&unit);
            }
            _ = src.closed() => {
                in_flight = Some(unit.len());
                break;
            }
            _ = stop_requested(&mut stop) => {
                in_flight = Some(unit.len());
                break;
            }
        }
    }

    enter(RelayState::Draining);
    if let Some(bytes) = in_flight {
        // The destination closes next and a closed tunnel reads nothing.
        trace!(bytes, "Discarding in-flight unit");
    }

    dst.close();
    enter(RelayState::Stopped);
    debug!(units = stats.units, bytes = stats.bytes, "Relay stopped");
    stats
}

fn current(history: &[RelayState]) -> RelayState {
    history.last().copied().unwrap_or(RelayState::Running)
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            // Handle dropped, nobody can stop us any more.
            pending::<()>().await;
        }
    }
}
