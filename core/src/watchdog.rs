//! Timer plumbing for the control loop.
//!
//! Settle timers and the publish watchdog never touch endpoint state
//! themselves; they post a [`TimerEvent`] tagged with the owning
//! transaction's sequence number, and the control loop drops anything
//! whose tag no longer matches the live transaction. A race-delayed
//! expiry after the transaction already finished is therefore a no-op.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;
use uuid::Uuid;

/// Internal timing signals consumed by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// A settle interval for transaction `txn` elapsed.
    SettleElapsed { txn: u64 },
    /// The publish watchdog for transaction `txn` expired before the
    /// backend confirmed `publish` of resource `target`.
    WatchdogExpired { txn: u64, target: Uuid },
}

/// Schedule a settle interval for a transaction.
///
/// Fire-and-forget: the event is sequence-tagged, so a transaction that
/// fails before the interval elapses simply ignores it.
pub fn schedule_settle(delay: Duration, txn: u64, tx: mpsc::Sender<TimerEvent>) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trace!(txn, "settle interval elapsed");
        let _ = tx.send(TimerEvent::SettleElapsed { txn }).await;
    });
}

/// Cancellable deadline timer for an outstanding backend confirmation.
///
/// At most one watchdog is armed per transaction. Dropping the handle
/// disarms it on every exit path, confirmed or errored.
#[derive(Debug)]
pub struct Watchdog {
    task: JoinHandle<()>,
}

impl Watchdog {
    /// Arm a watchdog that posts `WatchdogExpired` after `timeout`.
    pub fn arm(timeout: Duration, txn: u64, target: Uuid, tx: mpsc::Sender<TimerEvent>) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            trace!(txn, "watchdog expired");
            let _ = tx.send(TimerEvent::WatchdogExpired { txn, target }).await;
        });
        Self { task }
    }

    /// Cancel the timer. Equivalent to dropping the handle.
    pub fn disarm(self) {}
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}
