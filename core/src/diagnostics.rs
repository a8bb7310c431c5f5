//! Diagnostic event stream.
//!
//! Warnings and backend state changes are fanned out to subscribers on a
//! lossy broadcast channel, next to the structured `tracing` log. The
//! stream is observability only; it is not part of any result contract.

use crate::backend::BackendState;
use tokio::sync::broadcast;
use tracing::warn;

/// An observability event emitted by the endpoint.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    /// A non-fatal problem worth surfacing to listeners.
    Warning(String),
    /// The backend's power state changed.
    BackendStateChanged(BackendState),
}

/// Fan-out hub for diagnostic events.
///
/// Cloning the hub shares the underlying channel. Sending never blocks;
/// slow subscribers lose events.
#[derive(Clone)]
pub struct DiagnosticHub {
    tx: broadcast::Sender<DiagnosticEvent>,
}

impl DiagnosticHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the diagnostic stream.
    pub fn subscribe(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.tx.subscribe()
    }

    /// Emit a warning to the log and to all subscribers.
    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        let _ = self.tx.send(DiagnosticEvent::Warning(message));
    }

    /// Surface a backend power-state change.
    pub fn backend_state_changed(&self, state: BackendState) {
        warn!("backend state change: {state}");
        let _ = self.tx.send(DiagnosticEvent::BackendStateChanged(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_warning_reaches_subscriber() {
        let hub = DiagnosticHub::new(8);
        let mut rx = hub.subscribe();

        hub.warning("something odd");

        match rx.recv().await.expect("event") {
            DiagnosticEvent::Warning(msg) => assert_eq!(msg, "something odd"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_without_subscribers_is_fine() {
        let hub = DiagnosticHub::new(8);
        // No subscribers; must not panic or block.
        hub.warning("nobody listening");
        hub.backend_state_changed(BackendState::PoweredOff);
    }

    #[tokio::test]
    async fn test_state_change_event() {
        let hub = DiagnosticHub::new(8);
        let mut rx = hub.subscribe();

        hub.backend_state_changed(BackendState::PoweredOn);

        match rx.recv().await.expect("event") {
            DiagnosticEvent::BackendStateChanged(state) => {
                assert_eq!(state, BackendState::PoweredOn)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
