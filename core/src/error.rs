//! Error taxonomy for the advertising endpoint.
//!
//! Precondition errors fail fast without touching the backend; concurrency
//! errors depend on the swap policy; backend-reported and timeout errors
//! carry the backend's own diagnostic text. Nothing here is process-fatal.

use crate::backend::BackendState;
use thiserror::Error;

/// Errors surfaced by the advertising endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdvertiseError {
    /// The supplied resource identifier is malformed or nil.
    #[error("invalid resource identifier: {0}")]
    InvalidId(String),
    /// An identity swap was requested while the endpoint is not broadcasting.
    #[error("not advertising")]
    NotAdvertising,
    /// The backend is not powered on.
    #[error("backend not ready (state: {0})")]
    BackendNotReady(BackendState),
    /// A strict-policy swap was requested while another swap is in flight.
    #[error("identity update already in progress")]
    UpdateInProgress,
    /// Plain start/stop was requested while a swap transaction is in flight.
    #[error("operation rejected: identity update transaction active")]
    TransactionActive,
    /// The backend confirmed the resource publish with an error.
    #[error("resource publish failed: {0}")]
    ResourcePublishError(String),
    /// The backend never confirmed the resource publish.
    #[error("resource publish confirmation timed out")]
    ResourcePublishTimeout,
    /// The backend reported a failure while restarting the broadcast
    /// at the end of a swap.
    #[error("broadcast restart failed: {0}")]
    BroadcastRestartError(String),
    /// The backend reported a failure on a plain start.
    #[error("broadcast start failed: {0}")]
    BroadcastStartError(String),
    /// The named resource or attribute does not exist.
    #[error("resource or attribute not found")]
    NotFound,
    /// The backend declined to deliver an attribute notification.
    #[error("notification send failed: {0}")]
    NotifyFailed(String),
    /// The endpoint control loop has shut down.
    #[error("endpoint control loop closed")]
    ChannelClosed,
}
