//! Platform backend abstraction.
//!
//! The advertising backend is an opaque platform capability: it accepts
//! broadcast/resource-table commands and fires confirmation events on its
//! own schedule, on its own callback context. Implementations must never
//! touch endpoint state directly; confirmations travel over the
//! [`BackendEvent`] channel handed to the control loop at construction.
//!
//! Timing guarantees are weak by design: confirmations may be delayed
//! indefinitely, and issuing two commands back-to-back can corrupt backend
//! state. The controller owns the sequencing that works around this.

use crate::resource::Resource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Power/readiness state of the platform backend.
///
/// Mirrors the usual peripheral-manager state ladder; only `PoweredOn`
/// accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendState {
    Unknown,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl BackendState {
    /// Whether the backend will accept commands.
    pub fn is_ready(&self) -> bool {
        matches!(self, BackendState::PoweredOn)
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendState::Unknown => write!(f, "Unknown"),
            BackendState::Unsupported => write!(f, "Unsupported"),
            BackendState::Unauthorized => write!(f, "Unauthorized"),
            BackendState::PoweredOff => write!(f, "PoweredOff"),
            BackendState::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

/// Manufacturer-specific data attached to the advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data: Vec<u8>,
}

/// The advertised identity handed to `start_broadcast`.
///
/// Treated opaquely by this crate; the on-air encoding is the backend's
/// business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastPayload {
    /// Advertised local name.
    pub local_name: String,
    /// Resource ids included in the advertisement.
    pub resource_ids: Vec<Uuid>,
    /// Optional manufacturer data block.
    pub manufacturer_data: Option<ManufacturerData>,
}

/// Asynchronous confirmations fired by the backend.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// A `publish_resource` call completed, successfully or not.
    ResourcePublished { id: Uuid, error: Option<String> },
    /// A `start_broadcast` call completed, successfully or not.
    BroadcastStarted { error: Option<String> },
    /// The backend's power state changed.
    StateChanged(BackendState),
}

/// Errors a backend command can report synchronously.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("backend command failed: {0}")]
    CommandFailed(String),
    #[error("backend not powered on (state: {0})")]
    NotReady(BackendState),
}

/// Platform advertising capability.
///
/// `stop_broadcast`, `clear_resources` and `retract_resource` have no
/// confirmation signal on real platforms and so return nothing; the
/// controller inserts settle intervals after them instead. `publish_resource`
/// and `start_broadcast` confirm asynchronously through [`BackendEvent`]s;
/// their `Result` only covers synchronous rejection of the command itself.
#[async_trait]
pub trait AdvertisingBackend: Send + Sync {
    /// Current power state.
    fn state(&self) -> BackendState;

    /// Stop the active broadcast. No confirmation event follows.
    async fn stop_broadcast(&self);

    /// Drop every published resource. No confirmation event follows.
    async fn clear_resources(&self);

    /// Remove a single published resource. No confirmation event follows.
    async fn retract_resource(&self, id: Uuid);

    /// Publish a resource with its attributes. Confirmed later by
    /// `BackendEvent::ResourcePublished` for the same id.
    async fn publish_resource(&self, resource: &Resource) -> Result<(), BackendError>;

    /// Start broadcasting the given identity. Confirmed later by
    /// `BackendEvent::BroadcastStarted`.
    async fn start_broadcast(&self, payload: &BroadcastPayload) -> Result<(), BackendError>;

    /// Push a changed attribute value to subscribed listeners.
    async fn notify_value(
        &self,
        resource: Uuid,
        attribute: Uuid,
        value: &[u8],
    ) -> Result<(), BackendError>;
}
