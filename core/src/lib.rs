//! blecast — broadcasting endpoint core.
//!
//! Publishes a named identity plus a set of addressable resources to
//! remote listeners through an opaque platform backend, and supports
//! replacing that identity live (hot-swap) while the backend confirms
//! every step asynchronously on its own schedule.
//!
//! The heart of the crate is the hot-swap orchestrator in `controller`:
//! a single-flight state machine that drives the backend through
//! stop → clear → rebuild → confirm → restart, with settle intervals
//! where the backend offers no confirmation signal and a watchdog where
//! it does but might never deliver.

pub mod advertiser;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod resource;
pub mod watchdog;

mod controller;

pub use advertiser::Advertiser;
pub use backend::{
    AdvertisingBackend, BackendError, BackendEvent, BackendState, BroadcastPayload,
    ManufacturerData,
};
pub use config::{Config, SwapPolicy};
pub use diagnostics::DiagnosticEvent;
pub use error::AdvertiseError;
pub use resource::{Attribute, Resource, ResourceTable};
