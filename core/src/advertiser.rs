//! Caller-facing advertising endpoint handle.
//!
//! `Advertiser` is a cheap clone over the control loop's command channel
//! plus a read snapshot. Mutating operations round-trip through the loop;
//! `is_broadcasting`/`list_resource_ids`/`local_name` read the snapshot
//! without locks held across the loop, so they stay available while a
//! swap transaction is mid-sequence.

use crate::backend::{AdvertisingBackend, BackendEvent, ManufacturerData};
use crate::config::{Config, SwapPolicy};
use crate::controller::{Command, Controller, EndpointSnapshot, Reply};
use crate::diagnostics::{DiagnosticEvent, DiagnosticHub};
use crate::error::AdvertiseError;
use crate::resource::{parse_id, Attribute};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

/// Capacity of the caller command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 64;
/// Capacity of the internal timer channel.
const TIMER_CHANNEL_CAPACITY: usize = 16;

/// Handle to a broadcasting endpoint.
///
/// Created with [`Advertiser::spawn`]; the underlying control loop lives
/// until every handle is dropped.
#[derive(Clone)]
pub struct Advertiser {
    commands: mpsc::Sender<Command>,
    shared: Arc<RwLock<EndpointSnapshot>>,
    diagnostics: DiagnosticHub,
}

impl Advertiser {
    /// Spawn the endpoint control loop over a platform backend.
    ///
    /// `backend_events` is the channel the backend fires its asynchronous
    /// confirmations on; it is consumed exclusively by the loop.
    pub fn spawn(
        backend: Arc<dyn AdvertisingBackend>,
        backend_events: mpsc::Receiver<BackendEvent>,
        config: Config,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (timer_tx, timer_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
        let shared = Arc::new(RwLock::new(EndpointSnapshot::default()));
        let diagnostics = DiagnosticHub::new(config.diagnostics_capacity);

        let controller = Controller::new(
            backend,
            config,
            shared.clone(),
            diagnostics.clone(),
            timer_tx,
        );
        tokio::spawn(controller.run(command_rx, backend_events, timer_rx));

        Self {
            commands: command_tx,
            shared,
            diagnostics,
        }
    }

    /// Set the advertised local name. Resolves once the loop has recorded
    /// it; the name goes on air at the next (re)start.
    pub async fn set_name(&self, name: impl Into<String>) -> Result<(), AdvertiseError> {
        let name = name.into();
        self.roundtrip(|reply| Command::SetName { name, reply }).await
    }

    /// Attach or clear manufacturer data. Takes effect on the next
    /// (re)start.
    pub async fn set_manufacturer_data(
        &self,
        data: Option<ManufacturerData>,
    ) -> Result<(), AdvertiseError> {
        self.roundtrip(|reply| Command::SetManufacturerData { data, reply })
            .await
    }

    /// Publish a new resource under `id`.
    ///
    /// A colliding id replaces the previous entry (the old backend entry is
    /// retracted first).
    pub async fn add_resource(&self, id: &str, primary: bool) -> Result<(), AdvertiseError> {
        let id = parse_id(id)?;
        self.roundtrip(|reply| Command::AddResource { id, primary, reply })
            .await
    }

    /// Attach an attribute to a locally recorded resource.
    pub async fn add_attribute(
        &self,
        resource: &str,
        id: &str,
        permissions: u32,
        properties: u32,
        value: Vec<u8>,
    ) -> Result<(), AdvertiseError> {
        let resource = parse_id(resource)?;
        let attribute = Attribute::new(parse_id(id)?, permissions, properties, value);
        self.roundtrip(|reply| Command::AddAttribute {
            resource,
            attribute,
            reply,
        })
        .await
    }

    /// Start broadcasting. Resolves when the backend confirms; an already
    /// broadcasting endpoint resolves immediately.
    pub async fn start(&self) -> Result<(), AdvertiseError> {
        self.roundtrip(|reply| Command::Start { reply }).await
    }

    /// Stop broadcasting. Rejected with `TransactionActive` while a swap is
    /// mid-sequence.
    pub async fn stop(&self) -> Result<(), AdvertiseError> {
        self.roundtrip(|reply| Command::Stop { reply }).await
    }

    /// Replace the advertised identity with `new_id`, rebuilding the current
    /// resource's attributes under it. Strict policy: a second swap while
    /// one is in flight is rejected with `UpdateInProgress`.
    pub async fn swap_identity(&self, new_id: &str) -> Result<(), AdvertiseError> {
        self.swap_with_policy(new_id, SwapPolicy::Strict).await
    }

    /// Like [`swap_identity`](Self::swap_identity), but a request that finds
    /// a swap already in flight folds onto it and resolves with that
    /// transaction's outcome.
    pub async fn swap_identity_seamless(&self, new_id: &str) -> Result<(), AdvertiseError> {
        self.swap_with_policy(new_id, SwapPolicy::Seamless).await
    }

    async fn swap_with_policy(
        &self,
        new_id: &str,
        policy: SwapPolicy,
    ) -> Result<(), AdvertiseError> {
        let target = parse_id(new_id)?;
        self.roundtrip(|reply| Command::SwapIdentity {
            target,
            policy,
            reply,
        })
        .await
    }

    /// Remove a resource. Returns `false` when the id was not present.
    pub async fn remove_resource(&self, id: &str) -> Result<bool, AdvertiseError> {
        let id = parse_id(id)?;
        self.roundtrip(|reply| Command::RemoveResource { id, reply })
            .await
    }

    /// Remove every resource from the table and the backend.
    pub async fn remove_all_resources(&self) -> Result<(), AdvertiseError> {
        self.roundtrip(|reply| Command::RemoveAllResources { reply })
            .await
    }

    /// Push a changed attribute value to subscribed listeners.
    pub async fn notify_value(
        &self,
        resource: &str,
        attribute: &str,
        value: Vec<u8>,
    ) -> Result<(), AdvertiseError> {
        let resource = parse_id(resource)?;
        let attribute = parse_id(attribute)?;
        self.roundtrip(|reply| Command::NotifyValue {
            resource,
            attribute,
            value,
            reply,
        })
        .await
    }

    /// Whether the backend has confirmed an active broadcast.
    pub fn is_broadcasting(&self) -> bool {
        self.shared.read().broadcasting
    }

    /// Ids of the currently recorded resources, in insertion order.
    pub fn list_resource_ids(&self) -> Vec<Uuid> {
        self.shared.read().resource_ids.clone()
    }

    /// The advertised local name.
    pub fn local_name(&self) -> String {
        self.shared.read().local_name.clone()
    }

    /// Subscribe to the diagnostic warning stream.
    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<DiagnosticEvent> {
        self.diagnostics.subscribe()
    }

    async fn roundtrip<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, AdvertiseError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| AdvertiseError::ChannelClosed)?;
        rx.await.map_err(|_| AdvertiseError::ChannelClosed)?
    }
}
