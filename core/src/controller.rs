//! Hot-swap orchestrator and endpoint control loop.
//!
//! One task owns every piece of mutable endpoint state (resource table,
//! broadcasting flag, the single live transaction) and multiplexes three
//! inputs: caller commands, backend confirmation events, and internal
//! timer events. Backend callbacks never touch state directly; they are
//! marshaled here as [`BackendEvent`]s, which gives the swap sequence a
//! total order and makes it testable with a fake backend that injects
//! synthetic confirmations.
//!
//! The swap sequence is stop → settle → clear → settle → rebuild/publish →
//! confirm (watchdog-guarded) → settle → restart → confirm. Each step
//! issues exactly one backend command; steps without a confirmation signal
//! get a settle interval instead. At most one transaction is live at a
//! time, and no backend call for a second swap is issued while the first
//! is in flight.

use crate::backend::{AdvertisingBackend, BackendEvent, BroadcastPayload, ManufacturerData};
use crate::config::{Config, SwapPolicy};
use crate::diagnostics::DiagnosticHub;
use crate::error::AdvertiseError;
use crate::resource::{Attribute, Resource, ResourceTable};
use crate::watchdog::{schedule_settle, TimerEvent, Watchdog};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Default advertised local name until `set_name` is called.
pub(crate) const DEFAULT_LOCAL_NAME: &str = "blecast";

pub(crate) type Reply<T> = oneshot::Sender<Result<T, AdvertiseError>>;

/// Caller requests, marshaled into the control loop.
pub(crate) enum Command {
    SetName {
        name: String,
        reply: Reply<()>,
    },
    SetManufacturerData {
        data: Option<ManufacturerData>,
        reply: Reply<()>,
    },
    AddResource {
        id: Uuid,
        primary: bool,
        reply: Reply<()>,
    },
    AddAttribute {
        resource: Uuid,
        attribute: Attribute,
        reply: Reply<()>,
    },
    Start {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    SwapIdentity {
        target: Uuid,
        policy: SwapPolicy,
        reply: Reply<()>,
    },
    RemoveResource {
        id: Uuid,
        reply: Reply<bool>,
    },
    RemoveAllResources {
        reply: Reply<()>,
    },
    NotifyValue {
        resource: Uuid,
        attribute: Uuid,
        value: Vec<u8>,
        reply: Reply<()>,
    },
}

/// Read-only view published for lock-free accessors.
///
/// Replaced wholesale on every state change, so readers never observe a
/// half-updated resource table.
#[derive(Debug, Clone, Default)]
pub(crate) struct EndpointSnapshot {
    pub broadcasting: bool,
    pub resource_ids: Vec<Uuid>,
    pub local_name: String,
}

pub(crate) type SharedSnapshot = Arc<RwLock<EndpointSnapshot>>;

/// States of a live swap transaction. Absence of a transaction is `Idle`;
/// completion and failure drop the transaction entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwapState {
    Stopping,
    ClearingResources,
    BuildingResource,
    AwaitingPublishConfirm,
    RestartingBroadcast,
    AwaitingBroadcastConfirm,
}

/// The single live hot-swap transaction.
struct Transaction {
    seq: u64,
    target: Uuid,
    /// Attribute snapshot of the old resource, rebuilt under the new id.
    snapshot: Vec<Attribute>,
    primary: bool,
    state: SwapState,
    /// Callers resolved together with this transaction (folded seamless
    /// requests included).
    waiters: Vec<Reply<()>>,
    watchdog: Option<Watchdog>,
    /// Guard against issuing a second publish before the first confirms.
    publish_in_flight: bool,
}

fn resolve_waiters(waiters: Vec<Reply<()>>, result: Result<(), AdvertiseError>) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

pub(crate) struct Controller {
    backend: Arc<dyn AdvertisingBackend>,
    config: Config,
    table: ResourceTable,
    local_name: String,
    manufacturer_data: Option<ManufacturerData>,
    broadcasting: bool,
    txn: Option<Transaction>,
    next_seq: u64,
    /// Callers waiting on a plain `start` confirmation.
    pending_start: Vec<Reply<()>>,
    shared: SharedSnapshot,
    diagnostics: DiagnosticHub,
    timer_tx: mpsc::Sender<TimerEvent>,
}

impl Controller {
    pub(crate) fn new(
        backend: Arc<dyn AdvertisingBackend>,
        config: Config,
        shared: SharedSnapshot,
        diagnostics: DiagnosticHub,
        timer_tx: mpsc::Sender<TimerEvent>,
    ) -> Self {
        let controller = Self {
            backend,
            config,
            table: ResourceTable::new(),
            local_name: DEFAULT_LOCAL_NAME.to_string(),
            manufacturer_data: None,
            broadcasting: false,
            txn: None,
            next_seq: 1,
            pending_start: Vec::new(),
            shared,
            diagnostics,
            timer_tx,
        };
        controller.publish_snapshot();
        controller
    }

    /// Drive the endpoint until every caller handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut backend_events: mpsc::Receiver<BackendEvent>,
        mut timers: mpsc::Receiver<TimerEvent>,
    ) {
        let mut backend_events_open = true;
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                ev = backend_events.recv(), if backend_events_open => match ev {
                    Some(ev) => self.handle_backend_event(ev).await,
                    None => backend_events_open = false,
                },
                Some(timer) = timers.recv() => self.handle_timer(timer).await,
            }
        }
        debug!("endpoint control loop exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetName { name, reply } => {
                info!(%name, "local name set");
                self.local_name = name;
                self.publish_snapshot();
                let _ = reply.send(Ok(()));
            }
            Command::SetManufacturerData { data, reply } => {
                self.manufacturer_data = data;
                debug!("manufacturer data updated");
                let _ = reply.send(Ok(()));
            }
            Command::AddResource { id, primary, reply } => {
                self.handle_add_resource(id, primary, reply).await;
            }
            Command::AddAttribute {
                resource,
                attribute,
                reply,
            } => {
                self.handle_add_attribute(resource, attribute, reply);
            }
            Command::Start { reply } => self.handle_start(reply).await,
            Command::Stop { reply } => self.handle_stop(reply).await,
            Command::SwapIdentity {
                target,
                policy,
                reply,
            } => self.handle_swap(target, policy, reply).await,
            Command::RemoveResource { id, reply } => {
                self.handle_remove_resource(id, reply).await;
            }
            Command::RemoveAllResources { reply } => {
                self.backend.clear_resources().await;
                self.table.clear();
                self.publish_snapshot();
                info!("all resources removed");
                let _ = reply.send(Ok(()));
            }
            Command::NotifyValue {
                resource,
                attribute,
                value,
                reply,
            } => self.handle_notify(resource, attribute, value, reply).await,
        }
    }

    // ------------------------------------------------------------------
    // Plain (non-swap) operations
    // ------------------------------------------------------------------

    async fn handle_add_resource(&mut self, id: Uuid, primary: bool, reply: Reply<()>) {
        if self.table.get(id).is_some() {
            // Never two entries live under one id: retract the old backend
            // entry before substituting the new one.
            self.diagnostics
                .warning(format!("resource {id} already exists, replacing"));
            self.backend.retract_resource(id).await;
        }
        let resource = Resource::new(id, primary);
        match self.backend.publish_resource(&resource).await {
            Ok(()) => {
                self.table.put(resource);
                self.publish_snapshot();
                debug!(%id, primary, "resource added");
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                self.diagnostics
                    .warning(format!("resource {id} publish rejected: {e}"));
                let _ = reply.send(Err(AdvertiseError::ResourcePublishError(e.to_string())));
            }
        }
    }

    /// Attributes are local bookkeeping until the resource is next
    /// (re)published; the backend's copy is rebuilt from this table on a
    /// swap.
    fn handle_add_attribute(&mut self, resource: Uuid, attribute: Attribute, reply: Reply<()>) {
        let Some(entry) = self.table.get_mut(resource) else {
            self.diagnostics
                .warning(format!("resource {resource} not found"));
            let _ = reply.send(Err(AdvertiseError::NotFound));
            return;
        };
        debug!(%resource, attribute = %attribute.id, "attribute added");
        entry.attributes.push(attribute);
        let _ = reply.send(Ok(()));
    }

    async fn handle_start(&mut self, reply: Reply<()>) {
        let state = self.backend.state();
        if !state.is_ready() {
            self.diagnostics
                .warning(format!("cannot start: backend not ready ({state})"));
            let _ = reply.send(Err(AdvertiseError::BackendNotReady(state)));
            return;
        }
        if self.txn.is_some() {
            let _ = reply.send(Err(AdvertiseError::TransactionActive));
            return;
        }
        if self.broadcasting {
            debug!("start ignored: already broadcasting");
            let _ = reply.send(Ok(()));
            return;
        }

        let start_outstanding = !self.pending_start.is_empty();
        self.pending_start.push(reply);
        if start_outstanding {
            // A start is already awaiting confirmation; resolve together.
            return;
        }

        let payload = self.payload();
        info!(name = %payload.local_name, resources = payload.resource_ids.len(), "starting broadcast");
        if let Err(e) = self.backend.start_broadcast(&payload).await {
            let waiters = std::mem::take(&mut self.pending_start);
            self.diagnostics
                .warning(format!("broadcast start rejected: {e}"));
            resolve_waiters(waiters, Err(AdvertiseError::BroadcastStartError(e.to_string())));
        }
    }

    async fn handle_stop(&mut self, reply: Reply<()>) {
        if self.txn.is_some() {
            let _ = reply.send(Err(AdvertiseError::TransactionActive));
            return;
        }
        self.backend.stop_broadcast().await;
        self.broadcasting = false;
        self.publish_snapshot();
        info!("broadcast stopped");
        let _ = reply.send(Ok(()));
    }

    async fn handle_remove_resource(&mut self, id: Uuid, reply: Reply<bool>) {
        let removed = self.table.remove_by_id(id);
        if removed {
            self.backend.retract_resource(id).await;
            self.publish_snapshot();
            debug!(%id, "resource removed");
        }
        let _ = reply.send(Ok(removed));
    }

    async fn handle_notify(
        &mut self,
        resource: Uuid,
        attribute: Uuid,
        value: Vec<u8>,
        reply: Reply<()>,
    ) {
        {
            let Some(entry) = self.table.get_mut(resource) else {
                self.diagnostics
                    .warning(format!("resource {resource} does not exist"));
                let _ = reply.send(Err(AdvertiseError::NotFound));
                return;
            };
            let Some(attr) = entry.attribute_mut(attribute) else {
                self.diagnostics.warning(format!(
                    "resource {resource} does not have attribute {attribute}"
                ));
                let _ = reply.send(Err(AdvertiseError::NotFound));
                return;
            };
            attr.value = value.clone();
        }
        match self.backend.notify_value(resource, attribute, &value).await {
            Ok(()) => {
                debug!(%resource, %attribute, "attribute value notified");
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                self.diagnostics
                    .warning(format!("failed to notify attribute {attribute}: {e}"));
                let _ = reply.send(Err(AdvertiseError::NotifyFailed(e.to_string())));
            }
        }
    }

    // ------------------------------------------------------------------
    // Hot-swap transaction
    // ------------------------------------------------------------------

    async fn handle_swap(&mut self, target: Uuid, policy: SwapPolicy, reply: Reply<()>) {
        // Preconditions, in order, before any backend call.
        if target.is_nil() {
            let _ = reply.send(Err(AdvertiseError::InvalidId(target.to_string())));
            return;
        }

        // Single-transaction lock, ahead of the broadcasting check: a live
        // transaction has already taken the broadcast down, so a request
        // arriving mid-sequence must hit the lock, not `NotAdvertising`.
        if let Some(txn) = self.txn.as_mut() {
            match policy {
                SwapPolicy::Strict => {
                    self.diagnostics
                        .warning("identity swap rejected: update already in progress");
                    let _ = reply.send(Err(AdvertiseError::UpdateInProgress));
                }
                SwapPolicy::Seamless => {
                    info!(seq = txn.seq, "folding swap request onto in-flight transaction");
                    txn.waiters.push(reply);
                }
            }
            return;
        }

        if !self.broadcasting {
            self.diagnostics
                .warning("cannot swap identity: not advertising");
            let _ = reply.send(Err(AdvertiseError::NotAdvertising));
            return;
        }
        let state = self.backend.state();
        if !state.is_ready() {
            self.diagnostics
                .warning(format!("cannot swap identity: backend not ready ({state})"));
            let _ = reply.send(Err(AdvertiseError::BackendNotReady(state)));
            return;
        }

        // Snapshot the current resource's attributes; the old resource is
        // discarded wholesale and rebuilt under the new id.
        let (snapshot, primary) = match self.table.first() {
            Some(resource) => (resource.attributes.clone(), resource.primary),
            None => (Vec::new(), true),
        };

        let seq = self.next_seq;
        self.next_seq += 1;
        info!(%target, seq, attributes = snapshot.len(), "identity swap started");

        // Step 1: stop the broadcast, then let the backend settle.
        self.backend.stop_broadcast().await;
        self.broadcasting = false;
        self.publish_snapshot();
        self.txn = Some(Transaction {
            seq,
            target,
            snapshot,
            primary,
            state: SwapState::Stopping,
            waiters: vec![reply],
            watchdog: None,
            publish_in_flight: false,
        });
        schedule_settle(self.config.settle_after_stop, seq, self.timer_tx.clone());
    }

    async fn handle_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::SettleElapsed { txn } => self.handle_settle(txn).await,
            TimerEvent::WatchdogExpired { txn, target } => self.handle_watchdog(txn, target),
        }
    }

    async fn handle_settle(&mut self, seq: u64) {
        let Some(txn) = self.txn.take() else {
            debug!(seq, "settle for finished transaction ignored");
            return;
        };
        if txn.seq != seq {
            debug!(seq, live = txn.seq, "stale settle ignored");
            self.txn = Some(txn);
            return;
        }

        match txn.state {
            SwapState::Stopping => {
                // Step 2: drop every resource, then settle again.
                self.backend.clear_resources().await;
                self.table.clear();
                self.publish_snapshot();
                info!(seq, "swap: resources cleared");
                let mut txn = txn;
                txn.state = SwapState::ClearingResources;
                self.txn = Some(txn);
                schedule_settle(self.config.settle_after_clear, seq, self.timer_tx.clone());
            }
            SwapState::ClearingResources => self.enter_build(txn).await,
            SwapState::RestartingBroadcast => self.enter_restart(txn).await,
            other => {
                self.diagnostics
                    .warning(format!("settle elapsed in unexpected state {other:?}"));
                self.txn = Some(txn);
            }
        }
    }

    /// Step 3/4: rebuild the resource under the new id and publish it,
    /// then wait for the confirmation under a watchdog.
    async fn enter_build(&mut self, mut txn: Transaction) {
        if txn.publish_in_flight {
            // A prior publish has not confirmed; issuing another would be
            // undefined behavior on the backend.
            self.diagnostics
                .warning("publish already in flight, not re-entering build step");
            self.txn = Some(txn);
            return;
        }
        txn.state = SwapState::BuildingResource;
        let rebuilt = Resource {
            id: txn.target,
            primary: txn.primary,
            attributes: txn.snapshot.clone(),
        };
        txn.publish_in_flight = true;
        info!(seq = txn.seq, target = %txn.target, "swap: publishing rebuilt resource");
        match self.backend.publish_resource(&rebuilt).await {
            Ok(()) => {
                txn.state = SwapState::AwaitingPublishConfirm;
                txn.watchdog = Some(Watchdog::arm(
                    self.config.watchdog_timeout,
                    txn.seq,
                    txn.target,
                    self.timer_tx.clone(),
                ));
                self.txn = Some(txn);
            }
            Err(e) => {
                self.fail_transaction(txn, AdvertiseError::ResourcePublishError(e.to_string()));
            }
        }
    }

    /// Step 5/6: restart the broadcast under the new identity and wait for
    /// its confirmation.
    async fn enter_restart(&mut self, mut txn: Transaction) {
        let payload = self.payload();
        info!(seq = txn.seq, target = %txn.target, "swap: restarting broadcast");
        match self.backend.start_broadcast(&payload).await {
            Ok(()) => {
                txn.state = SwapState::AwaitingBroadcastConfirm;
                self.txn = Some(txn);
            }
            Err(e) => {
                self.fail_transaction(txn, AdvertiseError::BroadcastRestartError(e.to_string()));
            }
        }
    }

    fn handle_watchdog(&mut self, seq: u64, target: Uuid) {
        let live = matches!(
            self.txn.as_ref(),
            Some(t) if t.seq == seq && t.state == SwapState::AwaitingPublishConfirm
        );
        if !live {
            debug!(seq, "stale watchdog expiry ignored");
            return;
        }
        let Some(mut txn) = self.txn.take() else {
            return;
        };
        txn.watchdog = None;
        // The backend's publish call stays outstanding; the in-flight guard
        // and sequence tags keep its late confirmation from re-entering.
        self.diagnostics.warning(format!(
            "publish confirmation for resource {target} never arrived"
        ));
        self.fail_transaction(txn, AdvertiseError::ResourcePublishTimeout);
    }

    // ------------------------------------------------------------------
    // Backend confirmation demultiplexing
    // ------------------------------------------------------------------

    async fn handle_backend_event(&mut self, event: BackendEvent) {
        match event {
            BackendEvent::ResourcePublished { id, error } => {
                self.handle_resource_published(id, error);
            }
            BackendEvent::BroadcastStarted { error } => self.handle_broadcast_started(error),
            BackendEvent::StateChanged(state) => self.diagnostics.backend_state_changed(state),
        }
    }

    fn handle_resource_published(&mut self, id: Uuid, error: Option<String>) {
        let awaiting = matches!(
            self.txn.as_ref(),
            Some(t) if t.state == SwapState::AwaitingPublishConfirm
        );
        if !awaiting {
            // Confirmation of a plain add, or a stale event from an already
            // finished transaction.
            match error {
                Some(e) => self
                    .diagnostics
                    .warning(format!("resource {id} publish failed: {e}")),
                None => debug!(%id, "resource publish confirmed"),
            }
            return;
        }

        let Some(mut txn) = self.txn.take() else {
            return;
        };
        if !txn.publish_in_flight {
            self.diagnostics
                .warning(format!("stale publish confirmation for {id} ignored"));
            self.txn = Some(txn);
            return;
        }
        if id != txn.target {
            self.diagnostics.warning(format!(
                "publish confirmation for unexpected resource {id} ignored"
            ));
            self.txn = Some(txn);
            return;
        }

        txn.publish_in_flight = false;
        txn.watchdog = None; // disarm

        match error {
            Some(e) => self.fail_transaction(txn, AdvertiseError::ResourcePublishError(e)),
            None => {
                // Record the rebuilt resource; the whole snapshot is
                // republished atomically for readers.
                self.table.put(Resource {
                    id: txn.target,
                    primary: txn.primary,
                    attributes: txn.snapshot.clone(),
                });
                self.publish_snapshot();
                info!(seq = txn.seq, target = %txn.target, "swap: resource publish confirmed");
                let seq = txn.seq;
                txn.state = SwapState::RestartingBroadcast;
                self.txn = Some(txn);
                schedule_settle(
                    self.config.settle_before_restart,
                    seq,
                    self.timer_tx.clone(),
                );
            }
        }
    }

    fn handle_broadcast_started(&mut self, error: Option<String>) {
        let awaiting = matches!(
            self.txn.as_ref(),
            Some(t) if t.state == SwapState::AwaitingBroadcastConfirm
        );
        if awaiting {
            let Some(txn) = self.txn.take() else {
                return;
            };
            match error {
                Some(e) => self.fail_transaction(txn, AdvertiseError::BroadcastRestartError(e)),
                None => {
                    self.broadcasting = true;
                    self.publish_snapshot();
                    info!(seq = txn.seq, target = %txn.target, "identity swap complete");
                    resolve_waiters(txn.waiters, Ok(()));
                }
            }
            return;
        }

        if !self.pending_start.is_empty() {
            let waiters = std::mem::take(&mut self.pending_start);
            match error {
                Some(e) => {
                    self.broadcasting = false;
                    self.publish_snapshot();
                    self.diagnostics
                        .warning(format!("broadcast start failed: {e}"));
                    resolve_waiters(waiters, Err(AdvertiseError::BroadcastStartError(e)));
                }
                None => {
                    self.broadcasting = true;
                    self.publish_snapshot();
                    info!("broadcast started");
                    resolve_waiters(waiters, Ok(()));
                }
            }
            return;
        }

        debug!("stale broadcast confirmation ignored");
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn fail_transaction(&mut self, txn: Transaction, err: AdvertiseError) {
        error!(seq = txn.seq, target = %txn.target, %err, "identity swap failed");
        self.diagnostics
            .warning(format!("identity swap to {} failed: {err}", txn.target));
        // The table stays in whatever partial state the backend confirmed;
        // the endpoint itself returns to idle and accepts new requests.
        self.publish_snapshot();
        resolve_waiters(txn.waiters, Err(err));
    }

    fn payload(&self) -> BroadcastPayload {
        BroadcastPayload {
            local_name: self.local_name.clone(),
            resource_ids: self.table.list_ids(),
            manufacturer_data: self.manufacturer_data.clone(),
        }
    }

    fn publish_snapshot(&self) {
        let mut shared = self.shared.write();
        shared.broadcasting = self.broadcasting;
        shared.resource_ids = self.table.list_ids();
        shared.local_name = self.local_name.clone();
    }
}
