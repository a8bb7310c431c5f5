//! Shared test fixtures: a recording fake backend that drives the
//! endpoint's confirmation channel with synthetic events.
#![allow(dead_code)]

use async_trait::async_trait;
use blecast_core::{
    Advertiser, AdvertisingBackend, Attribute, BackendError, BackendEvent, BackendState,
    BroadcastPayload, Config, ManufacturerData, Resource,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const RES_A: &str = "0000df01-0000-1000-8000-00805f9b34fb";
pub const RES_B: &str = "0000df02-0000-1000-8000-00805f9b34fb";
pub const RES_C: &str = "0000df03-0000-1000-8000-00805f9b34fb";
pub const CHAR_1: &str = "0000df10-0000-1000-8000-00805f9b34fb";
pub const CHAR_2: &str = "0000df11-0000-1000-8000-00805f9b34fb";

pub fn uuid(raw: &str) -> Uuid {
    Uuid::parse_str(raw).expect("test uuid")
}

/// Route endpoint logs through the test harness, honoring `RUST_LOG`.
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Every backend command the endpoint issued, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    StopBroadcast,
    ClearResources,
    RetractResource(Uuid),
    PublishResource {
        id: Uuid,
        attributes: Vec<Attribute>,
    },
    StartBroadcast {
        local_name: String,
        resource_ids: Vec<Uuid>,
        manufacturer_data: Option<ManufacturerData>,
    },
    NotifyValue {
        resource: Uuid,
        attribute: Uuid,
        value: Vec<u8>,
    },
}

pub struct FakeBackend {
    calls: Mutex<Vec<BackendCall>>,
    events: mpsc::Sender<BackendEvent>,
    state: Mutex<BackendState>,
    /// When set, `publish_resource` immediately fires its confirmation.
    pub auto_confirm_publish: AtomicBool,
    /// When set, `start_broadcast` immediately fires its confirmation.
    pub auto_confirm_start: AtomicBool,
    publish_error: Mutex<Option<String>>,
    start_error: Mutex<Option<String>>,
    notify_error: Mutex<Option<String>>,
}

impl FakeBackend {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<BackendEvent>) {
        init_tracing();
        let (events, rx) = mpsc::channel(32);
        let backend = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            events,
            state: Mutex::new(BackendState::PoweredOn),
            auto_confirm_publish: AtomicBool::new(true),
            auto_confirm_start: AtomicBool::new(true),
            publish_error: Mutex::new(None),
            start_error: Mutex::new(None),
            notify_error: Mutex::new(None),
        });
        (backend, rx)
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn set_state(&self, state: BackendState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn set_publish_error(&self, error: Option<&str>) {
        *self.publish_error.lock().unwrap() = error.map(String::from);
    }

    pub fn set_start_error(&self, error: Option<&str>) {
        *self.start_error.lock().unwrap() = error.map(String::from);
    }

    pub fn set_notify_error(&self, error: Option<&str>) {
        *self.notify_error.lock().unwrap() = error.map(String::from);
    }

    /// Inject a synthetic confirmation event.
    pub async fn emit(&self, event: BackendEvent) {
        self.events.send(event).await.expect("endpoint alive");
    }

    fn record(&self, call: BackendCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AdvertisingBackend for FakeBackend {
    fn state(&self) -> BackendState {
        *self.state.lock().unwrap()
    }

    async fn stop_broadcast(&self) {
        self.record(BackendCall::StopBroadcast);
    }

    async fn clear_resources(&self) {
        self.record(BackendCall::ClearResources);
    }

    async fn retract_resource(&self, id: Uuid) {
        self.record(BackendCall::RetractResource(id));
    }

    async fn publish_resource(&self, resource: &Resource) -> Result<(), BackendError> {
        self.record(BackendCall::PublishResource {
            id: resource.id,
            attributes: resource.attributes.clone(),
        });
        if self.auto_confirm_publish.load(Ordering::SeqCst) {
            let error = self.publish_error.lock().unwrap().clone();
            let _ = self
                .events
                .send(BackendEvent::ResourcePublished {
                    id: resource.id,
                    error,
                })
                .await;
        }
        Ok(())
    }

    async fn start_broadcast(&self, payload: &BroadcastPayload) -> Result<(), BackendError> {
        self.record(BackendCall::StartBroadcast {
            local_name: payload.local_name.clone(),
            resource_ids: payload.resource_ids.clone(),
            manufacturer_data: payload.manufacturer_data.clone(),
        });
        if self.auto_confirm_start.load(Ordering::SeqCst) {
            let error = self.start_error.lock().unwrap().clone();
            let _ = self
                .events
                .send(BackendEvent::BroadcastStarted { error })
                .await;
        }
        Ok(())
    }

    async fn notify_value(
        &self,
        resource: Uuid,
        attribute: Uuid,
        value: &[u8],
    ) -> Result<(), BackendError> {
        self.record(BackendCall::NotifyValue {
            resource,
            attribute,
            value: value.to_vec(),
        });
        match self.notify_error.lock().unwrap().clone() {
            Some(e) => Err(BackendError::CommandFailed(e)),
            None => Ok(()),
        }
    }
}

/// Settle/watchdog timings short enough for tests.
pub fn fast_config() -> Config {
    Config {
        settle_after_stop: Duration::from_millis(5),
        settle_after_clear: Duration::from_millis(5),
        settle_before_restart: Duration::from_millis(5),
        watchdog_timeout: Duration::from_millis(500),
        ..Config::default()
    }
}

/// Endpoint seeded with resource A (one attribute) and broadcasting, with
/// the backend call log cleared.
pub async fn seeded_endpoint(config: Config) -> (Advertiser, Arc<FakeBackend>) {
    let (backend, events) = FakeBackend::new();
    let advertiser = Advertiser::spawn(backend.clone(), events, config);

    advertiser.set_name("swap-unit").await.expect("seed name");
    advertiser
        .add_resource(RES_A, true)
        .await
        .expect("seed resource");
    advertiser
        .add_attribute(RES_A, CHAR_1, 2, 2, b"hi".to_vec())
        .await
        .expect("seed attribute");
    advertiser.start().await.expect("seed start");
    assert!(advertiser.is_broadcasting());

    backend.clear_calls();
    (advertiser, backend)
}
