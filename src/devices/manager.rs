// devices/manager.rs
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use dashmap::{DashMap, mapref::entry::Entry};
use futures_util::future::join_all;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Actuation, Device, Snapshot};
use crate::{
    controllers::Controller,
    error::{ActuationError, ResultCode, StoreError},
    events::EventBus,
    methods::{Method, Methods},
    models::DeviceEvent,
    storage::{DeviceRecord, DeviceStore},
};

/// Metadata fields settable through the command surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Vendor,
    Model,
    Protocol,
}

impl Field {
    fn as_str(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Vendor => "vendor",
            Field::Model => "model",
            Field::Protocol => "protocol",
        }
    }
}

/// Owns every configured device and routes actuations to a controller.
///
/// Saves read the latest snapshot of each device from `saved`, never the
/// devices themselves, so a device stuck in a transmit cannot hold up
/// actuations of other devices.
pub struct DeviceManager {
    devices: DashMap<i32, Arc<Device>>,
    saved: DashMap<i32, Snapshot>,
    next_id: AtomicI32,
    controllers: Vec<Arc<dyn Controller>>,
    store: Arc<dyn DeviceStore>,
    writer: Mutex<()>,
    events: Arc<EventBus>,
    lock_timeout: Option<Duration>,
}

impl DeviceManager {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        mut controllers: Vec<Arc<dyn Controller>>,
        events: Arc<EventBus>,
        lock_timeout: Option<Duration>,
    ) -> Self {
        controllers.sort_by_key(|c| std::cmp::Reverse(c.priority()));
        Self {
            devices: DashMap::new(),
            saved: DashMap::new(),
            next_id: AtomicI32::new(1),
            controllers,
            store,
            writer: Mutex::new(()),
            events,
            lock_timeout,
        }
    }

    /// Restores persisted devices. Ids keep counting above the largest loaded one.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let records = self.store.load().await?;
        let count = records.len();
        for record in records {
            let id = record.id;
            self.next_id.fetch_max(id + 1, Ordering::SeqCst);
            let device = Arc::new(Device::from_record(record, self.lock_timeout));
            self.saved.insert(id, device.snapshot().await);
            self.devices.insert(id, device);
        }
        info!(count, "Loaded devices");
        Ok(count)
    }

    pub fn device(&self, id: i32) -> Option<Arc<Device>> {
        self.devices.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Device ids in ascending order.
    pub fn ids(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.devices.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn count(&self) -> usize {
        self.devices.len()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub async fn add_device(&self) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let device = Arc::new(Device::from_record(DeviceRecord::new(id), self.lock_timeout));
        self.saved.insert(id, device.snapshot().await);
        self.devices.insert(id, device);
        self.persist().await;
        self.events.publish(DeviceEvent::DeviceAdded { device_id: id });
        id
    }

    pub async fn remove_device(&self, id: i32) -> bool {
        if self.devices.remove(&id).is_none() {
            return false;
        }
        self.saved.remove(&id);
        self.persist().await;
        self.events.publish(DeviceEvent::DeviceRemoved { device_id: id });
        true
    }

    pub async fn set_field(&self, id: i32, field: Field, value: &str) -> bool {
        let Some(device) = self.device(id) else {
            return false;
        };
        match field {
            Field::Name => device.set_name(value).await,
            Field::Vendor => device.set_vendor(value).await,
            Field::Model => device.set_model(value).await,
            Field::Protocol => device.set_protocol_name(value).await,
        }
        self.save(&device).await;
        self.events.publish(DeviceEvent::DeviceChanged {
            device_id: id,
            field: field.as_str().to_string(),
        });
        true
    }

    pub async fn set_parameter(&self, id: i32, key: &str, value: &str) -> bool {
        let Some(device) = self.device(id) else {
            return false;
        };
        device.set_parameter(key, value).await;
        self.save(&device).await;
        self.events.publish(DeviceEvent::DeviceChanged {
            device_id: id,
            field: key.to_string(),
        });
        true
    }

    pub async fn set_preferred_controller(&self, id: i32, controller: Option<i32>) -> bool {
        let Some(device) = self.device(id) else {
            return false;
        };
        device.set_preferred_controller(controller).await;
        self.save(&device).await;
        true
    }

    /// Records a state observed outside an actuation, e.g. a sniffed remote.
    pub async fn set_state_value(&self, id: i32, value: u8) -> bool {
        let Some(device) = self.device(id) else {
            return false;
        };
        device.set_state_value(value).await;
        self.save(&device).await;
        self.events.publish(DeviceEvent::state_changed(id, None, Some(value)));
        true
    }

    /// The preferred controller when it exists, otherwise the highest priority
    /// controller carrying `method`. Reading the device honours the lock
    /// timeout, so a busy device fails here as `Busy`.
    pub async fn controller_for(
        &self,
        device: &Device,
        method: Method,
    ) -> Result<Arc<dyn Controller>, ActuationError> {
        let (_, preferred) = device.routing().await?;
        if let Some(preferred) = preferred {
            if let Some(controller) = self.controllers.iter().find(|c| c.id() == preferred) {
                return Ok(Arc::clone(controller));
            }
            warn!(device = device.id(), preferred, "Preferred controller missing, falling back");
        }
        self.controllers
            .iter()
            .find(|c| c.supports(method))
            .or_else(|| self.controllers.first())
            .cloned()
            .ok_or(ActuationError::NoController)
    }

    pub async fn do_action(
        &self,
        id: i32,
        method: Method,
        level: u8,
    ) -> Result<Actuation, ActuationError> {
        let result = self.actuate(id, method, level).await;
        let code = match &result {
            Ok(_) => ResultCode::Success,
            Err(e) => e.result_code(),
        };
        metrics::counter!(
            "rf_actions_total",
            "method" => method.name(),
            "result" => code.code().to_string()
        )
        .increment(1);
        result
    }

    async fn actuate(
        &self,
        id: i32,
        method: Method,
        level: u8,
    ) -> Result<Actuation, ActuationError> {
        let device = self.device(id).ok_or(ActuationError::NoSuchDevice(id))?;
        let controller = self.controller_for(&device, method).await?;
        let (actuation, snapshot) = device
            .do_action_snapshot(method, level, controller.as_ref())
            .await?;

        self.remember(snapshot);
        self.persist().await;
        self.events.publish(DeviceEvent::state_changed(
            id,
            Some(actuation.sent),
            actuation.state_value,
        ));
        Ok(actuation)
    }

    /// Turns off every device able to, concurrently. Failures do not stop the
    /// batch; each device's outcome is returned in id order.
    pub async fn all_off(&self) -> Vec<(i32, Result<Actuation, ActuationError>)> {
        // Read from held snapshots so a device mid-transmit does not stall the scan.
        let targets: Vec<i32> = self
            .ids()
            .into_iter()
            .filter(|id| {
                self.saved.get(id).is_some_and(|snapshot| {
                    Methods::from_bits_retain(snapshot.record.methods.unwrap_or_default())
                        .contains(Methods::TURNOFF)
                })
            })
            .collect();
        let outcomes = join_all(
            targets
                .iter()
                .map(|id| self.do_action(*id, Method::TurnOff, 0)),
        )
        .await;
        targets.into_iter().zip(outcomes).collect()
    }

    async fn save(&self, device: &Device) {
        self.remember(device.snapshot().await);
        self.persist().await;
    }

    /// Keeps `snapshot` unless a newer one of the same device is already held.
    fn remember(&self, snapshot: Snapshot) {
        let id = snapshot.record.id;
        if !self.devices.contains_key(&id) {
            return;
        }
        match self.saved.entry(id) {
            Entry::Occupied(mut held) => {
                if held.get().revision < snapshot.revision {
                    held.insert(snapshot);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
        }
        // A removal may have raced the insert.
        if !self.devices.contains_key(&id) {
            self.saved.remove(&id);
        }
    }

    /// Writes the held snapshots to the store, one writer at a time.
    /// Failures are logged only.
    async fn persist(&self) {
        let _writer = self.writer.lock().await;
        let mut records: Vec<DeviceRecord> = self
            .saved
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect();
        records.sort_by_key(|record| record.id);
        if let Err(e) = self.store.save(&records).await {
            warn!(error = %e, "Failed to persist devices");
        }
    }
}
