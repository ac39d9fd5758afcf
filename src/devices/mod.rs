// devices/mod.rs
mod manager;

pub use manager::{DeviceManager, Field};

use std::fmt;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{Instrument, debug, info_span, warn};

use crate::{
    controllers::Controller,
    error::ActuationError,
    methods::{Method, Methods, mask_unsupported_methods},
    protocols::{self, EncodeRequest, Parameters},
    storage::DeviceRecord,
};

/// Logical level after a committed turn on.
pub const STATE_ON: u8 = 255;
/// Logical level after a committed turn off.
pub const STATE_OFF: u8 = 0;

/// Stages a single actuation moves through. Only `Committed` touches state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Validating,
    Encoding,
    Transmitting,
    Committed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastCommand {
    pub method: Method,
    pub value: Option<u8>,
}

/// A device record paired with the mutation count it reflects. Newer
/// snapshots of a device carry a strictly larger revision.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub revision: u64,
    pub record: DeviceRecord,
}

/// What a committed actuation put on the air.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actuation {
    pub requested: Method,
    pub sent: Method,
    pub state_value: Option<u8>,
}

struct DeviceData {
    name: String,
    vendor: String,
    model: String,
    protocol: String,
    methods: Methods,
    parameters: Parameters,
    preferred_controller: Option<i32>,
    last_sent: Option<LastCommand>,
    state_value: Option<u8>,
    revision: u64,
}

impl DeviceData {
    fn native_methods(&self) -> Option<Methods> {
        protocols::resolve(&self.protocol, &self.model)
            .map(|resolved| resolved.protocol.methods(resolved.model))
    }

    fn refresh_methods(&mut self) {
        if let Some(methods) = self.native_methods() {
            self.methods = methods;
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn record(&self, id: i32) -> DeviceRecord {
        DeviceRecord {
            id,
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            protocol: self.protocol.clone(),
            methods: Some(self.methods.bits()),
            parameters: self.parameters.clone(),
            preferred_controller: self.preferred_controller,
            last_sent_command: self.last_sent.map(|c| c.method.bit().bits()),
            last_sent_value: self.last_sent.and_then(|c| c.value),
            state_value: self.state_value,
        }
    }
}

/// A remote-controlled receiver. All access goes through one async mutex, so
/// at most one actuation per device is ever in flight.
pub struct Device {
    id: i32,
    lock_timeout: Option<Duration>,
    data: Mutex<DeviceData>,
}

impl Device {
    pub fn new(id: i32) -> Self {
        Self::from_record(DeviceRecord::new(id), None)
    }

    pub fn from_record(record: DeviceRecord, lock_timeout: Option<Duration>) -> Self {
        let last_sent = record
            .last_sent_command
            .and_then(Method::from_bits)
            .map(|method| LastCommand {
                method,
                value: record.last_sent_value,
            });
        let mut data = DeviceData {
            name: record.name,
            vendor: record.vendor,
            model: record.model,
            protocol: record.protocol,
            methods: Methods::empty(),
            parameters: record.parameters,
            preferred_controller: record.preferred_controller,
            last_sent,
            state_value: record.state_value,
            revision: 0,
        };
        match record.methods {
            Some(bits) => data.methods = Methods::from_bits_retain(bits),
            None => data.refresh_methods(),
        }
        Self {
            id: record.id,
            lock_timeout,
            data: Mutex::new(data),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    async fn guard(&self) -> Result<MutexGuard<'_, DeviceData>, ActuationError> {
        match self.lock_timeout {
            Some(limit) => tokio::time::timeout(limit, self.data.lock())
                .await
                .map_err(|_| ActuationError::Busy(self.id)),
            None => Ok(self.data.lock().await),
        }
    }

    /// Methods and preferred controller, read under the lock timeout.
    pub async fn routing(&self) -> Result<(Methods, Option<i32>), ActuationError> {
        let data = self.guard().await?;
        Ok((data.methods, data.preferred_controller))
    }

    /// Validates, encodes and transmits `method`, committing device state
    /// only once the controller confirmed the send.
    pub async fn do_action(
        &self,
        method: Method,
        level: u8,
        controller: &dyn Controller,
    ) -> Result<Actuation, ActuationError> {
        self.do_action_snapshot(method, level, controller)
            .await
            .map(|(actuation, _)| actuation)
    }

    /// Like [`Device::do_action`], also returning the committed state as
    /// captured before the device lock is released.
    pub async fn do_action_snapshot(
        &self,
        method: Method,
        level: u8,
        controller: &dyn Controller,
    ) -> Result<(Actuation, Snapshot), ActuationError> {
        let span = info_span!("actuate", device = self.id, %method, level, controller = controller.id());
        async move {
            let mut data = self.guard().await?;
            let mut phase = Phase::Idle;
            let result = self.actuate(&mut data, &mut phase, method, level, controller).await;
            match result {
                Ok(actuation) => {
                    debug!(%phase, sent = %actuation.sent, "Actuation committed");
                    let snapshot = Snapshot {
                        revision: data.revision,
                        record: data.record(self.id),
                    };
                    Ok((actuation, snapshot))
                }
                Err(e) => {
                    let failed_in = std::mem::replace(&mut phase, Phase::Failed);
                    warn!(%failed_in, %phase, error = %e, "Actuation failed");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn actuate(
        &self,
        data: &mut DeviceData,
        phase: &mut Phase,
        method: Method,
        level: u8,
        controller: &dyn Controller,
    ) -> Result<Actuation, ActuationError> {
        *phase = Phase::Validating;
        let carried = mask_unsupported_methods(data.methods, controller.supported_methods());
        if !carried.contains(method.bit()) {
            return Err(ActuationError::MethodNotSupported(method));
        }
        let resolved = protocols::resolve(&data.protocol, &data.model)
            .ok_or_else(|| ActuationError::UnknownProtocol(data.protocol.clone()))?;
        let effective = mask_unsupported_methods(carried, resolved.protocol.methods(resolved.model));
        if !effective.contains(method.bit()) {
            return Err(ActuationError::MethodNotSupported(method));
        }

        let last = last_command(data.last_sent, Methods::TURNON | Methods::TURNOFF | Methods::DIM);
        let sent = resolved.protocol.resolve_method(method, last);
        if sent != method && !effective.contains(sent.bit()) {
            return Err(ActuationError::MethodNotSupported(sent));
        }

        *phase = Phase::Encoding;
        debug!(%phase, %sent);
        let signal = resolved.protocol.encode(&EncodeRequest {
            method: sent,
            level,
            model: resolved.model,
            parameters: &data.parameters,
        })?;

        *phase = Phase::Transmitting;
        debug!(%phase, bytes = signal.len());
        controller.send(&signal).await?;

        *phase = Phase::Committed;
        let value = (sent == Method::Dim).then_some(level);
        data.last_sent = Some(LastCommand { method: sent, value });
        data.touch();
        if sent.changes_state() {
            data.state_value = Some(match sent {
                Method::TurnOn => STATE_ON,
                Method::TurnOff => STATE_OFF,
                _ => level,
            });
        }
        Ok(Actuation {
            requested: method,
            sent,
            state_value: data.state_value,
        })
    }

    /// Last command sent, restricted to `methods_supported`. `None` when
    /// nothing was sent or the last command falls outside the mask.
    pub async fn last_sent_command(&self, methods_supported: Methods) -> Option<Method> {
        last_command(self.data.lock().await.last_sent, methods_supported)
    }

    pub async fn last_sent_value(&self) -> Option<u8> {
        self.data.lock().await.last_sent.and_then(|c| c.value)
    }

    /// Records a command seen outside an actuation. Later toggles resolve
    /// against it.
    pub async fn set_last_sent_command(&self, method: Method, value: Option<u8>) {
        let mut data = self.data.lock().await;
        data.last_sent = Some(LastCommand { method, value });
        data.touch();
    }

    pub async fn state_value(&self) -> Option<u8> {
        self.data.lock().await.state_value
    }

    /// Also used when a receiver's state is learned out of band.
    pub async fn set_state_value(&self, value: u8) {
        let mut data = self.data.lock().await;
        data.state_value = Some(value);
        data.touch();
    }

    pub async fn methods(&self) -> Methods {
        self.data.lock().await.methods
    }

    pub async fn name(&self) -> String {
        self.data.lock().await.name.clone()
    }

    pub async fn set_name(&self, name: &str) {
        let mut data = self.data.lock().await;
        data.name = name.to_string();
        data.touch();
    }

    pub async fn vendor(&self) -> String {
        self.data.lock().await.vendor.clone()
    }

    pub async fn set_vendor(&self, vendor: &str) {
        let mut data = self.data.lock().await;
        data.vendor = vendor.to_string();
        data.touch();
    }

    pub async fn model(&self) -> String {
        self.data.lock().await.model.clone()
    }

    pub async fn set_model(&self, model: &str) {
        let mut data = self.data.lock().await;
        data.model = model.to_string();
        data.refresh_methods();
        data.touch();
    }

    pub async fn protocol_name(&self) -> String {
        self.data.lock().await.protocol.clone()
    }

    pub async fn set_protocol_name(&self, protocol: &str) {
        let mut data = self.data.lock().await;
        data.protocol = protocol.to_string();
        data.refresh_methods();
        data.touch();
    }

    pub async fn preferred_controller(&self) -> Option<i32> {
        self.data.lock().await.preferred_controller
    }

    pub async fn set_preferred_controller(&self, controller: Option<i32>) {
        let mut data = self.data.lock().await;
        data.preferred_controller = controller;
        data.touch();
    }

    /// Absent keys are not an error; the caller's default comes back.
    pub async fn parameter(&self, key: &str, default: &str) -> String {
        self.data
            .lock()
            .await
            .parameters
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub async fn set_parameter(&self, key: &str, value: &str) {
        let mut data = self.data.lock().await;
        data.parameters.insert(key.to_string(), value.to_string());
        data.touch();
    }

    /// Keys the resolved protocol reads, in presentation order.
    pub async fn parameters_for_protocol(&self) -> Vec<&'static str> {
        let data = self.data.lock().await;
        protocols::resolve(&data.protocol, &data.model)
            .map(|resolved| resolved.protocol.parameters().to_vec())
            .unwrap_or_default()
    }

    pub async fn record(&self) -> DeviceRecord {
        self.data.lock().await.record(self.id)
    }

    pub async fn snapshot(&self) -> Snapshot {
        let data = self.data.lock().await;
        Snapshot {
            revision: data.revision,
            record: data.record(self.id),
        }
    }
}

fn last_command(last: Option<LastCommand>, methods_supported: Methods) -> Option<Method> {
    last.map(|c| c.method).filter(|m| methods_supported.contains(m.bit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::Loopback;
    use std::sync::Arc;

    fn record(protocol: &str, model: &str, params: &[(&str, &str)]) -> DeviceRecord {
        let mut record = DeviceRecord::new(7);
        record.protocol = protocol.into();
        record.model = model.into();
        record.parameters = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        record
    }

    fn dimmer() -> Device {
        Device::from_record(
            record("arctech", "selflearning-dimmer", &[("house", "1234"), ("unit", "1")]),
            None,
        )
    }

    #[tokio::test]
    async fn dim_commits_level_and_last_command() {
        let device = dimmer();
        let controller = Loopback::new(1, 0);

        let actuation = device.do_action(Method::Dim, 128, &controller).await.unwrap();
        assert_eq!(actuation.sent, Method::Dim);
        assert_eq!(device.state_value().await, Some(128));
        assert_eq!(device.last_sent_command(Methods::all()).await, Some(Method::Dim));
        assert_eq!(device.last_sent_value().await, Some(128));
        assert_eq!(controller.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_method_never_reaches_controller() {
        let device = dimmer();
        let controller = Loopback::new(1, 0);

        let result = device.do_action(Method::Bell, 0, &controller).await;
        assert!(matches!(result, Err(ActuationError::MethodNotSupported(Method::Bell))));
        assert!(controller.sent().await.is_empty());
        assert_eq!(device.state_value().await, None);
    }

    #[tokio::test]
    async fn controller_mask_is_applied() {
        let device = dimmer();
        let controller = Loopback::new(1, 0).with_methods(Methods::TURNON | Methods::TURNOFF);
        let result = device.do_action(Method::Dim, 10, &controller).await;
        assert!(matches!(result, Err(ActuationError::MethodNotSupported(Method::Dim))));
        assert!(controller.sent().await.is_empty());
    }

    #[tokio::test]
    async fn failed_send_leaves_state_untouched() {
        let device = dimmer();
        let controller = Loopback::new(1, 0);
        device.do_action(Method::TurnOff, 0, &controller).await.unwrap();

        controller.set_failing(true);
        let result = device.do_action(Method::TurnOn, 0, &controller).await;
        assert!(matches!(result, Err(ActuationError::Transmit(_))));
        assert_eq!(device.state_value().await, Some(STATE_OFF));
        assert_eq!(device.last_sent_command(Methods::all()).await, Some(Method::TurnOff));
    }

    #[tokio::test]
    async fn toggle_flips_last_command() {
        let device = dimmer();
        let controller = Loopback::new(1, 0);

        // Nothing recorded yet: toggling turns on.
        let first = device.do_action(Method::Toggle, 0, &controller).await.unwrap();
        assert_eq!(first.sent, Method::TurnOn);
        assert_eq!(device.state_value().await, Some(STATE_ON));

        let second = device.do_action(Method::Toggle, 0, &controller).await.unwrap();
        assert_eq!(second.sent, Method::TurnOff);
        assert_eq!(device.state_value().await, Some(STATE_OFF));

        let sent = controller.sent().await;
        let on = protocols::find("arctech")
            .unwrap()
            .encode(&EncodeRequest {
                method: Method::TurnOn,
                level: 0,
                model: "selflearning-dimmer",
                parameters: &record("", "", &[("house", "1234"), ("unit", "1")]).parameters,
            })
            .unwrap();
        assert_eq!(sent[0], on);
        assert_ne!(sent[0], sent[1]);
    }

    #[tokio::test]
    async fn toggle_follows_externally_recorded_command() {
        let device = dimmer();
        let controller = Loopback::new(1, 0);

        device.set_last_sent_command(Method::TurnOn, None).await;
        let toggled = device.do_action(Method::Toggle, 0, &controller).await.unwrap();
        assert_eq!(toggled.sent, Method::TurnOff);

        device.set_last_sent_command(Method::Dim, Some(40)).await;
        assert_eq!(device.last_sent_value().await, Some(40));
        let toggled = device.do_action(Method::Toggle, 0, &controller).await.unwrap();
        assert_eq!(toggled.sent, Method::TurnOff);

        device.set_last_sent_command(Method::Bell, None).await;
        let toggled = device.do_action(Method::Toggle, 0, &controller).await.unwrap();
        assert_eq!(toggled.sent, Method::TurnOn);
    }

    #[tokio::test]
    async fn snapshots_advance_with_every_mutation() {
        let device = dimmer();
        let controller = Loopback::new(1, 0);
        let initial = device.snapshot().await.revision;

        device.set_name("Desk").await;
        let named = device.snapshot().await;
        assert!(named.revision > initial);
        assert_eq!(named.record.name, "Desk");

        let (_, committed) = device
            .do_action_snapshot(Method::Dim, 90, &controller)
            .await
            .unwrap();
        assert!(committed.revision > named.revision);
        assert_eq!(committed.record.state_value, Some(90));
    }

    #[tokio::test]
    async fn unknown_persisted_method_bits_are_kept() {
        let mut rec = record("arctech", "codeswitch", &[]);
        rec.methods = Some(Methods::TURNON.bits() | 128);
        let device = Device::from_record(rec, None);
        assert_eq!(device.record().await.methods, Some(1 | 128));
        assert!(device.methods().await.contains(Methods::TURNON));
    }

    #[tokio::test]
    async fn bell_does_not_change_state() {
        let device = Device::from_record(record("arctech", "bell", &[("house", "C")]), None);
        let controller = Loopback::new(1, 0);
        device.do_action(Method::Bell, 0, &controller).await.unwrap();
        assert_eq!(device.state_value().await, None);
        assert_eq!(device.last_sent_command(Methods::BELL).await, Some(Method::Bell));
        assert_eq!(device.last_sent_command(Methods::TURNON).await, None);
    }

    #[tokio::test]
    async fn unknown_protocol_is_configuration_error() {
        let mut rec = record("zigzag", "", &[]);
        rec.methods = Some(Methods::TURNON.bits());
        let device = Device::from_record(rec, None);
        let controller = Loopback::new(1, 0);
        let result = device.do_action(Method::TurnOn, 0, &controller).await;
        assert!(matches!(result, Err(ActuationError::UnknownProtocol(p)) if p == "zigzag"));
        assert!(device.parameters_for_protocol().await.is_empty());
    }

    #[tokio::test]
    async fn encode_fault_is_reported_without_commit() {
        let device = Device::from_record(record("sartano", "", &[("code", "10x")]), None);
        let controller = Loopback::new(1, 0);
        let result = device.do_action(Method::TurnOn, 0, &controller).await;
        assert!(matches!(result, Err(ActuationError::Encode(_))));
        assert!(controller.sent().await.is_empty());
        assert_eq!(device.last_sent_command(Methods::all()).await, None);
    }

    #[tokio::test]
    async fn methods_follow_protocol_and_model() {
        let device = Device::new(1);
        assert_eq!(device.methods().await, Methods::empty());

        device.set_protocol_name("arctech").await;
        device.set_model("codeswitch").await;
        assert_eq!(
            device.methods().await,
            Methods::TURNON | Methods::TURNOFF | Methods::TOGGLE
        );
        assert_eq!(device.parameters_for_protocol().await, vec!["house", "unit"]);

        device.set_protocol_name("19").await;
        assert!(device.methods().await.contains(Methods::DIM));
        assert_eq!(
            device.parameters_for_protocol().await,
            vec!["system", "units", "fade"]
        );
    }

    #[tokio::test]
    async fn parameters_fall_back_to_default() {
        let device = Device::new(2);
        assert_eq!(device.parameter("house", "A").await, "A");
        device.set_parameter("house", "D").await;
        assert_eq!(device.parameter("house", "A").await, "D");
    }

    #[tokio::test]
    async fn busy_device_times_out_when_bounded() {
        let device = Arc::new(Device::from_record(
            record("arctech", "codeswitch", &[]),
            Some(Duration::from_millis(20)),
        ));
        let slow = Arc::new(Loopback::new(1, 0).with_latency(Duration::from_millis(200)));

        let first = {
            let device = Arc::clone(&device);
            let slow = Arc::clone(&slow);
            tokio::spawn(async move { device.do_action(Method::TurnOn, 0, slow.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = device.do_action(Method::TurnOff, 0, slow.as_ref()).await;
        assert!(matches!(second, Err(ActuationError::Busy(_))));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn record_round_trips_state() {
        let device = dimmer();
        let controller = Loopback::new(1, 0);
        device.do_action(Method::Dim, 64, &controller).await.unwrap();

        let restored = Device::from_record(device.record().await, None);
        assert_eq!(restored.state_value().await, Some(64));
        assert_eq!(restored.last_sent_command(Methods::DIM).await, Some(Method::Dim));
        assert_eq!(restored.methods().await, device.methods().await);
    }
}
