use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    devices::{Device, DeviceManager},
    methods::Method,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatus {
    pub device_id: i32,
    pub name: String,
    pub vendor: String,
    pub model: String,
    pub protocol: String,
    pub methods: u32,
    pub parameters: BTreeMap<String, String>,
    /// Parameter keys the device's protocol reads.
    pub protocol_parameters: Vec<String>,
    pub preferred_controller: Option<i32>,
    pub last_sent_command: Option<Method>,
    pub last_sent_value: Option<u8>,
    pub state_value: Option<u8>,
}

impl DeviceStatus {
    pub async fn of(device: &Device) -> Self {
        let record = device.record().await;
        let protocol_parameters = device
            .parameters_for_protocol()
            .await
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            device_id: record.id,
            name: record.name,
            vendor: record.vendor,
            model: record.model,
            protocol: record.protocol,
            methods: record.methods.unwrap_or_default(),
            parameters: record.parameters,
            protocol_parameters,
            preferred_controller: record.preferred_controller,
            last_sent_command: record.last_sent_command.and_then(Method::from_bits),
            last_sent_value: record.last_sent_value,
            state_value: record.state_value,
        }
    }
}

/// Pushed to every websocket client.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    DeviceAdded {
        device_id: i32,
    },
    DeviceRemoved {
        device_id: i32,
    },
    DeviceChanged {
        device_id: i32,
        field: String,
    },
    StateChanged {
        device_id: i32,
        method: Option<Method>,
        state_value: Option<u8>,
        at: DateTime<Utc>,
    },
    Error {
        device_id: Option<i32>,
        message: String,
        code: i32,
    },
}

impl DeviceEvent {
    pub fn state_changed(device_id: i32, method: Option<Method>, state_value: Option<u8>) -> Self {
        DeviceEvent::StateChanged {
            device_id,
            method,
            state_value,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ActionRequest {
    /// Method name: turnon, turnoff, bell, toggle, dim or learn.
    #[validate(length(min = 1, max = 16))]
    pub method: String,
    /// Dim level 0-255; ignored by other methods.
    #[serde(default)]
    pub level: u8,
}

/// Inbound websocket message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Action {
        device_id: i32,
        method: String,
        #[serde(default)]
        level: u8,
    },
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ActionResponse {
    pub code: i32,
    pub message: String,
    pub state_value: Option<u8>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct DeviceUpdate {
    #[validate(length(max = 128))]
    pub name: Option<String>,
    #[validate(length(max = 128))]
    pub vendor: Option<String>,
    #[validate(length(max = 64))]
    pub model: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub protocol: Option<String>,
    pub preferred_controller: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ParameterValue {
    #[validate(length(max = 256))]
    pub value: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ParameterQuery {
    /// Returned when the device has no such parameter.
    pub default: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceResult {
    pub device_id: i32,
    pub code: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorString {
    pub code: i32,
    pub message: String,
}

pub struct AppState {
    pub manager: Arc<DeviceManager>,
    /// Connected websocket clients and when they joined.
    pub clients: DashMap<Uuid, DateTime<Utc>>,
    pub max_connections: usize,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(manager: Arc<DeviceManager>, max_connections: usize) -> Self {
        Self {
            manager,
            clients: DashMap::new(),
            max_connections,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
