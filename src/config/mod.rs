// config/mod.rs
use std::path::PathBuf;

use config::Config;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub metrics: MetricsSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub devices: DeviceSettings,
    #[serde(default)]
    pub controllers: Vec<ControllerSettings>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub address: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct StorageSettings {
    /// JSON file holding the device list. Without one devices live in memory.
    pub devices_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceSettings {
    /// Bound on waiting for a busy device. Waits forever when unset.
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSettings {
    pub id: i32,
    /// `tellstick`, `tellstick-duo` or `loopback`.
    pub kind: String,
    #[serde(default)]
    pub priority: i32,
    pub path: Option<PathBuf>,
    /// Method names the controller may carry; empty means all.
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_await_ack")]
    pub await_ack: bool,
}

fn default_send_timeout() -> u64 {
    2000
}

fn default_await_ack() -> bool {
    true
}

impl Settings {
    pub fn new() -> Result<Self, config::ConfigError> {
        Self::from_file("config/config")
    }

    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = Config::builder()
            .set_default("server.address", "127.0.0.1:8080")?
            .set_default("server.max_connections", 64)?
            .set_default("metrics.enabled", false)?
            .set_default("metrics.port", 9000)?
            .set_default("storage.devices_file", "devices.json")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        settings.try_deserialize()
    }
}
