// storage.rs
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::StoreError, protocols::Parameters};

/// Persisted form of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub protocol: String,
    /// Declared method mask. Derived from the protocol when absent.
    #[serde(default)]
    pub methods: Option<u32>,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub preferred_controller: Option<i32>,
    #[serde(default)]
    pub last_sent_command: Option<u32>,
    #[serde(default)]
    pub last_sent_value: Option<u8>,
    #[serde(default)]
    pub state_value: Option<u8>,
}

impl DeviceRecord {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            name: String::new(),
            vendor: String::new(),
            model: String::new(),
            protocol: String::new(),
            methods: None,
            parameters: Parameters::new(),
            preferred_controller: None,
            last_sent_command: None,
            last_sent_value: None,
            state_value: None,
        }
    }
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn load(&self) -> Result<Vec<DeviceRecord>, StoreError>;
    async fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError>;
}

/// Device list kept as pretty printed JSON, replaced atomically on save.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl DeviceStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No device file yet");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), count = records.len(), "Saved devices");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<DeviceRecord>>,
}

impl MemoryStore {
    pub fn new(records: Vec<DeviceRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn load(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }

    async fn save(&self, records: &[DeviceRecord]) -> Result<(), StoreError> {
        *self.records.lock().await = records.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_store_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("devices.json"));
        assert!(store.load().await.unwrap().is_empty());

        let mut record = DeviceRecord::new(4);
        record.name = "Porch".into();
        record.protocol = "arctech".into();
        record.parameters.insert("house".into(), "B".into());
        record.state_value = Some(255);
        store.save(&[record.clone()]).await.unwrap();

        let reopened = JsonFileStore::new(dir.path().join("devices.json"));
        assert_eq!(reopened.load().await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn sparse_records_fill_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        tokio::fs::write(&path, r#"[{"id": 1, "protocol": "sartano"}]"#)
            .await
            .unwrap();

        let records = JsonFileStore::new(&path).load().await.unwrap();
        assert_eq!(records[0].protocol, "sartano");
        assert!(records[0].parameters.is_empty());
        assert_eq!(records[0].methods, None);
    }

    #[tokio::test]
    async fn malformed_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(matches!(
            JsonFileStore::new(&path).load().await,
            Err(StoreError::Format(_))
        ));
    }
}
