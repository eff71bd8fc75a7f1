use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Number of random bytes behind a generated device UUID (62 hex chars).
pub const UUID_BYTES: usize = 31;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Device {
    pub uuid: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub name: String,
    pub device_type: String,
    pub application_name: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub status: Option<String>,
    /// Identifier of the container currently running on the device, if any.
    #[serde(default)]
    pub container_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    pub supervisor_version: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Device {
    pub fn short_uuid(&self) -> &str {
        let end = self.uuid.len().min(7);
        &self.uuid[..end]
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterDeviceBody {
    pub application: String,
    pub uuid: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RenameDeviceBody {
    pub name: String,
}

/// Generate a client-side device UUID: 31 random bytes, lowercase hex.
pub fn generate_uuid() -> String {
    let mut bytes = [0u8; UUID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
