use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Application {
    pub id: u64,
    #[serde(rename = "app_name")]
    pub name: String,
    pub device_type: String,
}

impl Application {
    pub fn new(id: u64, name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            device_type: device_type.into(),
        }
    }
}
