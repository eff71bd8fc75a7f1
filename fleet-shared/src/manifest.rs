use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Device-type manifest: which configuration options a device type accepts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DeviceManifest {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub options: Vec<ConfigOption>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigOption {
    /// Dotted key the answer is stored under in the generated config.
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: OptionKind,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub advanced: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    #[default]
    Text,
    Number,
    Boolean,
    List,
}

impl DeviceManifest {
    /// Options presented to the user; advanced ones only on request.
    pub fn visible_options(&self, advanced: bool) -> impl Iterator<Item = &ConfigOption> {
        self.options.iter().filter(move |o| advanced || !o.advanced)
    }
}
