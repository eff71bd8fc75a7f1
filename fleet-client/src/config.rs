use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_LOCATION: &str = "config.json";
pub const DEFAULT_BOOT_PARTITION: u8 = 1;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub token: Option<String>,
    pub trust_invalid_server_cert: bool,
    pub log_level: String,
    /// Program used to run the initialize stage with elevated privileges.
    pub elevation_command: String,
    /// Device type -> path of `config.json` relative to the boot filesystem.
    pub config_locations: BTreeMap<String, PathBuf>,
    /// Device type -> 1-based number of the boot partition in its image.
    pub boot_partitions: BTreeMap<String, u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "https://api.fleet.example.com".to_string(),
            token: None,
            trust_invalid_server_cert: false,
            log_level: "info".to_string(),
            elevation_command: "sudo".to_string(),
            config_locations: BTreeMap::new(),
            boot_partitions: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;

        let mut config = if config_path.exists() {
            debug!("Loading config from: {:?}", config_path);
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            debug!("Config file not found, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        let config_dir = config_path
            .parent()
            .context("Failed to get config directory")?;

        std::fs::create_dir_all(config_dir).context("Failed to create config directory")?;

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        info!("Config saved to: {:?}", config_path);
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("FLEET_API_URL") {
            self.api_url = url;
        }
        if let Some(token) = var("FLEET_TOKEN") {
            self.token = Some(token);
        }
    }

    /// Where `config.json` lives on the boot filesystem of `device_type`.
    pub fn config_location(&self, device_type: &str) -> PathBuf {
        self.config_locations
            .get(device_type)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_LOCATION))
    }

    pub fn boot_partition(&self, device_type: &str) -> u8 {
        self.boot_partitions
            .get(device_type)
            .copied()
            .unwrap_or(DEFAULT_BOOT_PARTITION)
    }

    pub fn api_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    fn config_file_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("fleet").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.elevation_command, "sudo");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"api_url": "https://fleet.local/"}"#).unwrap();
        assert_eq!(config.api_url(), "https://fleet.local");
        assert_eq!(config.elevation_command, "sudo");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "FLEET_API_URL" => Some("http://localhost:8080".to_string()),
            "FLEET_TOKEN" => Some("secret".to_string()),
            _ => None,
        });
        assert_eq!(config.api_url, "http://localhost:8080");
        assert_eq!(config.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_config_location_per_device_type() {
        let mut config = Config::default();
        config
            .config_locations
            .insert("intel-edison".into(), PathBuf::from("config/config.json"));
        assert_eq!(
            config.config_location("intel-edison"),
            PathBuf::from("config/config.json")
        );
        assert_eq!(
            config.config_location("raspberry-pi"),
            PathBuf::from(DEFAULT_CONFIG_LOCATION)
        );
    }

    #[test]
    fn test_boot_partition_defaults_to_first() {
        let config: Config =
            serde_json::from_str(r#"{"boot_partitions": {"intel-nuc": 4}}"#).unwrap();
        assert_eq!(config.boot_partition("intel-nuc"), 4);
        assert_eq!(config.boot_partition("raspberry-pi"), DEFAULT_BOOT_PARTITION);
    }
}
