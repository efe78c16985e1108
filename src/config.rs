use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables that override the file, e.g. `BT2_MQTT__PASSWORD`
const ENV_PREFIX: &str = "BT2";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    pub mqtt: MqttConfig,
    /// YAML list of Home Assistant discovery entries
    #[serde(default = "default_discovery_file")]
    pub discovery_file: PathBuf,
    /// Append log output to this file instead of writing it to stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Address (or advertised name) of the BT-2 module
    pub address: String,
    #[serde(default = "default_device_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_device_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

impl Config {
    /// Load configuration from a TOML file, overridden by `BT2_` environment variables
    pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }
}

impl DeviceConfig {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

fn default_discovery_file() -> PathBuf {
    PathBuf::from("bt2_mqtt.yaml")
}

fn default_device_timeout_secs() -> u64 {
    20
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_client_id() -> String {
    "bt2read".into()
}
