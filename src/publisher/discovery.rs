//! Home Assistant MQTT discovery entries.
//!
//! The definitions live in a YAML list, one mapping per sensor. Only `object_id` is required;
//! everything Home Assistant needs to tie the sensor to the charger is filled in here.

use super::PublishError;
use crate::transport::DeviceIdentity;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Prefix of every state topic
pub const STATE_TOPIC_PREFIX: &str = "renogy-bt2";
const DEVICE_MODEL: &str = "Renogy DCC50S";
/// Seconds without an update before Home Assistant marks a sensor unavailable
const EXPIRE_AFTER_S: u64 = 90;

/// One sensor definition as read from the discovery file
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryEntry {
    object_id: String,
    fields: Map<String, Value>,
}

impl DiscoveryEntry {
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Retained topic Home Assistant watches for this sensor's configuration
    pub fn config_topic(&self) -> String {
        format!("homeassistant/sensor/{}/config", self.object_id)
    }

    /// The entry with defaults applied for anything the file left out.
    pub fn with_defaults(&self, device: &DeviceIdentity) -> Map<String, Value> {
        let mut entry = self.fields.clone();
        entry
            .entry("unique_id")
            .or_insert_with(|| Value::String(self.object_id.clone()));
        entry
            .entry("platform")
            .or_insert_with(|| Value::String("mqtt".into()));
        entry
            .entry("expire_after")
            .or_insert_with(|| json!(EXPIRE_AFTER_S));

        let state_topic = match &entry["unique_id"] {
            Value::String(unique_id) => format!("{STATE_TOPIC_PREFIX}/{unique_id}"),
            other => format!("{STATE_TOPIC_PREFIX}/{other}"),
        };
        entry
            .entry("state_topic")
            .or_insert_with(|| Value::String(state_topic));
        entry
            .entry("device")
            .or_insert_with(|| json!({ "name": DEVICE_MODEL, "identifiers": device.name }));
        entry
    }
}

/// Read and parse the discovery file.
pub fn load(path: &Path) -> Result<Vec<DiscoveryEntry>, PublishError> {
    let text = std::fs::read_to_string(path)?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<Vec<DiscoveryEntry>, PublishError> {
    let entries: Vec<Map<String, Value>> = serde_yaml::from_str(text)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(index, fields)| {
            let object_id = fields
                .get("object_id")
                .and_then(Value::as_str)
                .ok_or(PublishError::MissingObjectId { index })?
                .to_owned();
            Ok(DiscoveryEntry { object_id, fields })
        })
        .collect()
}
