//! Where decoded records go.

pub mod discovery;
pub mod mqtt;

use crate::telemetry_record::TelemetryRecord;
use crate::transport::DeviceIdentity;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("failed to encode discovery entry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read discovery file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid discovery file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("discovery entry {index} has no object_id")]
    MissingObjectId { index: usize },
}

/// Receives everything the session produces for the outside world
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Announce the device's sensors. Called once per session, before the first record.
    async fn publish_discovery(&self, device: &DeviceIdentity) -> Result<(), PublishError>;

    async fn publish_record(&self, record: &TelemetryRecord) -> Result<(), PublishError>;
}
