use super::discovery::{DiscoveryEntry, STATE_TOPIC_PREFIX};
use super::{PublishError, Publisher};
use crate::config::MqttConfig;
use crate::telemetry_record::TelemetryRecord;
use crate::transport::DeviceIdentity;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, QoS};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Requests the client may queue before `publish` waits for the event loop
const REQUEST_CAPACITY: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Publishes records and discovery entries to an MQTT broker
pub struct MqttPublisher {
    client: AsyncClient,
    discovery: Vec<DiscoveryEntry>,
    echo: bool,
}

impl MqttPublisher {
    /// Create the publisher and the event loop that must be driven with [`drive`] for anything
    /// to reach the broker. With `echo` set every record is also printed to stdout.
    pub fn new(config: &MqttConfig, discovery: Vec<DiscoveryEntry>, echo: bool) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive());
        if let Some(username) = &config.username {
            options.set_credentials(username.clone(), config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        (Self { client, discovery, echo }, eventloop)
    }

    /// Queue a clean disconnect. [`drive`] returns once it has been sent.
    ///
    /// Never waits for room in the request queue: with the broker unreachable the queue stays
    /// full and the disconnect is reported as an error instead.
    pub fn disconnect(&self) -> Result<(), PublishError> {
        self.client.try_disconnect()?;
        Ok(())
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish_discovery(&self, device: &DeviceIdentity) -> Result<(), PublishError> {
        info!(entries = self.discovery.len(), "Publishing discovery information to Home Assistant");

        for entry in &self.discovery {
            let topic = entry.config_topic();
            let payload = serde_json::to_string(&entry.with_defaults(device))?;
            debug!(%topic, %payload, "DISCOVERY_PUB");
            self.client
                .publish(topic, QoS::AtLeastOnce, true, payload)
                .await?;
        }
        Ok(())
    }

    async fn publish_record(&self, record: &TelemetryRecord) -> Result<(), PublishError> {
        for (name, value) in record.fields() {
            if self.echo {
                println!("{name} = {value}");
            }
            self.client
                .publish(state_topic(name), QoS::AtLeastOnce, false, value.to_string())
                .await?;
        }
        info!("Published updated sensor stats to MQTT");
        Ok(())
    }
}

/// Topic a record field is published on
pub fn state_topic(field: &str) -> String {
    format!("{STATE_TOPIC_PREFIX}/bt2_{field}")
}

/// Run the MQTT event loop until a disconnect requested through
/// [`MqttPublisher::disconnect`] has gone out. Connection errors are logged and retried.
pub async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                return;
            }
            Ok(event) => trace!(?event, "MQTT event"),
            Err(err) => {
                warn!(%err, "MQTT connection error");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
