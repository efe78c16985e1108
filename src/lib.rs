//! Read telemetry from a Renogy DC-DC battery charger over Bluetooth Low Energy and republish it
//! to MQTT for Home Assistant.
//!
//! Tested with a DCC50S charger fitted with a BT-2 module.
//!
//! The BT-2 bridges BLE to the charger's Modbus interface. A single request reads the block of
//! "dynamic data" registers; the response is delivered asynchronously as a notification and
//! decoded into a [`TelemetryRecord`]:
//!
//! - Auxiliary battery voltage, temperature and daily min/max (V, °C)
//! - Alternator and solar voltage, current and power (V, A, W)
//! - Daily and lifetime charge and energy counters (Ah, Wh)
//! - Charging state and fault bitmasks (raw)
//!
//! The device is unreliable: it drops connections without notice and the radio link is short
//! range. [`TransportSession`] reconnects before each poll when needed and [`PollScheduler`] keeps
//! polling at a fixed cadence whatever individual cycles do.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use bt2read::config::MqttConfig;
//! # use bt2read::publisher::mqtt::{self, MqttPublisher};
//! #
//! # #[tokio::main]
//! # pub async fn main() -> anyhow::Result<()> {
//! # let mqtt_config: MqttConfig = unimplemented!();
//!     let (publisher, eventloop) = MqttPublisher::new(&mqtt_config, vec![], true);
//!     tokio::spawn(mqtt::drive(eventloop));
//!
//!     let transport = bt2read::BleTransport::new().await?;
//!     let settings = bt2read::SessionSettings {
//!         scan_timeout: Duration::from_secs(20),
//!         connect_timeout: Duration::from_secs(20),
//!     };
//!     let session = bt2read::TransportSession::new(transport, Arc::new(publisher), settings);
//!
//!     let (_stop, shutdown) = tokio::sync::watch::channel(false);
//!     let mode = bt2read::RunMode::Continuous(Duration::from_secs(30));
//!     bt2read::PollScheduler::new(session, "C4:D3:6A:12:34:56", mode, shutdown).run().await?;
//! #   Ok(())
//! # }
//! ```

pub mod config;
mod error;
pub mod logging;
pub mod message;
pub mod publisher;
mod scheduler;
mod session;
mod telemetry_record;
mod transport;

#[cfg(test)]
mod test_support;

pub use error::{DecodeError, Error, ErrorKind, Result};
pub use message::status_message::decode;
pub use publisher::{PublishError, Publisher};
pub use scheduler::{PollOutcome, PollScheduler, RunMode};
pub use session::{SessionSettings, SessionState, TransportSession};
pub use telemetry_record::{FieldValue, TelemetryRecord};
pub use transport::{BleTransport, DeviceIdentity, Subscription, Transport, NOTIFY_CHANNEL, WRITE_CHANNEL};
