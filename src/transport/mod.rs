//! The radio boundary: everything the session needs from a link to the BT-2.

mod ble;

pub use ble::BleTransport;

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Characteristic the request command is written to (service `ffd0`)
pub const WRITE_CHANNEL: Uuid = Uuid::from_u128(0x0000ffd1_0000_1000_8000_00805f9b34fb);
/// Characteristic the device notifies responses on (service `fff0`)
pub const NOTIFY_CHANNEL: Uuid = Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);

/// A located device. The name is whatever the device advertised when it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub address: String,
    pub name: String,
}

/// A link to a single device.
///
/// Implementations never retry or apply timeouts themselves; [`crate::TransportSession`] owns
/// both.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Scan until a device matching `identifier` (address or name) is seen.
    async fn locate(&mut self, identifier: &str) -> Result<DeviceIdentity>;

    async fn connect(&mut self) -> Result<()>;

    async fn is_connected(&self) -> bool;

    /// Enable notifications on `channel` and push every notification into `sink` from a
    /// background task until the returned [`Subscription`] is dropped.
    async fn subscribe(&mut self, channel: Uuid, sink: mpsc::Sender<Vec<u8>>) -> Result<Subscription>;

    async fn write(&mut self, channel: Uuid, data: &[u8]) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// An active notification subscription. Dropping it stops delivery.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task }
    }

    /// False once the delivering task has ended, e.g. because the device dropped the link
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
