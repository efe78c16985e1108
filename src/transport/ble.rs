use super::{DeviceIdentity, Subscription, Transport, NOTIFY_CHANNEL, WRITE_CHANNEL};
use crate::error::{Error, Result};
use anyhow::anyhow;
use async_trait::async_trait;
use bluest::error::ErrorKind;
use bluest::{Adapter, Characteristic, Device};
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The BT-2 exposes its write and notify characteristics on separate services
const SERVICE_OF_CHANNEL: [(Uuid, Uuid); 2] = [
    (Uuid::from_u128(0x0000ffd0_0000_1000_8000_00805f9b34fb), WRITE_CHANNEL),
    (Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb), NOTIFY_CHANNEL),
];

/// [`Transport`] over the host's default Bluetooth Low Energy adapter
pub struct BleTransport {
    adapter: Adapter,
    device: Option<Device>,
    characteristics: HashMap<Uuid, Characteristic>,
}

impl BleTransport {
    /// Open the default adapter, waiting for it to be powered on.
    pub async fn new() -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        Ok(Self {
            adapter,
            device: None,
            characteristics: HashMap::new(),
        })
    }

    fn device(&self) -> Result<&Device> {
        self.device.as_ref().ok_or(Error::NotLocated)
    }

    fn characteristic(&self, channel: Uuid) -> Result<&Characteristic> {
        self.characteristics
            .get(&channel)
            .ok_or_else(|| Error::TransportDisconnected(format!("characteristic {channel} not discovered")))
    }

    async fn discover_characteristics(&mut self) -> Result<()> {
        let device = self.device()?.clone();
        let mut characteristics = HashMap::new();
        for (service_id, channel) in SERVICE_OF_CHANNEL {
            let service = device
                .discover_services_with_uuid(service_id)
                .await?
                .first()
                .ok_or_else(|| Error::Protocol(format!("device does not expose service {service_id}")))?
                .clone();
            let characteristic = service
                .discover_characteristics_with_uuid(channel)
                .await?
                .first()
                .ok_or_else(|| Error::Protocol(format!("device does not expose characteristic {channel}")))?
                .clone();
            characteristics.insert(channel, characteristic);
        }
        self.characteristics = characteristics;
        Ok(())
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn locate(&mut self, identifier: &str) -> Result<DeviceIdentity> {
        let mut adapter_events = self.adapter.scan(&[]).await?;
        while let Some(found) = adapter_events.next().await {
            let address = found.device.id().to_string();
            let name = found.device.name_async().await.unwrap_or_default();
            debug!(%address, %name, "Advertisement");
            if matches_identifier(identifier, &address, &name) {
                self.device = Some(found.device);
                return Ok(DeviceIdentity { address, name });
            }
        }

        Err(Error::NotFound(identifier.to_owned()))
    }

    async fn connect(&mut self) -> Result<()> {
        let device = self.device()?.clone();
        self.adapter.connect_device(&device).await?;
        self.discover_characteristics().await
    }

    async fn is_connected(&self) -> bool {
        match &self.device {
            Some(device) => device.is_connected().await,
            None => false,
        }
    }

    async fn subscribe(&mut self, channel: Uuid, sink: mpsc::Sender<Vec<u8>>) -> Result<Subscription> {
        let characteristic = self.characteristic(channel)?.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let reader = match characteristic.notify().await {
                Ok(reader) => {
                    let _ = ready_tx.send(Ok(()));
                    reader
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            forward_notifications(reader, sink).await;
        });

        await_ready(Subscription::new(task), ready_rx).await
    }

    async fn write(&mut self, channel: Uuid, data: &[u8]) -> Result<()> {
        debug!(data = %hex::encode(data), "TX");
        self.characteristic(channel)?.write(data).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.characteristics.clear();
        if let Some(device) = &self.device {
            self.adapter.disconnect_device(device).await?;
            info!("Disconnected from device");
        }
        Ok(())
    }
}

/// Hand out `subscription` once its task reports notifications enabled. Any other outcome,
/// including this future being dropped by a timeout, drops the subscription and aborts the task.
async fn await_ready(
    subscription: Subscription,
    ready: oneshot::Receiver<std::result::Result<(), bluest::Error>>,
) -> Result<Subscription> {
    match ready.await {
        Ok(Ok(())) => Ok(subscription),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Err(Error::TransportDisconnected(
            "notification task ended before subscribing".into(),
        )),
    }
}

/// Push each notification into `sink` until the stream ends or errors.
///
/// The notification context must never wait on the consumer, so a full channel drops the
/// notification instead of applying back pressure to the adapter.
async fn forward_notifications<T>(mut reader: T, sink: mpsc::Sender<Vec<u8>>)
where
    T: Stream<Item = std::result::Result<Vec<u8>, bluest::Error>> + Send + Unpin,
{
    while let Some(read_result) = reader.next().await {
        match read_result {
            Ok(data) => match sink.try_send(data) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("Notification queue full, dropping notification");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            },
            Err(err) => {
                warn!(%err, "Notification error");
                return;
            }
        }
    }

    debug!("End of notification stream");
}

/// Hex digits in a Bluetooth address
const ADDRESS_DIGITS: usize = 12;

/// True if `identifier` names this device, either by advertised name or by its full address.
/// Addresses compare ignoring case and separators so `AA:BB:..` matches `aa_bb_..`, and only
/// against the end of the platform id, which is where the address sits on every backend.
fn matches_identifier(identifier: &str, address: &str, name: &str) -> bool {
    if identifier.is_empty() {
        return false;
    }
    if name == identifier {
        return true;
    }
    let wanted = normalize_address(identifier);
    wanted.len() == ADDRESS_DIGITS && normalize_address(address).ends_with(&wanted)
}

fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl From<bluest::Error> for Error {
    fn from(err: bluest::Error) -> Self {
        match err.kind() {
            ErrorKind::NotConnected => Error::TransportDisconnected(err.to_string()),
            ErrorKind::Timeout => Error::ConnectTimeout,
            _ => Error::Protocol(err.to_string()),
        }
    }
}

#[test]
fn test_matches_identifier_by_address() {
    assert!(matches_identifier("C4:D3:6A:12:34:56", "C4:D3:6A:12:34:56", "BT-TH-6A123456"));
    assert!(matches_identifier("c4:d3:6a:12:34:56", "C4:D3:6A:12:34:56", ""));
    assert!(matches_identifier("C4_D3_6A_12_34_56", "BluetoothLE#BluetoothLE00:1a:7d:da:71:13-c4:d3:6a:12:34:56", ""));
}

#[test]
fn test_matches_identifier_by_name() {
    assert!(matches_identifier("BT-TH-6A123456", "anything", "BT-TH-6A123456"));
}

#[test]
fn test_matches_identifier_rejects_others() {
    assert!(!matches_identifier("C4:D3:6A:12:34:56", "C4:D3:6A:12:34:57", "BT-TH-6A123457"));
    assert!(!matches_identifier("", "C4:D3:6A:12:34:56", ""));
    assert!(!matches_identifier("::", "C4:D3:6A:12:34:56", ""));
}

#[test]
fn test_matches_identifier_rejects_partial_address() {
    assert!(!matches_identifier("12:34", "C4:D3:6A:12:34:56", ""));
    assert!(!matches_identifier("34:56", "C4:D3:6A:12:34:56", ""));
    assert!(!matches_identifier("C4:D3:6A:12:34", "C4:D3:6A:12:34:56", ""));
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_timeout_aborts_notification_task() {
    let (alive, ended) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _alive = alive;
        std::future::pending::<()>().await
    });
    let (_ready_tx, ready_rx) = oneshot::channel();

    let subscribing = await_ready(Subscription::new(task), ready_rx);
    let result = tokio::time::timeout(std::time::Duration::from_secs(20), subscribing).await;

    assert!(result.is_err());
    assert!(ended.await.is_err());
}

#[tokio::test]
async fn test_subscribe_failure_aborts_notification_task() {
    let (alive, ended) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        let _alive = alive;
        std::future::pending::<()>().await
    });
    let (ready_tx, ready_rx) = oneshot::channel();
    ready_tx
        .send(Err(bluest::Error::from(ErrorKind::NotConnected)))
        .unwrap();

    let err = await_ready(Subscription::new(task), ready_rx).await.unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::TransportDisconnected);
    assert!(ended.await.is_err());
}

#[tokio::test]
async fn test_subscribe_ready_keeps_task() {
    let task = tokio::spawn(std::future::pending::<()>());
    let (ready_tx, ready_rx) = oneshot::channel();
    ready_tx.send(Ok(())).unwrap();

    let subscription = await_ready(Subscription::new(task), ready_rx).await.unwrap();
    assert!(subscription.is_active());
}

#[cfg(test)]
fn notifications(
    items: Vec<std::result::Result<Vec<u8>, bluest::Error>>,
) -> impl Stream<Item = std::result::Result<Vec<u8>, bluest::Error>> + Send + Unpin {
    futures_util::stream::iter(items)
}

#[tokio::test]
async fn test_forward_drops_when_queue_full() {
    let (sink, mut queue) = mpsc::channel(1);
    forward_notifications(notifications(vec![Ok(vec![1]), Ok(vec![2]), Ok(vec![3])]), sink).await;

    assert_eq!(queue.recv().await, Some(vec![1]));
    assert_eq!(queue.recv().await, None);
}

#[tokio::test]
async fn test_forward_stops_on_stream_error() {
    let (sink, mut queue) = mpsc::channel(8);
    let reader = notifications(vec![
        Ok(vec![1]),
        Err(bluest::Error::from(ErrorKind::NotConnected)),
        Ok(vec![2]),
    ]);
    forward_notifications(reader, sink).await;

    assert_eq!(queue.recv().await, Some(vec![1]));
    assert_eq!(queue.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_forward_stops_when_queue_closed() {
    let (sink, queue) = mpsc::channel(8);
    drop(queue);
    let reader = notifications(vec![Ok(vec![1])]).chain(futures_util::stream::pending());

    let forwarding = forward_notifications(reader, sink);
    assert!(tokio::time::timeout(std::time::Duration::from_secs(1), forwarding)
        .await
        .is_ok());
}
