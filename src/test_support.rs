//! In-memory doubles for the transport and publisher.

use crate::error::{Error, Result};
use crate::publisher::{PublishError, Publisher};
use crate::telemetry_record::TelemetryRecord;
use crate::transport::{DeviceIdentity, Subscription, Transport, WRITE_CHANNEL};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A complete status response with a valid CRC
pub fn response() -> Vec<u8> {
    hex::decode(
        "ff034600640160009619ff008c0064000e00d300eb0041dead0082008f03e8beef\
         00960000000c00000078000001590002005100001234000000000001e24000000000\
         0002000401004637",
    )
    .unwrap()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Locate,
    Connect,
    Subscribe,
    Write(Vec<u8>),
    Disconnect,
}

#[derive(Default)]
struct MockState {
    ops: Vec<Op>,
    connected: bool,
    hang_locate: bool,
    hang_connect: bool,
    connect_failures: usize,
    write_failures: usize,
    writes_while_disconnected: usize,
    reply: Option<Vec<u8>>,
    sink: Option<mpsc::Sender<Vec<u8>>>,
    subscription_alive: Option<oneshot::Receiver<()>>,
    op_events: Option<mpsc::UnboundedSender<Op>>,
}

/// Scripted [`Transport`]. Clones share state so a test can inspect a transport it has handed
/// to a session.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn record(&self, op: Op) {
        let mut state = self.state.lock().unwrap();
        if let Some(events) = &state.op_events {
            let _ = events.send(op.clone());
        }
        state.ops.push(op);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.ops().iter().filter(|op| pred(op)).count()
    }

    /// Every operation, as it happens
    pub fn op_events(&self) -> mpsc::UnboundedReceiver<Op> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().op_events = Some(tx);
        rx
    }

    pub fn hang_locate(&self) {
        self.state.lock().unwrap().hang_locate = true;
    }

    pub fn hang_connect(&self) {
        self.state.lock().unwrap().hang_connect = true;
    }

    pub fn fail_connects(&self, count: usize) {
        self.state.lock().unwrap().connect_failures = count;
    }

    pub fn fail_writes(&self, count: usize) {
        self.state.lock().unwrap().write_failures = count;
    }

    /// Answer every request with `data` on the subscribed channel
    pub fn reply_with(&self, data: Vec<u8>) {
        self.state.lock().unwrap().reply = Some(data);
    }

    /// Deliver an unsolicited notification
    pub fn notify(&self, data: Vec<u8>) {
        let state = self.state.lock().unwrap();
        if let Some(sink) = &state.sink {
            let _ = sink.try_send(data);
        }
    }

    /// Simulate the device silently dropping the connection
    pub fn drop_link(&self) {
        self.state.lock().unwrap().connected = false;
    }

    pub fn is_linked(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn writes_only_while_connected(&self) -> bool {
        self.state.lock().unwrap().writes_while_disconnected == 0
    }

    /// Resolves once the most recent subscription has been dropped
    pub async fn subscription_released(&self) -> bool {
        let alive = self.state.lock().unwrap().subscription_alive.take();
        match alive {
            Some(alive) => alive.await.is_err(),
            None => true,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn locate(&mut self, identifier: &str) -> Result<DeviceIdentity> {
        self.record(Op::Locate);
        let hang = self.state.lock().unwrap().hang_locate;
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(DeviceIdentity {
            address: identifier.to_owned(),
            name: "BT-TH-6A123456".into(),
        })
    }

    async fn connect(&mut self) -> Result<()> {
        self.record(Op::Connect);
        let hang = {
            let mut state = self.state.lock().unwrap();
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(Error::TransportDisconnected("connection refused".into()));
            }
            state.hang_connect
        };
        if hang {
            std::future::pending::<()>().await;
        }
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn subscribe(&mut self, _channel: Uuid, sink: mpsc::Sender<Vec<u8>>) -> Result<Subscription> {
        self.record(Op::Subscribe);
        let (alive_tx, alive_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await
        });
        let mut state = self.state.lock().unwrap();
        state.sink = Some(sink);
        state.subscription_alive = Some(alive_rx);
        Ok(Subscription::new(task))
    }

    async fn write(&mut self, channel: Uuid, data: &[u8]) -> Result<()> {
        assert_eq!(channel, WRITE_CHANNEL);
        self.record(Op::Write(data.to_vec()));
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            state.writes_while_disconnected += 1;
        }
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(Error::TransportDisconnected("write failed".into()));
        }
        if let (Some(reply), Some(sink)) = (&state.reply, &state.sink) {
            let _ = sink.try_send(reply.clone());
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.record(Op::Disconnect);
        let mut state = self.state.lock().unwrap();
        state.connected = false;
        state.sink = None;
        Ok(())
    }
}

#[derive(Default)]
struct PublisherState {
    records: Vec<TelemetryRecord>,
    discoveries: usize,
    discovery_failures: usize,
}

/// [`Publisher`] that keeps everything it is given
#[derive(Default)]
pub struct RecordingPublisher {
    state: Mutex<PublisherState>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<TelemetryRecord> {
        self.state.lock().unwrap().records.clone()
    }

    /// Successful discovery publishes
    pub fn discoveries(&self) -> usize {
        self.state.lock().unwrap().discoveries
    }

    pub fn fail_discoveries(&self, count: usize) {
        self.state.lock().unwrap().discovery_failures = count;
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish_discovery(&self, _device: &DeviceIdentity) -> std::result::Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        if state.discovery_failures > 0 {
            state.discovery_failures -= 1;
            return Err(PublishError::MissingObjectId { index: 0 });
        }
        state.discoveries += 1;
        Ok(())
    }

    async fn publish_record(&self, record: &TelemetryRecord) -> std::result::Result<(), PublishError> {
        self.state.lock().unwrap().records.push(record.clone());
        Ok(())
    }
}
