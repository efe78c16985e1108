//! The device session: locate, connect, subscribe, poll, recover.
//!
//! Responses arrive on a different execution context from the one that sends requests. The
//! transport pushes raw notifications into a bounded channel; a forwarding task owned by the
//! session decodes them and hands each record to the [`Publisher`]. The only state the two sides
//! share is the flag recording whether discovery information has been published.

use crate::error::{Error, Result};
use crate::message::status_message;
use crate::publisher::Publisher;
use crate::transport::{DeviceIdentity, Subscription, Transport, NOTIFY_CHANNEL, WRITE_CHANNEL};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Notifications buffered between the transport and the forwarder
const NOTIFICATION_QUEUE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    /// A request has been written since the session was last (re)subscribed
    Polling,
    Faulted,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
}

impl From<&crate::config::DeviceConfig> for SessionSettings {
    fn from(config: &crate::config::DeviceConfig) -> Self {
        Self {
            scan_timeout: config.scan_timeout(),
            connect_timeout: config.connect_timeout(),
        }
    }
}

pub struct TransportSession<T: Transport> {
    transport: T,
    publisher: Arc<dyn Publisher>,
    settings: SessionSettings,
    state: SessionState,
    identity: Option<DeviceIdentity>,
    subscription: Option<Subscription>,
    notifications: Option<mpsc::Sender<Vec<u8>>>,
    forwarder: Option<JoinHandle<()>>,
    discovery_sent: Arc<AtomicBool>,
    delivered: Arc<Notify>,
}

impl<T: Transport> TransportSession<T> {
    pub fn new(transport: T, publisher: Arc<dyn Publisher>, settings: SessionSettings) -> Self {
        Self {
            transport,
            publisher,
            settings,
            state: SessionState::Disconnected,
            identity: None,
            subscription: None,
            notifications: None,
            forwarder: None,
            discovery_sent: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Whether discovery information has gone out during this session
    pub fn discovery_sent(&self) -> bool {
        self.discovery_sent.load(Ordering::Acquire)
    }

    fn is_subscribed(&self) -> bool {
        matches!(self.state, SessionState::Subscribed | SessionState::Polling)
    }

    /// Scan once for the device, giving up after the scan timeout.
    ///
    /// Once a device has been located its identity is fixed for the life of the session and
    /// later calls return it without scanning.
    pub async fn locate(&mut self, identifier: &str) -> Result<DeviceIdentity> {
        if let Some(identity) = &self.identity {
            return Ok(identity.clone());
        }

        let identity = timeout(self.settings.scan_timeout, self.transport.locate(identifier))
            .await
            .map_err(|_| Error::NotFound(identifier.to_owned()))??;
        info!(name = %identity.name, address = %identity.address, "Located device");

        self.identity = Some(identity.clone());
        Ok(identity)
    }

    /// Connect and subscribe to responses unless that has already been done.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.is_subscribed() {
            return Ok(());
        }
        let identity = self.identity.clone().ok_or(Error::NotLocated)?;

        self.subscription = None;
        self.state = SessionState::Connecting;
        debug!(name = %identity.name, "Connecting");

        match self.establish(&identity).await {
            Ok(subscription) => {
                self.subscription = Some(subscription);
                self.state = SessionState::Subscribed;
                info!(name = %identity.name, "Subscribed to device notifications");
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Faulted;
                if let Err(disconnect_err) = self.transport.disconnect().await {
                    debug!(%disconnect_err, "Disconnect after failed connect");
                }
                Err(err)
            }
        }
    }

    async fn establish(&mut self, identity: &DeviceIdentity) -> Result<Subscription> {
        let limit = self.settings.connect_timeout;
        if !self.transport.is_connected().await {
            timeout(limit, self.transport.connect())
                .await
                .map_err(|_| Error::ConnectTimeout)??;
        }

        let sink = self.notification_sink(identity);
        timeout(limit, self.transport.subscribe(NOTIFY_CHANNEL, sink))
            .await
            .map_err(|_| Error::ConnectTimeout)?
    }

    /// Send one status request, reconnecting first if the link is down.
    ///
    /// The response is not awaited; it arrives through the notification subscription. When
    /// reconnecting fails the request is skipped and the connect error returned.
    pub async fn poll(&mut self) -> Result<()> {
        if self.is_subscribed() && !self.link_alive().await {
            warn!("No connection...Attempting to reconnect");
            self.subscription = None;
            self.state = SessionState::Disconnected;
        }
        self.ensure_connected().await?;

        match self.transport.write(WRITE_CHANNEL, &status_message::request()).await {
            Ok(()) => {
                self.state = SessionState::Polling;
                Ok(())
            }
            Err(err) => {
                self.subscription = None;
                self.state = SessionState::Faulted;
                Err(err)
            }
        }
    }

    async fn link_alive(&self) -> bool {
        let subscribed = self.subscription.as_ref().is_some_and(Subscription::is_active);
        subscribed && self.transport.is_connected().await
    }

    /// Wait until a record has been forwarded to the publisher, or `within` has passed.
    /// Returns whether a record arrived.
    pub async fn wait_for_record(&self, within: Duration) -> bool {
        timeout(within, self.delivered.notified()).await.is_ok()
    }

    /// Release the subscription, the forwarder and the connection.
    pub async fn close(&mut self) {
        self.subscription = None;
        self.notifications = None;
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Err(err) = self.transport.disconnect().await {
            warn!(%err, "Failed to disconnect");
        }
        self.state = SessionState::Disconnected;
    }

    /// The sending half of the notification queue, starting the forwarder on first use.
    fn notification_sink(&mut self, identity: &DeviceIdentity) -> mpsc::Sender<Vec<u8>> {
        if let Some(sink) = &self.notifications {
            return sink.clone();
        }

        let (sink, queue) = mpsc::channel(NOTIFICATION_QUEUE_LEN);
        let forwarder = Forwarder {
            device: identity.clone(),
            publisher: self.publisher.clone(),
            discovery_sent: self.discovery_sent.clone(),
            delivered: self.delivered.clone(),
        };
        self.forwarder = Some(tokio::spawn(forwarder.run(queue)));
        self.notifications = Some(sink.clone());
        sink
    }
}

impl<T: Transport> Drop for TransportSession<T> {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

/// Decodes notifications and pushes the records to the publisher
struct Forwarder {
    device: DeviceIdentity,
    publisher: Arc<dyn Publisher>,
    discovery_sent: Arc<AtomicBool>,
    delivered: Arc<Notify>,
}

impl Forwarder {
    async fn run(self, mut queue: mpsc::Receiver<Vec<u8>>) {
        while let Some(data) = queue.recv().await {
            self.handle(&data).await;
        }
        debug!("Notification queue closed");
    }

    async fn handle(&self, data: &[u8]) {
        debug!(data = %hex::encode(data), "RX notification");

        let record = match status_message::decode(data) {
            Ok(record) => record,
            Err(err) => {
                warn!(%err, "Discarding malformed packet");
                return;
            }
        };

        if self
            .discovery_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Err(err) = self.publisher.publish_discovery(&self.device).await {
                warn!(%err, "Failed to publish discovery information");
                self.discovery_sent.store(false, Ordering::Release);
            }
        }

        match self.publisher.publish_record(&record).await {
            Ok(()) => self.delivered.notify_one(),
            Err(err) => warn!(%err, "Failed to publish record"),
        }
    }
}
