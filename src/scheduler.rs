//! Drives a [`TransportSession`] until the process is asked to stop.

use crate::error::{Error, ErrorKind, Result};
use crate::session::TransportSession;
use crate::transport::Transport;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Delay between attempts to find the device at startup
const LOCATE_RETRY_DELAY: Duration = Duration::from_secs(5);
/// How long one-shot mode waits for the response before closing the session
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Poll, then sleep this long, forever
    Continuous(Duration),
    /// Poll once and exit
    OneShot,
}

impl RunMode {
    /// Continuous with the given interval in seconds; none or zero means one-shot.
    pub fn from_interval_secs(interval: Option<u64>) -> Self {
        match interval {
            Some(secs) if secs > 0 => RunMode::Continuous(Duration::from_secs(secs)),
            _ => RunMode::OneShot,
        }
    }
}

/// What a single poll cycle amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Success,
    /// Logged; the next cycle runs as scheduled
    TransientError(ErrorKind),
    /// The loop cannot continue
    Fatal(ErrorKind),
}

impl PollOutcome {
    pub fn of(result: &Result<()>) -> Self {
        match result {
            Ok(()) => PollOutcome::Success,
            // polling without a located device can never recover on its own
            Err(err @ Error::NotLocated) => PollOutcome::Fatal(err.kind()),
            Err(err) => PollOutcome::TransientError(err.kind()),
        }
    }
}

pub struct PollScheduler<T: Transport> {
    session: TransportSession<T>,
    identifier: String,
    mode: RunMode,
    shutdown: watch::Receiver<bool>,
    locate_retry_delay: Duration,
    response_grace: Duration,
}

impl<T: Transport> PollScheduler<T> {
    /// `shutdown` stops the scheduler as soon as it holds `true`.
    pub fn new(
        session: TransportSession<T>,
        identifier: &str,
        mode: RunMode,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            session,
            identifier: identifier.to_owned(),
            mode,
            shutdown,
            locate_retry_delay: LOCATE_RETRY_DELAY,
            response_grace: RESPONSE_GRACE,
        }
    }

    pub fn with_locate_retry_delay(mut self, delay: Duration) -> Self {
        self.locate_retry_delay = delay;
        self
    }

    pub fn with_response_grace(mut self, grace: Duration) -> Self {
        self.response_grace = grace;
        self
    }

    /// Locate the device, then poll according to the run mode. The session is closed on every
    /// exit path. A shutdown request is a normal exit; only a fatal poll outcome is an error.
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_until_stopped().await;
        self.session.close().await;
        result
    }

    async fn run_until_stopped(&mut self) -> Result<()> {
        if !self.locate_device().await {
            return Ok(());
        }

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Caught signal and shutdown.");
                    return Ok(());
                }
                result = self.session.poll() => result,
            };

            match PollOutcome::of(&result) {
                PollOutcome::Success => debug!("Status request sent"),
                PollOutcome::TransientError(kind) => {
                    if let Err(err) = &result {
                        warn!(?kind, %err, "Error querying BT-2");
                    }
                }
                PollOutcome::Fatal(kind) => {
                    error!(?kind, "Polling cannot continue");
                    return result;
                }
            }

            let pause = match self.mode {
                RunMode::OneShot => {
                    if result.is_ok() {
                        self.await_response().await;
                    }
                    return Ok(());
                }
                RunMode::Continuous(interval) => interval,
            };

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => {
                    info!("Caught signal and shutdown.");
                    return Ok(());
                }
                _ = sleep(pause) => {}
            }
        }
    }

    /// Retry locating the device until it succeeds. False if shutdown was requested first.
    async fn locate_device(&mut self) -> bool {
        loop {
            let located = tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return false,
                located = self.session.locate(&self.identifier) => located,
            };
            match located {
                Ok(_) => return true,
                Err(err) => warn!(%err, "Error searching for BT-2"),
            }

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut self.shutdown) => return false,
                _ = sleep(self.locate_retry_delay) => {}
            }
        }
    }

    async fn await_response(&mut self) {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut self.shutdown) => {}
            received = self.session.wait_for_record(self.response_grace) => {
                if !received {
                    warn!("No response from device");
                }
            }
        }
    }
}

/// Resolves once `true` has been sent. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSettings;
    use crate::test_support::{response, MockTransport, Op, RecordingPublisher};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn session(transport: &MockTransport, publisher: Arc<RecordingPublisher>) -> TransportSession<MockTransport> {
        let settings = SessionSettings {
            scan_timeout: Duration::from_secs(20),
            connect_timeout: Duration::from_secs(20),
        };
        TransportSession::new(transport.clone(), publisher, settings)
    }

    #[test]
    fn test_run_mode_from_interval() {
        assert_eq!(RunMode::from_interval_secs(None), RunMode::OneShot);
        assert_eq!(RunMode::from_interval_secs(Some(0)), RunMode::OneShot);
        assert_eq!(
            RunMode::from_interval_secs(Some(30)),
            RunMode::Continuous(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(PollOutcome::of(&Ok(())), PollOutcome::Success);
        assert_eq!(
            PollOutcome::of(&Err(Error::ConnectTimeout)),
            PollOutcome::TransientError(ErrorKind::ConnectTimeout)
        );
        assert_eq!(
            PollOutcome::of(&Err(Error::TransportDisconnected("gone".into()))),
            PollOutcome::TransientError(ErrorKind::TransportDisconnected)
        );
        assert_eq!(
            PollOutcome::of(&Err(Error::NotLocated)),
            PollOutcome::Fatal(ErrorKind::NotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_polls_once_and_closes() {
        let transport = MockTransport::default();
        transport.reply_with(response());
        let publisher = RecordingPublisher::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        PollScheduler::new(session(&transport, publisher.clone()), "C4:D3:6A:12:34:56", RunMode::OneShot, shutdown_rx)
            .run()
            .await
            .unwrap();

        assert_eq!(transport.count(|op| matches!(op, Op::Write(_))), 1);
        assert_eq!(publisher.records().len(), 1);
        assert_eq!(transport.ops().last(), Some(&Op::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_gives_up_waiting_for_response() {
        let transport = MockTransport::default();
        let publisher = RecordingPublisher::new();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let start = Instant::now();

        PollScheduler::new(session(&transport, publisher.clone()), "C4:D3:6A:12:34:56", RunMode::OneShot, shutdown_rx)
            .with_response_grace(Duration::from_secs(2))
            .run()
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert!(publisher.records().is_empty());
        assert_eq!(transport.ops().last(), Some(&Op::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_keeps_cadence_through_errors() {
        let transport = MockTransport::default();
        let mut events = transport.op_events();
        transport.fail_connects(2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = Duration::from_secs(30);
        let start = Instant::now();

        let scheduler = PollScheduler::new(
            session(&transport, RecordingPublisher::new()),
            "C4:D3:6A:12:34:56",
            RunMode::Continuous(interval),
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        let mut write_times = Vec::new();
        while write_times.len() < 2 {
            if let Some(Op::Write(_)) = events.recv().await {
                write_times.push(start.elapsed());
            }
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // two failed connects, each followed by a full interval, then two successful polls
        assert_eq!(write_times, vec![interval * 2, interval * 3]);
        assert_eq!(transport.count(|op| matches!(op, Op::Connect)), 3);
        assert!(transport.writes_only_while_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_before_polling() {
        let transport = MockTransport::default();
        let mut events = transport.op_events();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = PollScheduler::new(
            session(&transport, RecordingPublisher::new()),
            "C4:D3:6A:12:34:56",
            RunMode::Continuous(Duration::from_secs(10)),
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        let mut writes = 0;
        while writes < 2 {
            if let Some(Op::Write(_)) = events.recv().await {
                writes += 1;
                if writes == 1 {
                    transport.drop_link();
                }
            }
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let ops = transport.ops();
        let second_write = ops.iter().rposition(|op| matches!(op, Op::Write(_))).unwrap();
        assert_eq!(ops[second_write - 2], Op::Connect);
        assert_eq!(ops[second_write - 1], Op::Subscribe);
        assert!(transport.writes_only_while_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_sleep() {
        let transport = MockTransport::default();
        let mut events = transport.op_events();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = Duration::from_secs(3600);
        let start = Instant::now();

        let scheduler = PollScheduler::new(
            session(&transport, RecordingPublisher::new()),
            "C4:D3:6A:12:34:56",
            RunMode::Continuous(interval),
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        while !matches!(events.recv().await, Some(Op::Write(_))) {}
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert!(start.elapsed() < interval);
        assert_eq!(transport.count(|op| matches!(op, Op::Write(_))), 1);
        assert_eq!(transport.ops().last(), Some(&Op::Disconnect));
        assert!(!transport.is_linked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_connect() {
        let transport = MockTransport::default();
        transport.hang_connect();
        let mut events = transport.op_events();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = PollScheduler::new(
            session(&transport, RecordingPublisher::new()),
            "C4:D3:6A:12:34:56",
            RunMode::Continuous(Duration::from_secs(60)),
            shutdown_rx,
        );
        let handle = tokio::spawn(scheduler.run());

        while !matches!(events.recv().await, Some(Op::Connect)) {}
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(transport.count(|op| matches!(op, Op::Write(_))), 0);
        assert_eq!(transport.ops().last(), Some(&Op::Disconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_locate_retried_with_fixed_delay() {
        let transport = MockTransport::default();
        transport.hang_locate();
        let mut events = transport.op_events();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let start = Instant::now();

        let scheduler = PollScheduler::new(
            session(&transport, RecordingPublisher::new()),
            "C4:D3:6A:12:34:56",
            RunMode::OneShot,
            shutdown_rx,
        )
        .with_locate_retry_delay(Duration::from_secs(5));
        let handle = tokio::spawn(scheduler.run());

        let mut attempts = Vec::new();
        while attempts.len() < 3 {
            if let Some(Op::Locate) = events.recv().await {
                attempts.push(start.elapsed());
            }
        }
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // each scan gives up after 20s, then waits 5s
        assert_eq!(
            attempts,
            vec![Duration::ZERO, Duration::from_secs(25), Duration::from_secs(50)]
        );
        assert_eq!(transport.count(|op| matches!(op, Op::Connect)), 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let transport = MockTransport::default();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();

        PollScheduler::new(
            session(&transport, RecordingPublisher::new()),
            "C4:D3:6A:12:34:56",
            RunMode::OneShot,
            shutdown_rx,
        )
        .run()
        .await
        .unwrap();

        assert_eq!(transport.ops(), vec![Op::Disconnect]);
    }
}
