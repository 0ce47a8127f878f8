//! Heartbeat Monitor
//!
//! Sends periodic keepalive frames on the open connection. The loop stops on
//! its own after repeated send failures, after a long stretch without a
//! successful send, or when the connection closes underneath it.
//!
//! Every wait point (the interval sleep and the send) races the cancellation
//! token, so [`HeartbeatHandle::stop`] returns promptly and, once it has
//! returned, no further heartbeat frame is sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::reporter::ErrorReporter;
use crate::application::ports::DuplexConnection;
use crate::domain::streaming::HeartbeatFrame;
use crate::error::StreamError;
use crate::infrastructure::config::StreamingConfig;
use crate::infrastructure::metrics;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between heartbeat frames.
    pub interval: Duration,
    /// Consecutive send failures before the monitor stops.
    pub max_consecutive_failures: u32,
    /// Time without a successful send, checked after each failed send,
    /// before the monitor stops.
    pub silence_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_consecutive_failures: 3,
            silence_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(
        interval: Duration,
        max_consecutive_failures: u32,
        silence_timeout: Duration,
    ) -> Self {
        Self {
            interval,
            max_consecutive_failures,
            silence_timeout,
        }
    }

    /// Create configuration from `StreamingConfig`.
    #[must_use]
    pub fn from_streaming_config(config: &StreamingConfig) -> Self {
        Self {
            interval: config.heartbeat_interval,
            ..Self::default()
        }
    }
}

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// Stopped by its owner.
    Cancelled,
    /// Too many consecutive send failures.
    TooManyFailures(u32),
    /// No successful send within the silence timeout.
    Silence(Duration),
    /// The connection closed externally.
    ConnectionClosed,
}

/// Heartbeat bookkeeping shared with the owner.
#[derive(Debug)]
pub struct HeartbeatState {
    last_success: RwLock<Instant>,
    consecutive_failures: AtomicU32,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_success: RwLock::new(Instant::now()),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    /// Record a successful send.
    pub fn record_success(&self) {
        *self.last_success.write() = Instant::now();
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Record a failed send. Returns the new consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Consecutive failures so far.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Get the time since the last successful send.
    #[must_use]
    pub fn time_since_success(&self) -> Duration {
        self.last_success.read().elapsed()
    }

    /// Reset state for new connection.
    pub fn reset(&self) {
        *self.last_success.write() = Instant::now();
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

/// Heartbeat loop over a duplex connection.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    connection: Arc<dyn DuplexConnection>,
    reporter: Arc<ErrorReporter>,
    cancel: CancellationToken,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    #[must_use]
    pub fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        connection: Arc<dyn DuplexConnection>,
        reporter: Arc<ErrorReporter>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            connection,
            reporter,
            cancel,
        }
    }

    /// Run the heartbeat loop until cancelled or a stop condition is hit.
    pub async fn run(self) -> HeartbeatExit {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat monitor cancelled");
                    return HeartbeatExit::Cancelled;
                }
                () = tokio::time::sleep(self.config.interval) => {}
            }

            if let Some(exit) = self.beat().await {
                return exit;
            }
        }
    }

    /// One cycle after the interval elapsed. Returns `Some` to stop.
    async fn beat(&self) -> Option<HeartbeatExit> {
        if !self.connection.is_connected() {
            tracing::info!("Connection closed, stopping heartbeat");
            return Some(HeartbeatExit::ConnectionClosed);
        }

        let result = match HeartbeatFrame::now().to_json() {
            Ok(frame) => {
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return Some(HeartbeatExit::Cancelled),
                    result = self.connection.send(frame) => result,
                }
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => {
                self.state.record_success();
                tracing::trace!("Heartbeat sent");
                None
            }
            Err(e) => {
                let failures = self.state.record_failure();
                metrics::record_heartbeat_failure();
                self.reporter
                    .report(&StreamError::Network(format!("heartbeat failed: {e}")));

                if failures >= self.config.max_consecutive_failures {
                    tracing::warn!(failures, "Too many heartbeat failures, stopping");
                    return Some(HeartbeatExit::TooManyFailures(failures));
                }

                // Silence is judged only after a failed send.
                let silent_for = self.state.time_since_success();
                (silent_for >= self.config.silence_timeout).then(|| {
                    tracing::warn!(
                        silent_secs = silent_for.as_secs(),
                        timeout_secs = self.config.silence_timeout.as_secs(),
                        "No successful heartbeat within timeout"
                    );
                    HeartbeatExit::Silence(silent_for)
                })
            }
        }
    }
}

/// Owner's handle on a running heartbeat task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    task: JoinHandle<HeartbeatExit>,
}

impl HeartbeatHandle {
    /// Spawn `monitor` onto the current runtime.
    ///
    /// The handle cancels through the token the monitor was built with.
    #[must_use]
    pub fn spawn(monitor: HeartbeatMonitor) -> Self {
        let cancel = monitor.cancel.clone();
        let task = tokio::spawn(monitor.run());
        Self { cancel, task }
    }

    /// Whether the task has already exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(self) -> Option<HeartbeatExit> {
        self.cancel.cancel();
        match self.task.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                tracing::warn!(error = %e, "Heartbeat task ended abnormally");
                None
            }
        }
    }

    /// Cancel without waiting. Used where awaiting is impossible.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{ConnectTarget, MessageCallback};
    use crate::domain::statistics::StreamStatistics;
    use crate::error::StreamResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct StubConnection {
        connected: AtomicBool,
        fail_sends: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DuplexConnection for StubConnection {
        fn set_message_handler(&self, _handler: MessageCallback) {}

        fn clear_message_handler(&self) {}

        async fn connect(&self, _target: &ConnectTarget) -> StreamResult<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, text: String) -> StreamResult<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(StreamError::Network("send failed".to_string()));
            }
            self.sent.lock().push(text);
            Ok(())
        }

        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }

    fn monitor(
        config: HeartbeatConfig,
        connection: &Arc<StubConnection>,
        stats: &Arc<StreamStatistics>,
    ) -> (HeartbeatMonitor, Arc<HeartbeatState>) {
        let state = Arc::new(HeartbeatState::new());
        let connection: Arc<dyn DuplexConnection> = Arc::clone(connection) as _;
        let monitor = HeartbeatMonitor::new(
            config,
            Arc::clone(&state),
            connection,
            Arc::new(ErrorReporter::new(Arc::clone(stats))),
            CancellationToken::new(),
        );
        (monitor, state)
    }

    fn connected_stub() -> Arc<StubConnection> {
        let stub = Arc::new(StubConnection::default());
        stub.connected.store(true, Ordering::SeqCst);
        stub
    }

    #[test]
    fn default_config_values() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.max_consecutive_failures, 3);
        assert_eq!(config.silence_timeout, Duration::from_secs(300));
    }

    #[test]
    fn config_from_streaming_config() {
        let streaming = StreamingConfig {
            heartbeat_interval: Duration::from_secs(7),
            ..StreamingConfig::default()
        };
        let config = HeartbeatConfig::from_streaming_config(&streaming);
        assert_eq!(config.interval, Duration::from_secs(7));
        assert_eq!(config.max_consecutive_failures, 3);
    }

    #[test]
    fn state_tracks_failures() {
        let state = HeartbeatState::new();
        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);
        state.record_success();
        assert_eq!(state.consecutive_failures(), 0);
        assert!(state.time_since_success() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn sends_heartbeat_frames() {
        let stub = connected_stub();
        let stats = Arc::new(StreamStatistics::new());
        let config = HeartbeatConfig::new(Duration::from_millis(10), 3, Duration::from_secs(60));
        let (monitor, _state) = monitor(config, &stub, &stats);

        let handle = HeartbeatHandle::spawn(monitor);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(handle.stop().await, Some(HeartbeatExit::Cancelled));

        let sent = stub.sent.lock().clone();
        assert!(!sent.is_empty());
        assert!(sent[0].starts_with(r#"{"type":"heartbeat","timestamp":"#));
    }

    #[tokio::test]
    async fn stops_after_consecutive_failures() {
        let stub = connected_stub();
        stub.fail_sends.store(true, Ordering::SeqCst);
        let stats = Arc::new(StreamStatistics::new());
        let config = HeartbeatConfig::new(Duration::from_millis(5), 3, Duration::from_secs(60));
        let (monitor, state) = monitor(config, &stub, &stats);

        let exit = tokio::time::timeout(Duration::from_secs(2), monitor.run())
            .await
            .unwrap();
        assert_eq!(exit, HeartbeatExit::TooManyFailures(3));
        assert_eq!(state.consecutive_failures(), 3);
        assert_eq!(stats.snapshot().errors, 3);
    }

    #[tokio::test]
    async fn stops_when_connection_closes() {
        let stub = Arc::new(StubConnection::default());
        let stats = Arc::new(StreamStatistics::new());
        let config = HeartbeatConfig::new(Duration::from_millis(5), 3, Duration::from_secs(60));
        let (monitor, _state) = monitor(config, &stub, &stats);

        let exit = tokio::time::timeout(Duration::from_secs(2), monitor.run())
            .await
            .unwrap();
        assert_eq!(exit, HeartbeatExit::ConnectionClosed);
        assert!(stub.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn stops_after_silence() {
        let stub = connected_stub();
        stub.fail_sends.store(true, Ordering::SeqCst);
        let stats = Arc::new(StreamStatistics::new());
        let config = HeartbeatConfig::new(Duration::from_millis(20), 100, Duration::from_millis(10));
        let (monitor, _state) = monitor(config, &stub, &stats);

        let exit = tokio::time::timeout(Duration::from_secs(2), monitor.run())
            .await
            .unwrap();
        assert!(matches!(exit, HeartbeatExit::Silence(_)));
        assert_eq!(stats.snapshot().errors, 1);
    }

    #[tokio::test]
    async fn interval_longer_than_silence_timeout_keeps_running() {
        let stub = connected_stub();
        let stats = Arc::new(StreamStatistics::new());
        let config = HeartbeatConfig::new(Duration::from_millis(20), 3, Duration::from_millis(10));
        let (monitor, state) = monitor(config, &stub, &stats);

        let handle = HeartbeatHandle::spawn(monitor);
        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(!handle.is_finished());
        assert_eq!(handle.stop().await, Some(HeartbeatExit::Cancelled));

        assert!(stub.sent.lock().len() >= 2);
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(stats.snapshot().errors, 0);
    }

    #[tokio::test]
    async fn stop_is_prompt_with_long_interval() {
        let stub = connected_stub();
        let stats = Arc::new(StreamStatistics::new());
        let config = HeartbeatConfig::new(Duration::from_secs(3600), 3, Duration::from_secs(7200));
        let (monitor, _state) = monitor(config, &stub, &stats);

        let handle = HeartbeatHandle::spawn(monitor);
        let exit = tokio::time::timeout(Duration::from_millis(200), handle.stop())
            .await
            .unwrap();
        assert_eq!(exit, Some(HeartbeatExit::Cancelled));
        assert!(stub.sent.lock().is_empty());
    }
}
