//! Streaming Client
//!
//! Connection supervisor for one streaming session. Owns the duplex
//! connection, the heartbeat task and the shared subscription state.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!      ▲                          │                  │
//!      └─────────── error ────────┘                  │
//!      └──────────────────── disconnect() ───────────┘
//! ```
//!
//! `disconnect` (and `reconnect`, which starts with it) waits for the
//! heartbeat task to exit before closing the connection. Lifecycle operations
//! are serialized; subscription and filter calls may run concurrently with
//! them and with dispatch.
//!
//! Dropping a connected client detaches the message handler immediately. On a
//! multi-threaded runtime, or off any runtime, it then runs the same teardown
//! as `disconnect` before returning. A current-thread runtime cannot be
//! blocked from inside, so there the heartbeat is aborted and the close is
//! spawned.
//!
//! # Error Propagation
//!
//! Session creation returns typed errors. Everything that happens once a
//! connection exists goes to the error handler and the statistics counters.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dispatcher::EventDispatcher;
use super::heartbeat::{HeartbeatConfig, HeartbeatHandle, HeartbeatMonitor, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
use super::reporter::{ErrorHandler, ErrorReporter};
use crate::application::ports::{ConnectTarget, DuplexConnection};
use crate::application::services::SessionManager;
use crate::domain::session::StreamSession;
use crate::domain::statistics::{StatisticsSnapshot, StreamStatistics};
use crate::domain::streaming::{EventKind, StreamEvent, SubscriptionFrame};
use crate::domain::subscription::{EventCallback, SubscriptionRegistry, Symbol};
use crate::error::{StreamError, StreamResult};
use crate::infrastructure::config::StreamingConfig;
use crate::infrastructure::metrics;

/// Supervisor connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Transport open, heartbeat running.
    Connected,
}

/// Streaming client for one session at a time.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tradier_stream::infrastructure::tradier::{StreamingClient, WebSocketConnection};
/// use tradier_stream::{StreamEvent, StreamingConfig, StreamSession};
///
/// async fn example(session: StreamSession) {
///     let client = StreamingClient::new(
///         Arc::new(WebSocketConnection::new()),
///         StreamingConfig::default(),
///     )
///     .with_access_token("token");
///
///     let subscribed = client
///         .subscribe_to_quotes(&session, &["AAPL".to_string()], |event: &StreamEvent| {
///             println!("{event:?}");
///             Ok(())
///         })
///         .await;
///     assert!(subscribed);
///
///     client.disconnect().await;
/// }
/// ```
pub struct StreamingClient {
    connection: Arc<dyn DuplexConnection>,
    sessions: Option<Arc<SessionManager>>,
    access_token: String,
    config: Arc<RwLock<StreamingConfig>>,
    registry: Arc<SubscriptionRegistry>,
    stats: Arc<StreamStatistics>,
    reporter: Arc<ErrorReporter>,
    dispatcher: Arc<EventDispatcher>,
    session: RwLock<Option<StreamSession>>,
    state: Mutex<ConnectionState>,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    connection_id: Mutex<Option<Uuid>>,
    runtime: Mutex<Option<Handle>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl StreamingClient {
    /// Create a client over `connection`.
    #[must_use]
    pub fn new(connection: Arc<dyn DuplexConnection>, config: StreamingConfig) -> Self {
        let config = Arc::new(RwLock::new(config));
        let registry = Arc::new(SubscriptionRegistry::new());
        let stats = Arc::new(StreamStatistics::new());
        let reporter = Arc::new(ErrorReporter::new(Arc::clone(&stats)));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&stats),
            Arc::clone(&reporter),
            Arc::clone(&config),
        ));

        Self {
            connection,
            sessions: None,
            access_token: String::new(),
            config,
            registry,
            stats,
            reporter,
            dispatcher,
            session: RwLock::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            heartbeat: Mutex::new(None),
            connection_id: Mutex::new(None),
            runtime: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Bearer token sent when opening the connection.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = token.into();
        self
    }

    /// Session manager used for session creation and renewal.
    #[must_use]
    pub fn with_session_manager(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Create a market data session.
    ///
    /// # Errors
    ///
    /// `Validation` without a session manager, otherwise whatever session
    /// creation returns.
    pub async fn create_market_session(&self) -> StreamResult<StreamSession> {
        self.session_manager()?.create_market_session().await
    }

    /// Create an account events session.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_market_session`].
    pub async fn create_account_session(&self) -> StreamResult<StreamSession> {
        self.session_manager()?.create_account_session().await
    }

    /// Use `session` for the next connect.
    pub fn set_session(&self, session: StreamSession) {
        *self.session.write() = Some(session);
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> Option<StreamSession> {
        self.session.read().clone()
    }

    fn session_manager(&self) -> StreamResult<&Arc<SessionManager>> {
        self.sessions
            .as_ref()
            .ok_or_else(|| StreamError::Validation("no session manager configured".to_string()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the connection for the current session and start the heartbeat.
    ///
    /// No-op if already connected or if there is no active session. An
    /// expired session is renewed first when a session manager is present.
    ///
    /// # Errors
    ///
    /// Connection or renewal failures are reported to the error handler and
    /// returned; the state is left `Disconnected`.
    pub async fn connect(&self) -> StreamResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.connect_locked().await
    }

    /// Stop the heartbeat, close the connection, and wait for both.
    ///
    /// Idempotent.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;
    }

    /// Disconnect, wait the configured reconnect delay, and connect again.
    ///
    /// The session is renewed when a session manager is present, and every
    /// active subscription is replayed on the new connection. One attempt
    /// only; see [`Self::reconnect_with_backoff`] for a bounded loop.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect`].
    pub async fn reconnect(&self) -> StreamResult<()> {
        let delay = self.config.read().reconnect_delay;
        self.reconnect_after(delay).await
    }

    /// Reconnect with exponential backoff until connected, out of attempts,
    /// or cancelled.
    ///
    /// Returns the number of attempts used.
    ///
    /// # Errors
    ///
    /// `MaxAttemptsExceeded` when `max_reconnect_attempts` is reached, or
    /// `Cancelled` if `cancel` fires first.
    pub async fn reconnect_with_backoff(
        &self,
        cancel: &CancellationToken,
    ) -> Result<u32, ReconnectError> {
        let config = ReconnectConfig::from_streaming_config(&self.config.read());
        let mut policy = ReconnectPolicy::new(config);
        let mut last_error = None;

        loop {
            let Some(delay) = policy.next_delay() else {
                return Err(ReconnectError::MaxAttemptsExceeded {
                    attempts: policy.attempt_count(),
                    last_error: last_error
                        .unwrap_or_else(|| StreamError::Network("no attempt made".to_string())),
                });
            };

            let attempt = policy.attempt_count();
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting to stream");

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(ReconnectError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            match self.reconnect_after(Duration::ZERO).await {
                Ok(()) if self.is_connected() => return Ok(attempt),
                Ok(()) => {
                    last_error = Some(StreamError::Validation("no active session".to_string()));
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Reconnect attempt failed");
                    last_error = Some(e);
                }
            }
        }
    }

    /// Whether the connection is open and its heartbeat still running.
    ///
    /// A heartbeat that gave up (too many failures or silence) leaves the
    /// state `Connected` but makes this `false`, so a supervisor reconnects.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.lock() == ConnectionState::Connected
            && self.connection.is_connected()
            && self
                .heartbeat
                .lock()
                .as_ref()
                .is_some_and(|heartbeat| !heartbeat.is_finished())
    }

    /// Current supervisor state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Identifier of the current connection, for log correlation.
    #[must_use]
    pub fn connection_id(&self) -> Option<Uuid> {
        *self.connection_id.lock()
    }

    async fn connect_locked(&self) -> StreamResult<()> {
        if *self.state.lock() == ConnectionState::Connected {
            if self.is_connected() {
                return Ok(());
            }
            tracing::info!("Connection or heartbeat lost, cleaning up before connecting");
            self.teardown().await;
        }

        let Some(session) = self.active_session().await? else {
            tracing::warn!("No active session, not connecting");
            return Ok(());
        };

        *self.state.lock() = ConnectionState::Connecting;
        let connection_id = Uuid::new_v4();
        tracing::info!(%connection_id, url = %session.url(), "Opening stream connection");

        let dispatcher = Arc::clone(&self.dispatcher);
        self.connection
            .set_message_handler(Arc::new(move |text: String| {
                dispatcher.dispatch(&text);
            }));

        let target = ConnectTarget {
            url: session.url().to_string(),
            session_id: session.session_id().to_string(),
            bearer_token: self.access_token.clone(),
        };

        if let Err(e) = self.connection.connect(&target).await {
            *self.state.lock() = ConnectionState::Disconnected;
            self.reporter.report(&e);
            return Err(e);
        }

        self.dispatcher.reset_duplicates();
        self.stats.mark_connected();
        *self.connection_id.lock() = Some(connection_id);
        *self.runtime.lock() = Handle::try_current().ok();
        *self.state.lock() = ConnectionState::Connected;
        metrics::set_connected(true);

        let heartbeat_config = HeartbeatConfig::from_streaming_config(&self.config.read());
        let monitor = HeartbeatMonitor::new(
            heartbeat_config,
            Arc::new(HeartbeatState::new()),
            Arc::clone(&self.connection),
            Arc::clone(&self.reporter),
            CancellationToken::new(),
        );
        *self.heartbeat.lock() = Some(HeartbeatHandle::spawn(monitor));

        tracing::info!(%connection_id, "Stream connected");
        Ok(())
    }

    /// Current session if active, renewing it first when expired.
    async fn active_session(&self) -> StreamResult<Option<StreamSession>> {
        let Some(mut session) = self.session() else {
            return Ok(None);
        };

        if session.is_expired()
            && let Some(sessions) = &self.sessions
        {
            if let Err(e) = sessions.renew_session(&mut session).await {
                self.reporter.report(&e);
                return Err(e);
            }
            self.set_session(session.clone());
        }

        Ok(session.is_active().then_some(session))
    }

    async fn reconnect_after(&self, delay: Duration) -> StreamResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.teardown().await;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(sessions) = &self.sessions
            && let Some(mut session) = self.session()
        {
            if let Err(e) = sessions.renew_session(&mut session).await {
                self.reporter.report(&e);
                return Err(e);
            }
            self.set_session(session);
        }

        self.connect_locked().await?;
        if *self.state.lock() != ConnectionState::Connected {
            return Ok(());
        }

        self.stats.record_reconnect();
        metrics::record_reconnect();

        for frame in self.registry.replay_frames() {
            if let Err(e) = self.send_frame(&frame).await {
                self.reporter.report(&e);
            }
        }
        Ok(())
    }

    async fn teardown(&self) {
        let heartbeat = self.heartbeat.lock().take();
        let was = std::mem::replace(&mut *self.state.lock(), ConnectionState::Disconnected);

        if let Some(heartbeat) = heartbeat
            && let Some(exit) = heartbeat.stop().await
        {
            tracing::debug!(exit = ?exit, "Heartbeat stopped");
        }

        self.connection.clear_message_handler();
        self.connection.disconnect().await;
        *self.connection_id.lock() = None;

        if was != ConnectionState::Disconnected {
            metrics::set_connected(false);
            tracing::info!("Stream disconnected");
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to trades for `symbols`.
    ///
    /// Returns `false` if the subscription frame could not be sent. Delivery
    /// is not acknowledged by the server.
    pub async fn subscribe_to_trades<F>(
        &self,
        session: &StreamSession,
        symbols: &[Symbol],
        handler: F,
    ) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Trade, session, symbols, Arc::new(handler))
            .await
    }

    /// Subscribe to quotes for `symbols`.
    pub async fn subscribe_to_quotes<F>(
        &self,
        session: &StreamSession,
        symbols: &[Symbol],
        handler: F,
    ) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Quote, session, symbols, Arc::new(handler))
            .await
    }

    /// Subscribe to session summaries for `symbols`.
    pub async fn subscribe_to_summary<F>(
        &self,
        session: &StreamSession,
        symbols: &[Symbol],
        handler: F,
    ) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Summary, session, symbols, Arc::new(handler))
            .await
    }

    /// Subscribe to time-and-sales for `symbols`.
    pub async fn subscribe_to_timesales<F>(
        &self,
        session: &StreamSession,
        symbols: &[Symbol],
        handler: F,
    ) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Timesale, session, symbols, Arc::new(handler))
            .await
    }

    /// Subscribe to account order events.
    pub async fn subscribe_to_order_events<F>(&self, session: &StreamSession, handler: F) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Order, session, &[], Arc::new(handler))
            .await
    }

    /// Subscribe to account position events.
    pub async fn subscribe_to_position_events<F>(
        &self,
        session: &StreamSession,
        handler: F,
    ) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe(EventKind::Position, session, &[], Arc::new(handler))
            .await
    }

    /// Subscribe to `kind`, returning `false` on any failure.
    pub async fn subscribe(
        &self,
        kind: EventKind,
        session: &StreamSession,
        symbols: &[Symbol],
        handler: EventCallback,
    ) -> bool {
        match self.try_subscribe(kind, session, symbols, handler).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(kind = kind.as_str(), error = %e, "Subscription not sent");
                false
            }
        }
    }

    /// Subscribe to `kind` with a typed error.
    ///
    /// Registers the handler, records the symbols, connects if needed, and
    /// sends one subscribe frame. Symbols are ignored for account-level
    /// kinds.
    ///
    /// # Errors
    ///
    /// - `Validation` for an inactive session or an empty symbol list
    /// - `Network` if the connection cannot be opened or the frame not sent
    pub async fn try_subscribe(
        &self,
        kind: EventKind,
        session: &StreamSession,
        symbols: &[Symbol],
        handler: EventCallback,
    ) -> StreamResult<()> {
        if !session.is_active() {
            return Err(StreamError::Validation("session is not active".to_string()));
        }

        let symbols: Vec<Symbol> = if kind.is_account_level() {
            Vec::new()
        } else {
            let symbols: Vec<Symbol> = symbols.iter().filter(|s| !s.is_empty()).cloned().collect();
            if symbols.is_empty() {
                return Err(StreamError::Validation("symbol list is empty".to_string()));
            }
            symbols
        };

        if self.session().as_ref() != Some(session) {
            self.set_session(session.clone());
        }
        self.registry.register_handler(kind, handler);
        self.registry.add_symbols(&symbols);
        metrics::set_subscribed_symbols(self.registry.stats().symbols);

        if !self.is_connected() {
            self.connect().await?;
            if !self.is_connected() {
                return Err(StreamError::Network("connection not established".to_string()));
            }
        }

        self.send_frame(&SubscriptionFrame::subscribe(kind, &symbols))
            .await?;
        self.registry.activate_kind(kind);

        tracing::info!(
            kind = kind.as_str(),
            symbols = symbols.len(),
            "Subscribed"
        );
        Ok(())
    }

    /// Install or replace the handler for `kind` without sending anything.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register_handler<F>(&self, kind: EventKind, handler: F) -> bool
    where
        F: Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.register_handler(kind, Arc::new(handler))
    }

    /// Add symbols; when connected, subscribe them for every active market
    /// kind.
    ///
    /// Returns the symbols that were newly added. Send failures go to the
    /// error handler.
    pub async fn add_symbols(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        let added = self.registry.add_symbols(symbols);
        metrics::set_subscribed_symbols(self.registry.stats().symbols);
        self.send_for_market_kinds(&added, SubscriptionFrame::subscribe)
            .await;
        added
    }

    /// Remove symbols; when connected, unsubscribe them for every active
    /// market kind.
    ///
    /// Returns the symbols that were removed.
    pub async fn remove_symbols(&self, symbols: &[Symbol]) -> Vec<Symbol> {
        let removed = self.registry.remove_symbols(symbols);
        metrics::set_subscribed_symbols(self.registry.stats().symbols);
        self.send_for_market_kinds(&removed, SubscriptionFrame::unsubscribe)
            .await;
        removed
    }

    /// Snapshot of subscribed symbols.
    #[must_use]
    pub fn subscribed_symbols(&self) -> BTreeSet<Symbol> {
        self.registry.subscribed_symbols()
    }

    async fn send_for_market_kinds(
        &self,
        symbols: &[Symbol],
        frame: fn(EventKind, &[Symbol]) -> SubscriptionFrame,
    ) {
        if symbols.is_empty() || !self.is_connected() {
            return;
        }
        for kind in self.registry.active_market_kinds() {
            if let Err(e) = self.send_frame(&frame(kind, symbols)).await {
                self.reporter.report(&e);
            }
        }
    }

    async fn send_frame(&self, frame: &SubscriptionFrame) -> StreamResult<()> {
        let text = frame.to_json()?;
        tracing::debug!(frame = %text, "Sending subscription frame");
        self.connection.send(text).await
    }

    // =========================================================================
    // Filters, Config, Errors, Statistics
    // =========================================================================

    /// Replace the symbol allow-list. Empty passes everything.
    pub fn set_symbol_filter(&self, symbols: impl IntoIterator<Item = Symbol>) {
        self.registry.set_symbol_filter(symbols);
    }

    /// Replace the exchange allow-list. Empty passes everything.
    pub fn set_exchange_filter(&self, exchanges: impl IntoIterator<Item = String>) {
        self.registry.set_exchange_filter(exchanges);
    }

    /// Remove both filters.
    pub fn clear_filters(&self) {
        self.registry.clear_filters();
    }

    /// Replace the streaming configuration.
    ///
    /// Filtering settings apply to the next message; heartbeat settings apply
    /// from the next connect.
    pub fn set_config(&self, config: StreamingConfig) {
        *self.config.write() = config;
    }

    /// Current streaming configuration.
    #[must_use]
    pub fn config(&self) -> StreamingConfig {
        self.config.read().clone()
    }

    /// Install the error handler.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        self.reporter.set_handler(handler);
    }

    /// Consistent snapshot of the counters.
    #[must_use]
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.stats.snapshot()
    }

    /// Zero all counters.
    pub fn reset_statistics(&self) {
        self.stats.reset();
    }
}

impl std::fmt::Debug for StreamingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingClient")
            .field("state", &self.state())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl StreamingClient {
    /// Teardown that never blocks the calling thread.
    fn detach_teardown(&mut self, runtime: Option<&Handle>) {
        if let Some(heartbeat) = self.heartbeat.get_mut().take() {
            heartbeat.abort();
        }
        *self.connection_id.get_mut() = None;
        let was = std::mem::replace(self.state.get_mut(), ConnectionState::Disconnected);
        if was != ConnectionState::Disconnected {
            metrics::set_connected(false);
        }

        match runtime {
            Some(runtime) => {
                let connection = Arc::clone(&self.connection);
                runtime.spawn(async move { connection.disconnect().await });
            }
            None => tracing::warn!("Client dropped outside a runtime before connect completed"),
        }
    }
}

fn is_multi_thread(runtime: &Handle) -> bool {
    runtime.runtime_flavor() == RuntimeFlavor::MultiThread
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        if self.heartbeat.get_mut().is_none()
            && *self.state.get_mut() == ConnectionState::Disconnected
        {
            return;
        }

        self.connection.clear_message_handler();
        let stored = self.runtime.get_mut().take();

        match (Handle::try_current(), stored) {
            (Ok(runtime), _) if is_multi_thread(&runtime) => {
                tokio::task::block_in_place(|| runtime.block_on(self.teardown()));
            }
            (Ok(runtime), _) => self.detach_teardown(Some(&runtime)),
            (Err(_), Some(runtime)) if is_multi_thread(&runtime) => {
                runtime.block_on(self.teardown());
            }
            (Err(_), stored) => self.detach_teardown(stored.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MessageCallback;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubConnection {
        connected: AtomicBool,
        fail_connect: AtomicBool,
        fail_send: AtomicBool,
        connects: AtomicUsize,
        sent: Mutex<Vec<String>>,
        handler: Mutex<Option<MessageCallback>>,
    }

    impl StubConnection {
        fn push(&self, text: &str) {
            let handler = self.handler.lock().clone();
            if let Some(handler) = handler {
                handler(text.to_string());
            }
        }
    }

    #[async_trait]
    impl DuplexConnection for StubConnection {
        fn set_message_handler(&self, handler: MessageCallback) {
            *self.handler.lock() = Some(handler);
        }

        fn clear_message_handler(&self) {
            *self.handler.lock() = None;
        }

        async fn connect(&self, _target: &ConnectTarget) -> StreamResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(StreamError::Network("refused".to_string()));
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, text: String) -> StreamResult<()> {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(StreamError::Network("broken pipe".to_string()));
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

    fn client(stub: &Arc<StubConnection>) -> StreamingClient {
        let connection: Arc<dyn DuplexConnection> = Arc::clone(stub) as _;
        StreamingClient::new(
            connection,
            StreamingConfig {
                reconnect_delay: Duration::from_millis(1),
                ..StreamingConfig::default()
            },
        )
    }

    fn session() -> StreamSession {
        StreamSession::with_ttl("wss://x", "abc", Duration::from_secs(3600))
    }

    fn inactive() -> StreamSession {
        StreamSession::with_ttl("", "abc", Duration::from_secs(3600))
    }

    fn syms(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn connect_without_session_is_noop() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.connect().await.unwrap();
        assert!(!client.is_connected());
        assert_eq!(stub.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_with_inactive_session_is_noop() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_session(inactive());
        client.connect().await.unwrap();
        assert_eq!(stub.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_twice_opens_once() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_session(session());
        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.connection_id().is_some());
        assert_eq!(stub.connects.load(Ordering::SeqCst), 1);
        assert!(client.statistics().connection_start.is_some());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn connect_failure_reports_and_stays_disconnected() {
        let stub = Arc::new(StubConnection::default());
        stub.fail_connect.store(true, Ordering::SeqCst);
        let client = client(&stub);
        let reported = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reported);
        client.set_error_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        client.set_session(session());

        assert!(client.connect().await.is_err());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(reported.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn subscribe_rejects_invalid_input() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);

        assert!(
            !client
                .subscribe_to_quotes(&inactive(), &syms(&["AAPL"]), |_| Ok(()))
                .await
        );
        assert!(!client.subscribe_to_quotes(&session(), &[], |_| Ok(())).await);
        assert_eq!(stub.connects.load(Ordering::SeqCst), 0);
        assert!(stub.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn account_subscription_omits_symbols() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        assert!(client.subscribe_to_order_events(&session(), |_| Ok(())).await);
        assert_eq!(
            *stub.sent.lock(),
            vec![r#"{"type":"subscribe","to":"order"}"#.to_string()]
        );
        client.disconnect().await;
    }

    #[tokio::test]
    async fn add_and_remove_symbols_send_frames_when_connected() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        assert!(
            client
                .subscribe_to_trades(&session(), &syms(&["AAPL"]), |_| Ok(()))
                .await
        );
        stub.sent.lock().clear();

        let added = client.add_symbols(&syms(&["AAPL", "MSFT"])).await;
        assert_eq!(added, syms(&["MSFT"]));
        let removed = client.remove_symbols(&syms(&["AAPL"])).await;
        assert_eq!(removed, syms(&["AAPL"]));

        assert_eq!(
            *stub.sent.lock(),
            vec![
                r#"{"type":"subscribe","to":"trade","symbols":["MSFT"]}"#.to_string(),
                r#"{"type":"unsubscribe","to":"trade","symbols":["AAPL"]}"#.to_string(),
            ]
        );
        assert_eq!(client.subscribed_symbols().len(), 1);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn add_symbols_offline_only_updates_state() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.add_symbols(&syms(&["SPY"])).await;
        assert!(stub.sent.lock().is_empty());
        assert!(client.subscribed_symbols().contains("SPY"));
    }

    #[tokio::test]
    async fn reconnect_replays_subscriptions() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        assert!(
            client
                .subscribe_to_quotes(&session(), &syms(&["AAPL"]), |_| Ok(()))
                .await
        );
        stub.sent.lock().clear();

        client.reconnect().await.unwrap();

        assert!(client.is_connected());
        assert_eq!(stub.connects.load(Ordering::SeqCst), 2);
        assert_eq!(client.statistics().reconnects, 1);
        assert_eq!(
            *stub.sent.lock(),
            vec![r#"{"type":"subscribe","to":"quote","symbols":["AAPL"]}"#.to_string()]
        );
        client.disconnect().await;
    }

    #[tokio::test]
    async fn reconnect_with_backoff_gives_up() {
        let stub = Arc::new(StubConnection::default());
        stub.fail_connect.store(true, Ordering::SeqCst);
        let client = client(&stub);
        client.set_config(StreamingConfig {
            reconnect_delay: Duration::from_millis(1),
            max_reconnect_attempts: 2,
            ..StreamingConfig::default()
        });
        client.set_session(session());

        let err = client
            .reconnect_with_backoff(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReconnectError::MaxAttemptsExceeded { attempts: 2, .. }
        ));
        assert_eq!(stub.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reconnect_with_backoff_succeeds() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_session(session());

        let attempts = client
            .reconnect_with_backoff(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(attempts, 1);
        assert!(client.is_connected());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn reconnect_with_backoff_honours_cancel() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_session(session());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client.reconnect_with_backoff(&cancel).await.unwrap_err();
        assert!(matches!(err, ReconnectError::Cancelled));
    }

    #[tokio::test]
    async fn dispatch_reaches_registered_handler() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        assert!(
            client
                .subscribe_to_summary(&session(), &syms(&["AAPL"]), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
        );

        stub.push(r#"{"type":"summary","symbol":"AAPL","open":"1.0"}"#);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(client.statistics().messages_processed, 1);

        client.reset_statistics();
        assert_eq!(client.statistics(), StatisticsSnapshot::default());
        client.disconnect().await;
    }

    #[tokio::test]
    async fn config_round_trip() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        let config = StreamingConfig {
            filter_duplicates: true,
            ..StreamingConfig::default()
        };
        client.set_config(config.clone());
        assert_eq!(client.config(), config);
    }

    #[tokio::test]
    async fn heartbeat_exit_marks_client_disconnected() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_config(StreamingConfig {
            reconnect_delay: Duration::from_millis(1),
            heartbeat_interval: Duration::from_millis(5),
            ..StreamingConfig::default()
        });
        client.set_session(session());
        client.connect().await.unwrap();
        assert!(client.is_connected());

        stub.fail_send.store(true, Ordering::SeqCst);
        for _ in 0..200 {
            if !client.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!client.is_connected());
        assert!(stub.is_connected());
        assert_eq!(client.state(), ConnectionState::Connected);

        stub.fail_send.store(false, Ordering::SeqCst);
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(stub.connects.load(Ordering::SeqCst), 2);
        client.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_detaches_message_handler() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_session(session());
        client.connect().await.unwrap();
        assert!(stub.handler.lock().is_some());

        client.disconnect().await;
        assert!(stub.handler.lock().is_none());
    }

    #[tokio::test]
    async fn drop_on_current_thread_detaches_then_closes() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_session(session());
        client.connect().await.unwrap();

        drop(client);
        assert!(stub.handler.lock().is_none());

        tokio::task::yield_now().await;
        assert!(!stub.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drop_on_multi_thread_closes_before_returning() {
        let stub = Arc::new(StubConnection::default());
        let client = client(&stub);
        client.set_session(session());
        client.connect().await.unwrap();

        drop(client);
        assert!(stub.handler.lock().is_none());
        assert!(!stub.is_connected());
    }

    #[tokio::test]
    async fn drop_when_never_connected_is_quiet() {
        let stub = Arc::new(StubConnection::default());
        drop(client(&stub));
        assert_eq!(stub.connects.load(Ordering::SeqCst), 0);
    }
}
