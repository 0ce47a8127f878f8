//! Tradier Stream Binary
//!
//! Opens a market data session, subscribes to quotes and trades, and logs
//! every event until interrupted.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tradier-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `TRADIER_ACCESS_TOKEN`: API access token
//!
//! ## Optional
//! - `TRADIER_ENV`: SANDBOX | LIVE (default: SANDBOX)
//! - `TRADIER_SYMBOLS`: Comma-separated symbols (default: AAPL,SPY)
//! - `TRADIER_STREAM_*`: Streaming settings (see `StreamingConfig`)
//! - `TRADIER_METRICS_PORT`: Prometheus metrics port (default: disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tradier_stream::infrastructure::config::parse_list;
use tradier_stream::infrastructure::telemetry;
use tradier_stream::infrastructure::tradier::ReconnectError;
use tradier_stream::{
    ClientConfig, SessionManager, StreamEvent, StreamingClient, Symbol, TradierHttpClient,
    WebSocketConnection, init_metrics,
};

/// How often the supervisor loop checks connection health.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(1);

/// Symbols streamed when `TRADIER_SYMBOLS` is unset.
const DEFAULT_SYMBOLS: &str = "AAPL,SPY";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Tradier stream");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    let _metrics_handle = if config.metrics_port == 0 {
        None
    } else {
        Some(init_metrics(config.metrics_port)?)
    };

    let http = Arc::new(TradierHttpClient::from_config(&config)?);
    let sessions = Arc::new(SessionManager::new(http, config.session.clone()));
    let client = StreamingClient::new(
        Arc::new(WebSocketConnection::new()),
        config.streaming.clone(),
    )
    .with_access_token(config.credentials.access_token())
    .with_session_manager(sessions);

    client.set_error_handler(|error| {
        tracing::error!(kind = error.label(), error = %error, "Stream error");
    });

    let session = client.create_market_session().await?;
    tracing::info!(url = %session.url(), expires_at = %session.expires_at(), "Session created");

    let symbols: Vec<Symbol> = parse_list(
        &std::env::var("TRADIER_SYMBOLS").unwrap_or_else(|_| DEFAULT_SYMBOLS.to_string()),
    );

    if !client
        .subscribe_to_quotes(&session, &symbols, log_event)
        .await
    {
        anyhow::bail!("quote subscription failed");
    }
    if !client
        .subscribe_to_trades(&session, &symbols, log_event)
        .await
    {
        anyhow::bail!("trade subscription failed");
    }

    tracing::info!(symbols = ?symbols, "Streaming");

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    supervise(&client, &config, &shutdown_token).await;

    client.disconnect().await;
    let stats = client.statistics();
    tracing::info!(
        received = stats.messages_received,
        processed = stats.messages_processed,
        errors = stats.errors,
        reconnects = stats.reconnects,
        "Tradier stream stopped"
    );
    Ok(())
}

/// Keep the connection alive until shutdown.
///
/// Reconnects when the connection drops (if enabled) and refreshes the
/// session before it expires.
async fn supervise(
    client: &StreamingClient,
    config: &ClientConfig,
    shutdown_token: &CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = shutdown_token.cancelled() => return,
            () = tokio::time::sleep(SUPERVISE_INTERVAL) => {}
        }

        let expiring = client
            .session()
            .is_some_and(|s| s.expires_within(config.session.renew_margin));
        if expiring && client.is_connected() {
            tracing::info!("Session expiring, renewing");
            if let Err(e) = client.reconnect().await {
                tracing::warn!(error = %e, "Session renewal failed");
            }
            continue;
        }

        if client.is_connected() || !config.streaming.auto_reconnect {
            continue;
        }

        tracing::warn!("Connection lost");
        match client.reconnect_with_backoff(shutdown_token).await {
            Ok(attempts) => tracing::info!(attempts, "Reconnected"),
            Err(ReconnectError::Cancelled) => return,
            Err(e) => {
                tracing::error!(error = %e, "Giving up on reconnection");
                shutdown_token.cancel();
                return;
            }
        }
    }
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(event: &StreamEvent) -> anyhow::Result<()> {
    match event {
        StreamEvent::Quote(q) => tracing::info!(
            symbol = %q.symbol,
            bid = q.bid,
            ask = q.ask,
            "quote"
        ),
        StreamEvent::Trade(t) => tracing::info!(
            symbol = %t.symbol,
            price = t.price,
            size = t.size,
            "trade"
        ),
        other => tracing::info!(kind = other.kind().as_str(), symbol = other.symbol(), "event"),
    }
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        environment = config.environment.as_str(),
        api_base_url = %config.api_base_url,
        auto_reconnect = config.streaming.auto_reconnect,
        heartbeat_secs = config.streaming.heartbeat_interval.as_secs(),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
