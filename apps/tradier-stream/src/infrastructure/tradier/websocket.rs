//! WebSocket Connection
//!
//! Production [`DuplexConnection`] over `tokio-tungstenite` with rustls.
//!
//! A reader task owns the read half and hands every text frame to the
//! installed message handler in arrival order. The write half stays with the
//! connection for `send`. `disconnect` cancels the reader, waits for it,
//! and closes the socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{ConnectTarget, DuplexConnection, MessageCallback};
use crate::error::{StreamError, StreamResult};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedHandler = Arc<RwLock<Option<MessageCallback>>>;

struct OpenSocket {
    sink: SplitSink<Socket, Message>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// WebSocket-backed duplex connection.
pub struct WebSocketConnection {
    handler: SharedHandler,
    connected: Arc<AtomicBool>,
    socket: tokio::sync::Mutex<Option<OpenSocket>>,
}

impl Default for WebSocketConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnection {
    /// Create a closed connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: Arc::new(RwLock::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            socket: tokio::sync::Mutex::new(None),
        }
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DuplexConnection for WebSocketConnection {
    fn set_message_handler(&self, handler: MessageCallback) {
        *self.handler.write() = Some(handler);
    }

    fn clear_message_handler(&self) {
        *self.handler.write() = None;
    }

    async fn connect(&self, target: &ConnectTarget) -> StreamResult<()> {
        let mut socket = self.socket.lock().await;
        if socket.is_some() && self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(stale) = socket.take() {
            close_socket(stale).await;
        }

        tracing::info!(url = %target.url, "Connecting to stream");

        let url = stream_url(target)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::Network(format!("invalid stream url: {e}")))?;
        if !target.bearer_token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {}", target.bearer_token))
                .map_err(|e| StreamError::Validation(format!("invalid bearer token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| StreamError::Network(format!("websocket connect failed: {e}")))?;

        let (sink, read) = stream.split();
        let cancel = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(read_loop(
            read,
            Arc::clone(&self.handler),
            Arc::clone(&self.connected),
            cancel.clone(),
        ));

        *socket = Some(OpenSocket {
            sink,
            cancel,
            reader,
        });
        tracing::info!(url = %target.url, "Stream connected");
        Ok(())
    }

    async fn send(&self, text: String) -> StreamResult<()> {
        let mut socket = self.socket.lock().await;
        let Some(open) = socket.as_mut() else {
            return Err(StreamError::Network("not connected".to_string()));
        };
        if !self.connected.load(Ordering::SeqCst) {
            return Err(StreamError::Network("connection closed".to_string()));
        }

        open.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| StreamError::Network(format!("send failed: {e}")))
    }

    async fn disconnect(&self) {
        let open = self.socket.lock().await.take();
        self.connected.store(false, Ordering::SeqCst);
        if let Some(open) = open {
            close_socket(open).await;
            tracing::info!("Stream disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Session URL with the session id attached as `sessionid`.
fn stream_url(target: &ConnectTarget) -> StreamResult<Url> {
    let mut url = Url::parse(&target.url)
        .map_err(|e| StreamError::Network(format!("invalid stream url: {e}")))?;

    let present = url.query_pairs().any(|(key, _)| key == "sessionid");
    if !target.session_id.is_empty() && !present {
        url.query_pairs_mut().append_pair("sessionid", &target.session_id);
    }
    Ok(url)
}

async fn close_socket(mut open: OpenSocket) {
    open.cancel.cancel();
    if let Err(e) = open.sink.close().await {
        tracing::debug!(error = %e, "Error closing websocket");
    }
    if let Err(e) = open.reader.await {
        tracing::warn!(error = %e, "Reader task ended abnormally");
    }
}

async fn read_loop(
    mut read: SplitStream<Socket>,
    handler: SharedHandler,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = read.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => deliver(&handler, text.to_string()),
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => deliver(&handler, text),
                Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
            },
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(frame = ?frame, "Server sent close frame");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "WebSocket read error");
                break;
            }
            None => {
                tracing::info!("WebSocket stream ended");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
}

fn deliver(handler: &SharedHandler, text: String) {
    let callback = handler.read().clone();
    if let Some(callback) = callback {
        callback(text);
    }
}
