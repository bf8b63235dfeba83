//! Persistent control-protocol client.
//!
//! One WebSocket connection to the local broadcasting application. The
//! client performs the hello/identify handshake (including the password
//! challenge-response), multiplexes concurrent requests over the socket by
//! request id, and dispatches server events to registered listeners one
//! frame at a time, in arrival order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};

use crate::error::{ControlError, Result};
use crate::events::{ClientEvent, EventHandler, EventKind, ListenerSet};
use crate::protocol::{
    self, EventFrame, Identify, RequestFrame, ResponseFrame, ServerFrame, StreamStatus,
    VersionInfo, opcode, subscription,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OUTBOUND_BUFFER: usize = 64;

/// Event type interpreted by the client for stream lifecycle tracking.
const STREAM_STATE_EVENT: &str = "StreamStateChanged";

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Control endpoint, e.g. `ws://127.0.0.1:4455`.
    pub endpoint: String,
    /// Shared secret for the challenge-response handshake, if the server
    /// requires one.
    pub password: Option<String>,
    /// Per-request expiry for [`ControlClient::send`].
    pub request_timeout: Duration,
    /// Time allowed for the dial and the hello/identify/identified sequence.
    pub connect_timeout: Duration,
    /// Event-subscription bitmask sent in the identify frame.
    pub event_subscriptions: u32,
}

impl ClientConfig {
    /// Create a config for the given endpoint with default timeouts.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Set the shared secret used for authentication.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:4455".to_string(),
            password: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
            event_subscriptions: subscription::ALL,
        }
    }
}

/// Pending-request correlation table.
///
/// Entries are removed exactly once: on a matching response, on expiry in
/// [`ControlClient::send`], or in bulk when the transport closes.
#[derive(Default)]
struct PendingTable {
    inner: Mutex<HashMap<String, oneshot::Sender<Result<ResponseFrame>>>>,
}

impl PendingTable {
    fn register(&self, request_id: &str) -> oneshot::Receiver<Result<ResponseFrame>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(request_id.to_string(), tx);
        rx
    }

    fn remove(&self, request_id: &str) {
        self.inner.lock().remove(request_id);
    }

    /// Resolve one pending request. Returns false for unknown ids.
    fn settle(&self, response: ResponseFrame) -> bool {
        match self.inner.lock().remove(&response.request_id) {
            Some(tx) => {
                let _ = tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Reject every pending request with a connection-closed error.
    fn reject_all(&self) {
        let entries: Vec<_> = self.inner.lock().drain().collect();
        for (_, tx) in entries {
            let _ = tx.send(Err(ControlError::Closed));
        }
    }
}

struct ConnectionHandle {
    generation: u64,
    outbound: mpsc::Sender<Message>,
    shutdown: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

enum ConnState {
    Disconnected,
    Connected(ConnectionHandle),
}

struct ClientInner {
    config: ClientConfig,
    listeners: ListenerSet,
    pending: PendingTable,
    conn: tokio::sync::Mutex<ConnState>,
    generation: AtomicU64,
}

/// Handle to the control connection. Cheap to clone; all clones share the
/// same connection, pending table and listeners.
#[derive(Clone)]
pub struct ControlClient {
    inner: Arc<ClientInner>,
}

impl ControlClient {
    /// Create a client. No connection is opened until [`connect`](Self::connect).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                listeners: ListenerSet::default(),
                pending: PendingTable::default(),
                conn: tokio::sync::Mutex::new(ConnState::Disconnected),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Register an event listener.
    ///
    /// Listeners run synchronously inside frame processing; a slow listener
    /// delays subsequent frames, so they must not block.
    pub fn on<F, Fut>(&self, kind: EventKind, handler: F)
    where
        F: Fn(ClientEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.inner.listeners.add(kind, handler);
    }

    /// Whether the connection is currently identified.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.inner.conn.lock().await, ConnState::Connected(_))
    }

    /// Open the connection and perform the handshake.
    ///
    /// Resolves only after the server acknowledges identification. Calling
    /// connect while already connecting or connected is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let mut conn = self.inner.conn.lock().await;
        if matches!(*conn, ConnState::Connected(_)) {
            return Ok(());
        }

        let config = &self.inner.config;
        let (mut ws, _) = tokio::time::timeout(
            config.connect_timeout,
            connect_async(config.endpoint.as_str()),
        )
        .await
        .map_err(|_| ControlError::transport("timed out dialing control endpoint"))??;

        let identified = tokio::time::timeout(config.connect_timeout, handshake(&mut ws, config))
            .await
            .map_err(|_| ControlError::transport("handshake timed out"))??;
        debug!(
            "Identified against control endpoint (rpc version {})",
            identified.negotiated_rpc_version
        );

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let task = tokio::spawn(io_task(
            self.inner.clone(),
            generation,
            sink,
            stream,
            outbound_rx,
            shutdown_rx,
        ));
        *conn = ConnState::Connected(ConnectionHandle {
            generation,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task,
        });
        drop(conn);

        info!("Connected to control endpoint {}", config.endpoint);
        self.inner.listeners.dispatch(&ClientEvent::Connected).await;
        Ok(())
    }

    /// Close the connection. Pending requests are rejected and the
    /// `disconnected` event fires. Idempotent.
    pub async fn disconnect(&self) {
        let handle = {
            let mut conn = self.inner.conn.lock().await;
            match std::mem::replace(&mut *conn, ConnState::Disconnected) {
                ConnState::Connected(handle) => handle,
                ConnState::Disconnected => return,
            }
        };
        let _ = handle.shutdown.send(()).await;
        let _ = handle.task.await;
    }

    /// Send one request and await its response.
    ///
    /// Requests are correlated by a generated unique id; each has its own
    /// expiry (see [`ClientConfig::request_timeout`]). There is no retry at
    /// this layer.
    pub async fn send(&self, request_type: &str, payload: Option<Value>) -> Result<Value> {
        let outbound = {
            let conn = self.inner.conn.lock().await;
            match &*conn {
                ConnState::Connected(handle) => handle.outbound.clone(),
                ConnState::Disconnected => return Err(ControlError::NotConnected),
            }
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = RequestFrame {
            request_type: request_type.to_string(),
            request_id: request_id.clone(),
            request_data: payload,
        };
        let text = protocol::encode(opcode::REQUEST, &frame)?;

        let rx = self.inner.pending.register(&request_id);
        if outbound.send(Message::text(text)).await.is_err() {
            self.inner.pending.remove(&request_id);
            return Err(ControlError::Closed);
        }
        trace!("Sent request {request_type} ({request_id})");

        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(settled)) => {
                let response = settled?;
                if response.request_status.result {
                    Ok(response.response_data.unwrap_or(Value::Null))
                } else {
                    Err(ControlError::RequestFailed {
                        request_type: request_type.to_string(),
                        code: response.request_status.code,
                        comment: response.request_status.comment,
                    })
                }
            }
            // Sender dropped without settling; the connection is gone.
            Ok(Err(_)) => Err(ControlError::Closed),
            Err(_) => {
                self.inner.pending.remove(&request_id);
                Err(ControlError::RequestTimeout {
                    request_type: request_type.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Query the recorder's stream output status.
    pub async fn get_stream_status(&self) -> Result<StreamStatus> {
        let data = self.send("GetStreamStatus", None).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Query the endpoint's version and capabilities.
    pub async fn get_version(&self) -> Result<VersionInfo> {
        let data = self.send("GetVersion", None).await?;
        Ok(serde_json::from_value(data)?)
    }
}

/// Run the hello/identify/identified sequence on a fresh socket.
async fn handshake(ws: &mut WsStream, config: &ClientConfig) -> Result<protocol::Identified> {
    let hello = match next_server_frame(ws).await? {
        ServerFrame::Hello(hello) => hello,
        other => {
            return Err(ControlError::protocol(format!(
                "expected hello, got {other:?}"
            )));
        }
    };

    let auth_required = hello.authentication.is_some();
    let authentication = match hello.authentication {
        Some(challenge) => match &config.password {
            Some(password) => Some(crate::auth::authentication_proof(
                password,
                &challenge.salt,
                &challenge.challenge,
            )),
            None => {
                return Err(ControlError::authentication(
                    "server requires a password but none is configured",
                ));
            }
        },
        None => None,
    };

    let identify = Identify {
        rpc_version: protocol::RPC_VERSION.min(hello.rpc_version),
        authentication,
        event_subscriptions: config.event_subscriptions,
    };
    ws.send(Message::text(protocol::encode(opcode::IDENTIFY, &identify)?))
        .await?;

    match next_server_frame(ws).await {
        Ok(ServerFrame::Identified(identified)) => Ok(identified),
        Ok(other) => Err(ControlError::protocol(format!(
            "expected identified, got {other:?}"
        ))),
        // The server closes the socket to reject an identify.
        Err(ControlError::Closed) if auth_required => Err(ControlError::authentication(
            "identify rejected by the server",
        )),
        Err(e) => Err(e),
    }
}

/// Read frames until one decodes as a server frame; skips pings and pongs.
async fn next_server_frame<S>(stream: &mut S) -> Result<ServerFrame>
where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return ServerFrame::decode(text.as_str()),
            Some(Ok(Message::Close(_))) | None => return Err(ControlError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

/// Connection io task: one task owns the socket for its whole life.
///
/// Inbound frames are handled one at a time; listener dispatch is awaited
/// inline, which is what preserves arrival ordering for consumers.
async fn io_task(
    inner: Arc<ClientInner>,
    generation: u64,
    mut sink: SplitSink<WsStream, Message>,
    mut stream: SplitStream<WsStream>,
    mut outbound_rx: mpsc::Receiver<Message>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let failure: Option<String> = loop {
        tokio::select! {
            maybe_msg = outbound_rx.recv() => match maybe_msg {
                Some(msg) => {
                    if let Err(e) = sink.send(msg).await {
                        break Some(e.to_string());
                    }
                }
                None => break None,
            },

            _ = shutdown_rx.recv() => {
                let _ = sink.send(Message::Close(None)).await;
                break None;
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_frame(&inner, text.as_str()).await,
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = sink.send(Message::Pong(payload)).await {
                        break Some(e.to_string());
                    }
                }
                Some(Ok(Message::Close(_))) | None => break None,
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
            },
        }
    };

    // Transport is gone: settle every pending request before telling anyone.
    inner.pending.reject_all();
    {
        let mut conn = inner.conn.lock().await;
        if let ConnState::Connected(handle) = &*conn
            && handle.generation == generation
        {
            *conn = ConnState::Disconnected;
        }
    }
    if let Some(reason) = failure {
        error!("Control connection failed: {reason}");
        inner
            .listeners
            .dispatch(&ClientEvent::Error(reason))
            .await;
    }
    debug!("Control connection closed");
    inner.listeners.dispatch(&ClientEvent::Disconnected).await;
}

/// Handle one inbound frame. Malformed frames are dropped; the connection
/// stays up.
async fn handle_frame(inner: &Arc<ClientInner>, text: &str) {
    let frame = match ServerFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping malformed frame: {e}");
            return;
        }
    };

    match frame {
        ServerFrame::Event(event) => handle_event(inner, event).await,
        ServerFrame::RequestResponse(response) => {
            let request_id = response.request_id.clone();
            if !inner.pending.settle(response) {
                warn!("Response for unknown request id {request_id}");
            }
        }
        other => warn!("Unexpected frame after identification: {other:?}"),
    }
}

async fn handle_event(inner: &Arc<ClientInner>, event: EventFrame) {
    if event.event_type == STREAM_STATE_EVENT {
        let data = event.event_data.clone().unwrap_or(Value::Null);
        match serde_json::from_value(data) {
            Ok(change) => {
                inner
                    .listeners
                    .dispatch(&ClientEvent::StreamState(change))
                    .await;
            }
            Err(e) => warn!("Malformed {STREAM_STATE_EVENT} payload: {e}"),
        }
    }
    inner.listeners.dispatch(&ClientEvent::Frame(event)).await;
}
