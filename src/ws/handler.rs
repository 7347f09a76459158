//! Realtime connection handler
//!
//! Runs one WebSocket connection as three tasks sharing a cancellation token:
//!
//! - the send loop writes queued text messages and periodic pings
//! - the receive loop reads frames, enforces the liveness deadline and
//!   forwards text to the session
//! - the session task runs the application logic
//!
//! Whichever task finishes first cancels the token; the others observe it at
//! their next wait. [`ConnectionHandler::serve`] returns only after all three
//! have been joined.

use futures::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hyper_tungstenite::HyperWebsocket;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::types::{KeywayError, Result};

/// Application logic for one connection. Returning ends the connection.
pub type SessionFn = Arc<dyn Fn(Session) -> BoxFuture<'static, ()> + Send + Sync>;

/// Keep-alive and framing limits
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    /// How often a ping is sent
    pub ping_interval: Duration,
    /// Rolling read deadline, extended by every pong
    pub pong_wait: Duration,
    /// Deadline for writing a single frame
    pub write_wait: Duration,
    /// Largest accepted inbound message in bytes
    pub max_message_size: usize,
}

impl LivenessConfig {
    /// Protocol limits for the stream. Frames declaring more than
    /// `max_message_size` are refused from their header, before any payload
    /// is buffered.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..Default::default()
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            ping_interval: pong_wait * 9 / 10,
            pong_wait,
            write_wait: Duration::from_secs(10),
            max_message_size: 2048,
        }
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    AwaitingKey,
    Registered,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::AwaitingKey => "awaiting_key",
            Self::Registered => "registered",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The application's view of a connection
pub struct Session {
    id: Uuid,
    incoming: mpsc::Receiver<String>,
    outgoing: mpsc::Sender<String>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next inbound message, or `None` once the connection is cancelled
    pub async fn read(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.incoming.recv() => message,
        }
    }

    /// Queue a message for the peer. Fails once the connection is cancelled.
    pub async fn write(&self, message: impl Into<String>) -> Result<()> {
        let closed = || KeywayError::WebSocket("connection closed".into());
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(closed()),
            sent = self.outgoing.send(message.into()) => sent.map_err(|_| closed()),
        }
    }

    /// Wait until the connection is cancelled
    pub async fn wait(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// Reusable per-connection handler.
///
/// All per-connection state is replaced by [`reset`](Self::reset); a handler
/// must be reset before every use.
pub struct ConnectionHandler {
    config: LivenessConfig,
    session_fn: Option<SessionFn>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionHandler {
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            session_fn: None,
            cancel: CancellationToken::new(),
            state: Arc::new(watch::channel(ConnectionState::Connecting).0),
        }
    }

    /// Install a session function (or none) with a fresh cancellation token
    /// and state.
    pub fn reset(&mut self, session_fn: Option<SessionFn>) {
        self.session_fn = session_fn;
        self.cancel = CancellationToken::new();
        self.state = Arc::new(watch::channel(ConnectionState::Connecting).0);
    }

    pub fn has_session(&self) -> bool {
        self.session_fn.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe state transitions of the current connection
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Token that tears down the current connection when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Complete a pending hyper upgrade and serve it
    pub async fn serve_upgrade(&self, websocket: HyperWebsocket) -> Result<()> {
        match websocket.await {
            Ok(ws) => self.serve(ws).await,
            Err(e) => {
                self.state.send_replace(ConnectionState::Closed);
                Err(KeywayError::WebSocket(format!("upgrade failed: {e}")))
            }
        }
    }

    /// Serve an established WebSocket until every task has finished
    pub async fn serve<S>(&self, ws: WebSocketStream<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Some(session_fn) = self.session_fn.clone() else {
            self.state.send_replace(ConnectionState::Closed);
            return Err(KeywayError::Internal("connection handler was not reset".into()));
        };

        let id = Uuid::new_v4();
        let span = info_span!("connection", id = %id);
        let cancel = self.cancel.clone();
        self.state.send_replace(ConnectionState::Open);
        debug!(parent: &span, "Connection open");

        let (sink, stream) = ws.split();
        let (incoming_tx, incoming_rx) = mpsc::channel(1);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(1);

        let session = Session {
            id,
            incoming: incoming_rx,
            outgoing: outgoing_tx,
            cancel: cancel.clone(),
            state: Arc::clone(&self.state),
        };

        let mut tasks = JoinSet::new();
        tasks.spawn(
            send_loop(sink, outgoing_rx, cancel.clone(), self.config.clone())
                .instrument(span.clone()),
        );
        tasks.spawn(
            recv_loop(stream, incoming_tx, cancel.clone(), self.config.clone())
                .instrument(span.clone()),
        );
        let guard = cancel.clone().drop_guard();
        tasks.spawn(
            async move {
                let _guard = guard;
                session_fn(session).await;
                Ok(())
            }
            .instrument(span.clone()),
        );

        let mut closing = false;
        while let Some(joined) = tasks.join_next().await {
            if !closing {
                closing = true;
                cancel.cancel();
                self.state.send_replace(ConnectionState::Closing);
            }
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(parent: &span, error = %e, "Connection task ended with error"),
                Err(e) => warn!(parent: &span, error = %e, "Connection task panicked"),
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        debug!(parent: &span, "Connection closed");
        Ok(())
    }
}

impl Default for ConnectionHandler {
    fn default() -> Self {
        Self::new(LivenessConfig::default())
    }
}

async fn write_frame<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(write_wait, sink.send(message)).await {
        Ok(sent) => sent.map_err(Into::into),
        Err(_) => Err(KeywayError::WebSocket("write timed out".into())),
    }
}

/// Writes queued messages and pings; sends a close frame on cancellation
async fn send_loop<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outgoing: mpsc::Receiver<String>,
    cancel: CancellationToken,
    config: LivenessConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = cancel.clone().drop_guard();
    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            message = outgoing.recv() => match message {
                Some(text) => write_frame(&mut sink, Message::Text(text), config.write_wait).await?,
                None => break,
            },
            _ = ping.tick() => {
                write_frame(&mut sink, Message::Ping(Vec::new()), config.write_wait).await?;
            }
        }
    }

    // flush whatever the session queued before it finished
    while let Ok(text) = outgoing.try_recv() {
        write_frame(&mut sink, Message::Text(text), config.write_wait).await?;
    }

    let _ = write_frame(&mut sink, Message::Close(None), config.write_wait).await;
    let _ = timeout(config.write_wait, sink.close()).await;
    Ok(())
}

/// Reads frames until the peer leaves, misbehaves or misses the liveness
/// deadline.
///
/// Inbound messages that arrive while the session is not reading are dropped.
async fn recv_loop<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    incoming: mpsc::Sender<String>,
    cancel: CancellationToken,
    config: LivenessConfig,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _guard = cancel.clone().drop_guard();
    let deadline = sleep(config.pong_wait);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = &mut deadline => {
                debug!("Liveness deadline passed, peer presumed gone");
                return Ok(());
            }
            frame = stream.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(data))) => String::from_utf8(data)
                .map_err(|_| KeywayError::BadRequest("binary message is not UTF-8".into()))?,
            Some(Ok(Message::Pong(_))) => {
                deadline.as_mut().reset(Instant::now() + config.pong_wait);
                continue;
            }
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };

        if text.len() > config.max_message_size {
            return Err(KeywayError::BadRequest(format!(
                "message of {} bytes exceeds limit of {}",
                text.len(),
                config.max_message_size
            )));
        }

        if let Err(mpsc::error::TrySendError::Full(_)) = incoming.try_send(text) {
            debug!("Session is not reading, dropping inbound message");
        }
    }
}
