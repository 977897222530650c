//! Duplex WebSocket connection with automatic reconnection.
//!
//! [`ConnectionManager`] is a handle to a driver task that owns the
//! [`ConnectionMachine`], the live socket and the single reconnect timer.
//! Commands, socket events and timer expiry are handled one at a time by a
//! `select!` loop, so the machine never sees concurrent events. An attempt
//! or socket that the machine abandons is dropped on the spot, which is what
//! keeps events from older sockets out of the machine.

use crate::connection::{Action, ConnectionEvent, ConnectionMachine, ReconnectPolicy};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_types::{ConnectionState, OutboundMessage};
use parley_voice::{CredentialSource, VoiceSessionState};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Frames queued for one socket before `send` starts refusing.
const OUTBOUND_BUFFER: usize = 256;

/// Frames read ahead of the driver.
const INBOUND_BUFFER: usize = 256;

/// Capacity of the state-transition broadcast.
const TRANSITION_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    Url(String),

    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    #[error("socket error: {0}")]
    Socket(String),
}

/// Derives the duplex endpoint from the backend's HTTP(S) origin:
/// `https://host` becomes `wss://host/ws/{session_id}`.
pub fn websocket_url(base_url: &str, session_id: &str) -> Result<Url, TransportError> {
    if session_id.trim().is_empty() {
        return Err(TransportError::Url("session id is empty".to_string()));
    }
    let mut url =
        Url::parse(base_url).map_err(|e| TransportError::Url(format!("{}: {}", base_url, e)))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(TransportError::Url(format!(
                "unsupported scheme {:?} in {}",
                other, base_url
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::Url(format!("cannot use scheme {} for {}", scheme, base_url)))?;
    url.path_segments_mut()
        .map_err(|()| TransportError::Url(format!("{} cannot be a base URL", base_url)))?
        .pop_if_empty()
        .push("ws")
        .push(session_id);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// One open socket as seen by the driver.
///
/// `inbound` yields text frames and ends when the socket closes. Dropping the
/// link closes the socket.
#[derive(Debug)]
pub struct Link {
    outbound: mpsc::Sender<String>,
    inbound: mpsc::Receiver<String>,
}

impl Link {
    pub fn new(outbound: mpsc::Sender<String>, inbound: mpsc::Receiver<String>) -> Self {
        Self { outbound, inbound }
    }
}

/// Opens sockets. The production implementation is [`WebSocketConnector`];
/// tests substitute in-memory links.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Link, TransportError>;
}

/// Connects with `tokio-tungstenite`, attaching a bearer token when one is
/// available.
pub struct WebSocketConnector {
    credentials: Arc<dyn CredentialSource>,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(credentials: Arc<dyn CredentialSource>, handshake_timeout: Duration) -> Self {
        Self {
            credentials,
            handshake_timeout,
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Link, TransportError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Url(e.to_string()))?;
        if let Some(token) = self.credentials.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Handshake(format!("invalid token header: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, _response) =
            tokio::time::timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| {
                    TransportError::Handshake(format!(
                        "timed out after {} seconds",
                        self.handshake_timeout.as_secs()
                    ))
                })?
                .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<String>(INBOUND_BUFFER);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::text(text)).await {
                                tracing::warn!("websocket send failed: {}", e);
                                break;
                            }
                        }
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    incoming = stream.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text.as_str().to_owned()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(?frame, "websocket closed by peer");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("{}", TransportError::Socket(e.to_string()));
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Link::new(out_tx, in_rx))
    }
}

enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

type OutboundSlot = Arc<Mutex<Option<mpsc::Sender<String>>>>;

/// Handle to the connection driver task.
pub struct ConnectionManager {
    url: Url,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    outbound: OutboundSlot,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl ConnectionManager {
    /// Starts the driver in the `Disconnected` state.
    ///
    /// Returns the handle and the receiver of inbound text frames, in arrival
    /// order. When `voice` is given, its `is_connected` flag tracks the
    /// connection state.
    pub fn spawn<C>(
        connector: C,
        url: Url,
        policy: ReconnectPolicy,
        voice: Option<VoiceSessionState>,
    ) -> (Self, mpsc::UnboundedReceiver<String>)
    where
        C: Connector + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let outbound: OutboundSlot = Arc::new(Mutex::new(None));

        let driver = Driver {
            connector: Arc::new(connector),
            url: url.clone(),
            machine: ConnectionMachine::new(policy),
            state: state_tx,
            transitions: transitions.clone(),
            voice,
            outbound: outbound.clone(),
            frames: frame_tx,
            pending: None,
            link: None,
            retry_at: None,
        };
        let task = tokio::spawn(driver.run(command_rx));

        let manager = Self {
            url,
            commands: command_tx,
            state: state_rx,
            transitions,
            outbound,
            task: Mutex::new(Some(task)),
        };
        (manager, frame_rx)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watches the current state.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Receives every state transition, including short-lived ones a
    /// `watch` observer could miss.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    pub fn connect(&self) {
        let _ = self.commands.send(Command::Connect);
    }

    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Queues a message on the live socket. Returns `false` when there is
    /// no open socket or its buffer is full.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(json) => self.send_text(json),
            Err(e) => {
                tracing::error!("failed to serialize outbound message: {}", e);
                false
            }
        }
    }

    pub fn send_text(&self, text: String) -> bool {
        if !self.state().is_connected() {
            return false;
        }
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx.try_send(text).is_ok(),
            None => false,
        }
    }

    /// Disconnects and waits for the driver task to exit.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!("connection driver failed: {}", e);
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

type PendingConnect = Pin<Box<dyn Future<Output = Result<Link, TransportError>> + Send>>;

struct Driver<C> {
    connector: Arc<C>,
    url: Url,
    machine: ConnectionMachine,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    voice: Option<VoiceSessionState>,
    outbound: OutboundSlot,
    frames: mpsc::UnboundedSender<String>,
    pending: Option<PendingConnect>,
    link: Option<Link>,
    retry_at: Option<Instant>,
}

impl<C: Connector + 'static> Driver<C> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.apply(ConnectionEvent::ConnectRequested),
                    Some(Command::Disconnect) => self.apply(ConnectionEvent::DisconnectRequested),
                    Some(Command::Shutdown) | None => break,
                },
                frame = next_frame(&mut self.link) => match frame {
                    Some(text) => {
                        if self.frames.send(text).is_err() {
                            tracing::debug!("inbound frame dropped, no receiver");
                        }
                    }
                    None => {
                        self.link = None;
                        tracing::info!(url = %self.url, "connection closed");
                        self.apply(ConnectionEvent::Closed);
                    }
                },
                result = next_attempt(&mut self.pending) => {
                    self.pending = None;
                    match result {
                        Ok(link) => {
                            self.link = Some(link);
                            self.apply(ConnectionEvent::Opened);
                        }
                        Err(e) => {
                            tracing::warn!(
                                url = %self.url,
                                attempt = self.machine.attempt() + 1,
                                error = %e,
                                "connection attempt failed"
                            );
                            self.apply(ConnectionEvent::Closed);
                        }
                    }
                }
                () = retry_elapsed(retry_at) => {
                    self.retry_at = None;
                    self.apply(ConnectionEvent::RetryElapsed);
                }
            }
        }

        self.apply(ConnectionEvent::DisconnectRequested);
        tracing::debug!("connection driver stopped");
    }

    fn apply(&mut self, event: ConnectionEvent) {
        let before = self.machine.state();
        for action in self.machine.handle(event) {
            match action {
                Action::Open => {
                    let connector = self.connector.clone();
                    let url = self.url.clone();
                    self.pending = Some(Box::pin(async move { connector.connect(&url).await }));
                }
                Action::ScheduleRetry(delay) => {
                    tracing::info!(
                        attempt = self.machine.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "scheduling reconnect"
                    );
                    // A deadline past the end of the clock never fires.
                    self.retry_at = Instant::now().checked_add(delay);
                }
                Action::CancelRetry => self.retry_at = None,
                Action::CloseSocket => {
                    self.pending = None;
                    self.link = None;
                }
            }
        }

        let after = self.machine.state();
        if after != before {
            self.publish(before, after);
        }
    }

    fn publish(&self, before: ConnectionState, after: ConnectionState) {
        let sender = if after.is_connected() {
            self.link.as_ref().map(|link| link.outbound.clone())
        } else {
            None
        };
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = sender;

        if let Some(voice) = &self.voice {
            voice.update(|s| s.is_connected = after.is_connected());
        }
        self.state.send_replace(after);
        let _ = self.transitions.send(after);

        if after == ConnectionState::Failed {
            tracing::error!(
                url = %self.url,
                attempts = self.machine.attempt(),
                "giving up after repeated connection failures"
            );
        } else {
            tracing::info!(from = %before, to = %after, url = %self.url, "connection state changed");
        }
    }
}

async fn next_frame(link: &mut Option<Link>) -> Option<String> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_attempt(pending: &mut Option<PendingConnect>) -> Result<Link, TransportError> {
    match pending {
        Some(attempt) => attempt.await,
        None => std::future::pending().await,
    }
}

async fn retry_elapsed(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_maps_scheme_and_path() {
        assert_eq!(
            websocket_url("https://api.example.com", "s1").unwrap().as_str(),
            "wss://api.example.com/ws/s1"
        );
        assert_eq!(
            websocket_url("http://localhost:8000/", "abc").unwrap().as_str(),
            "ws://localhost:8000/ws/abc"
        );
        assert_eq!(
            websocket_url("http://host/backend?x=1", "s 2").unwrap().as_str(),
            "ws://host/backend/ws/s%202"
        );
    }

    #[test]
    fn websocket_url_rejects_bad_input() {
        assert!(matches!(
            websocket_url("ftp://example.com", "s1"),
            Err(TransportError::Url(_))
        ));
        assert!(websocket_url("not a url", "s1").is_err());
        assert!(websocket_url("https://example.com", " ").is_err());
    }
}
