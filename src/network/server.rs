//! WebSocket Game Server
//!
//! Accepts WebSocket connections, runs one reader task and one writer task
//! per connection, and a maintenance loop for bullet expiry and idle
//! session reaping.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::interval;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, instrument, warn};

use crate::network::connection::{ConnectionHandle, ConnectionRegistry};
use crate::network::dispatch::{Admission, Dispatcher};
use crate::network::session::{SessionConfig, SessionManager};

/// Query parameter selecting an existing session.
pub const SESSION_QUERY_PARAM: &str = "session";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Request path that accepts WebSocket upgrades.
    pub ws_path: String,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound queue capacity per connection.
    pub outbound_queue: usize,
    /// How often bullets and idle sessions are swept.
    pub maintenance_interval: Duration,
    /// Settings for new sessions.
    pub session: SessionConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/ws".to_string(),
            max_connections: 1000,
            outbound_queue: 256,
            maintenance_interval: Duration::from_secs(1),
            session: SessionConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// - `ARENA_BIND_ADDR` (e.g. `0.0.0.0:8080`)
    /// - `ARENA_MAX_CONNECTIONS`
    /// - `ARENA_OUTBOUND_QUEUE`
    /// - `ARENA_BULLET_TTL_SECS`
    /// - `ARENA_SESSION_IDLE_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_or("ARENA_BIND_ADDR", defaults.bind_addr),
            max_connections: env_or("ARENA_MAX_CONNECTIONS", defaults.max_connections),
            outbound_queue: env_or("ARENA_OUTBOUND_QUEUE", defaults.outbound_queue).max(2),
            session: SessionConfig {
                bullet_ttl: Duration::from_secs(env_or(
                    "ARENA_BULLET_TTL_SECS",
                    defaults.session.bullet_ttl.as_secs(),
                )),
                idle_grace: Duration::from_secs(env_or(
                    "ARENA_SESSION_IDLE_SECS",
                    defaults.session.idle_grace.as_secs(),
                )),
                ..defaults.session
            },
            ..defaults
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// The game server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Session and connection routing.
    dispatcher: Dispatcher,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a new game server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let dispatcher = Dispatcher::new(
            Arc::new(SessionManager::new(config.session.clone())),
            Arc::new(ConnectionRegistry::new()),
        );

        Self {
            config,
            dispatcher,
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Session and connection routing.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Bind the configured address and run the server.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server on an already bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!(
            "Game server v{} listening on {} (path {})",
            self.config.version,
            listener.local_addr()?,
            self.config.ws_path
        );

        let maintenance_sessions = self.dispatcher.sessions().clone();
        let maintenance_period = self.config.maintenance_interval;
        let maintenance_handle = tokio::spawn(async move {
            Self::run_maintenance_loop(maintenance_sessions, maintenance_period).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let connections = self.dispatcher.connections().len().await;
                            if connections >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        maintenance_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let dispatcher = self.dispatcher.clone();
        let ws_path = self.config.ws_path.clone();
        let queue_capacity = self.config.outbound_queue;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut requested_session = None;
            let callback = |request: &Request, response: Response| {
                if request.uri().path() != ws_path {
                    let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
                    *rejection.status_mut() = StatusCode::NOT_FOUND;
                    return Err(rejection);
                }
                requested_session = session_param(request.uri().query());
                Ok(response)
            };

            let ws_stream = match accept_hdr_async(stream, callback).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, ws_receiver) = ws_stream.split();
            let (handle, mut outbound_rx) = ConnectionHandle::channel(queue_capacity);

            // Writer: drains the outbound queue until every handle is dropped.
            tokio::spawn(async move {
                while let Some(payload) = outbound_rx.recv().await {
                    if let Err(e) = ws_sender.send(Message::Text(payload.to_string())).await {
                        debug!("Write to {} failed: {}", addr, e);
                        return;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let admission = dispatcher
                .admit(requested_session.as_deref(), handle.clone())
                .await;
            debug!("Client {} is player {}", addr, admission.player_id);

            Self::read_until_closed(
                &dispatcher,
                admission,
                &handle,
                ws_receiver,
                shutdown_rx,
                addr,
            )
            .await;
            debug!("Client {} cleaned up", addr);
        });
    }

    /// Feed inbound frames to the dispatcher until the client leaves, the
    /// connection is evicted or the server shuts down, then remove the
    /// player.
    async fn read_until_closed<S>(
        dispatcher: &Dispatcher,
        admission: Admission,
        handle: &ConnectionHandle,
        mut incoming: S,
        mut shutdown_rx: broadcast::Receiver<()>,
        addr: SocketAddr,
    ) where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            tokio::select! {
                msg = incoming.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            dispatcher.handle_text(&admission, &text).await;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            debug!("Ignoring binary frame from {}", addr);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = handle.closed() => {
                    warn!("Client {} evicted after failed delivery", addr);
                    break;
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        dispatcher.disconnect(admission).await;
    }

    /// Expire bullets and reap idle sessions.
    async fn run_maintenance_loop(sessions: Arc<SessionManager>, period: Duration) {
        let mut ticker = interval(period.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let now = Instant::now();
            let expired = sessions.expire_bullets(now).await;
            if expired > 0 {
                debug!("Expired {} bullets", expired);
            }

            for id in sessions.reap_idle(now).await {
                info!("Removed idle session {}", id);
            }
        }
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.dispatcher.connections().len().await
    }

    /// Get active session count.
    pub async fn session_count(&self) -> usize {
        self.dispatcher.sessions().session_count().await
    }
}

/// Extract the session id from a request query string.
///
/// Values are form-decoded. The first `session` key wins; an empty value
/// means no session was requested.
fn session_param(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == SESSION_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
