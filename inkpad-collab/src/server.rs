//! WebSocket server routing connections onto document sessions.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── PresenceBroadcaster ── SessionRegistry
//!            ├── connection task ─────┤── ChangeRelay ────────── BroadcastHub
//! Client B ──┘   (select! loop)       ├── VersionEngine
//!                     ▲               ├── InvitationGate
//!                     │               └── Repository (Memory | RocksDB)
//!                     └── per-session event sink (mpsc)
//! ```
//!
//! A connection holds at most one session. Joining another document leaves
//! the current one first; a dropped transport is reaped like a leave.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::channel::DEFAULT_EVENT_QUEUE;
use crate::error::{CollabError, ErrorBody};
use crate::invitation::{InvitationConfig, DEFAULT_INVITATION_TTL};
use crate::protocol::{ChangeEvent, ClientMessage, ServerMessage};
use crate::service::{CollabService, ServiceConfig};
use crate::session::SessionHandle;
use crate::storage::{MemoryStore, Repository, RocksStore, StoreConfig, StoreError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum concurrent sessions per document
    pub max_sessions_per_document: usize,
    /// How long an invitation stays acceptable
    pub invitation_ttl: Duration,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    /// Events buffered per session before deliveries to it are dropped
    pub event_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            max_sessions_per_document: 100,
            invitation_ttl: DEFAULT_INVITATION_TTL,
            storage_path: None,
            event_queue_capacity: DEFAULT_EVENT_QUEUE,
        }
    }
}

impl ServerConfig {
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            max_sessions_per_document: self.max_sessions_per_document,
            invitation: InvitationConfig { ttl: self.invitation_ttl },
        }
    }

    pub fn store_config(&self) -> Option<StoreConfig> {
        self.storage_path.as_ref().map(|path| StoreConfig {
            path: path.clone(),
            ..StoreConfig::default()
        })
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub rejected_messages: u64,
    pub active_rooms: usize,
}

/// Per-connection state.
struct Connection {
    session: Option<SessionHandle>,
    events: Option<mpsc::Receiver<Arc<ChangeEvent>>>,
    queue_capacity: usize,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_QUEUE)
    }
}

impl Connection {
    fn new(queue_capacity: usize) -> Self {
        Self {
            session: None,
            events: None,
            // tokio rejects zero-capacity channels
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn clear(&mut self) -> Option<SessionHandle> {
        self.events = None;
        self.session.take()
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    service: Arc<CollabService>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server, opening RocksDB storage if a path is configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn Repository> = match config.store_config() {
            Some(store_config) => Arc::new(RocksStore::open(store_config)?),
            None => Arc::new(MemoryStore::new()),
        };
        let service = Arc::new(CollabService::new(store, config.service_config()));
        Ok(Self::with_service(config, service))
    }

    /// Serve an existing service.
    pub fn with_service(config: ServerConfig, service: Arc<CollabService>) -> Self {
        Self {
            config,
            service,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        let config = ServerConfig::default();
        let service = Arc::new(CollabService::new(
            Arc::new(MemoryStore::new()),
            config.service_config(),
        ));
        Self::with_service(config, service)
    }

    /// Bind to the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let service = self.service.clone();
            let stats = self.stats.clone();
            let conn = Connection::new(self.config.event_queue_capacity);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, service, stats, conn).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        service: Arc<CollabService>,
        stats: Arc<RwLock<ServerStats>>,
        mut conn: Connection,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");
        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let result: Result<(), BoxError> = async {
            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                {
                                    let mut s = stats.write().await;
                                    s.total_messages += 1;
                                    s.total_bytes += data.len() as u64;
                                }
                                match ClientMessage::decode(&data) {
                                    Ok(client_msg) => {
                                        let replies = Self::dispatch(&service, &mut conn, client_msg).await;
                                        for reply in &replies {
                                            if matches!(reply, ServerMessage::Rejected { .. }) {
                                                stats.write().await.rejected_messages += 1;
                                            }
                                            send_message(&mut ws_sender, reply).await?;
                                        }
                                    }
                                    Err(e) => {
                                        log::warn!("Failed to decode message from {addr}: {e}");
                                    }
                                }
                            }

                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Connection closed from {addr}");
                                break;
                            }

                            Some(Ok(Message::Ping(data))) => {
                                ws_sender.send(Message::Pong(data)).await?;
                            }

                            Some(Err(e)) => {
                                log::error!("WebSocket error from {addr}: {e}");
                                break;
                            }

                            _ => {}
                        }
                    }

                    // Outgoing document events
                    event = async {
                        if let Some(ref mut rx) = conn.events {
                            rx.recv().await
                        } else {
                            // Not joined yet, wait forever
                            std::future::pending().await
                        }
                    } => {
                        match event {
                            Some(event) => {
                                send_message(&mut ws_sender, &ServerMessage::Event((*event).clone())).await?;
                            }
                            None => {
                                // Channel closed under us: the document was deleted.
                                if let Some(handle) = conn.clear() {
                                    log::info!("Session {} closed by server", handle.session_id);
                                }
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        // Reap the session whether the transport closed cleanly or not.
        if let Some(handle) = conn.clear() {
            if let Err(e) = service.leave(&handle).await {
                log::warn!("Reaping session {} failed: {e}", handle.session_id);
            }
        }
        stats.write().await.active_connections -= 1;
        result
    }

    /// Apply one client message to the connection, returning the replies.
    async fn dispatch(
        service: &CollabService,
        conn: &mut Connection,
        msg: ClientMessage,
    ) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Join { document_id, user_id, username } => {
                // Document switch: the old session ends before the new one starts.
                if let Some(previous) = conn.clear() {
                    if let Err(e) = service.leave(&previous).await {
                        log::warn!("Leaving {} on switch failed: {e}", previous.document_id);
                    }
                }
                let (tx, rx) = mpsc::channel(conn.queue_capacity);
                match service.join(document_id, user_id, &username, tx).await {
                    Ok(outcome) => {
                        let joined = ServerMessage::Joined {
                            session_id: outcome.handle.session_id,
                            document_id,
                            permission: outcome.permission,
                            title: outcome.title,
                            content: outcome.content,
                            participants: outcome.participants,
                        };
                        conn.session = Some(outcome.handle);
                        conn.events = Some(rx);
                        vec![joined]
                    }
                    Err(e) => vec![rejected(&e)],
                }
            }

            ClientMessage::Leave { document_id, .. } => {
                let joined_here = conn
                    .session
                    .as_ref()
                    .is_some_and(|s| s.document_id == document_id);
                if !joined_here {
                    log::debug!("Ignoring leave for {document_id}: not joined");
                    return Vec::new();
                }
                if let Some(handle) = conn.clear() {
                    if let Err(e) = service.leave(&handle).await {
                        return vec![rejected(&e)];
                    }
                }
                Vec::new()
            }

            ClientMessage::ContentChange { document_id, user_id, content, .. } => {
                let handle = match &conn.session {
                    Some(h) if h.document_id == document_id && h.user_id == user_id => h.clone(),
                    _ => {
                        return vec![rejected(&CollabError::Validation(format!(
                            "no session for {user_id} on {document_id}"
                        )))]
                    }
                };
                match service.submit_change(&handle, content).await {
                    Ok(_) => Vec::new(),
                    Err(e) => vec![rejected(&e)],
                }
            }

            ClientMessage::Request { request_id, user_id, request } => {
                let response = service.handle_request(user_id, request).await;
                vec![ServerMessage::Response { request_id, response }]
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.service.registry().room_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn service(&self) -> &Arc<CollabService> {
        &self.service
    }
}

fn rejected(error: &CollabError) -> ServerMessage {
    ServerMessage::Rejected { error: ErrorBody::from(error) }
}

async fn send_message<S>(sink: &mut S, msg: &ServerMessage) -> Result<(), BoxError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let encoded = msg.encode()?;
    sink.send(Message::Binary(encoded.into())).await?;
    Ok(())
}
