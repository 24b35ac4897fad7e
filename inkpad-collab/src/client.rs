//! WebSocket sync client for connecting to the collaboration server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Join/leave and whole-content change submission
//! - Request/response calls correlated by request id
//! - Echo suppression of the client's own content changes
//! - An [`EditSink`] so a [`PersistenceScheduler`](crate::scheduler::PersistenceScheduler)
//!   can drive broadcasts and autosaves

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::CollabError;
use crate::model::{now_millis, Permission};
use crate::protocol::{
    ApiResponse, ChangeEvent, ClientMessage, ParticipantInfo, ProtocolError, Request,
    ServerMessage,
};
use crate::scheduler::EditSink;

/// Default time to wait for a response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Joined a document
    Joined {
        session_id: Uuid,
        document_id: Uuid,
        permission: Permission,
        title: String,
        content: String,
        participants: Vec<ParticipantInfo>,
    },
    /// Relayed document event, own echoes removed
    Remote(ChangeEvent),
    /// The server refused a join, leave or content change
    Rejected(CollabError),
}

type PendingRequests = Arc<Mutex<HashMap<u64, oneshot::Sender<ApiResponse>>>>;

/// Whether a relayed event should reach the local editor.
///
/// The editor already shows what this user typed, so its own content changes
/// are dropped. Reverts are kept: the local editor does not reflect them yet.
pub fn should_apply(event: &ChangeEvent, own_user_id: Uuid) -> bool {
    match event {
        ChangeEvent::ContentChange { user_id, reverted_from, .. } => {
            *user_id != own_user_id || reverted_from.is_some()
        }
        _ => true,
    }
}

/// The sync client.
pub struct SyncClient {
    user_id: Uuid,
    username: String,
    server_url: String,
    request_timeout: Duration,

    state: Arc<RwLock<ConnectionState>>,
    /// Document joined on the server, set once `Joined` arrives
    document_id: Arc<RwLock<Option<Uuid>>>,

    /// Channel to send messages to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Vec<u8>>>,

    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,

    pending: PendingRequests,
    next_request_id: AtomicU64,
}

impl SyncClient {
    pub fn new(user_id: Uuid, username: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            user_id,
            username: username.into(),
            server_url: server_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            document_id: Arc::new(RwLock::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn document_id(&self) -> Option<Uuid> {
        *self.document_id.read().await
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!("Connecting to {} failed: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer.send(Message::Binary(data.into())).await.is_err() {
                    return;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: process incoming WebSocket messages
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let document_id = self.document_id.clone();
        let pending = self.pending.clone();
        let own_id = self.user_id;
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let data = match msg {
                    Ok(Message::Binary(data)) => data,
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => continue,
                };
                let server_msg = match ServerMessage::decode(&data) {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("Dropping undecodable server message: {e}");
                        continue;
                    }
                };

                let event = match server_msg {
                    ServerMessage::Response { request_id, response } => {
                        match pending.lock().await.remove(&request_id) {
                            Some(waiter) => {
                                let _ = waiter.send(response);
                            }
                            None => log::debug!("Response for unknown request {request_id}"),
                        }
                        None
                    }
                    ServerMessage::Joined {
                        session_id,
                        document_id: joined,
                        permission,
                        title,
                        content,
                        participants,
                    } => {
                        *document_id.write().await = Some(joined);
                        Some(SyncEvent::Joined {
                            session_id,
                            document_id: joined,
                            permission,
                            title,
                            content,
                            participants,
                        })
                    }
                    ServerMessage::Event(event) => {
                        if let ChangeEvent::UserLeft { user_id, document_id: left, .. } = &event {
                            // Evicted by the server (document deleted).
                            let mut current = document_id.write().await;
                            if *user_id == own_id && *current == Some(*left) {
                                *current = None;
                            }
                        }
                        should_apply(&event, own_id).then_some(SyncEvent::Remote(event))
                    }
                    ServerMessage::Rejected { error } => Some(SyncEvent::Rejected(error.into())),
                };

                if let Some(evt) = event {
                    let _ = event_tx.send(evt).await;
                }
            }

            // Connection lost: waiting requests fail with ConnectionClosed.
            pending.lock().await.clear();
            *document_id.write().await = None;
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Close the connection.
    pub async fn disconnect(&mut self) {
        self.outgoing_tx = None;
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn send(&self, msg: &ClientMessage) -> Result<(), ProtocolError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(msg.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Ask to join `document_id`. The outcome arrives as
    /// [`SyncEvent::Joined`] or [`SyncEvent::Rejected`].
    pub async fn join(&self, document_id: Uuid) -> Result<(), ProtocolError> {
        self.send(&ClientMessage::Join {
            document_id,
            user_id: self.user_id,
            username: self.username.clone(),
        })
        .await
    }

    pub async fn leave(&self) -> Result<(), ProtocolError> {
        let document_id = self.document_id.write().await.take().ok_or(ProtocolError::NotJoined)?;
        self.send(&ClientMessage::Leave {
            document_id,
            user_id: self.user_id,
            username: self.username.clone(),
        })
        .await
    }

    /// Submit the full document content for relay.
    pub async fn send_content(&self, content: String) -> Result<(), ProtocolError> {
        let document_id = self.document_id().await.ok_or(ProtocolError::NotJoined)?;
        self.send(&ClientMessage::ContentChange {
            document_id,
            user_id: self.user_id,
            username: self.username.clone(),
            content,
            timestamp: now_millis(),
        })
        .await
    }

    /// Send a request and wait for its response.
    pub async fn request(&self, request: Request) -> Result<ApiResponse, ProtocolError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id, tx);

        let msg = ClientMessage::Request { request_id, user_id: self.user_id, request };
        if let Err(e) = self.send(&msg).await {
            self.pending.lock().await.remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(ProtocolError::Timeout)
            }
        }
    }
}

/// Routes debounced editor output through a connected [`SyncClient`].
pub struct ClientEditSink {
    client: Arc<SyncClient>,
}

impl ClientEditSink {
    pub fn new(client: Arc<SyncClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EditSink for ClientEditSink {
    async fn broadcast(&self, content: String) -> Result<(), CollabError> {
        Ok(self.client.send_content(content).await?)
    }

    async fn persist(&self, content: String) -> Result<(), CollabError> {
        let document_id = self
            .client
            .document_id()
            .await
            .ok_or(ProtocolError::NotJoined)?;
        self.client
            .request(Request::SaveDocument { document_id, content })
            .await?
            .into_result()
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(user_id: Uuid, reverted_from: Option<Uuid>) -> ChangeEvent {
        ChangeEvent::ContentChange {
            document_id: Uuid::new_v4(),
            user_id,
            username: "u".into(),
            content: "c".into(),
            timestamp: 0,
            reverted_from,
        }
    }

    #[test]
    fn test_own_echo_dropped() {
        let me = Uuid::new_v4();
        assert!(!should_apply(&change(me, None), me));
        assert!(should_apply(&change(Uuid::new_v4(), None), me));
    }

    #[test]
    fn test_own_revert_applied() {
        let me = Uuid::new_v4();
        assert!(should_apply(&change(me, Some(Uuid::new_v4())), me));
    }

    #[test]
    fn test_presence_events_always_applied() {
        let me = Uuid::new_v4();
        let ev = ChangeEvent::UserJoined {
            document_id: Uuid::new_v4(),
            user_id: me,
            username: "me".into(),
            permission: Permission::Edit,
        };
        assert!(should_apply(&ev, me));
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let mut client = SyncClient::new(Uuid::new_v4(), "Alice", "ws://127.0.0.1:1");
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        assert!(client.document_id().await.is_none());
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = SyncClient::new(Uuid::new_v4(), "Alice", "ws://127.0.0.1:1");
        assert_eq!(client.join(Uuid::new_v4()).await, Err(ProtocolError::ConnectionClosed));
        assert_eq!(client.send_content("x".into()).await, Err(ProtocolError::NotJoined));
        assert_eq!(
            client.request(Request::ListDocuments).await,
            Err(ProtocolError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Port 1 is reserved and not listening.
        let mut client = SyncClient::new(Uuid::new_v4(), "Alice", "ws://127.0.0.1:1");
        assert!(client.connect().await.is_err());
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }
}
