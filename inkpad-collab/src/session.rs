//! Session registry: who is connected to which document.
//!
//! ```text
//! SessionRegistry
//!   └─ rooms: document_id → Arc<Mutex<DocumentRoom>>
//!                              ├─ sessions: session_id → Session
//!                              ├─ live: latest relayed content
//!                              └─ closed (room retired, callers must re-fetch)
//! ```
//!
//! Every read-modify-write of a room happens under that room's mutex, and
//! events for a document are published while the mutex is held. Joins and
//! leaves of different users therefore never lose each other's effect, and a
//! session removed from a room never receives a later delivery.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::CollabError;
use crate::model::{now_millis, Permission};
use crate::protocol::ParticipantInfo;

/// Lifecycle of one session: `Connecting → Joined → Left`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Left,
}

/// One connected client on one document.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub permission: Permission,
    pub connected_at: u64,
    state: SessionState,
}

impl Session {
    pub fn new(document_id: Uuid, user_id: Uuid, username: String, permission: Permission) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            user_id,
            username,
            permission,
            connected_at: now_millis(),
            state: SessionState::Connecting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Advance the state machine. `Left` is terminal.
    pub fn transition(&mut self, next: SessionState) -> Result<(), CollabError> {
        use SessionState::*;
        match (self.state, next) {
            (Connecting, Joined) | (Connecting, Left) | (Joined, Left) => {
                self.state = next;
                Ok(())
            }
            (from, to) => Err(CollabError::Validation(format!(
                "session {} cannot move from {from:?} to {to:?}",
                self.id
            ))),
        }
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            session_id: self.id,
            user_id: self.user_id,
            username: self.username.clone(),
            permission: self.permission,
            connected_at: self.connected_at,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            session_id: self.id,
            document_id: self.document_id,
            user_id: self.user_id,
            username: self.username.clone(),
        }
    }
}

/// Identifies a session to the relay and presence operations.
///
/// Carries no permission: every mutation re-resolves it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
}

/// Latest content relayed on a document and who sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveContent {
    pub content: String,
    pub author_id: Uuid,
}

/// Per-document state guarded by one mutex.
#[derive(Debug, Default)]
pub struct DocumentRoom {
    pub sessions: HashMap<Uuid, Session>,
    pub live: Option<LiveContent>,
    /// Set once the room has been removed from the registry.
    pub closed: bool,
}

impl DocumentRoom {
    /// Participants ordered by connection time.
    pub fn participants(&self) -> Vec<ParticipantInfo> {
        let mut list: Vec<ParticipantInfo> = self.sessions.values().map(Session::info).collect();
        list.sort_by_key(|p| p.connected_at);
        list
    }

    pub fn username_of(&self, user_id: Uuid) -> Option<String> {
        self.sessions
            .values()
            .find(|s| s.user_id == user_id)
            .map(|s| s.username.clone())
    }
}

pub type RoomGuard = OwnedMutexGuard<DocumentRoom>;

/// Process-scoped registry of document rooms.
pub struct SessionRegistry {
    rooms: RwLock<HashMap<Uuid, Arc<Mutex<DocumentRoom>>>>,
    max_sessions_per_document: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions_per_document: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            max_sessions_per_document,
        }
    }

    pub fn max_sessions_per_document(&self) -> usize {
        self.max_sessions_per_document
    }

    async fn get_or_create(&self, document_id: Uuid) -> Arc<Mutex<DocumentRoom>> {
        // Fast path: read lock
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(&document_id) {
                return room.clone();
            }
        }

        let mut rooms = self.rooms.write().await;
        // Double-check after acquiring write lock
        if let Some(room) = rooms.get(&document_id) {
            return room.clone();
        }
        let room = Arc::new(Mutex::new(DocumentRoom::default()));
        rooms.insert(document_id, room.clone());
        room
    }

    /// Lock the live room of a document, creating it if needed.
    pub async fn lock_or_create(&self, document_id: Uuid) -> RoomGuard {
        loop {
            let room = self.get_or_create(document_id).await.lock_owned().await;
            // A retired room was removed after we fetched it; fetch again.
            if !room.closed {
                return room;
            }
        }
    }

    /// Lock the room of a document if one is live.
    pub async fn lock_existing(&self, document_id: Uuid) -> Option<RoomGuard> {
        let room = self.rooms.read().await.get(&document_id).cloned()?;
        let guard = room.lock_owned().await;
        (!guard.closed).then_some(guard)
    }

    /// Mark a locked room closed and drop it from the registry.
    pub async fn retire(&self, document_id: Uuid, room: &mut RoomGuard) {
        room.closed = true;
        self.rooms.write().await.remove(&document_id);
    }

    pub async fn participants(&self, document_id: Uuid) -> Vec<ParticipantInfo> {
        match self.lock_existing(document_id).await {
            Some(room) => room.participants(),
            None => Vec::new(),
        }
    }

    pub async fn session_count(&self, document_id: Uuid) -> usize {
        match self.lock_existing(document_id).await {
            Some(room) => room.sessions.len(),
            None => 0,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Display name of a user connected to `document_id`, if any.
    pub async fn username_of(&self, document_id: Uuid, user_id: Uuid) -> Option<String> {
        self.lock_existing(document_id).await?.username_of(user_id)
    }
}
