//! Presence broadcaster: join and leave a document channel.
//!
//! ```text
//! join(doc, user)                         leave(handle) / transport drop
//!   │ lock room                             │ lock room
//!   │ load document, resolve permission     │ remove session → Left
//!   │ subscribe sink, session → Joined      │ unsubscribe
//!   │ publish user-joined (others only)     │ publish user-left
//!   ▼                                       │ last one out: flush live content,
//! JoinOutcome { content, participants }     ▼ retire room
//! ```

use std::sync::Arc;
use uuid::Uuid;

use crate::channel::{Channel, EventSink};
use crate::error::CollabError;
use crate::model::Permission;
use crate::permission;
use crate::protocol::{ChangeEvent, ParticipantInfo};
use crate::session::{LiveContent, Session, SessionHandle, SessionRegistry, SessionState};
use crate::storage::{DocumentLocks, Repository};

/// What a joining session starts from.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub handle: SessionHandle,
    pub permission: Permission,
    pub title: String,
    /// Latest relayed content, falling back to the stored content.
    pub content: String,
    /// Everyone connected after the join, the joiner included.
    pub participants: Vec<ParticipantInfo>,
}

pub struct PresenceBroadcaster {
    store: Arc<dyn Repository>,
    locks: Arc<DocumentLocks>,
    registry: Arc<SessionRegistry>,
    channel: Arc<dyn Channel>,
}

impl PresenceBroadcaster {
    pub fn new(
        store: Arc<dyn Repository>,
        locks: Arc<DocumentLocks>,
        registry: Arc<SessionRegistry>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self { store, locks, registry, channel }
    }

    /// Register a session for `user_id` on `document_id`.
    ///
    /// Events for the document are delivered to `sink` from the moment this
    /// returns. The joiner is not told about itself.
    pub async fn join(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        username: &str,
        sink: EventSink,
    ) -> Result<JoinOutcome, CollabError> {
        let mut room = self.registry.lock_or_create(document_id).await;

        // Resolved under the room lock so a join right after an accepted
        // invitation sees the new collaborator.
        let resolved = self
            .store
            .load_document(document_id)
            .map_err(CollabError::from)
            .and_then(|doc| permission::resolve(&doc, user_id).map(|access| (doc, access)));
        let (document, access) = match resolved {
            Ok(found) => found,
            Err(e) => {
                if room.sessions.is_empty() {
                    self.registry.retire(document_id, &mut room).await;
                }
                return Err(e);
            }
        };

        if room.sessions.len() >= self.registry.max_sessions_per_document() {
            let count = room.sessions.len();
            if count == 0 {
                self.registry.retire(document_id, &mut room).await;
            }
            return Err(CollabError::Validation(format!(
                "document {document_id} already has {count} sessions"
            )));
        }

        let mut session = Session::new(document_id, user_id, username.to_string(), access.permission);
        let handle = session.handle();
        self.channel.subscribe(document_id, session.id, sink).await;
        session.transition(SessionState::Joined)?;
        room.sessions.insert(session.id, session);

        let event = ChangeEvent::UserJoined {
            document_id,
            user_id,
            username: handle.username.clone(),
            permission: access.permission,
        };
        let report = self
            .channel
            .publish(document_id, Arc::new(event), Some(handle.session_id))
            .await;

        log::info!(
            "{} ({user_id}) joined {document_id} with {} permission, notified {} sessions",
            handle.username,
            access.permission,
            report.delivered
        );

        let content = match &room.live {
            Some(live) => live.content.clone(),
            None => document.content,
        };
        Ok(JoinOutcome {
            handle,
            permission: access.permission,
            title: document.title,
            content,
            participants: room.participants(),
        })
    }

    /// Remove a session, graceful or reaped. Returns `false` if it was
    /// already gone.
    pub async fn leave(&self, handle: &SessionHandle) -> Result<bool, CollabError> {
        let document_id = handle.document_id;
        let Some(mut room) = self.registry.lock_existing(document_id).await else {
            return Ok(false);
        };
        let Some(mut session) = room.sessions.remove(&handle.session_id) else {
            return Ok(false);
        };
        session.transition(SessionState::Left)?;
        self.channel.unsubscribe(document_id, session.id).await;

        let event = ChangeEvent::UserLeft {
            document_id,
            user_id: session.user_id,
            username: session.username.clone(),
        };
        self.channel.publish(document_id, Arc::new(event), None).await;
        log::info!("{} ({}) left {document_id}", session.username, session.user_id);

        if room.sessions.is_empty() {
            if let Some(live) = room.live.take() {
                self.flush_live_content(document_id, live).await;
            }
            self.registry.retire(document_id, &mut room).await;
            log::debug!("Retired room for {document_id}");
        }
        Ok(true)
    }

    /// Drop every session of a document. Each remaining session receives
    /// `user-left` for every evicted session before the channel closes.
    pub async fn evict_all(&self, document_id: Uuid) -> usize {
        let Some(mut room) = self.registry.lock_existing(document_id).await else {
            return 0;
        };
        room.live = None;
        let sessions: Vec<Session> = room.sessions.drain().map(|(_, s)| s).collect();
        for mut session in sessions.iter().cloned() {
            if let Err(e) = session.transition(SessionState::Left) {
                log::warn!("Evicting session {}: {e}", session.id);
            }
            let event = ChangeEvent::UserLeft {
                document_id,
                user_id: session.user_id,
                username: session.username,
            };
            self.channel.publish(document_id, Arc::new(event), None).await;
        }
        self.channel.close(document_id).await;
        self.registry.retire(document_id, &mut room).await;
        log::info!("Evicted {} sessions from {document_id}", sessions.len());
        sessions.len()
    }

    /// Persist what the last participant saw if autosave has not caught up.
    async fn flush_live_content(&self, document_id: Uuid, live: LiveContent) {
        let _doc = self.locks.lock(document_id).await;
        let result = self.store.load_document(document_id).and_then(|mut doc| {
            if doc.content == live.content {
                return Ok(false);
            }
            doc.apply_content(live.content, live.author_id);
            self.store.save_document(&doc).map(|_| true)
        });
        match result {
            Ok(true) => log::debug!("Flushed live content of {document_id}"),
            Ok(false) => {}
            Err(e) => log::warn!("Flushing live content of {document_id} failed: {e}"),
        }
    }
}
