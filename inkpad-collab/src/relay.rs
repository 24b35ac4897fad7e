//! Change relay: fan content changes out to the other sessions of a document.
//!
//! Concurrent edits resolve last-writer-wins on whole-document content. The
//! relay never merges; it forwards the latest content and remembers it as the
//! room's live content.

use std::sync::Arc;
use uuid::Uuid;

use crate::channel::{Channel, PublishReport};
use crate::error::{CollabError, ResourceKind};
use crate::model::now_millis;
use crate::permission;
use crate::protocol::ChangeEvent;
use crate::session::{LiveContent, SessionHandle, SessionRegistry};
use crate::storage::Repository;

pub struct ChangeRelay {
    store: Arc<dyn Repository>,
    registry: Arc<SessionRegistry>,
    channel: Arc<dyn Channel>,
}

impl ChangeRelay {
    pub fn new(
        store: Arc<dyn Repository>,
        registry: Arc<SessionRegistry>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self { store, registry, channel }
    }

    /// Relay `content` from `handle` to every other session on its document.
    ///
    /// The sender's permission is resolved again from storage on every call;
    /// a view-only sender gets `PermissionDenied` and nothing is relayed.
    pub async fn submit_change(
        &self,
        handle: &SessionHandle,
        content: String,
    ) -> Result<PublishReport, CollabError> {
        let document_id = handle.document_id;
        let document = self.store.load_document(document_id)?;
        permission::resolve(&document, handle.user_id)?.require_edit("content change")?;

        let missing = || CollabError::not_found(ResourceKind::Session, handle.session_id);
        let mut room = self.registry.lock_existing(document_id).await.ok_or_else(missing)?;
        if !room.sessions.contains_key(&handle.session_id) {
            return Err(missing());
        }

        room.live = Some(LiveContent {
            content: content.clone(),
            author_id: handle.user_id,
        });
        let event = ChangeEvent::ContentChange {
            document_id,
            user_id: handle.user_id,
            username: handle.username.clone(),
            content,
            timestamp: now_millis(),
            reverted_from: None,
        };
        // Published under the room lock: per-document FIFO.
        let report = self
            .channel
            .publish(document_id, Arc::new(event), Some(handle.session_id))
            .await;
        log::debug!(
            "Relayed change from {} on {document_id} to {} sessions",
            handle.username,
            report.delivered
        );
        Ok(report)
    }

    /// Push reverted content to every session on the document, the reverting
    /// user's own sessions included.
    pub async fn broadcast_revert(
        &self,
        document_id: Uuid,
        actor_id: Uuid,
        username: String,
        content: String,
        version_id: Uuid,
    ) -> PublishReport {
        let Some(mut room) = self.registry.lock_existing(document_id).await else {
            return PublishReport::default();
        };
        room.live = Some(LiveContent {
            content: content.clone(),
            author_id: actor_id,
        });
        let event = ChangeEvent::ContentChange {
            document_id,
            user_id: actor_id,
            username,
            content,
            timestamp: now_millis(),
            reverted_from: Some(version_id),
        };
        let report = self.channel.publish(document_id, Arc::new(event), None).await;
        log::info!(
            "Broadcast revert of {document_id} to version {version_id} to {} sessions",
            report.delivered
        );
        report
    }
}
