//! Service facade owning every engine component for one process.
//!
//! ```text
//! CollabService
//!   ├─ Repository          (MemoryStore | RocksStore)
//!   ├─ SessionRegistry ◄───┬─ PresenceBroadcaster
//!   ├─ Channel         ◄───┼─ ChangeRelay
//!   │                      └─ VersionEngine (reverts go through the relay)
//!   └─ InvitationGate
//! ```
//!
//! Lifetime of all live state is tied to the service value: dropping it drops
//! every room and subscription.
//!
//! Components that rewrite a stored document share one [`DocumentLocks`].

use std::sync::Arc;
use uuid::Uuid;

use crate::channel::{BroadcastHub, Channel, EventSink, PublishReport};
use crate::error::CollabError;
use crate::invitation::{InvitationConfig, InvitationGate, Invitee};
use crate::model::{Contribution, Document, Invitation, Permission, Version};
use crate::permission::{self, Access};
use crate::presence::{JoinOutcome, PresenceBroadcaster};
use crate::protocol::{ApiResponse, ParticipantInfo, Request, ResponsePayload};
use crate::relay::ChangeRelay;
use crate::session::{SessionHandle, SessionRegistry};
use crate::storage::{DocumentLocks, MemoryStore, Repository};
use crate::version::VersionEngine;

/// Service-level settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub max_sessions_per_document: usize,
    pub invitation: InvitationConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_document: 100,
            invitation: InvitationConfig::default(),
        }
    }
}

pub struct CollabService {
    store: Arc<dyn Repository>,
    locks: Arc<DocumentLocks>,
    registry: Arc<SessionRegistry>,
    presence: PresenceBroadcaster,
    relay: Arc<ChangeRelay>,
    versions: VersionEngine,
    invitations: InvitationGate,
}

impl CollabService {
    pub fn new(store: Arc<dyn Repository>, config: ServiceConfig) -> Self {
        Self::with_channel(store, Arc::new(BroadcastHub::new()), config)
    }

    /// Build on a caller-supplied channel implementation.
    pub fn with_channel(
        store: Arc<dyn Repository>,
        channel: Arc<dyn Channel>,
        config: ServiceConfig,
    ) -> Self {
        let locks = Arc::new(DocumentLocks::new());
        let registry = Arc::new(SessionRegistry::new(config.max_sessions_per_document));
        let presence = PresenceBroadcaster::new(
            store.clone(),
            locks.clone(),
            registry.clone(),
            channel.clone(),
        );
        let relay = Arc::new(ChangeRelay::new(store.clone(), registry.clone(), channel));
        let versions =
            VersionEngine::new(store.clone(), locks.clone(), registry.clone(), relay.clone());
        let invitations = InvitationGate::new(store.clone(), locks.clone(), config.invitation);
        Self {
            store,
            locks,
            registry,
            presence,
            relay,
            versions,
            invitations,
        }
    }

    /// In-memory service with default settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), ServiceConfig::default())
    }

    pub fn store(&self) -> &Arc<dyn Repository> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn access(&self, document_id: Uuid, user_id: Uuid) -> Result<(Document, Access), CollabError> {
        let document = self.store.load_document(document_id)?;
        let access = permission::resolve(&document, user_id)?;
        Ok((document, access))
    }

    // ───────────────────────────────────────────────────────────────
    // Documents
    // ───────────────────────────────────────────────────────────────

    pub fn create_document(
        &self,
        owner_id: Uuid,
        title: &str,
        content: &str,
    ) -> Result<Document, CollabError> {
        let title = validate_title(title)?;
        let document = Document::new(owner_id, title, content);
        self.store.save_document(&document)?;
        log::info!("Created document {} '{}' for {owner_id}", document.id, document.title);
        Ok(document)
    }

    pub fn get_document(&self, document_id: Uuid, user_id: Uuid) -> Result<Document, CollabError> {
        Ok(self.access(document_id, user_id)?.0)
    }

    /// Documents the user owns or collaborates on, most recently updated first.
    pub fn list_documents(&self, user_id: Uuid) -> Result<Vec<Document>, CollabError> {
        Ok(self.store.list_accessible_documents(user_id)?)
    }

    pub async fn rename_document(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        title: &str,
    ) -> Result<Document, CollabError> {
        let title = validate_title(title)?;
        let _doc = self.locks.lock(document_id).await;
        let (mut document, access) = self.access(document_id, user_id)?;
        access.require_edit("renaming")?;
        document.title = title;
        document.updated_at = crate::model::now_millis();
        document.last_modified_by = user_id;
        self.store.save_document(&document)?;
        Ok(document)
    }

    /// Durable save of the live content. Target of manual save and autosave.
    pub async fn save_document(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        content: String,
    ) -> Result<Document, CollabError> {
        let _doc = self.locks.lock(document_id).await;
        let (mut document, access) = self.access(document_id, user_id)?;
        access.require_edit("saving")?;
        document.apply_content(content, user_id);
        self.store.save_document(&document)?;
        log::debug!("Saved document {document_id} for {user_id}");
        Ok(document)
    }

    /// Owner-only. Storage goes first so no new session can join the
    /// document once eviction starts, and no queued save can bring it back.
    pub async fn delete_document(&self, document_id: Uuid, user_id: Uuid) -> Result<(), CollabError> {
        {
            let _doc = self.locks.lock(document_id).await;
            let (_, access) = self.access(document_id, user_id)?;
            access.require_owner("delete the document")?;
            self.store.delete_document(document_id)?;
        }
        self.locks.forget(document_id).await;
        let evicted = self.presence.evict_all(document_id).await;
        log::info!("Deleted document {document_id}, evicted {evicted} sessions");
        Ok(())
    }

    // ───────────────────────────────────────────────────────────────
    // Sessions
    // ───────────────────────────────────────────────────────────────

    pub async fn join(
        &self,
        document_id: Uuid,
        user_id: Uuid,
        username: &str,
        sink: EventSink,
    ) -> Result<JoinOutcome, CollabError> {
        self.presence.join(document_id, user_id, username, sink).await
    }

    pub async fn leave(&self, handle: &SessionHandle) -> Result<bool, CollabError> {
        self.presence.leave(handle).await
    }

    pub async fn submit_change(
        &self,
        handle: &SessionHandle,
        content: String,
    ) -> Result<PublishReport, CollabError> {
        self.relay.submit_change(handle, content).await
    }

    pub async fn participants(&self, document_id: Uuid) -> Vec<ParticipantInfo> {
        self.registry.participants(document_id).await
    }

    // ───────────────────────────────────────────────────────────────
    // Versions
    // ───────────────────────────────────────────────────────────────

    pub async fn create_version(
        &self,
        document_id: Uuid,
        content: String,
        author_id: Uuid,
        description: String,
    ) -> Result<Version, CollabError> {
        self.versions
            .create_version(document_id, content, author_id, description)
            .await
    }

    pub fn list_history(&self, document_id: Uuid, user_id: Uuid) -> Result<Vec<Version>, CollabError> {
        self.versions.list_history(document_id, user_id)
    }

    pub fn get_version(
        &self,
        document_id: Uuid,
        version_id: Uuid,
        user_id: Uuid,
    ) -> Result<Version, CollabError> {
        self.versions.get_version(document_id, version_id, user_id)
    }

    pub async fn revert(
        &self,
        document_id: Uuid,
        version_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Version, CollabError> {
        self.versions.revert(document_id, version_id, actor_id).await
    }

    pub fn contributions(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Contribution>, CollabError> {
        self.versions.contributions(document_id, user_id)
    }

    // ───────────────────────────────────────────────────────────────
    // Invitations
    // ───────────────────────────────────────────────────────────────

    pub async fn invite(
        &self,
        document_id: Uuid,
        inviter_id: Uuid,
        email: &str,
        permission: Permission,
    ) -> Result<Invitation, CollabError> {
        self.invitations.invite(document_id, inviter_id, email, permission).await
    }

    pub async fn accept_invitation(
        &self,
        invitation_id: Uuid,
        invitee: &Invitee,
    ) -> Result<Invitation, CollabError> {
        self.invitations.accept(invitation_id, invitee).await
    }

    pub async fn decline_invitation(
        &self,
        invitation_id: Uuid,
        invitee: &Invitee,
    ) -> Result<Invitation, CollabError> {
        self.invitations.decline(invitation_id, invitee).await
    }

    pub async fn cancel_invitation(
        &self,
        invitation_id: Uuid,
        inviter_id: Uuid,
    ) -> Result<Invitation, CollabError> {
        self.invitations.cancel(invitation_id, inviter_id).await
    }

    pub fn pending_invitations(&self, email: &str) -> Result<Vec<Invitation>, CollabError> {
        self.invitations.pending_for(email)
    }

    pub fn pending_invitation_count(&self, email: &str) -> Result<usize, CollabError> {
        self.invitations.pending_count(email)
    }

    // ───────────────────────────────────────────────────────────────
    // Request/response surface
    // ───────────────────────────────────────────────────────────────

    /// Execute one request on behalf of `user_id`.
    pub async fn handle_request(&self, user_id: Uuid, request: Request) -> ApiResponse {
        let result = self.dispatch(user_id, request).await;
        if let Err(e) = &result {
            log::debug!("Request from {user_id} failed: {e}");
        }
        ApiResponse::from_result(result)
    }

    async fn dispatch(&self, user_id: Uuid, request: Request) -> Result<ResponsePayload, CollabError> {
        use ResponsePayload as P;
        let invitee = |email: String| Invitee { user_id, email };
        match request {
            Request::CreateDocument { title, content } => {
                self.create_document(user_id, &title, &content).map(P::Document)
            }
            Request::GetDocument { document_id } => {
                self.get_document(document_id, user_id).map(P::Document)
            }
            Request::ListDocuments => self.list_documents(user_id).map(P::Documents),
            Request::RenameDocument { document_id, title } => {
                self.rename_document(document_id, user_id, &title).await.map(P::Document)
            }
            Request::SaveDocument { document_id, content } => {
                self.save_document(document_id, user_id, content).await.map(P::Document)
            }
            Request::DeleteDocument { document_id } => {
                self.delete_document(document_id, user_id).await.map(|_| P::Empty)
            }
            Request::CreateVersion { document_id, content, description } => self
                .create_version(document_id, content, user_id, description)
                .await
                .map(P::Version),
            Request::ListHistory { document_id } => {
                self.list_history(document_id, user_id).map(P::History)
            }
            Request::GetVersion { document_id, version_id } => {
                self.get_version(document_id, version_id, user_id).map(P::Version)
            }
            Request::RevertToVersion { document_id, version_id } => {
                self.revert(document_id, version_id, user_id).await.map(P::Version)
            }
            Request::ListContributions { document_id } => {
                self.contributions(document_id, user_id).map(P::Contributions)
            }
            Request::Invite { document_id, email, permission } => self
                .invite(document_id, user_id, &email, permission)
                .await
                .map(P::Invitation),
            Request::AcceptInvitation { invitation_id, email } => self
                .accept_invitation(invitation_id, &invitee(email))
                .await
                .map(P::Invitation),
            Request::DeclineInvitation { invitation_id, email } => self
                .decline_invitation(invitation_id, &invitee(email))
                .await
                .map(P::Invitation),
            Request::CancelInvitation { invitation_id } => self
                .cancel_invitation(invitation_id, user_id)
                .await
                .map(P::Invitation),
            Request::PendingInvitations { email } => {
                self.pending_invitations(&email).map(P::Invitations)
            }
        }
    }
}

fn validate_title(title: &str) -> Result<String, CollabError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CollabError::Validation("title must not be empty".into()));
    }
    Ok(title.to_string())
}
