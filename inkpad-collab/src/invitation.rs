//! Invitation gate: share requests become collaborator rights only after the
//! recipient accepts.
//!
//! ```text
//!            invite            accept (email matches, not expired)
//!   (none) ─────────► pending ─────────────────────────────► accepted
//!                        │ decline ──► declined
//!                        │ cancel (inviter) ──► cancelled
//!                        └ ttl elapsed ──► expired
//! ```
//!
//! At most one pending invitation exists per (document, email).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::CollabError;
use crate::model::{now_millis, Collaborator, Invitation, InvitationStatus, Permission};
use crate::permission;
use crate::storage::{DocumentLocks, Repository};

/// Invitations expire after 7 days by default.
pub const DEFAULT_INVITATION_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvitationConfig {
    pub ttl: Duration,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_INVITATION_TTL }
    }
}

/// The identity accepting or declining an invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitee {
    pub user_id: Uuid,
    pub email: String,
}

/// Trim and lowercase; reject anything that is not `local@domain.tld`.
pub fn normalize_email(raw: &str) -> Result<String, CollabError> {
    let email = raw.trim().to_ascii_lowercase();
    let invalid = || CollabError::Validation(format!("invalid email address '{}'", raw.trim()));
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    let domain_ok = domain
        .split('.')
        .all(|label| !label.is_empty())
        && domain.contains('.');
    if local.is_empty() || domain.contains('@') || !domain_ok || email.contains(char::is_whitespace) {
        return Err(invalid());
    }
    Ok(email)
}

pub struct InvitationGate {
    store: Arc<dyn Repository>,
    locks: Arc<DocumentLocks>,
    config: InvitationConfig,
    /// Serializes read-check-write sequences on invitations.
    lock: Mutex<()>,
}

impl InvitationGate {
    pub fn new(
        store: Arc<dyn Repository>,
        locks: Arc<DocumentLocks>,
        config: InvitationConfig,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            lock: Mutex::new(()),
        }
    }

    /// Create a pending invitation. The document is not touched.
    pub async fn invite(
        &self,
        document_id: Uuid,
        inviter_id: Uuid,
        email: &str,
        permission: Permission,
    ) -> Result<Invitation, CollabError> {
        let _guard = self.lock.lock().await;
        let document = self.store.load_document(document_id)?;
        let access = permission::resolve(&document, inviter_id)?;
        if !access.can_share {
            return Err(CollabError::PermissionDenied(
                "sharing requires edit permission".into(),
            ));
        }
        let email = normalize_email(email)?;

        if document.has_collaborator_email(&email) {
            return Err(CollabError::Validation(format!(
                "{email} already collaborates on this document"
            )));
        }

        let now = now_millis();
        for mut existing in self.store.list_invitations_for_document(document_id)? {
            if existing.invited_email != email || existing.status != InvitationStatus::Pending {
                continue;
            }
            if existing.is_expired_at(now) {
                existing.settle(InvitationStatus::Expired)?;
                self.store.save_invitation(&existing)?;
                continue;
            }
            return Err(CollabError::Validation(format!(
                "{email} already has a pending invitation to this document"
            )));
        }

        let invitation = Invitation {
            id: Uuid::new_v4(),
            document_id,
            document_title: document.title.clone(),
            invited_email: email,
            invited_by: inviter_id,
            permission,
            status: InvitationStatus::Pending,
            invited_at: now,
            responded_at: None,
            expires_at: now.saturating_add(self.config.ttl.as_millis() as u64),
        };
        self.store.save_invitation(&invitation)?;
        log::info!(
            "Invited {} to {document_id} with {permission} permission",
            invitation.invited_email
        );
        Ok(invitation)
    }

    fn pending_for_invitee(
        &self,
        invitation_id: Uuid,
        invitee: &Invitee,
    ) -> Result<Invitation, CollabError> {
        let invitation = self.store.load_invitation(invitation_id)?;
        if !invitation.invited_email.eq_ignore_ascii_case(invitee.email.trim()) {
            return Err(CollabError::PermissionDenied(
                "invitation was sent to a different address".into(),
            ));
        }
        if invitation.status != InvitationStatus::Pending {
            return Err(CollabError::Validation(format!(
                "invitation {invitation_id} is already {}",
                invitation.status
            )));
        }
        Ok(invitation)
    }

    /// Accept and add the collaborator in one storage write.
    pub async fn accept(
        &self,
        invitation_id: Uuid,
        invitee: &Invitee,
    ) -> Result<Invitation, CollabError> {
        let _guard = self.lock.lock().await;
        let mut invitation = self.pending_for_invitee(invitation_id, invitee)?;

        if invitation.is_expired_at(now_millis()) {
            invitation.settle(InvitationStatus::Expired)?;
            self.store.save_invitation(&invitation)?;
            return Err(CollabError::Validation(format!(
                "invitation {invitation_id} has expired"
            )));
        }

        let _doc = self.locks.lock(invitation.document_id).await;
        let mut document = self.store.load_document(invitation.document_id)?;
        let is_member = document.owner_id == invitee.user_id
            || document.collaborator(invitee.user_id).is_some();
        if !is_member {
            document.collaborators.push(
                Collaborator::new(invitee.user_id, invitation.permission)
                    .with_email(invitation.invited_email.clone()),
            );
        }
        invitation.settle(InvitationStatus::Accepted)?;
        self.store.commit_acceptance(&invitation, &document)?;

        log::info!(
            "{} accepted invitation to {} ({})",
            invitation.invited_email,
            invitation.document_id,
            invitation.permission
        );
        Ok(invitation)
    }

    pub async fn decline(
        &self,
        invitation_id: Uuid,
        invitee: &Invitee,
    ) -> Result<Invitation, CollabError> {
        let _guard = self.lock.lock().await;
        let mut invitation = self.pending_for_invitee(invitation_id, invitee)?;
        invitation.settle(InvitationStatus::Declined)?;
        self.store.save_invitation(&invitation)?;
        log::info!("{} declined invitation {invitation_id}", invitation.invited_email);
        Ok(invitation)
    }

    /// Withdraw a pending invitation. Only the inviter may cancel.
    pub async fn cancel(
        &self,
        invitation_id: Uuid,
        inviter_id: Uuid,
    ) -> Result<Invitation, CollabError> {
        let _guard = self.lock.lock().await;
        let mut invitation = self.store.load_invitation(invitation_id)?;
        if invitation.invited_by != inviter_id {
            return Err(CollabError::PermissionDenied(
                "only the inviter may cancel an invitation".into(),
            ));
        }
        invitation.settle(InvitationStatus::Cancelled)?;
        self.store.save_invitation(&invitation)?;
        log::info!("Cancelled invitation {invitation_id}");
        Ok(invitation)
    }

    /// Open, unexpired invitations addressed to `email`.
    pub fn pending_for(&self, email: &str) -> Result<Vec<Invitation>, CollabError> {
        let email = normalize_email(email)?;
        let now = now_millis();
        Ok(self
            .store
            .list_invitations_for_email(&email)?
            .into_iter()
            .filter(|inv| inv.status == InvitationStatus::Pending && !inv.is_expired_at(now))
            .collect())
    }

    pub fn pending_count(&self, email: &str) -> Result<usize, CollabError> {
        Ok(self.pending_for(email)?.len())
    }
}
