//! In-process repository.
//!
//! Every table sits behind one `RwLock`, so multi-record writes such as
//! [`Repository::commit_acceptance`] and cascading deletes are atomic.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use super::{Repository, StoreError};
use crate::error::ResourceKind;
use crate::model::{Contribution, Document, Invitation, Version};

#[derive(Default)]
struct Tables {
    documents: HashMap<Uuid, Document>,
    versions: HashMap<Uuid, Version>,
    /// document_id → version ids in append order
    history: HashMap<Uuid, Vec<Uuid>>,
    invitations: HashMap<Uuid, Invitation>,
    contributions: HashMap<(Uuid, Uuid), Contribution>,
}

/// Repository backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl Repository for MemoryStore {
    fn load_document(&self, id: Uuid) -> Result<Document, StoreError> {
        self.read()?
            .documents
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: ResourceKind::Document, id })
    }

    fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        self.write()?.documents.insert(document.id, document.clone());
        Ok(())
    }

    fn delete_document(&self, id: Uuid) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.documents.remove(&id).is_none() {
            return Err(StoreError::NotFound { kind: ResourceKind::Document, id });
        }
        for version_id in t.history.remove(&id).unwrap_or_default() {
            t.versions.remove(&version_id);
        }
        t.invitations.retain(|_, inv| inv.document_id != id);
        t.contributions.retain(|(doc, _), _| *doc != id);
        Ok(())
    }

    fn list_accessible_documents(&self, user_id: Uuid) -> Result<Vec<Document>, StoreError> {
        let t = self.read()?;
        let mut docs: Vec<Document> = t
            .documents
            .values()
            .filter(|d| d.owner_id == user_id || d.collaborator(user_id).is_some())
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(docs)
    }

    fn load_version(&self, id: Uuid) -> Result<Version, StoreError> {
        self.read()?
            .versions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: ResourceKind::Version, id })
    }

    fn append_version(&self, version: &Version) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if t.versions.contains_key(&version.id) {
            return Err(StoreError::Database(format!(
                "version {} already exists",
                version.id
            )));
        }
        t.history.entry(version.document_id).or_default().push(version.id);
        t.versions.insert(version.id, version.clone());
        Ok(())
    }

    fn list_versions(&self, document_id: Uuid) -> Result<Vec<Version>, StoreError> {
        let t = self.read()?;
        Ok(t.history
            .get(&document_id)
            .map(|ids| ids.iter().filter_map(|id| t.versions.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    fn load_invitation(&self, id: Uuid) -> Result<Invitation, StoreError> {
        self.read()?
            .invitations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: ResourceKind::Invitation, id })
    }

    fn save_invitation(&self, invitation: &Invitation) -> Result<(), StoreError> {
        self.write()?.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    fn list_invitations_for_document(
        &self,
        document_id: Uuid,
    ) -> Result<Vec<Invitation>, StoreError> {
        let mut found: Vec<Invitation> = self
            .read()?
            .invitations
            .values()
            .filter(|inv| inv.document_id == document_id)
            .cloned()
            .collect();
        found.sort_by_key(|inv| inv.invited_at);
        Ok(found)
    }

    fn list_invitations_for_email(&self, email: &str) -> Result<Vec<Invitation>, StoreError> {
        let mut found: Vec<Invitation> = self
            .read()?
            .invitations
            .values()
            .filter(|inv| inv.invited_email.eq_ignore_ascii_case(email))
            .cloned()
            .collect();
        found.sort_by_key(|inv| inv.invited_at);
        Ok(found)
    }

    fn commit_acceptance(
        &self,
        invitation: &Invitation,
        document: &Document,
    ) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if !t.documents.contains_key(&document.id) {
            return Err(StoreError::NotFound { kind: ResourceKind::Document, id: document.id });
        }
        t.invitations.insert(invitation.id, invitation.clone());
        t.documents.insert(document.id, document.clone());
        Ok(())
    }

    fn commit_revert(&self, document: &Document, version: &Version) -> Result<(), StoreError> {
        let mut t = self.write()?;
        if !t.documents.contains_key(&document.id) {
            return Err(StoreError::NotFound { kind: ResourceKind::Document, id: document.id });
        }
        if t.versions.contains_key(&version.id) {
            return Err(StoreError::Database(format!(
                "version {} already exists",
                version.id
            )));
        }
        t.history.entry(version.document_id).or_default().push(version.id);
        t.versions.insert(version.id, version.clone());
        t.documents.insert(document.id, document.clone());
        Ok(())
    }

    fn load_contribution(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Contribution>, StoreError> {
        Ok(self.read()?.contributions.get(&(document_id, user_id)).cloned())
    }

    fn save_contribution(&self, contribution: &Contribution) -> Result<(), StoreError> {
        self.write()?
            .contributions
            .insert((contribution.document_id, contribution.user_id), contribution.clone());
        Ok(())
    }

    fn list_contributions(&self, document_id: Uuid) -> Result<Vec<Contribution>, StoreError> {
        Ok(self
            .read()?
            .contributions
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect())
    }
}
