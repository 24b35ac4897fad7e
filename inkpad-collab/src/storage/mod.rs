//! Persistence collaborator for documents, versions, invitations and
//! contributions.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐   Repository    ┌──────────────────────────────────────┐
//! │ CollabService│ ──────────────► │ MemoryStore (tests, ephemeral runs)  │
//! │ VersionEngine│                 │ RocksStore  (column families)        │
//! │ InvitationGate                 │   "documents"     LZ4 + bincode      │
//! └──────────────┘                 │   "versions"      doc_id ‖ seq → rec │
//!                                  │   "version_index" id → doc_id ‖ seq  │
//!                                  │   "invitations"   id → rec           │
//!                                  │   "contributions" doc_id ‖ user_id   │
//!                                  └──────────────────────────────────────┘
//! ```
//!
//! Adapters are synchronous; callers treat every error as surfaced I/O.

pub mod locks;
pub mod memory;
pub mod rocks;

pub use locks::{DocumentGuard, DocumentLocks};
pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use uuid::Uuid;

use crate::error::{CollabError, ResourceKind};
use crate::model::{Contribution, Document, Invitation, Version};

/// Storage errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: ResourceKind, id: Uuid },
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for CollabError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => CollabError::NotFound { kind, id },
            other => CollabError::TransientIo(other.to_string()),
        }
    }
}

/// Durable storage used by the engine.
pub trait Repository: Send + Sync {
    fn load_document(&self, id: Uuid) -> Result<Document, StoreError>;
    fn save_document(&self, document: &Document) -> Result<(), StoreError>;
    /// Remove a document together with its versions, invitations and
    /// contributions.
    fn delete_document(&self, id: Uuid) -> Result<(), StoreError>;
    /// Documents the user owns or collaborates on.
    fn list_accessible_documents(&self, user_id: Uuid) -> Result<Vec<Document>, StoreError>;

    fn load_version(&self, id: Uuid) -> Result<Version, StoreError>;
    fn append_version(&self, version: &Version) -> Result<(), StoreError>;
    /// History of a document, oldest first.
    fn list_versions(&self, document_id: Uuid) -> Result<Vec<Version>, StoreError>;

    fn load_invitation(&self, id: Uuid) -> Result<Invitation, StoreError>;
    fn save_invitation(&self, invitation: &Invitation) -> Result<(), StoreError>;
    fn list_invitations_for_document(&self, document_id: Uuid)
        -> Result<Vec<Invitation>, StoreError>;
    fn list_invitations_for_email(&self, email: &str) -> Result<Vec<Invitation>, StoreError>;
    /// Persist an accepted invitation and the document carrying the new
    /// collaborator as one atomic write.
    fn commit_acceptance(
        &self,
        invitation: &Invitation,
        document: &Document,
    ) -> Result<(), StoreError>;
    /// Persist reverted document content and the version recording the
    /// revert as one atomic write.
    fn commit_revert(&self, document: &Document, version: &Version) -> Result<(), StoreError>;

    fn load_contribution(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Contribution>, StoreError>;
    fn save_contribution(&self, contribution: &Contribution) -> Result<(), StoreError>;
    fn list_contributions(&self, document_id: Uuid) -> Result<Vec<Contribution>, StoreError>;

    /// Most recent version of a document, if any.
    fn latest_version(&self, document_id: Uuid) -> Result<Option<Version>, StoreError> {
        Ok(self.list_versions(document_id)?.pop())
    }
}

/// bincode helpers shared by the adapters.
pub(crate) fn encode_record<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

pub(crate) fn decode_record<T: serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}
