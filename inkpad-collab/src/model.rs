//! Persistent records: documents, versions, invitations, contributions.
//!
//! ```text
//! Document ──┬── Collaborator*         (embedded)
//!            ├── Version*              (append-only, keyed by document + seq)
//!            ├── Invitation*           (pending → accepted | declined | cancelled | expired)
//!            └── Contribution*         (per author counters)
//! ```
//!
//! All timestamps are milliseconds since the Unix epoch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use uuid::Uuid;

use crate::error::CollabError;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Effective permission level on a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Edit,
    View,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Edit => "edit",
            Permission::View => "view",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = CollabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "edit" => Ok(Permission::Edit),
            "view" => Ok(Permission::View),
            other => Err(CollabError::Validation(format!(
                "unknown permission '{other}' (expected 'edit' or 'view')"
            ))),
        }
    }
}

/// A user granted access to a document by an accepted invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collaborator {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub permission: Permission,
    pub added_at: u64,
}

impl Collaborator {
    pub fn new(user_id: Uuid, permission: Permission) -> Self {
        Self {
            user_id,
            email: None,
            permission,
            added_at: now_millis(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A collaboratively edited rich-text document.
///
/// `content` is opaque: it is replaced wholesale on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub owner_id: Uuid,
    pub collaborators: Vec<Collaborator>,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_modified_by: Uuid,
}

impl Document {
    pub fn new(owner_id: Uuid, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            content: content.into(),
            owner_id,
            collaborators: Vec::new(),
            created_at: now,
            updated_at: now,
            last_modified_by: owner_id,
        }
    }

    pub fn collaborator(&self, user_id: Uuid) -> Option<&Collaborator> {
        self.collaborators.iter().find(|c| c.user_id == user_id)
    }

    /// Whether `email` already belongs to one of the collaborators.
    pub fn has_collaborator_email(&self, email: &str) -> bool {
        self.collaborators
            .iter()
            .filter_map(|c| c.email.as_deref())
            .any(|e| e.eq_ignore_ascii_case(email))
    }

    /// Replace the live content, stamping the modifier.
    pub fn apply_content(&mut self, content: String, modified_by: Uuid) {
        self.content = content;
        self.last_modified_by = modified_by;
        self.updated_at = now_millis();
    }
}

/// Character-level change counts between two snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeStats {
    pub chars_added: u64,
    pub chars_deleted: u64,
}

impl ChangeStats {
    pub fn total_changes(&self) -> u64 {
        self.chars_added + self.chars_deleted
    }
}

/// Immutable content snapshot of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Position in the document's history, starting at 1.
    pub seq: u64,
    pub content: String,
    pub author_id: Uuid,
    pub description: String,
    pub timestamp: u64,
    pub change_stats: ChangeStats,
    /// Set when this version was synthesized by a revert.
    pub reverted_from: Option<Uuid>,
}

impl Version {
    pub fn is_revert(&self) -> bool {
        self.reverted_from.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Cancelled,
    Expired,
}

impl InvitationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Cancelled => "cancelled",
            InvitationStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// A request for someone to collaborate on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub document_title: String,
    /// Normalized (trimmed, lowercase) recipient address.
    pub invited_email: String,
    pub invited_by: Uuid,
    pub permission: Permission,
    pub status: InvitationStatus,
    pub invited_at: u64,
    pub responded_at: Option<u64>,
    pub expires_at: u64,
}

impl Invitation {
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Move to a terminal state. Terminal states are final.
    pub fn settle(&mut self, status: InvitationStatus) -> Result<(), CollabError> {
        if self.status.is_terminal() {
            return Err(CollabError::Validation(format!(
                "invitation {} is already {}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.responded_at = Some(now_millis());
        Ok(())
    }
}

/// Per-author version statistics for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub versions_created: u64,
    pub chars_added: u64,
    pub chars_deleted: u64,
}

impl Contribution {
    pub fn new(document_id: Uuid, user_id: Uuid) -> Self {
        Self {
            document_id,
            user_id,
            versions_created: 0,
            chars_added: 0,
            chars_deleted: 0,
        }
    }

    pub fn record(&mut self, stats: ChangeStats) {
        self.versions_created += 1;
        self.chars_added += stats.chars_added;
        self.chars_deleted += stats.chars_deleted;
    }
}
