//! Effective permission of a user on a document.
//!
//! Pure and stateless: every join, content change, share and version request
//! calls [`resolve`] against the freshly loaded document record.

use uuid::Uuid;

use crate::error::CollabError;
use crate::model::{Document, Permission};

/// Resolved capabilities of one user on one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub permission: Permission,
    pub is_owner: bool,
    pub can_share: bool,
    pub can_save_version: bool,
}

impl Access {
    fn from_permission(permission: Permission, is_owner: bool) -> Self {
        let edit = permission == Permission::Edit;
        Self {
            permission,
            is_owner,
            can_share: edit,
            can_save_version: edit,
        }
    }

    pub fn can_edit(&self) -> bool {
        self.permission == Permission::Edit
    }

    /// Fail with `PermissionDenied` unless this access grants `edit`.
    pub fn require_edit(self, action: &str) -> Result<Self, CollabError> {
        if self.can_edit() {
            Ok(self)
        } else {
            Err(CollabError::PermissionDenied(format!(
                "{action} requires edit permission"
            )))
        }
    }

    pub fn require_owner(self, action: &str) -> Result<Self, CollabError> {
        if self.is_owner {
            Ok(self)
        } else {
            Err(CollabError::PermissionDenied(format!(
                "only the document owner may {action}"
            )))
        }
    }
}

/// Resolve `user_id`'s access to `document`.
///
/// Owner ⇒ edit. Collaborator ⇒ stored permission. Anyone else is denied:
/// absence is an authorization failure, not a permission level.
pub fn resolve(document: &Document, user_id: Uuid) -> Result<Access, CollabError> {
    if document.owner_id == user_id {
        return Ok(Access::from_permission(Permission::Edit, true));
    }
    match document.collaborator(user_id) {
        Some(c) => Ok(Access::from_permission(c.permission, false)),
        None => Err(CollabError::PermissionDenied(format!(
            "user {user_id} has no access to document {}",
            document.id
        ))),
    }
}
