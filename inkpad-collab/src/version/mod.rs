//! Version control engine.
//!
//! History is append-only: a revert restores old content as the live state
//! and records that as a new version, it never rewrites earlier entries.
//!
//! ```text
//! V1 "a" ── V2 "ab" ── revert(V1) ──► V3 "a" (reverted_from = V1)
//!                                       │
//!                                       ├─► document.content = "a"
//!                                       └─► relay: content-change to every session
//! ```

pub mod diff;

use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CollabError, ResourceKind};
use crate::model::{now_millis, Contribution, Version};
use crate::permission::{self, Access};
use crate::relay::ChangeRelay;
use crate::session::SessionRegistry;
use crate::storage::{DocumentLocks, Repository};

pub struct VersionEngine {
    store: Arc<dyn Repository>,
    locks: Arc<DocumentLocks>,
    registry: Arc<SessionRegistry>,
    relay: Arc<ChangeRelay>,
    /// Serializes appends so sequence numbers and diffs see a stable parent.
    append_lock: Mutex<()>,
}

impl VersionEngine {
    pub fn new(
        store: Arc<dyn Repository>,
        locks: Arc<DocumentLocks>,
        registry: Arc<SessionRegistry>,
        relay: Arc<ChangeRelay>,
    ) -> Self {
        Self {
            store,
            locks,
            registry,
            relay,
            append_lock: Mutex::new(()),
        }
    }

    fn access(&self, document_id: Uuid, user_id: Uuid) -> Result<Access, CollabError> {
        let document = self.store.load_document(document_id)?;
        permission::resolve(&document, user_id)
    }

    /// Store an immutable snapshot of `content`.
    pub async fn create_version(
        &self,
        document_id: Uuid,
        content: String,
        author_id: Uuid,
        description: String,
    ) -> Result<Version, CollabError> {
        let _append = self.append_lock.lock().await;
        let access = self.access(document_id, author_id)?;
        if !access.can_save_version {
            return Err(CollabError::PermissionDenied(
                "saving a version requires edit permission".into(),
            ));
        }
        let version = self.next_version(document_id, content, author_id, description, None)?;
        self.store.append_version(&version)?;
        self.record_contribution(&version);
        log_created(&version);
        Ok(version)
    }

    /// Number, timestamp and diff the next entry against the current head.
    /// Caller holds `append_lock`.
    fn next_version(
        &self,
        document_id: Uuid,
        content: String,
        author_id: Uuid,
        description: String,
        reverted_from: Option<Uuid>,
    ) -> Result<Version, CollabError> {
        let previous = self.store.latest_version(document_id)?;
        let now = now_millis();
        let (seq, timestamp, change_stats) = match &previous {
            // Timestamps never go backwards within one history.
            Some(prev) => (
                prev.seq + 1,
                now.max(prev.timestamp),
                diff::change_stats(&prev.content, &content),
            ),
            None => (1, now, diff::all_added(&content)),
        };

        Ok(Version {
            id: Uuid::new_v4(),
            document_id,
            seq,
            content,
            author_id,
            description,
            timestamp,
            change_stats,
            reverted_from,
        })
    }

    fn record_contribution(&self, version: &Version) {
        let result = self
            .store
            .load_contribution(version.document_id, version.author_id)
            .and_then(|existing| {
                let mut contribution = existing
                    .unwrap_or_else(|| Contribution::new(version.document_id, version.author_id));
                contribution.record(version.change_stats);
                self.store.save_contribution(&contribution)
            });
        if let Err(e) = result {
            log::warn!("Recording contribution for version {} failed: {e}", version.id);
        }
    }

    /// Versions of a document, most recent first.
    pub fn list_history(&self, document_id: Uuid, user_id: Uuid) -> Result<Vec<Version>, CollabError> {
        self.access(document_id, user_id)?;
        let mut versions = self.store.list_versions(document_id)?;
        versions.reverse();
        Ok(versions)
    }

    pub fn get_version(
        &self,
        document_id: Uuid,
        version_id: Uuid,
        user_id: Uuid,
    ) -> Result<Version, CollabError> {
        self.access(document_id, user_id)?;
        let version = self.store.load_version(version_id)?;
        if version.document_id != document_id {
            return Err(CollabError::not_found(ResourceKind::Version, version_id));
        }
        Ok(version)
    }

    /// Per-author statistics, most prolific first.
    pub fn contributions(
        &self,
        document_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<Contribution>, CollabError> {
        self.access(document_id, user_id)?;
        let mut list = self.store.list_contributions(document_id)?;
        list.sort_by(|a, b| {
            b.versions_created
                .cmp(&a.versions_created)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(list)
    }

    /// Restore `version_id` as the live content of `document_id`.
    ///
    /// Always appends one new version, even when the content is unchanged,
    /// then pushes the content to every connected session. The content and
    /// the new version land in one storage write.
    pub async fn revert(
        &self,
        document_id: Uuid,
        version_id: Uuid,
        actor_id: Uuid,
    ) -> Result<Version, CollabError> {
        let reverted = {
            let _append = self.append_lock.lock().await;
            let _doc = self.locks.lock(document_id).await;
            let mut document = self.store.load_document(document_id)?;
            permission::resolve(&document, actor_id)?.require_edit("revert")?;

            let target = self.store.load_version(version_id)?;
            if target.document_id != document_id {
                return Err(CollabError::Validation(format!(
                    "version {version_id} does not belong to document {document_id}"
                )));
            }

            let description =
                format!("Reverted to version {} from {}", target.id, target.timestamp);
            let version = self.next_version(
                document_id,
                target.content.clone(),
                actor_id,
                description,
                Some(target.id),
            )?;
            document.apply_content(target.content, actor_id);
            self.store.commit_revert(&document, &version)?;
            self.record_contribution(&version);
            log_created(&version);
            version
        };

        let username = self
            .registry
            .username_of(document_id, actor_id)
            .await
            .unwrap_or_else(|| actor_id.to_string());
        self.relay
            .broadcast_revert(document_id, actor_id, username, reverted.content.clone(), version_id)
            .await;
        Ok(reverted)
    }
}

fn log_created(version: &Version) {
    log::info!(
        "Created version {} (#{}) of {}: +{} -{}",
        version.id,
        version.seq,
        version.document_id,
        version.change_stats.chars_added,
        version.change_stats.chars_deleted
    );
}
