//! Versions, reverts, contributions and invitations end to end, including
//! storage outages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use inkpad_collab::invitation::Invitee;
use inkpad_collab::storage::{MemoryStore, Repository, StoreError};
use inkpad_collab::version::diff::change_stats;
use inkpad_collab::{
    ApiResponse, ChangeEvent, CollabError, CollabService, Contribution, Document, ErrorKind,
    Invitation, InvitationStatus, Permission, Request, ResponsePayload, ServiceConfig, Version,
};
use tokio::sync::mpsc;
use uuid::Uuid;

// ─── Storage that can be switched off ────────────────────────────────────────

#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    writes_down: AtomicBool,
    versions_down: AtomicBool,
}

impl FlakyStore {
    fn set_down(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    /// Fail only writes that add a version.
    fn set_versions_down(&self, down: bool) {
        self.versions_down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("disk offline".into()));
        }
        Ok(())
    }

    fn check_versions(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.versions_down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("version log offline".into()));
        }
        Ok(())
    }
}

impl Repository for FlakyStore {
    fn load_document(&self, id: Uuid) -> Result<Document, StoreError> {
        self.inner.load_document(id)
    }
    fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_document(document)
    }
    fn delete_document(&self, id: Uuid) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete_document(id)
    }
    fn list_accessible_documents(&self, user_id: Uuid) -> Result<Vec<Document>, StoreError> {
        self.inner.list_accessible_documents(user_id)
    }
    fn load_version(&self, id: Uuid) -> Result<Version, StoreError> {
        self.inner.load_version(id)
    }
    fn append_version(&self, version: &Version) -> Result<(), StoreError> {
        self.check_versions()?;
        self.inner.append_version(version)
    }
    fn list_versions(&self, document_id: Uuid) -> Result<Vec<Version>, StoreError> {
        self.inner.list_versions(document_id)
    }
    fn load_invitation(&self, id: Uuid) -> Result<Invitation, StoreError> {
        self.inner.load_invitation(id)
    }
    fn save_invitation(&self, invitation: &Invitation) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_invitation(invitation)
    }
    fn list_invitations_for_document(&self, document_id: Uuid) -> Result<Vec<Invitation>, StoreError> {
        self.inner.list_invitations_for_document(document_id)
    }
    fn list_invitations_for_email(&self, email: &str) -> Result<Vec<Invitation>, StoreError> {
        self.inner.list_invitations_for_email(email)
    }
    fn commit_acceptance(&self, invitation: &Invitation, document: &Document) -> Result<(), StoreError> {
        self.check()?;
        self.inner.commit_acceptance(invitation, document)
    }
    fn commit_revert(&self, document: &Document, version: &Version) -> Result<(), StoreError> {
        self.check_versions()?;
        self.inner.commit_revert(document, version)
    }
    fn load_contribution(&self, document_id: Uuid, user_id: Uuid) -> Result<Option<Contribution>, StoreError> {
        self.inner.load_contribution(document_id, user_id)
    }
    fn save_contribution(&self, contribution: &Contribution) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_contribution(contribution)
    }
    fn list_contributions(&self, document_id: Uuid) -> Result<Vec<Contribution>, StoreError> {
        self.inner.list_contributions(document_id)
    }
}

fn flaky_service() -> (CollabService, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let service = CollabService::new(store.clone(), ServiceConfig::default());
    (service, store)
}

// ─── Versions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_revert_appends_and_broadcasts() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Essay", "").unwrap();

    let v1 = service.create_version(doc.id, "a".into(), owner, "first".into()).await.unwrap();
    let v2 = service.create_version(doc.id, "ab".into(), owner, "second".into()).await.unwrap();
    assert_eq!((v1.seq, v2.seq), (1, 2));

    let (tx, mut rx) = mpsc::channel(8);
    service.join(doc.id, owner, "Owner", tx).await.unwrap();

    let v3 = service.revert(doc.id, v1.id, owner).await.unwrap();
    assert_eq!(v3.content, "a");
    assert_eq!(v3.reverted_from, Some(v1.id));
    assert_eq!(v3.seq, 3);
    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "a");

    let history = service.list_history(doc.id, owner).unwrap();
    let ids: Vec<Uuid> = history.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![v3.id, v2.id, v1.id]);

    // The reverting user's own session gets the revert too.
    match &*rx.recv().await.unwrap() {
        ChangeEvent::ContentChange { content, reverted_from, username, .. } => {
            assert_eq!(content, "a");
            assert_eq!(*reverted_from, Some(v1.id));
            assert_eq!(username, "Owner");
        }
        other => panic!("expected content change, got {other:?}"),
    }
}

#[tokio::test]
async fn test_every_revert_appends_exactly_one_version() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Loop", "").unwrap();
    let v1 = service.create_version(doc.id, "one".into(), owner, "v1".into()).await.unwrap();
    service.create_version(doc.id, "two".into(), owner, "v2".into()).await.unwrap();

    for round in 1..=3 {
        let reverted = service.revert(doc.id, v1.id, owner).await.unwrap();
        assert_eq!(reverted.content, "one");
        assert_eq!(service.list_history(doc.id, owner).unwrap().len(), 2 + round);
    }
}

#[tokio::test]
async fn test_revert_rejects_foreign_version() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let a = service.create_document(owner, "A", "").unwrap();
    let b = service.create_document(owner, "B", "").unwrap();
    let va = service.create_version(a.id, "x".into(), owner, "".into()).await.unwrap();

    assert!(matches!(
        service.revert(b.id, va.id, owner).await,
        Err(CollabError::Validation(_))
    ));
    assert!(service.list_history(b.id, owner).unwrap().is_empty());
}

#[tokio::test]
async fn test_change_stats_are_symmetric_across_history() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Stats", "").unwrap();
    let contents = ["hello", "hello world", "help world!", ""];
    let mut previous: Option<String> = None;
    for content in contents {
        let v = service
            .create_version(doc.id, content.into(), owner, "".into())
            .await
            .unwrap();
        if let Some(prev) = previous {
            let back = change_stats(content, &prev);
            assert_eq!(v.change_stats.chars_added, back.chars_deleted);
            assert_eq!(v.change_stats.chars_deleted, back.chars_added);
        } else {
            assert_eq!(v.change_stats.chars_added, 5);
        }
        previous = Some(content.to_string());
    }
}

#[tokio::test]
async fn test_contributions_track_authors() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Team", "").unwrap();
    let inv = service.invite(doc.id, owner, "co@example.com", Permission::Edit).await.unwrap();
    let co = Invitee { user_id: Uuid::new_v4(), email: "co@example.com".into() };
    service.accept_invitation(inv.id, &co).await.unwrap();

    service.create_version(doc.id, "abc".into(), owner, "".into()).await.unwrap();
    service.create_version(doc.id, "abcdef".into(), co.user_id, "".into()).await.unwrap();
    service.create_version(doc.id, "ab".into(), co.user_id, "".into()).await.unwrap();

    let list = service.contributions(doc.id, owner).unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].user_id, co.user_id);
    assert_eq!(list[0].versions_created, 2);
    assert_eq!(list[0].chars_added, 3);
    assert_eq!(list[0].chars_deleted, 4);
    assert_eq!(list[1].chars_added, 3);
}

#[tokio::test]
async fn test_user_initiated_writes_surface_outage() {
    let (service, store) = flaky_service();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Fragile", "").unwrap();
    let v1 = service.create_version(doc.id, "a".into(), owner, "".into()).await.unwrap();

    store.set_down(true);
    assert!(matches!(
        service.create_version(doc.id, "b".into(), owner, "".into()).await,
        Err(CollabError::TransientIo(_))
    ));
    assert!(matches!(
        service.revert(doc.id, v1.id, owner).await,
        Err(CollabError::TransientIo(_))
    ));
    assert!(matches!(
        service.save_document(doc.id, owner, "c".into()).await,
        Err(CollabError::TransientIo(_))
    ));
    let response = service
        .handle_request(owner, Request::SaveDocument { document_id: doc.id, content: "c".into() })
        .await;
    assert!(!response.success);
    assert_eq!(response.error.unwrap().kind, ErrorKind::TransientIo);

    store.set_down(false);
    assert_eq!(service.list_history(doc.id, owner).unwrap().len(), 1);
    service.save_document(doc.id, owner, "c".into()).await.unwrap();
}

#[tokio::test]
async fn test_failed_revert_leaves_content_untouched() {
    let (service, store) = flaky_service();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Fragile", "").unwrap();
    let v1 = service.create_version(doc.id, "a".into(), owner, "".into()).await.unwrap();
    service.create_version(doc.id, "ab".into(), owner, "".into()).await.unwrap();
    service.save_document(doc.id, owner, "ab".into()).await.unwrap();

    let (tx, mut rx) = mpsc::channel(8);
    service.join(doc.id, owner, "Owner", tx).await.unwrap();

    store.set_versions_down(true);
    assert!(matches!(
        service.revert(doc.id, v1.id, owner).await,
        Err(CollabError::TransientIo(_))
    ));
    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "ab");
    assert_eq!(service.list_history(doc.id, owner).unwrap().len(), 2);
    assert!(rx.try_recv().is_err());

    store.set_versions_down(false);
    let v3 = service.revert(doc.id, v1.id, owner).await.unwrap();
    assert_eq!(v3.seq, 3);
    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "a");
}

// ─── Invitations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_viewer_cannot_invite() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Shared", "").unwrap();
    let inv = service.invite(doc.id, owner, "v@example.com", Permission::View).await.unwrap();
    let viewer = Invitee { user_id: Uuid::new_v4(), email: "v@example.com".into() };
    service.accept_invitation(inv.id, &viewer).await.unwrap();

    let result = service
        .invite(doc.id, viewer.user_id, "friend@example.com", Permission::View)
        .await;
    assert!(matches!(result, Err(CollabError::PermissionDenied(_))));
    assert_eq!(service.pending_invitation_count("friend@example.com").unwrap(), 0);
}

#[tokio::test]
async fn test_invitation_lifecycle_over_requests() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let guest = Uuid::new_v4();

    let created = service
        .handle_request(owner, Request::CreateDocument { title: "Plan".into(), content: "x".into() })
        .await;
    let Ok(ResponsePayload::Document(doc)) = created.into_result() else {
        panic!("expected document");
    };

    let denied = service.handle_request(guest, Request::GetDocument { document_id: doc.id }).await;
    assert_eq!(denied.error.unwrap().kind, ErrorKind::PermissionDenied);

    let invited = service
        .handle_request(
            owner,
            Request::Invite {
                document_id: doc.id,
                email: "  Guest@Example.com ".into(),
                permission: Permission::Edit,
            },
        )
        .await;
    let Ok(ResponsePayload::Invitation(invitation)) = invited.into_result() else {
        panic!("expected invitation");
    };
    assert_eq!(invitation.invited_email, "guest@example.com");

    let pending = service
        .handle_request(guest, Request::PendingInvitations { email: "guest@example.com".into() })
        .await;
    assert!(matches!(pending.into_result(), Ok(ResponsePayload::Invitations(list)) if list.len() == 1));

    let accepted = service
        .handle_request(
            guest,
            Request::AcceptInvitation {
                invitation_id: invitation.id,
                email: "guest@example.com".into(),
            },
        )
        .await;
    let Ok(ResponsePayload::Invitation(accepted)) = accepted.into_result() else {
        panic!("expected invitation");
    };
    assert_eq!(accepted.status, InvitationStatus::Accepted);

    let listed = service.handle_request(guest, Request::ListDocuments).await;
    assert!(matches!(listed.into_result(), Ok(ResponsePayload::Documents(docs)) if docs.len() == 1));

    let again: ApiResponse = service
        .handle_request(
            guest,
            Request::DeclineInvitation {
                invitation_id: invitation.id,
                email: "guest@example.com".into(),
            },
        )
        .await;
    assert_eq!(again.error.unwrap().kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_failed_acceptance_leaves_no_trace() {
    let (service, store) = flaky_service();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Atomic", "").unwrap();
    let inv = service.invite(doc.id, owner, "a@example.com", Permission::Edit).await.unwrap();
    let invitee = Invitee { user_id: Uuid::new_v4(), email: "a@example.com".into() };

    store.set_down(true);
    assert!(matches!(
        service.accept_invitation(inv.id, &invitee).await,
        Err(CollabError::TransientIo(_))
    ));
    store.set_down(false);

    assert!(service.get_document(doc.id, invitee.user_id).is_err());
    assert_eq!(service.pending_invitation_count("a@example.com").unwrap(), 1);
    service.accept_invitation(inv.id, &invitee).await.unwrap();
    assert_eq!(
        service.get_document(doc.id, invitee.user_id).unwrap().collaborators.len(),
        1
    );
}
