//! Session, presence and relay behavior through the service facade.

use std::sync::Arc;

use async_trait::async_trait;
use inkpad_collab::channel::EventSink;
use inkpad_collab::invitation::Invitee;
use inkpad_collab::scheduler::{EditSink, PersistenceScheduler, SchedulerConfig};
use inkpad_collab::session::SessionHandle;
use inkpad_collab::{ChangeEvent, CollabError, CollabService, Document, Permission};
use tokio::sync::mpsc::{self, Receiver};
use tokio::time::Duration;
use uuid::Uuid;

type Events = Receiver<Arc<ChangeEvent>>;

fn sink() -> (EventSink, Events) {
    mpsc::channel(64)
}

/// Everything already queued on `rx`.
fn drain(rx: &mut Events) -> Vec<Arc<ChangeEvent>> {
    let mut out = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        out.push(ev);
    }
    out
}

/// Owner plus one collaborator added through an accepted invitation.
async fn shared_document(
    service: &CollabService,
    permission: Permission,
) -> (Document, Uuid, Uuid) {
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Shared", "").unwrap();
    let invitation = service
        .invite(doc.id, owner, "guest@example.com", permission)
        .await
        .unwrap();
    let guest = Invitee { user_id: Uuid::new_v4(), email: "guest@example.com".into() };
    service.accept_invitation(invitation.id, &guest).await.unwrap();
    (doc, owner, guest.user_id)
}

async fn join(
    service: &CollabService,
    doc: Uuid,
    user: Uuid,
    name: &str,
) -> (SessionHandle, Events) {
    let (tx, rx) = sink();
    let outcome = service.join(doc, user, name, tx).await.unwrap();
    (outcome.handle, rx)
}

#[tokio::test]
async fn test_viewer_denied_and_owner_change_relayed() {
    let service = CollabService::in_memory();
    let (doc, owner, viewer) = shared_document(&service, Permission::View).await;

    let (a, mut a_rx) = join(&service, doc.id, owner, "A").await;
    let (b, mut b_rx) = join(&service, doc.id, viewer, "B").await;
    drain(&mut a_rx);

    let denied = service.submit_change(&b, "x".into()).await;
    assert!(matches!(denied, Err(CollabError::PermissionDenied(_))));
    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "");
    assert!(drain(&mut a_rx).is_empty());

    service.submit_change(&a, "hello".into()).await.unwrap();
    let received = drain(&mut b_rx);
    assert_eq!(received.len(), 1);
    match &*received[0] {
        ChangeEvent::ContentChange { content, user_id, reverted_from, .. } => {
            assert_eq!(content, "hello");
            assert_eq!(*user_id, owner);
            assert!(reverted_from.is_none());
        }
        other => panic!("expected content change, got {other:?}"),
    }
    // No echo to the author.
    assert!(drain(&mut a_rx).is_empty());
}

#[tokio::test]
async fn test_presence_events_and_participant_list() {
    let service = CollabService::in_memory();
    let (doc, owner, editor) = shared_document(&service, Permission::Edit).await;

    let (a, mut a_rx) = join(&service, doc.id, owner, "A").await;
    let (tx, _b_rx) = sink();
    let outcome = service.join(doc.id, editor, "B", tx).await.unwrap();
    assert_eq!(outcome.permission, Permission::Edit);
    assert_eq!(outcome.participants.len(), 2);
    assert_eq!(outcome.participants[0].user_id, owner);

    match &*drain(&mut a_rx)[0] {
        ChangeEvent::UserJoined { user_id, permission, .. } => {
            assert_eq!(*user_id, editor);
            assert_eq!(*permission, Permission::Edit);
        }
        other => panic!("expected user joined, got {other:?}"),
    }

    assert!(service.leave(&outcome.handle).await.unwrap());
    assert!(!service.leave(&outcome.handle).await.unwrap());
    assert!(matches!(&*drain(&mut a_rx)[0], ChangeEvent::UserLeft { user_id, .. } if *user_id == editor));
    assert_eq!(service.participants(doc.id).await.len(), 1);

    service.leave(&a).await.unwrap();
    assert_eq!(service.registry().room_count().await, 0);
}

#[tokio::test]
async fn test_stranger_cannot_join() {
    let service = CollabService::in_memory();
    let doc = service.create_document(Uuid::new_v4(), "Private", "").unwrap();
    let (tx, _rx) = sink();
    let result = service.join(doc.id, Uuid::new_v4(), "eve", tx).await;
    assert!(matches!(result, Err(CollabError::PermissionDenied(_))));
    assert_eq!(service.registry().room_count().await, 0);
}

#[tokio::test]
async fn test_late_joiner_sees_live_content() {
    let service = CollabService::in_memory();
    let (doc, owner, editor) = shared_document(&service, Permission::Edit).await;

    let (a, _a_rx) = join(&service, doc.id, owner, "A").await;
    service.submit_change(&a, "draft".into()).await.unwrap();

    let (tx, _rx) = sink();
    let outcome = service.join(doc.id, editor, "B", tx).await.unwrap();
    assert_eq!(outcome.content, "draft");
}

#[tokio::test]
async fn test_last_leave_flushes_live_content() {
    let service = CollabService::in_memory();
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Notes", "old").unwrap();

    let (a, _rx) = join(&service, doc.id, owner, "A").await;
    service.submit_change(&a, "new".into()).await.unwrap();
    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "old");

    service.leave(&a).await.unwrap();
    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "new");
}

#[tokio::test]
async fn test_changes_arrive_in_submission_order() {
    let service = CollabService::in_memory();
    let (doc, owner, viewer) = shared_document(&service, Permission::View).await;
    let (a, _a_rx) = join(&service, doc.id, owner, "A").await;
    let (_b, mut b_rx) = join(&service, doc.id, viewer, "B").await;

    for i in 0..50 {
        service.submit_change(&a, format!("rev {i}")).await.unwrap();
    }
    let contents: Vec<String> = drain(&mut b_rx)
        .iter()
        .filter_map(|ev| match &**ev {
            ChangeEvent::ContentChange { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect();
    let expected: Vec<String> = (0..50).map(|i| format!("rev {i}")).collect();
    assert_eq!(contents, expected);
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_others() {
    let service = CollabService::in_memory();
    let (doc, owner, viewer) = shared_document(&service, Permission::View).await;
    let third = Uuid::new_v4();
    service.invite(doc.id, owner, "third@example.com", Permission::View).await.unwrap();
    let pending = service.pending_invitations("third@example.com").unwrap();
    service
        .accept_invitation(pending[0].id, &Invitee { user_id: third, email: "third@example.com".into() })
        .await
        .unwrap();

    let (a, _a_rx) = join(&service, doc.id, owner, "A").await;
    let (_b, b_rx) = join(&service, doc.id, viewer, "B").await;
    let (_c, mut c_rx) = join(&service, doc.id, third, "C").await;
    drop(b_rx);

    let report = service.submit_change(&a, "still here".into()).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert!(drain(&mut c_rx)
        .iter()
        .any(|ev| matches!(&**ev, ChangeEvent::ContentChange { content, .. } if content == "still here")));
}

#[tokio::test]
async fn test_concurrent_joins_and_leaves() {
    let service = Arc::new(CollabService::in_memory());
    let owner = Uuid::new_v4();
    let doc = service.create_document(owner, "Busy", "").unwrap();

    // The owner may hold many sessions at once.
    let mut tasks = Vec::new();
    for i in 0..20 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            let (tx, rx) = sink();
            let outcome = service.join(doc.id, owner, &format!("tab-{i}"), tx).await.unwrap();
            if i % 2 == 0 {
                service.leave(&outcome.handle).await.unwrap();
            }
            (outcome.handle, rx)
        }));
    }
    let mut kept = Vec::new();
    for task in tasks {
        kept.push(task.await.unwrap());
    }
    assert_eq!(service.registry().session_count(doc.id).await, 10);
}

#[tokio::test]
async fn test_revoked_editor_rejected_mid_session() {
    let service = CollabService::in_memory();
    let (doc, _owner, editor) = shared_document(&service, Permission::Edit).await;
    let (b, _rx) = join(&service, doc.id, editor, "B").await;
    service.submit_change(&b, "ok".into()).await.unwrap();

    let mut stored = service.store().load_document(doc.id).unwrap();
    stored.collaborators.retain(|c| c.user_id != editor);
    service.store().save_document(&stored).unwrap();

    let result = service.submit_change(&b, "not ok".into()).await;
    assert!(matches!(result, Err(CollabError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_delete_evicts_connected_sessions() {
    let service = CollabService::in_memory();
    let (doc, owner, editor) = shared_document(&service, Permission::Edit).await;
    let (_a, mut a_rx) = join(&service, doc.id, owner, "A").await;
    let (_b, _b_rx) = join(&service, doc.id, editor, "B").await;
    drain(&mut a_rx);

    service.delete_document(doc.id, owner).await.unwrap();

    let mut left = 0;
    while let Some(ev) = a_rx.recv().await {
        if matches!(&*ev, ChangeEvent::UserLeft { .. }) {
            left += 1;
        }
    }
    assert_eq!(left, 2);
    assert_eq!(service.registry().room_count().await, 0);

    let (tx, _rx) = sink();
    assert!(matches!(
        service.join(doc.id, owner, "A", tx).await,
        Err(CollabError::NotFound { .. })
    ));
}

/// Forwards debounced editor output straight into the service.
struct ServiceSink {
    service: Arc<CollabService>,
    handle: SessionHandle,
}

#[async_trait]
impl EditSink for ServiceSink {
    async fn broadcast(&self, content: String) -> Result<(), CollabError> {
        self.service.submit_change(&self.handle, content).await.map(|_| ())
    }

    async fn persist(&self, content: String) -> Result<(), CollabError> {
        self.service
            .save_document(self.handle.document_id, self.handle.user_id, content)
            .await
            .map(|_| ())
    }
}

#[tokio::test(start_paused = true)]
async fn test_rapid_edits_relay_once() {
    let service = Arc::new(CollabService::in_memory());
    let (doc, owner, viewer) = shared_document(&service, Permission::View).await;
    let (a, _a_rx) = join(&service, doc.id, owner, "A").await;
    let (_b, mut b_rx) = join(&service, doc.id, viewer, "B").await;

    let sink = Arc::new(ServiceSink { service: service.clone(), handle: a });
    let mut scheduler = PersistenceScheduler::new(sink, SchedulerConfig::default());
    scheduler.on_local_edit("h".into());
    tokio::time::sleep(Duration::from_millis(100)).await;
    scheduler.on_local_edit("he".into());
    tokio::time::sleep(Duration::from_millis(4_000)).await;

    let relayed: Vec<String> = drain(&mut b_rx)
        .iter()
        .filter_map(|ev| match &**ev {
            ChangeEvent::ContentChange { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(relayed, vec!["he".to_string()]);
    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "he");
}

#[tokio::test(start_paused = true)]
async fn test_revert_received_cancels_stale_autosave() {
    let service = Arc::new(CollabService::in_memory());
    let (doc, owner, editor) = shared_document(&service, Permission::Edit).await;
    let v1 = service.create_version(doc.id, "v1".into(), owner, String::new()).await.unwrap();
    let (a, _a_rx) = join(&service, doc.id, owner, "A").await;
    let (_b, mut b_rx) = join(&service, doc.id, editor, "B").await;

    let sink = Arc::new(ServiceSink { service: service.clone(), handle: a });
    let mut scheduler = PersistenceScheduler::new(sink, SchedulerConfig::default());
    scheduler.on_local_edit("pre-revert draft".into());
    tokio::time::sleep(Duration::from_millis(600)).await;
    drain(&mut b_rx);

    // The other editor reverts; A's editor adopts the reverted content.
    service.revert(doc.id, v1.id, editor).await.unwrap();
    scheduler.on_remote_content();
    tokio::time::sleep(Duration::from_millis(4_000)).await;

    assert_eq!(service.get_document(doc.id, owner).unwrap().content, "v1");
}
