mod common;

use std::sync::Arc;

use common::{service, wait_until, FakeServer};
use outpost_core::models::{fields, CLIENT_REF_FIELD};
use outpost_core::sync::EventKind;
use outpost_core::{
    Applied, EntityKind, FailureReason, NewOperation, OfflineSync, ProvisionalState,
    RealtimeEvent, RemoteError, ServerRecord, SqliteStore, SyncError, SyncEvent, SyncOptions,
};
use tempfile::TempDir;

fn report(title: &str) -> NewOperation {
    NewOperation::create(
        EntityKind::Report,
        fields([("title", title), ("category", "patrol"), ("author", "dana")]),
    )
}

fn reconciled_ids(sync: &OfflineSync) -> Vec<String> {
    sync.reconciled_view(EntityKind::Report)
        .unwrap()
        .iter()
        .map(|item| item.id().to_string())
        .collect()
}

#[tokio::test]
async fn pending_count_tracks_queue() {
    let server = FakeServer::new();
    let sync = service(&server);

    for (i, title) in ["One", "Two", "Three"].into_iter().enumerate() {
        sync.enqueue(report(title)).unwrap();
        assert_eq!(sync.pending_count(), i + 1);
    }
    sync.enqueue(NewOperation::update(EntityKind::Asset, "A-1", fields([("name", "Pump")])))
        .unwrap();
    assert_eq!(sync.pending_count(), 4);

    // One transient failure keeps its op; the rest are confirmed
    server.fail_transient(1);
    sync.report_connectivity(true);
    let report = sync.flush().await.unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.retried, 1);
    assert_eq!(sync.pending_count(), 1);

    sync.flush().await.unwrap();
    assert_eq!(sync.pending_count(), 0);
}

#[tokio::test]
async fn concurrent_flush_is_a_no_op() {
    let server = FakeServer::new();
    let sync = service(&server);
    sync.enqueue(report("Gate check")).unwrap();
    sync.enqueue(report("Fence check")).unwrap();
    sync.report_connectivity(true);

    let gate = server.hold();
    let first = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.flush().await })
    };
    assert!(wait_until(|| server.calls().len() == 1).await);

    let second = sync.flush().await.unwrap();
    assert!(second.skipped);
    assert_eq!(second.attempted, 0);
    assert_eq!(sync.pending_count(), 2);

    gate.add_permits(2);
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.succeeded, 2);
    assert_eq!(server.calls().len(), 2);
    assert_eq!(sync.pending_count(), 0);
}

#[tokio::test]
async fn flush_is_global_fifo() {
    let server = FakeServer::new();
    let sync = service(&server);

    sync.enqueue(NewOperation::update(EntityKind::Asset, "A-1", fields([("name", "Pump")])))
        .unwrap();
    sync.enqueue(report("Leak")).unwrap();
    sync.enqueue(NewOperation::delete(EntityKind::Report, "M-7")).unwrap();
    sync.check_out("A-2", Default::default()).unwrap();

    sync.report_connectivity(true);
    sync.flush().await.unwrap();

    assert_eq!(
        server.calls(),
        vec![
            "update asset A-1",
            "create report -",
            "delete report M-7",
            "check_out asset A-2",
        ]
    );
}

#[tokio::test]
async fn check_in_is_sent_before_check_out() {
    let server = FakeServer::new();
    server.seed(
        EntityKind::Asset,
        vec![ServerRecord::new("A-7", fields([("name", "Generator"), ("status", "checked_out")]))],
    );
    let sync = service(&server);

    sync.check_in("A-7", Default::default()).unwrap();
    sync.check_out("A-7", fields([("holder", "dana")])).unwrap();

    // The check-in fails once; the check-out must not overtake it
    server.fail_transient(1);
    sync.report_connectivity(true);
    let first = sync.flush().await.unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!(first.deferred, 1);
    assert_eq!(server.calls(), vec!["check_in asset A-7"]);

    sync.flush().await.unwrap();
    assert_eq!(
        server.calls(),
        vec!["check_in asset A-7", "check_in asset A-7", "check_out asset A-7"]
    );
    assert_eq!(server.list(EntityKind::Asset)[0].status(), Some("checked_out"));
}

#[tokio::test]
async fn realtime_confirmation_shows_record_exactly_once() {
    let server = FakeServer::new();
    server.seed(EntityKind::Report, vec![ServerRecord::new("S1", Default::default())]);
    let sync = service(&server);

    sync.report_connectivity(true);
    sync.refetch(EntityKind::Report).await.unwrap();
    sync.report_connectivity(false);

    let op = sync.enqueue(report("Patrol note")).unwrap();
    let temp_id = op.temp_id.clone().unwrap();
    assert_eq!(reconciled_ids(&sync), vec![temp_id.clone(), "S1".to_string()]);

    // The server confirmed T1 as S1 without echoing the client ref
    let confirmation = ServerRecord::new(
        "S1",
        fields([("title", "Patrol note"), ("category", "patrol"), ("author", "dana")]),
    );
    let event = RealtimeEvent::new(EntityKind::Report, EventKind::Created, confirmation);

    let applied = sync.apply_realtime(&event).unwrap();
    assert_eq!(
        applied,
        Applied::Merged {
            temp_id: temp_id.clone(),
            id: "S1".into()
        }
    );
    assert_eq!(reconciled_ids(&sync), vec!["S1"]);
    assert_eq!(sync.rendered_view(EntityKind::Report).ids(), vec!["S1"]);

    // A duplicate delivery changes nothing
    sync.apply_realtime(&event).unwrap();
    assert_eq!(reconciled_ids(&sync), vec!["S1"]);
    let view = sync.rendered_view(EntityKind::Report);
    assert_eq!(view.ids(), vec!["S1"]);
    assert_eq!(view.counters.total, 1);
    assert_eq!(view.counters.pending, 0);

    // The op itself still leaves through the normal success path
    assert_eq!(sync.pending_count(), 1);
}

#[tokio::test]
async fn retry_exhaustion_fails_exactly_one_operation() {
    let server = FakeServer::new();
    let sync = service(&server);
    let doomed = sync.enqueue(report("Doomed")).unwrap();
    sync.enqueue(NewOperation::update(EntityKind::Asset, "A-1", Default::default()))
        .unwrap();
    let mut events = sync.subscribe();
    sync.report_connectivity(true);

    for _ in 0..2 {
        server.fail_transient(1);
        sync.flush().await.unwrap();
        assert_eq!(sync.pending_count(), 1);
    }
    server.fail_transient(1);
    let last = sync.flush().await.unwrap();
    assert_eq!(last.dropped, 1);
    assert_eq!(sync.pending_count(), 0);

    let failed: Vec<_> = events
        .drain()
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Failed { .. }))
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        &failed[0],
        SyncEvent::Failed { op_id, reason: FailureReason::RetryExhausted { attempts: 3, .. }, .. }
            if *op_id == doomed.id
    ));

    // Kept visible as failed rather than vanishing
    let view = sync.rendered_view(EntityKind::Report);
    assert_eq!(view.counters.failed, 1);
    let provisional = view.items[0].as_provisional().unwrap();
    assert!(matches!(provisional.state, ProvisionalState::Failed { .. }));
}

#[tokio::test]
async fn rejected_operation_is_dropped_without_retries() {
    let server = FakeServer::new();
    let sync = service(&server);
    sync.enqueue(report("")).unwrap();
    server.fail_with(RemoteError::Validation {
        status: 422,
        message: "title required".into(),
    });

    sync.report_connectivity(true);
    let report = sync.flush().await.unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(server.calls().len(), 1);
    assert!(matches!(
        sync.failures()[0].reason,
        FailureReason::Rejected { ref message } if message == "title required"
    ));
}

#[tokio::test]
async fn end_to_end_report_scenario() {
    let server = FakeServer::new();
    let sync = service(&server);
    let mut events = sync.subscribe();

    // Offline: the report only exists locally
    let op = sync.enqueue(report("Patrol note")).unwrap();
    assert_eq!(sync.pending_count(), 1);
    let view = sync.reconciled_view(EntityKind::Report).unwrap();
    assert_eq!(view.len(), 1);
    assert!(view[0].is_provisional());
    assert_eq!(view[0].id(), op.temp_id.as_deref().unwrap());

    // Reconnect: the create is sent and confirmed as M-42
    server.confirm_as("M-42");
    sync.report_connectivity(true);
    let report = sync.flush().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(sync.pending_count(), 0);
    assert_eq!(events.drain(), vec![SyncEvent::Synced(EntityKind::Report)]);

    // Consumer refetches
    let rendered = sync.refetch(EntityKind::Report).await.unwrap();
    assert_eq!(rendered.ids(), vec!["M-42"]);
    let view = sync.reconciled_view(EntityKind::Report).unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].id(), "M-42");
    assert_eq!(view[0].fields()["title"], "Patrol note");
}

#[tokio::test]
async fn dependent_operations_follow_their_create() {
    let server = FakeServer::new();
    let sync = service(&server);

    let create = sync.enqueue(report("Leak")).unwrap();
    let temp_id = create.temp_id.unwrap();
    sync.enqueue(NewOperation::update(
        EntityKind::Report,
        temp_id.clone(),
        fields([("status", "resolved")]),
    ))
    .unwrap();

    server.confirm_as("M-42");
    sync.report_connectivity(true);
    sync.flush().await.unwrap();

    assert_eq!(
        server.calls(),
        vec!["create report -", "update report M-42"]
    );
    assert_eq!(server.list(EntityKind::Report)[0].status(), Some("resolved"));
}

#[tokio::test]
async fn update_after_confirmation_is_sent_to_server_id() {
    let server = FakeServer::new();
    let sync = service(&server);

    let create = sync.enqueue(report("Leak")).unwrap();
    let temp_id = create.temp_id.unwrap();
    server.confirm_as("M-42");
    sync.report_connectivity(true);
    sync.flush().await.unwrap();

    // The UI still holds the temp id when the user edits the report
    sync.enqueue(NewOperation::update(
        EntityKind::Report,
        temp_id,
        fields([("status", "resolved")]),
    ))
    .unwrap();
    sync.flush().await.unwrap();

    assert_eq!(
        server.calls(),
        vec!["create report -", "update report M-42"]
    );
    assert!(sync.failures().is_empty());
    assert_eq!(server.list(EntityKind::Report)[0].status(), Some("resolved"));
}

#[tokio::test]
async fn confirmed_create_stays_listed_until_refetch() {
    let server = FakeServer::new();
    let sync = service(&server);

    sync.enqueue(report("Leak")).unwrap();
    server.confirm_as("M-42");
    sync.report_connectivity(true);
    sync.flush().await.unwrap();

    assert_eq!(reconciled_ids(&sync), vec!["M-42"]);
    let view = sync.rendered_view(EntityKind::Report);
    assert_eq!(view.ids(), vec!["M-42"]);
    assert_eq!(view.counters.total, 1);
    assert_eq!(view.counters.pending, 0);

    sync.refetch(EntityKind::Report).await.unwrap();
    assert_eq!(reconciled_ids(&sync), vec!["M-42"]);
}

#[tokio::test]
async fn record_created_by_another_client_is_not_taken_for_ours() {
    let server = FakeServer::new();
    let sync = service(&server);

    let op = sync.enqueue(report("Leak")).unwrap();
    let temp_id = op.temp_id.unwrap();

    // Same title, category and author, but echoing someone else's key
    let record = ServerRecord::new(
        "S9",
        fields([
            ("title", "Leak"),
            ("category", "patrol"),
            ("author", "dana"),
            (CLIENT_REF_FIELD, "tmp-other-device"),
        ]),
    );
    let event = RealtimeEvent::new(EntityKind::Report, EventKind::Created, record);

    assert_eq!(sync.apply_realtime(&event).unwrap(), Applied::Inserted);
    assert_eq!(sync.pending_count(), 1);
    assert_eq!(reconciled_ids(&sync), vec![temp_id.clone(), "S9".to_string()]);
    let view = sync.rendered_view(EntityKind::Report);
    assert_eq!(view.ids(), vec!["S9", temp_id.as_str()]);
    assert_eq!(view.counters.pending, 1);
}

#[tokio::test]
async fn failed_operations_can_be_retried_or_dismissed() {
    let server = FakeServer::new();
    let sync = service(&server);
    let first = sync.enqueue(report("First")).unwrap();
    let second = sync.enqueue(report("Second")).unwrap();

    for _ in 0..2 {
        server.fail_with(RemoteError::Validation {
            status: 400,
            message: "bad".into(),
        });
    }
    sync.report_connectivity(true);
    sync.flush().await.unwrap();
    assert_eq!(sync.failures().len(), 2);

    let requeued = sync.retry_failure(&first.id).unwrap();
    assert_eq!(requeued.temp_id, first.temp_id);
    assert_eq!(requeued.retry_count, 0);
    assert_eq!(sync.pending_count(), 1);
    assert_eq!(sync.failures().len(), 1);

    sync.dismiss_failure(&second.id).unwrap();
    assert!(sync.failures().is_empty());
    assert!(matches!(
        sync.dismiss_failure(&second.id),
        Err(SyncError::UnknownFailure(_))
    ));

    sync.flush().await.unwrap();
    assert_eq!(sync.pending_count(), 0);
    let titles: Vec<_> = server
        .list(EntityKind::Report)
        .iter()
        .filter_map(|r| r.get_str("title").map(String::from))
        .collect();
    assert_eq!(titles, vec!["First"]);
}

#[tokio::test]
async fn reconnect_triggers_flush_and_refetch() {
    let server = FakeServer::new();
    let sync = service(&server);
    sync.start();

    sync.enqueue(report("Night patrol")).unwrap();
    server.confirm_as("M-5");

    // Flapping link settles online once
    for _ in 0..3 {
        sync.report_connectivity(true);
        sync.report_connectivity(false);
    }
    sync.report_connectivity(true);

    assert!(wait_until(|| sync.pending_count() == 0).await);
    assert!(wait_until(|| sync.rendered_view(EntityKind::Report).ids() == vec!["M-5"]).await);
    assert_eq!(server.calls(), vec!["create report -"]);

    sync.dispose();
}

#[tokio::test]
async fn queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("outpost.db");
    let server = FakeServer::new();

    let temp_id = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let sync = OfflineSync::init(store, server.clone(), SyncOptions::default()).unwrap();
        let op = sync.enqueue(report("Before restart")).unwrap();
        sync.check_in("A-1", Default::default()).unwrap();
        sync.dispose();
        op.temp_id.unwrap()
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let sync = OfflineSync::init(store, server.clone(), SyncOptions::default()).unwrap();
    assert_eq!(sync.pending_count(), 2);
    assert_eq!(sync.rendered_view(EntityKind::Report).ids(), vec![temp_id.as_str()]);

    sync.report_connectivity(true);
    sync.flush().await.unwrap();
    assert_eq!(server.calls(), vec!["create report -", "check_in asset A-1"]);
}

#[tokio::test]
async fn enqueue_fails_loudly_when_storage_rejects_writes() {
    let store = Arc::new(outpost_core::MemoryStore::new());
    let server = FakeServer::new();
    let sync = OfflineSync::init(store.clone(), server, SyncOptions::default()).unwrap();

    store.reject_writes(true);
    let err = sync.enqueue(report("Lost?")).unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)));
    assert_eq!(sync.pending_count(), 0);

    store.reject_writes(false);
    sync.enqueue(report("Kept")).unwrap();
    assert_eq!(sync.pending_count(), 1);
}
