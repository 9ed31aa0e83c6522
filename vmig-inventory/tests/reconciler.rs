//! Reconciler integration tests: bootstrap, event application,
//! conflict retry and failure modes, driven by a scripted client.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;
use tokio::time::sleep;

use common::{assign, batch, event, object, test_provider, FakeClient};
use vmig_inventory::adapter::AdapterRegistry;
use vmig_inventory::client::{Action, ClientError, UpdateSet};
use vmig_inventory::model::store::Store;
use vmig_inventory::model::{Record, ResourceKind};
use vmig_inventory::reconciler::{Phase, Reconciler};

const DEADLINE: Duration = Duration::from_secs(5);

async fn wait_for(mut probe: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if probe() {
            return true;
        }
        sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Poll the store until the record satisfies the probe.
async fn wait_for_record(
    store: &Store,
    kind: ResourceKind,
    id: &str,
    probe: impl Fn(&Record) -> bool,
) -> bool {
    let pk = Record::pk_for(id);
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if let Ok(record) = store.get(kind, &pk).await {
            if probe(&record) {
                return true;
            }
        }
        sleep(Duration::from_millis(25)).await;
    }
    false
}

/// Standard fixture: one datacenter containing one cluster with one
/// host running one VM.
fn seeded_client() -> (Arc<FakeClient>, common::Feed) {
    let (client, feed) = FakeClient::new();
    client.put(ResourceKind::Datacenter, object("dc-1", "main"));
    client.put(ResourceKind::Cluster, object("cl-1", "default"));
    client.put(ResourceKind::Host, object("h-1", "host-1"));
    client.put(ResourceKind::Vm, object("vm-1", "worker"));
    (client, feed)
}

fn reconciler(client: Arc<FakeClient>, dir: &TempDir) -> Arc<Reconciler> {
    Arc::new(Reconciler::new(
        test_provider("uid-1"),
        client,
        AdapterRegistry::ovirt(),
        dir.path(),
    ))
}

#[tokio::test]
async fn bootstrap_then_consistency() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client, &dir);

    assert_eq!(reconciler.phase(), Phase::Created);
    reconciler.start().await.unwrap();
    assert_eq!(reconciler.phase(), Phase::Watching);
    assert!(!reconciler.has_consistency());

    let store = reconciler.db().expect("store open");
    let vms = store.list(ResourceKind::Vm, None).await.unwrap();
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].id, "vm-1");
    assert_eq!(vms[0].revision, 0);
    assert_eq!(store.list(ResourceKind::Host, None).await.unwrap().len(), 1);

    // The first non-truncated round trip latches consistency.
    feed.send(batch("1", vec![])).await.unwrap();
    assert!(wait_for(|| reconciler.has_consistency()).await);

    // Reset clears the latch; nothing else does.
    reconciler.reset();
    assert!(!reconciler.has_consistency());

    reconciler.shutdown(false).await;
    assert_eq!(reconciler.phase(), Phase::Stopped);
    assert!(reconciler.db().is_none());
}

#[tokio::test]
async fn truncated_batches_do_not_latch_consistency() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client, &dir);
    reconciler.start().await.unwrap();

    feed.send(Ok(UpdateSet {
        cursor: Some("1".into()),
        batch: vec![],
        truncated: true,
    }))
    .await
    .unwrap();
    sleep(Duration::from_millis(200)).await;
    assert!(!reconciler.has_consistency());

    feed.send(batch("2", vec![])).await.unwrap();
    assert!(wait_for(|| reconciler.has_consistency()).await);

    reconciler.shutdown(false).await;
}

#[tokio::test]
async fn delete_then_recreate_keeps_one_record() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client, &dir);
    reconciler.start().await.unwrap();
    let store = reconciler.db().unwrap();

    feed.send(batch(
        "1",
        vec![
            event(ResourceKind::Vm, Action::Leave, "vm-1", vec![]),
            event(
                ResourceKind::Vm,
                Action::Enter,
                "vm-1",
                vec![
                    assign("name", json!("worker-b")),
                    assign("memoryMB", json!(8192)),
                ],
            ),
        ],
    ))
    .await
    .unwrap();

    assert!(
        wait_for_record(&store, ResourceKind::Vm, "vm-1", |r| r.name == "worker-b").await,
        "recreated record never appeared"
    );

    let vms = store.list(ResourceKind::Vm, None).await.unwrap();
    assert_eq!(vms.len(), 1);
    let props = vms[0].properties();
    assert_eq!(props["name"], json!("worker-b"));
    assert_eq!(props["memoryMB"], json!(8192));

    reconciler.shutdown(false).await;
}

#[tokio::test]
async fn enter_for_existing_record_refreshes_in_place() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client, &dir);
    reconciler.start().await.unwrap();
    let store = reconciler.db().unwrap();

    // vm-1 was bootstrapped at revision 0; after a session restart the
    // stream re-enters objects that survived it.
    feed.send(batch(
        "1",
        vec![event(
            ResourceKind::Vm,
            Action::Enter,
            "vm-1",
            vec![assign("name", json!("worker")), assign("cpus", json!(8))],
        )],
    ))
    .await
    .unwrap();

    assert!(
        wait_for_record(&store, ResourceKind::Vm, "vm-1", |r| {
            r.revision == 1 && r.properties().get("cpus") == Some(&json!(8))
        })
        .await,
        "re-entered record was not refreshed"
    );

    // Still exactly one row, its blob matching the second enter.
    let vms = store.list(ResourceKind::Vm, None).await.unwrap();
    assert_eq!(vms.len(), 1);
    let props = vms[0].properties();
    assert_eq!(props["name"], json!("worker"));
    assert_eq!(props["cpus"], json!(8));
    assert_eq!(reconciler.phase(), Phase::Watching);

    reconciler.shutdown(false).await;
}

#[tokio::test]
async fn transport_errors_reconnect_and_recover() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client, &dir);
    reconciler.start().await.unwrap();

    feed.send(Err(ClientError::Transport("connection reset".into())))
        .await
        .unwrap();
    assert!(wait_for(|| reconciler.phase() == Phase::Reconnecting).await);
    assert!(!reconciler.has_consistency());

    // The loop re-polls after the backoff and the session resumes.
    feed.send(batch("1", vec![])).await.unwrap();
    assert!(wait_for(|| reconciler.has_consistency()).await);
    assert_eq!(reconciler.phase(), Phase::Watching);

    reconciler.shutdown(false).await;
}

#[tokio::test]
async fn conflict_is_retried_until_the_writer_yields() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client.clone(), &dir);
    reconciler.start().await.unwrap();
    let store = reconciler.db().unwrap();

    // Latch consistency first so the conflict visibly leaves it alone.
    feed.send(batch("1", vec![])).await.unwrap();
    assert!(wait_for(|| reconciler.has_consistency()).await);

    // A competing writer holds the database write lock.
    let blocker_store = Store::open(&dir.path().join("uid-1.db"), false)
        .await
        .unwrap();
    let mut blocker = blocker_store.begin().await.unwrap();
    blocker
        .insert(ResourceKind::Folder, &Record::bare("blocker"))
        .await
        .unwrap();

    client.put(ResourceKind::Vm, {
        let mut o = object("vm-1", "worker");
        o.properties.insert("memoryMB".to_string(), json!(8192));
        o
    });
    feed.send(batch(
        "2",
        vec![event(ResourceKind::Vm, Action::Modify, "vm-1", vec![])],
    ))
    .await
    .unwrap();

    // First attempt runs into the lock and backs off.
    sleep(Duration::from_millis(600)).await;
    assert!(reconciler.has_consistency());
    drop(blocker);
    blocker_store.close(false).await;

    assert!(
        wait_for_record(&store, ResourceKind::Vm, "vm-1", |r| {
            r.properties().get("memoryMB") == Some(&json!(8192))
        })
        .await,
        "conflicted update never landed"
    );
    assert!(reconciler.has_consistency());

    reconciler.shutdown(false).await;
}

#[tokio::test]
async fn auth_error_stops_the_reconciler() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client, &dir);
    reconciler.start().await.unwrap();

    feed.send(Err(ClientError::Auth("credentials rejected".into())))
        .await
        .unwrap();
    assert!(wait_for(|| reconciler.phase() == Phase::Stopped).await);
    assert!(reconciler.db().is_none());
}

#[tokio::test]
async fn end_of_session_stops_cleanly() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client, &dir);
    reconciler.start().await.unwrap();

    drop(feed);
    assert!(wait_for(|| reconciler.phase() == Phase::Stopped).await);
}

#[tokio::test]
async fn unknown_events_are_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client.clone(), &dir);
    reconciler.start().await.unwrap();
    let store = reconciler.db().unwrap();

    // Networks are bootstrap-only in the oVirt adapter set; their
    // events have no registered adapter.
    client.put(ResourceKind::Vm, {
        let mut o = object("vm-1", "worker");
        o.properties.insert("cpus".to_string(), json!(4));
        o
    });
    feed.send(batch(
        "1",
        vec![
            event(ResourceKind::Network, Action::Enter, "net-9", vec![]),
            event(ResourceKind::Vm, Action::Modify, "vm-1", vec![]),
        ],
    ))
    .await
    .unwrap();

    assert!(
        wait_for_record(&store, ResourceKind::Vm, "vm-1", |r| {
            r.properties().get("cpus") == Some(&json!(4))
        })
        .await
    );
    assert_eq!(reconciler.phase(), Phase::Watching);

    reconciler.shutdown(false).await;
}

#[tokio::test]
async fn modify_for_vanished_object_is_benign() {
    let dir = TempDir::new().unwrap();
    let (client, feed) = seeded_client();
    let reconciler = reconciler(client.clone(), &dir);
    reconciler.start().await.unwrap();

    // The object disappears from the remote between event and fetch.
    client.remove(ResourceKind::Vm, "vm-1");
    feed.send(batch(
        "1",
        vec![event(ResourceKind::Vm, Action::Modify, "vm-1", vec![])],
    ))
    .await
    .unwrap();
    feed.send(batch("2", vec![])).await.unwrap();

    assert!(wait_for(|| reconciler.has_consistency()).await);
    assert_eq!(reconciler.phase(), Phase::Watching);

    reconciler.shutdown(false).await;
}
