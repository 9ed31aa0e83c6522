//! Query surface integration tests.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::net::TcpListener;

use common::{object, test_provider, FakeClient};
use vmig_inventory::adapter::AdapterRegistry;
use vmig_inventory::container::ReconcilerContainer;
use vmig_inventory::model::ResourceKind;
use vmig_inventory::reconciler::Reconciler;
use vmig_inventory::web;

/// Serves the query surface over a started reconciler.
struct TestServer {
    addr: SocketAddr,
    client: reqwest::Client,
    reconciler: Arc<Reconciler>,
    // Keeps the fake session alive for the duration of the test.
    _feed: common::Feed,
    _dir: TempDir,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let dir = TempDir::new().unwrap();
        let (fake, feed) = FakeClient::new();
        fake.put(ResourceKind::Datacenter, object("dc-1", "main"));
        fake.put(ResourceKind::Vm, object("vm-1", "worker"));
        fake.put(ResourceKind::Vm, object("vm-2", "worker"));
        fake.put(ResourceKind::Vm, object("vm-3", "bastion"));

        let reconciler = Arc::new(Reconciler::new(
            test_provider("uid-1"),
            fake,
            AdapterRegistry::ovirt(),
            dir.path(),
        ));
        reconciler.start().await.expect("reconciler start");

        let container = Arc::new(ReconcilerContainer::new());
        container.add(reconciler.provider().key(), reconciler.clone());

        let router = web::router(container);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("server error");
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            reconciler,
            _feed: feed,
            _dir: dir,
            shutdown_tx,
        }
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("http://{}{}", self.addr, path))
            .send()
            .await
            .expect("request failed")
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        self.reconciler.shutdown(false).await;
    }
}

#[tokio::test]
async fn collections_and_items_are_served() {
    let server = TestServer::spawn().await;

    let response = server.get("/providers/konveyor/engine/vms").await;
    assert_eq!(response.status(), 200);
    let vms: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(vms.len(), 3);

    let response = server.get("/providers/konveyor/engine/datacenters").await;
    assert_eq!(response.status(), 200);
    let dcs: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(dcs.len(), 1);
    assert_eq!(dcs[0]["id"], "dc-1");

    // The item view expands the encoded blob.
    let response = server.get("/providers/konveyor/engine/vms/vm-1").await;
    assert_eq!(response.status(), 200);
    let vm: serde_json::Value = response.json().await.unwrap();
    assert_eq!(vm["id"], "vm-1");
    assert_eq!(vm["object"]["name"], "worker");

    server.stop().await;
}

#[tokio::test]
async fn name_query_filters_collections() {
    let server = TestServer::spawn().await;

    let response = server
        .get("/providers/konveyor/engine/vms?name=worker")
        .await;
    assert_eq!(response.status(), 200);
    let vms: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(vms.len(), 2);
    assert!(vms.iter().all(|vm| vm["name"] == "worker"));

    server.stop().await;
}

#[tokio::test]
async fn unknown_paths_return_not_found() {
    let server = TestServer::spawn().await;

    for path in [
        "/providers/konveyor/missing/vms",
        "/providers/konveyor/engine/pods",
        "/providers/konveyor/engine/vms/vm-404",
    ] {
        let response = server.get(path).await;
        assert_eq!(response.status(), 404, "{path}");
    }

    server.stop().await;
}
