//! Per-provider inventory reconciler.
//!
//! Owns a provider client, an adapter registry and the provider's
//! inventory store. `start` bootstraps the inventory with a bulk list
//! per kind, then a single background task consumes the incremental
//! update stream and applies each event in its own transaction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::adapter::AdapterRegistry;
use crate::client::{host_of, ClientError, Event, ProviderClient};
use crate::error::{Error, Result};
use crate::model::store::Store;
use crate::provider::Provider;

/// Fixed backoff between conflict retries.
const CONFLICT_BACKOFF: Duration = Duration::from_secs(1);
/// Pause before re-polling after a transport error.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Reconciler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Starting,
    Listing,
    Watching,
    Reconnecting,
    Stopped,
}

/// Outcome of applying one event.
enum Applied {
    Done,
    Cancelled,
    Failed,
}

pub struct Reconciler {
    provider: Provider,
    name: String,
    client: Arc<dyn ProviderClient>,
    registry: AdapterRegistry,
    db_path: PathBuf,
    store: RwLock<Option<Arc<Store>>>,
    consistent: AtomicBool,
    phase: RwLock<Phase>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(
        provider: Provider,
        client: Arc<dyn ProviderClient>,
        registry: AdapterRegistry,
        data_dir: &Path,
    ) -> Self {
        let name = host_of(&provider.spec.url).to_string();
        let db_path = data_dir.join(format!("{}.db", provider.uid));
        Self {
            provider,
            name,
            client,
            registry,
            db_path,
            store: RwLock::new(None),
            consistent: AtomicBool::new(false),
            phase: RwLock::new(Phase::Created),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// The endpoint host.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// The inventory store. `None` outside `Starting..Watching`.
    pub fn db(&self) -> Option<Arc<Store>> {
        self.store.read().unwrap().clone()
    }

    /// Latched true after the first non-truncated batch; cleared only
    /// by `reset`.
    pub fn has_consistency(&self) -> bool {
        self.consistent.load(Ordering::SeqCst)
    }

    /// Clear the consistency latch. Used when the caller knows an
    /// event has been missed, e.g. on session re-establishment.
    pub fn reset(&self) {
        self.consistent.store(false, Ordering::SeqCst);
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read().unwrap()
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.write().unwrap() = phase;
    }

    /// Open the store, connect, bootstrap every kind, then launch the
    /// update loop and return. Any bootstrap error leaves the
    /// reconciler stopped with the store closed.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.set_phase(Phase::Starting);
        let store = match Store::open(&self.db_path, true).await {
            Ok(store) => Arc::new(store),
            Err(err) => {
                self.set_phase(Phase::Stopped);
                return Err(err.into());
            }
        };
        if let Err(err) = self.client.connect().await {
            store.close(false).await;
            self.set_phase(Phase::Stopped);
            return Err(err.into());
        }

        self.set_phase(Phase::Listing);
        if let Err(err) = self.bootstrap(&store).await {
            store.close(false).await;
            self.set_phase(Phase::Stopped);
            return Err(err);
        }
        *self.store.write().unwrap() = Some(store);

        let (sender, receiver) = watch::channel(false);
        *self.shutdown.lock().unwrap() = Some(sender);
        let worker = Arc::clone(self);
        *self.task.lock().unwrap() = Some(tokio::spawn(async move {
            worker.update_loop(receiver).await;
        }));
        self.set_phase(Phase::Watching);
        info!(name = %self.name, "started");

        Ok(())
    }

    /// Cancel the update loop, log out of the remote session and close
    /// the store. `purge` is an advisory hint passed to the store.
    pub async fn shutdown(&self, purge: bool) {
        let sender = self.shutdown.lock().unwrap().take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        // When the loop never ran the store is still open here.
        let store = self.store.write().unwrap().take();
        if let Some(store) = store {
            store.close(purge).await;
        }
        self.set_phase(Phase::Stopped);
    }

    /// Bulk-list every kind in dependency order, one transaction per
    /// kind, records inserted at revision 0.
    async fn bootstrap(&self, store: &Store) -> Result<()> {
        for adapter in self.registry.bootstrap_order() {
            let records = adapter.list(self.client.as_ref()).await?;
            let mut tx = store.begin().await?;
            let count = records.len();
            for record in &records {
                tx.insert(adapter.kind(), record).await?;
            }
            tx.commit().await?;
            debug!(name = %self.name, kind = %adapter.kind().table(), count, "bootstrapped");
        }

        Ok(())
    }

    async fn update_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut cursor = String::new();
        'session: loop {
            let set = tokio::select! {
                _ = shutdown.changed() => {
                    self.client.cancel_waits().await;
                    break 'session;
                }
                result = self.client.wait_for_updates(&cursor) => match result {
                    Ok(set) => set,
                    Err(ClientError::Transport(err)) => {
                        warn!(name = %self.name, %err, "transport error, waiting to reconnect");
                        self.set_phase(Phase::Reconnecting);
                        tokio::select! {
                            _ = shutdown.changed() => break 'session,
                            _ = sleep(RECONNECT_BACKOFF) => continue 'session,
                        }
                    }
                    Err(err) => {
                        error!(name = %self.name, %err, "update stream failed");
                        break 'session;
                    }
                }
            };
            self.set_phase(Phase::Watching);
            if set.is_end_of_session() {
                info!(name = %self.name, "session ended");
                break 'session;
            }
            if let Some(next) = set.cursor {
                cursor = next;
            }
            let Some(store) = self.db() else {
                break 'session;
            };
            for event in &set.batch {
                match self.apply_event(&store, event, &mut shutdown).await {
                    Applied::Done => {}
                    Applied::Cancelled => {
                        self.client.cancel_waits().await;
                        break 'session;
                    }
                    Applied::Failed => break 'session,
                }
            }
            if !set.truncated {
                self.consistent.store(true, Ordering::SeqCst);
            }
        }

        self.client.logout().await;
        let store = self.store.write().unwrap().take();
        if let Some(store) = store {
            store.close(false).await;
        }
        self.set_phase(Phase::Stopped);
        info!(name = %self.name, "shutdown");
    }

    /// Dispatch one event to its adapter in a fresh transaction.
    ///
    /// Conflicts retry on a fixed backoff until cancellation; unknown
    /// events and benign not-found races are logged and skipped; any
    /// other error fails the loop.
    async fn apply_event(
        &self,
        store: &Store,
        event: &Event,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Applied {
        let Some(adapter) = self.registry.for_code(&event.code()) else {
            warn!(
                name = %self.name,
                kind = %event.kind.table(),
                action = ?event.action,
                "unknown event, skipped"
            );
            return Applied::Done;
        };
        let adapter = adapter.clone();
        loop {
            let mut tx = match store.begin().await {
                Ok(tx) => tx,
                Err(err) => {
                    error!(name = %self.name, %err, "transaction failed");
                    return Applied::Failed;
                }
            };
            let outcome = match adapter.apply(self.client.as_ref(), &mut tx, event).await {
                Ok(()) => tx.commit().await.map_err(Error::from),
                Err(err) => {
                    drop(tx);
                    Err(err)
                }
            };
            match outcome {
                Ok(()) => return Applied::Done,
                Err(err) if err.is_conflict() => {
                    debug!(name = %self.name, id = %event.id, %err, "conflict, backing off");
                    tokio::select! {
                        _ = shutdown.changed() => return Applied::Cancelled,
                        _ = sleep(CONFLICT_BACKOFF) => continue,
                    }
                }
                Err(Error::UnknownEvent(err)) => {
                    warn!(name = %self.name, %err, "unknown event, skipped");
                    return Applied::Done;
                }
                Err(err) if err.is_not_found() => {
                    debug!(name = %self.name, id = %event.id, %err, "benign race, skipped");
                    return Applied::Done;
                }
                Err(err) => {
                    error!(name = %self.name, id = %event.id, %err, "apply failed");
                    return Applied::Failed;
                }
            }
        }
    }
}
