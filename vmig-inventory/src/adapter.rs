//! Kind adapters and the event dispatch registry.
//!
//! An adapter is stateless and bound to exactly one record kind. The
//! registry is built once at startup from a declarative per-flavor
//! list; which kinds consume update events (versus bootstrap-only
//! listing) is configuration, not code.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::client::{Action, ClientError, Event, EventCode, ProviderClient};
use crate::error::{Error, Result};
use crate::model::store::{StoreError, Tx};
use crate::model::{Record, ResourceKind};

/// Maps remote-object change events to local-model CRUD for one kind.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn kind(&self) -> ResourceKind;

    /// Event codes this adapter consumes. Empty for kinds that only
    /// bootstrap through `list`.
    fn events(&self) -> Vec<EventCode>;

    /// Read the remote and mint local records for bulk insert.
    async fn list(&self, client: &dyn ProviderClient) -> Result<Vec<Record>>;

    /// Apply one event inside a store transaction.
    async fn apply(&self, client: &dyn ProviderClient, tx: &mut Tx, event: &Event) -> Result<()>;
}

/// The standard adapter; every kind shares the same CRUD shape.
pub struct KindAdapter {
    kind: ResourceKind,
    watched: bool,
}

impl KindAdapter {
    pub fn new(kind: ResourceKind, watched: bool) -> Self {
        Self { kind, watched }
    }

    /// Full snapshot for an entering object: from the event's assign
    /// set when the flavor delivers one, otherwise fetched by
    /// reference. `None` when the object already disappeared.
    async fn snapshot(
        &self,
        client: &dyn ProviderClient,
        event: &Event,
    ) -> Result<Option<Record>> {
        if event.change_set.is_empty() {
            match client.get(self.kind, &event.id).await {
                Ok(object) => Ok(Some(object.to_record())),
                Err(ClientError::NotFound(_)) => {
                    debug!(id = %event.id, "object disappeared before fetch, skipped");
                    Ok(None)
                }
                Err(err) => Err(err.into()),
            }
        } else {
            let mut record = Record::bare(&event.id);
            record.with(&event.change_set);
            Ok(Some(record))
        }
    }
}

#[async_trait]
impl Adapter for KindAdapter {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn events(&self) -> Vec<EventCode> {
        if !self.watched {
            return Vec::new();
        }
        [Action::Enter, Action::Modify, Action::Leave]
            .iter()
            .map(|action| EventCode {
                kind: self.kind,
                action: *action,
            })
            .collect()
    }

    async fn list(&self, client: &dyn ProviderClient) -> Result<Vec<Record>> {
        let objects = client.list(self.kind).await?;
        Ok(objects.iter().map(|o| o.to_record()).collect())
    }

    async fn apply(&self, client: &dyn ProviderClient, tx: &mut Tx, event: &Event) -> Result<()> {
        if event.kind != self.kind || !self.watched {
            return Err(Error::UnknownEvent(format!("{:?}", event.code())));
        }
        match event.action {
            Action::Enter => {
                let Some(record) = self.snapshot(client, event).await? else {
                    return Ok(());
                };
                match tx.insert(self.kind, &record).await {
                    Ok(()) => Ok(()),
                    Err(StoreError::Conflict(_)) => {
                        // The object survived a prior session; refresh
                        // the existing row instead.
                        let mut current = tx.get(self.kind, &record.pk).await?;
                        current.name = record.name;
                        current.parent = record.parent;
                        current.object = record.object;
                        current.updated();
                        tx.update(self.kind, &current).await?;
                        Ok(())
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Action::Modify => {
                let mut record = match tx.get(self.kind, &Record::pk_for(&event.id)).await {
                    Ok(record) => record,
                    Err(StoreError::NotFound(_)) => {
                        debug!(id = %event.id, "modify for unknown record, skipped");
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                };
                if event.change_set.is_empty() {
                    match client.get(self.kind, &event.id).await {
                        Ok(object) => {
                            record.name = object.name.clone();
                            record.parent = object.parent.clone();
                            record.object =
                                serde_json::Value::Object(object.properties).to_string();
                        }
                        Err(ClientError::NotFound(_)) => {
                            debug!(id = %event.id, "object disappeared before fetch, skipped");
                            return Ok(());
                        }
                        Err(err) => return Err(err.into()),
                    }
                } else {
                    record.with(&event.change_set);
                }
                record.updated();
                tx.update(self.kind, &record).await?;
                Ok(())
            }
            Action::Leave => match tx.delete(self.kind, &Record::pk_for(&event.id)).await {
                Ok(()) => Ok(()),
                Err(StoreError::NotFound(_)) => {
                    debug!(id = %event.id, "leave for unknown record, skipped");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            },
        }
    }
}

/// Per-provider adapter set with the event dispatch table.
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn Adapter>>,
    by_code: HashMap<EventCode, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    /// Build from a declarative `(kind, watched)` list.
    ///
    /// Panics on duplicate registration; shadowing an adapter is a
    /// programmer error, not a runtime condition.
    pub fn build(specs: &[(ResourceKind, bool)]) -> Self {
        let mut kinds = HashSet::new();
        for (kind, _) in specs {
            if !kinds.insert(*kind) {
                panic!("duplicate adapter registration: {}", kind.table());
            }
        }

        // Bootstrap runs in dependency order, parents before children,
        // regardless of the order the flavor listed its kinds in.
        let mut adapters: Vec<Arc<dyn Adapter>> = Vec::with_capacity(specs.len());
        for kind in ResourceKind::ALL {
            if let Some((_, watched)) = specs.iter().find(|(k, _)| *k == kind) {
                adapters.push(Arc::new(KindAdapter::new(kind, *watched)));
            }
        }

        let mut by_code = HashMap::new();
        for adapter in &adapters {
            for code in adapter.events() {
                if by_code.insert(code, adapter.clone()).is_some() {
                    panic!("duplicate event registration: {code:?}");
                }
            }
        }

        Self { adapters, by_code }
    }

    /// The vSphere adapter set. Only virtual machines arrive through
    /// the property-filter stream; everything else is bootstrap-only.
    pub fn vsphere() -> Self {
        Self::build(&[
            (ResourceKind::Datacenter, false),
            (ResourceKind::Folder, false),
            (ResourceKind::Cluster, false),
            (ResourceKind::Host, false),
            (ResourceKind::Network, false),
            (ResourceKind::Datastore, false),
            (ResourceKind::Vm, true),
        ])
    }

    /// The oVirt adapter set. Networks, storage domains and VNIC
    /// profiles are bootstrap-only.
    pub fn ovirt() -> Self {
        Self::build(&[
            (ResourceKind::Datacenter, true),
            (ResourceKind::Cluster, true),
            (ResourceKind::Host, true),
            (ResourceKind::Network, false),
            (ResourceKind::StorageDomain, false),
            (ResourceKind::VnicProfile, false),
            (ResourceKind::Vm, true),
        ])
    }

    /// The single adapter responsible for an event code.
    pub fn for_code(&self, code: &EventCode) -> Option<&Arc<dyn Adapter>> {
        self.by_code.get(code)
    }

    /// Adapters in bootstrap dependency order.
    pub fn bootstrap_order(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }
}
