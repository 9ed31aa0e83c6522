//! Inventory record model.
//!
//! Every typed record shares the same base shape: a primary key derived
//! from the remote object's native identifier, the identifier itself,
//! an encoded snapshot of the last-known properties, and an optional
//! parent reference. Records live in one table per kind.

pub mod store;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::client::{PropertyChange, PropertyOp};

/// Closed taxonomy of inventory record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Datacenter,
    Folder,
    Cluster,
    Host,
    Network,
    Datastore,
    VnicProfile,
    StorageDomain,
    Vm,
}

impl ResourceKind {
    /// Every kind in bootstrap dependency order: parents before
    /// children, VMs last.
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Datacenter,
        ResourceKind::Folder,
        ResourceKind::Cluster,
        ResourceKind::Host,
        ResourceKind::Network,
        ResourceKind::Datastore,
        ResourceKind::VnicProfile,
        ResourceKind::StorageDomain,
        ResourceKind::Vm,
    ];

    /// Table name, also the query-surface collection name.
    pub fn table(&self) -> &'static str {
        match self {
            ResourceKind::Datacenter => "datacenters",
            ResourceKind::Folder => "folders",
            ResourceKind::Cluster => "clusters",
            ResourceKind::Host => "hosts",
            ResourceKind::Network => "networks",
            ResourceKind::Datastore => "datastores",
            ResourceKind::VnicProfile => "vnicprofiles",
            ResourceKind::StorageDomain => "storagedomains",
            ResourceKind::Vm => "vms",
        }
    }

    pub fn from_collection(collection: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.table() == collection)
    }
}

/// Reference to another record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    pub kind: ResourceKind,
    pub id: String,
}

/// Base inventory record.
///
/// The revision is a monotone counter bumped by the reconciler on
/// every applied change; the store uses it for optimistic concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Primary key: a deterministic digest of the native identifier.
    pub pk: String,
    /// The remote object's native identifier.
    pub id: String,
    /// Name index attribute.
    pub name: String,
    /// Parent reference, when the remote reports one.
    pub parent: Option<Ref>,
    pub revision: i64,
    /// JSON-encoded property snapshot.
    pub object: String,
}

impl Record {
    /// Deterministic primary key for a native identifier.
    pub fn pk_for(id: &str) -> String {
        use std::fmt::Write;

        let digest = Sha256::digest(id.as_bytes());
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// A record carrying nothing but its identifier, as used for
    /// deletes.
    pub fn bare(id: &str) -> Self {
        Self {
            pk: Self::pk_for(id),
            id: id.to_string(),
            name: String::new(),
            parent: None,
            revision: 0,
            object: "{}".to_string(),
        }
    }

    /// Overlay a change-set onto the encoded property snapshot.
    pub fn with(&mut self, change_set: &[PropertyChange]) {
        let mut object: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.object).unwrap_or_default();
        for change in change_set {
            match change.op {
                PropertyOp::Assign => {
                    object.insert(change.name.clone(), change.value.clone());
                }
                PropertyOp::Add => match object.get_mut(&change.name) {
                    Some(serde_json::Value::Array(items)) => items.push(change.value.clone()),
                    _ => {
                        object.insert(
                            change.name.clone(),
                            serde_json::Value::Array(vec![change.value.clone()]),
                        );
                    }
                },
                PropertyOp::Remove => {
                    object.remove(&change.name);
                }
            }
        }
        if let Some(serde_json::Value::String(name)) = object.get("name") {
            self.name = name.clone();
        }
        self.object = serde_json::Value::Object(object).to_string();
    }

    /// Decoded property snapshot.
    pub fn properties(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str(&self.object).unwrap_or_default()
    }

    /// Bump the revision. Should only be called by the reconciler.
    pub fn updated(&mut self) {
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assign(name: &str, value: serde_json::Value) -> PropertyChange {
        PropertyChange {
            name: name.to_string(),
            op: PropertyOp::Assign,
            value,
        }
    }

    #[test]
    fn pk_is_deterministic() {
        assert_eq!(Record::pk_for("vm-1"), Record::pk_for("vm-1"));
        assert_ne!(Record::pk_for("vm-1"), Record::pk_for("vm-2"));
    }

    #[test]
    fn with_overlays_assignments() {
        let mut record = Record::bare("vm-1");
        record.with(&[
            assign("name", json!("worker")),
            assign("memoryMB", json!(4096)),
        ]);
        record.with(&[assign("memoryMB", json!(8192))]);

        let props = record.properties();
        assert_eq!(props["name"], json!("worker"));
        assert_eq!(props["memoryMB"], json!(8192));
        assert_eq!(record.name, "worker");
    }

    #[test]
    fn with_handles_add_and_remove() {
        let mut record = Record::bare("vm-1");
        record.with(&[PropertyChange {
            name: "tags".into(),
            op: PropertyOp::Add,
            value: json!("a"),
        }]);
        record.with(&[PropertyChange {
            name: "tags".into(),
            op: PropertyOp::Add,
            value: json!("b"),
        }]);
        assert_eq!(record.properties()["tags"], json!(["a", "b"]));

        record.with(&[PropertyChange {
            name: "tags".into(),
            op: PropertyOp::Remove,
            value: serde_json::Value::Null,
        }]);
        assert!(!record.properties().contains_key("tags"));
    }

    #[test]
    fn collection_names_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_collection(kind.table()), Some(kind));
        }
        assert_eq!(ResourceKind::from_collection("pods"), None);
    }
}
