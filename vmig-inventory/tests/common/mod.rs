//! Shared test utilities: a scripted provider client and provider
//! fixtures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use vmig_inventory::client::{
    Action, ClientError, Event, PropertyChange, PropertyOp, ProviderClient, RemoteObject,
    UpdateSet,
};
use vmig_inventory::model::ResourceKind;
use vmig_inventory::provider::{Provider, ProviderSpec, ProviderType, Secret, SecretRef};

/// Feed handle: each sent item is returned from one
/// `wait_for_updates` call. Dropping the handle ends the session.
pub type Feed = mpsc::Sender<Result<UpdateSet, ClientError>>;

/// A provider client scripted by the test.
pub struct FakeClient {
    objects: StdMutex<HashMap<(ResourceKind, String), RemoteObject>>,
    updates: Mutex<mpsc::Receiver<Result<UpdateSet, ClientError>>>,
}

impl FakeClient {
    pub fn new() -> (Arc<Self>, Feed) {
        let (tx, rx) = mpsc::channel(16);
        (
            Arc::new(Self {
                objects: StdMutex::new(HashMap::new()),
                updates: Mutex::new(rx),
            }),
            tx,
        )
    }

    /// Make an object visible to `list` and `get`.
    pub fn put(&self, kind: ResourceKind, object: RemoteObject) {
        self.objects
            .lock()
            .unwrap()
            .insert((kind, object.id.clone()), object);
    }

    pub fn remove(&self, kind: ResourceKind, id: &str) {
        self.objects.lock().unwrap().remove(&(kind, id.to_string()));
    }
}

#[async_trait]
impl ProviderClient for FakeClient {
    async fn connect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteObject>, ClientError> {
        let mut objects: Vec<RemoteObject> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, o)| o.clone())
            .collect();
        objects.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(objects)
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<RemoteObject, ClientError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, id.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(id.to_string()))
    }

    async fn wait_for_updates(&self, _cursor: &str) -> Result<UpdateSet, ClientError> {
        match self.updates.lock().await.recv().await {
            Some(result) => result,
            // Script exhausted: end of session.
            None => Ok(UpdateSet::default()),
        }
    }

    async fn cancel_waits(&self) {}

    async fn logout(&self) {}
}

pub fn object(id: &str, name: &str) -> RemoteObject {
    RemoteObject {
        id: id.to_string(),
        name: name.to_string(),
        parent: None,
        properties: match json!({ "name": name }) {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        },
    }
}

pub fn assign(name: &str, value: serde_json::Value) -> PropertyChange {
    PropertyChange {
        name: name.to_string(),
        op: PropertyOp::Assign,
        value,
    }
}

pub fn event(
    kind: ResourceKind,
    action: Action,
    id: &str,
    change_set: Vec<PropertyChange>,
) -> Event {
    Event {
        kind,
        action,
        id: id.to_string(),
        change_set,
    }
}

/// A batch wrapped the way the feed wants it.
pub fn batch(cursor: &str, events: Vec<Event>) -> Result<UpdateSet, ClientError> {
    Ok(UpdateSet {
        cursor: Some(cursor.to_string()),
        batch: events,
        truncated: false,
    })
}

pub fn test_provider(uid: &str) -> Provider {
    Provider {
        kind: "Provider".to_string(),
        namespace: "konveyor".to_string(),
        name: "engine".to_string(),
        uid: uid.to_string(),
        generation: 1,
        spec: ProviderSpec {
            r#type: ProviderType::Ovirt,
            url: "https://engine.example.com/api".to_string(),
            secret: SecretRef {
                namespace: "konveyor".to_string(),
                name: "engine-creds".to_string(),
            },
        },
        status: Default::default(),
    }
}

pub fn test_secret() -> Secret {
    Secret {
        user: "admin@internal".to_string(),
        password: "secret".to_string(),
        thumbprint: None,
    }
}
