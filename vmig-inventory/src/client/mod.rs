//! Provider clients.
//!
//! A provider client adapts one remote virtualization API to the
//! reconciler's contract: bulk enumeration per kind plus a long-poll
//! incremental update cursor. One implementation per provider flavor.

pub mod ovirt;
pub mod vsphere;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;
use crate::model::{Record, Ref, ResourceKind};
use crate::provider::{Provider, ProviderType, Secret};

pub use ovirt::OvirtClient;
pub use vsphere::VsphereClient;

/// Client errors.
///
/// `Transport` is retryable; `Auth` is fatal to the owning reconciler.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The endpoint is unreachable or returned a retryable status.
    #[error("transport: {0}")]
    Transport(String),

    /// Credentials rejected.
    #[error("authorization rejected: {0}")]
    Auth(String),

    /// The referenced object disappeared between event and fetch.
    #[error("not found: {0}")]
    NotFound(String),

    /// The endpoint returned something the client cannot interpret.
    #[error("protocol: {0}")]
    Protocol(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

/// Upstream event action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Enter,
    Modify,
    Leave,
}

/// A single property change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyChange {
    pub name: String,
    pub op: PropertyOp,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyOp {
    Assign,
    Add,
    Remove,
}

/// An item read from the upstream update stream.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: ResourceKind,
    pub action: Action,
    /// Native identifier of the object the event refers to.
    pub id: String,
    /// Ordered property changes. For `Enter` the full initial property
    /// set as assigns; may be empty for flavors whose adapters fetch.
    pub change_set: Vec<PropertyChange>,
}

impl Event {
    pub fn code(&self) -> EventCode {
        EventCode {
            kind: self.kind,
            action: self.action,
        }
    }
}

/// Dispatch key mapping an upstream event to its adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventCode {
    pub kind: ResourceKind,
    pub action: Action,
}

/// One `WaitForUpdates` round trip.
///
/// No cursor and an empty batch signals end-of-session. `truncated`
/// means the server returned a partial view and the caller should not
/// yet claim consistency.
#[derive(Debug, Clone, Default)]
pub struct UpdateSet {
    pub cursor: Option<String>,
    pub batch: Vec<Event>,
    pub truncated: bool,
}

impl UpdateSet {
    pub fn is_end_of_session(&self) -> bool {
        self.cursor.is_none() && self.batch.is_empty()
    }
}

/// A remote object snapshot.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    pub parent: Option<Ref>,
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl RemoteObject {
    /// Mint a local record from the snapshot.
    pub fn to_record(&self) -> Record {
        Record {
            pk: Record::pk_for(&self.id),
            id: self.id.clone(),
            name: self.name.clone(),
            parent: self.parent.clone(),
            revision: 0,
            object: serde_json::Value::Object(self.properties.clone()).to_string(),
        }
    }
}

/// Adapter over a remote virtualization API.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Establish a session. Fails with `Transport` (retryable) or
    /// `Auth` (fatal).
    async fn connect(&self) -> Result<(), ClientError>;

    /// Bulk-enumerate a kind. Finite, non-restartable.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteObject>, ClientError>;

    /// Fetch one object by native identifier.
    async fn get(&self, kind: ResourceKind, id: &str) -> Result<RemoteObject, ClientError>;

    /// Block until the endpoint returns a batch past the cursor, or
    /// the caller cancels out-of-band. An empty cursor requests the
    /// head of the stream.
    async fn wait_for_updates(&self, cursor: &str) -> Result<UpdateSet, ClientError>;

    /// Best-effort cancel of pending waits on the underlying session.
    async fn cancel_waits(&self);

    /// End the session. Best-effort.
    async fn logout(&self);
}

/// Build the client for a provider's flavor.
///
/// Configuration problems (bad URL, empty credentials) are fatal at
/// construction.
pub fn new_client(provider: &Provider, secret: &Secret) -> Result<Arc<dyn ProviderClient>, Error> {
    if secret.user.is_empty() {
        return Err(Error::Configuration(format!(
            "provider {}: secret has no user",
            provider.name
        )));
    }
    match provider.spec.r#type {
        ProviderType::Vsphere => Ok(Arc::new(VsphereClient::new(&provider.spec.url, secret)?)),
        ProviderType::Ovirt => Ok(Arc::new(OvirtClient::new(&provider.spec.url, secret)?)),
    }
}

/// Host portion of a provider URL, used for display names.
pub fn host_of(url: &str) -> &str {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    rest.split('/').next().unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_strips_scheme_and_path() {
        assert_eq!(host_of("https://vcenter.example.com/sdk"), "vcenter.example.com");
        assert_eq!(host_of("http://engine:8443/ovirt-engine/api"), "engine:8443");
        assert_eq!(host_of("esx-1.example.com"), "esx-1.example.com");
    }

    #[test]
    fn end_of_session_detection() {
        assert!(UpdateSet::default().is_end_of_session());
        let set = UpdateSet {
            cursor: Some("7".into()),
            ..Default::default()
        };
        assert!(!set.is_end_of_session());
    }
}
