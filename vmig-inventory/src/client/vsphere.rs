//! vSphere provider client.
//!
//! Speaks the JSON projection of the vim25 SDK surface at
//! `https://<host>/sdk`: session login, property retrieval, and the
//! property-filter update stream (`WaitForUpdatesEx`) with its version
//! cursor and Enter/Modify/Leave batches.

use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    Action, ClientError, Event, PropertyChange, PropertyOp, ProviderClient, RemoteObject,
    UpdateSet,
};
use crate::error::Error;
use crate::model::{Ref, ResourceKind};
use crate::provider::Secret;

const SESSION_HEADER: &str = "vmware-api-session-id";

pub struct VsphereClient {
    http: reqwest::Client,
    base: String,
    user: String,
    password: String,
    #[allow(dead_code)]
    thumbprint: Option<String>,
    session: RwLock<Option<String>>,
}

impl VsphereClient {
    pub fn new(url: &str, secret: &Secret) -> Result<Self, Error> {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(Error::Configuration(format!("not a URL: {url}")));
        }
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base: url.trim_end_matches('/').to_string(),
            user: secret.user.clone(),
            password: secret.password.clone(),
            thumbprint: secret.thumbprint.clone(),
            session: RwLock::new(None),
        })
    }

    async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self.http.post(format!("{}/{}", self.base, path)).json(body);
        let session = self.session.read().unwrap().clone();
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ClientError::Auth(format!("{path}: {status}")));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(path.to_string()));
        }
        if status.is_server_error() {
            return Err(ClientError::Transport(format!("{path}: {status}")));
        }
        if !status.is_success() {
            return Err(ClientError::Protocol(format!("{path}: {status}")));
        }

        Ok(response)
    }
}

#[async_trait]
impl ProviderClient for VsphereClient {
    async fn connect(&self) -> Result<(), ClientError> {
        let response = self
            .post(
                "vim25/SessionManager/Login",
                &LoginRequest {
                    user_name: &self.user,
                    password: &self.password,
                },
            )
            .await?;
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))?;
        *self.session.write().unwrap() = Some(login.key);
        debug!(base = %self.base, "session established");

        Ok(())
    }

    async fn list(&self, kind: ResourceKind) -> Result<Vec<RemoteObject>, ClientError> {
        let Some(wire) = wire_type(kind) else {
            return Err(ClientError::Protocol(format!(
                "kind not provided by vSphere: {}",
                kind.table()
            )));
        };
        let response = self
            .post(
                "vim25/PropertyCollector/RetrievePropertiesEx",
                &RetrieveRequest {
                    r#type: wire,
                    id: None,
                },
            )
            .await?;
        let retrieved: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        Ok(retrieved
            .objects
            .into_iter()
            .map(ManagedObject::into_remote)
            .collect())
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<RemoteObject, ClientError> {
        let Some(wire) = wire_type(kind) else {
            return Err(ClientError::Protocol(format!(
                "kind not provided by vSphere: {}",
                kind.table()
            )));
        };
        let response = self
            .post(
                "vim25/PropertyCollector/RetrievePropertiesEx",
                &RetrieveRequest {
                    r#type: wire,
                    id: Some(id),
                },
            )
            .await?;
        let retrieved: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        retrieved
            .objects
            .into_iter()
            .next()
            .map(ManagedObject::into_remote)
            .ok_or_else(|| ClientError::NotFound(format!("{wire}/{id}")))
    }

    async fn wait_for_updates(&self, cursor: &str) -> Result<UpdateSet, ClientError> {
        let response = self
            .post(
                "vim25/PropertyCollector/WaitForUpdatesEx",
                &WaitRequest { version: cursor },
            )
            .await?;
        let wait: WaitResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))?;

        let mut batch = Vec::with_capacity(wait.updates.len());
        for update in wait.updates {
            let Some(kind) = from_wire(&update.r#type) else {
                warn!(r#type = %update.r#type, "unknown wire type, skipped");
                continue;
            };
            let Some(action) = parse_action(&update.kind) else {
                warn!(kind = %update.kind, "unknown update kind, skipped");
                continue;
            };
            batch.push(Event {
                kind,
                action,
                id: update.id,
                change_set: update
                    .change_set
                    .into_iter()
                    .map(|c| PropertyChange {
                        name: c.name,
                        op: parse_op(&c.op),
                        value: c.val,
                    })
                    .collect(),
            });
        }

        Ok(UpdateSet {
            cursor: wait.version,
            batch,
            truncated: wait.truncated,
        })
    }

    async fn cancel_waits(&self) {
        let _ = self
            .post(
                "vim25/PropertyCollector/CancelWaitForUpdates",
                &serde_json::json!({}),
            )
            .await;
    }

    async fn logout(&self) {
        let _ = self
            .post("vim25/SessionManager/Logout", &serde_json::json!({}))
            .await;
        *self.session.write().unwrap() = None;
    }
}

fn wire_type(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Datacenter => Some("Datacenter"),
        ResourceKind::Folder => Some("Folder"),
        ResourceKind::Cluster => Some("ClusterComputeResource"),
        ResourceKind::Host => Some("HostSystem"),
        ResourceKind::Network => Some("Network"),
        ResourceKind::Datastore => Some("Datastore"),
        ResourceKind::Vm => Some("VirtualMachine"),
        ResourceKind::VnicProfile | ResourceKind::StorageDomain => None,
    }
}

fn from_wire(wire: &str) -> Option<ResourceKind> {
    match wire {
        "Datacenter" => Some(ResourceKind::Datacenter),
        "Folder" => Some(ResourceKind::Folder),
        "ClusterComputeResource" => Some(ResourceKind::Cluster),
        "HostSystem" => Some(ResourceKind::Host),
        "Network" => Some(ResourceKind::Network),
        "Datastore" => Some(ResourceKind::Datastore),
        "VirtualMachine" => Some(ResourceKind::Vm),
        _ => None,
    }
}

fn parse_action(kind: &str) -> Option<Action> {
    match kind {
        "enter" => Some(Action::Enter),
        "modify" => Some(Action::Modify),
        "leave" => Some(Action::Leave),
        _ => None,
    }
}

fn parse_op(op: &str) -> PropertyOp {
    match op {
        "add" => PropertyOp::Add,
        "remove" | "indirectRemove" => PropertyOp::Remove,
        // The collector reports plain value updates as assigns; treat
        // anything unrecognized the same way.
        _ => PropertyOp::Assign,
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "userName")]
    user_name: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    key: String,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    r#type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    #[serde(default)]
    objects: Vec<ManagedObject>,
}

#[derive(Deserialize)]
struct ManagedObject {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    parent: Option<ParentRef>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

impl ManagedObject {
    fn into_remote(self) -> RemoteObject {
        RemoteObject {
            id: self.id,
            name: self.name,
            parent: self.parent.and_then(|p| {
                from_wire(&p.r#type).map(|kind| Ref { kind, id: p.id })
            }),
            properties: self.properties,
        }
    }
}

#[derive(Deserialize)]
struct ParentRef {
    r#type: String,
    id: String,
}

#[derive(Serialize)]
struct WaitRequest<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    version: &'a str,
}

#[derive(Deserialize)]
struct WaitResponse {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    truncated: bool,
    #[serde(default)]
    updates: Vec<ObjectUpdate>,
}

#[derive(Deserialize)]
struct ObjectUpdate {
    r#type: String,
    /// `enter`, `modify` or `leave`.
    kind: String,
    id: String,
    #[serde(default, rename = "changeSet")]
    change_set: Vec<Change>,
}

#[derive(Deserialize)]
struct Change {
    name: String,
    op: String,
    #[serde(default)]
    val: serde_json::Value,
}
