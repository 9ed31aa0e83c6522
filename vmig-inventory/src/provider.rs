//! Provider resource types.
//!
//! A provider names a remote virtualization endpoint plus the
//! credentials to reach it. The declarative resource is observed by an
//! external controller; this crate only consumes the resolved form.

use serde::{Deserialize, Serialize};

/// Supported provider flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Vsphere,
    Ovirt,
}

/// Compound key uniquely naming a provider resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A declarative provider resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    #[serde(default = "default_kind")]
    pub kind: String,
    pub namespace: String,
    pub name: String,
    /// Stable unique identifier; names the inventory database file.
    /// Assigned at load time when the definition omits one.
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub generation: i64,
    pub spec: ProviderSpec,
    #[serde(default)]
    pub status: ProviderStatus,
}

fn default_kind() -> String {
    "Provider".to_string()
}

impl Provider {
    pub fn key(&self) -> ProviderKey {
        ProviderKey {
            kind: self.kind.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }

    /// Reconcile triggers only when the observed generation lags.
    pub fn needs_reconcile(&self) -> bool {
        self.status.observed_generation < self.generation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub r#type: ProviderType,
    /// Endpoint URL, e.g. `https://vcenter.example.com/sdk`.
    pub url: String,
    pub secret: SecretRef,
}

/// Reference to the secret carrying the endpoint credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRef {
    pub namespace: String,
    pub name: String,
}

/// Resolved endpoint credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub thumbprint: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A status condition. Blocker conditions suppress `Ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub r#type: String,
    pub status: bool,
    #[serde(default)]
    pub blocker: bool,
    #[serde(default)]
    pub message: String,
}

pub const READY: &str = "Ready";

impl ProviderStatus {
    pub fn has_blocker_condition(&self) -> bool {
        self.conditions.iter().any(|c| c.blocker && c.status)
    }

    pub fn set_ready(&mut self, ready: bool, message: impl Into<String>) {
        self.set_condition(Condition {
            r#type: READY.to_string(),
            status: ready,
            blocker: false,
            message: message.into(),
        });
    }

    pub fn set_blocker(&mut self, r#type: impl Into<String>, message: impl Into<String>) {
        self.set_condition(Condition {
            r#type: r#type.into(),
            status: true,
            blocker: true,
            message: message.into(),
        });
    }

    fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.r#type == condition.r#type)
        {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }
}
