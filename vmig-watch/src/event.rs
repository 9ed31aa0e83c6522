//! Identity and event types shared by remotes, watches and relays.

/// Identity of the resource owning a remote: `(kind, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl OwnerRef {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A resource observed on a remote cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchObject {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl WatchObject {
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Event delivered on a relay channel.
///
/// Both fields carry the relay's target, never the upstream resource;
/// a delivery tells the subscriber "something you watch changed", not
/// what changed.
#[derive(Debug, Clone)]
pub struct GenericEvent {
    pub meta: WatchObject,
    pub object: WatchObject,
}

/// A change observed on an upstream subject.
#[derive(Debug, Clone)]
pub enum SubjectEvent {
    Created(WatchObject),
    Updated { old: WatchObject, new: WatchObject },
    Deleted(WatchObject),
    Generic(WatchObject),
}

impl SubjectEvent {
    /// The subject the event refers to. For updates, the new object.
    pub fn subject(&self) -> &WatchObject {
        match self {
            SubjectEvent::Created(object) => object,
            SubjectEvent::Updated { new, .. } => new,
            SubjectEvent::Deleted(object) => object,
            SubjectEvent::Generic(object) => object,
        }
    }

    /// Resource kind of the subject.
    pub fn kind(&self) -> &str {
        &self.subject().kind
    }
}
