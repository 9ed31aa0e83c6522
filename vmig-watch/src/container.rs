//! Process-wide registry of remotes.
//!
//! The container is an explicit singleton, injected at the composition
//! root; tests construct their own instead of reaching for a global.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::Result;
use crate::event::{OwnerRef, WatchObject};
use crate::relay::{Channel, Relay, Watch};
use crate::remote::Remote;

/// Desired watches on one remote, as part of a relay definition.
#[derive(Clone)]
pub struct WatchDefinition {
    pub remote_owner: OwnerRef,
    pub watches: Vec<Watch>,
}

/// Declarative, idempotent description of the desired topology for a
/// single subscriber: a channel, a target object and the watches
/// wanted on each remote.
#[derive(Clone)]
pub struct RelayDefinition {
    pub channel: Channel,
    pub target: WatchObject,
    pub watches: Vec<WatchDefinition>,
}

impl RelayDefinition {
    fn has_remote(&self, owner: &OwnerRef) -> bool {
        self.watches.iter().any(|w| &w.remote_owner == owner)
    }
}

/// Registry of remotes keyed by owner identity.
#[derive(Default)]
pub struct Container {
    remotes: RwLock<HashMap<OwnerRef, Arc<Remote>>>,
}

impl Container {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ensure the remote is registered and started.
    ///
    /// An existing remote with an equal REST configuration is returned
    /// unchanged. A differently configured remote is replaced: its
    /// workload migrates to the new remote, the old one is shut down,
    /// the new one started.
    pub fn ensure(self: &Arc<Self>, owner: &OwnerRef, new: Arc<Remote>) -> Result<Arc<Remote>> {
        let mut remotes = self.remotes.write().unwrap();
        if let Some(existing) = remotes.get(owner) {
            if existing.equals(&new) {
                return Ok(existing.clone());
            }
            new.bind(owner.clone(), Arc::downgrade(self));
            new.take_workload(existing)?;
            existing.shutdown();
            debug!(owner = %owner, "remote replaced");
        } else {
            new.bind(owner.clone(), Arc::downgrade(self));
        }
        // Register only a started remote; a failed start must not
        // shadow the key for later ensure calls.
        new.start()?;
        remotes.insert(owner.clone(), new.clone());

        Ok(new)
    }

    /// Register a remote without starting it.
    pub fn add(self: &Arc<Self>, owner: &OwnerRef, remote: Arc<Remote>) {
        remote.bind(owner.clone(), Arc::downgrade(self));
        self.remotes.write().unwrap().insert(owner.clone(), remote);
    }

    /// Remove a remote and shut it down.
    pub fn delete(&self, owner: &OwnerRef) {
        let removed = self.remotes.write().unwrap().remove(owner);
        if let Some(remote) = removed {
            remote.shutdown();
        }
    }

    pub fn find(&self, owner: &OwnerRef) -> Option<Arc<Remote>> {
        self.remotes.read().unwrap().get(owner).cloned()
    }

    /// Ensure a watch on the owner's remote, creating an unconfigured
    /// remote when none exists yet.
    pub fn ensure_watch(self: &Arc<Self>, owner: &OwnerRef, watch: Watch) -> Result<()> {
        self.get_or_create(owner).ensure_watch(watch)
    }

    /// Ensure a relay on the owner's remote, creating an unconfigured
    /// remote when none exists yet.
    pub fn ensure_relay(self: &Arc<Self>, owner: &OwnerRef, relay: Relay) -> Result<()> {
        self.get_or_create(owner).ensure_relay(relay)
    }

    /// End every relay on the owner's remote delivering on the channel.
    pub fn end_relay(&self, owner: &OwnerRef, channel: &Channel) {
        if let Some(remote) = self.find(owner) {
            remote.end_relay(channel);
        }
    }

    /// Make the relay topology match the definition.
    ///
    /// Remotes not mentioned by the definition lose any relay on the
    /// definition's channel; every mentioned remote gets the relay
    /// ensured. An error aborts the remaining work and leaves the
    /// container partially applied; the operation is idempotent and
    /// expected to be retried.
    pub fn ensure_relay_definition(self: &Arc<Self>, def: &RelayDefinition) -> Result<()> {
        {
            let remotes = self.remotes.read().unwrap();
            for (owner, remote) in remotes.iter() {
                if !def.has_remote(owner) {
                    remote.end_relay(&def.channel);
                }
            }
        }
        for wdef in &def.watches {
            let remote = self.get_or_create(&wdef.remote_owner);
            remote.ensure_relay(Relay::new(
                def.channel.clone(),
                def.target.clone(),
                wdef.watches.clone(),
            ))?;
        }

        Ok(())
    }

    fn get_or_create(self: &Arc<Self>, owner: &OwnerRef) -> Arc<Remote> {
        let mut remotes = self.remotes.write().unwrap();
        remotes
            .entry(owner.clone())
            .or_insert_with(|| {
                let remote = Remote::new(owner.name.clone(), None);
                remote.bind(owner.clone(), Arc::downgrade(self));
                remote
            })
            .clone()
    }
}
