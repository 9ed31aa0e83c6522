//! Watches and relays.
//!
//! A [`Watch`] subscribes to one resource kind, gated by a predicate
//! chain. A [`Relay`] is a subscriber: a delivery channel, a target
//! object included verbatim in every delivered event, and the watches
//! whose events should be delivered on the channel.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

use crate::event::{GenericEvent, SubjectEvent, WatchObject};
use crate::predicate::Predicate;

/// Delivery channel handle. Also the relay identity: two relays match
/// iff their senders belong to the same channel.
pub type Channel = mpsc::Sender<GenericEvent>;

/// Run a single predicate against an event.
pub(crate) fn eval(predicate: &dyn Predicate, event: &SubjectEvent) -> bool {
    match event {
        SubjectEvent::Created(object) => predicate.create(object),
        SubjectEvent::Updated { old, new } => predicate.update(old, new),
        SubjectEvent::Deleted(object) => predicate.delete(object),
        SubjectEvent::Generic(object) => predicate.generic(object),
    }
}

/// A subscription to one resource kind on a remote.
#[derive(Clone)]
pub struct Watch {
    /// The resource kind this watch subscribes to. Watch identity.
    pub subject: String,
    /// Ordered predicate chain; every predicate must approve.
    pub predicates: Vec<Arc<dyn Predicate>>,
    /// Forward filter, installed as the last element of the chain when
    /// the watch is started on a running remote.
    pub(crate) forward: Option<Arc<dyn Predicate>>,
    pub(crate) started: bool,
}

impl Watch {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicates: Vec::new(),
            forward: None,
            started: false,
        }
    }

    /// Append a predicate to the chain.
    pub fn predicate(mut self, predicate: impl Predicate + 'static) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    /// Two watches match iff their subject kinds match.
    pub fn matches(&self, kind: &str) -> bool {
        self.subject == kind
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    /// Merge another watch: the predicate chain is replaced, last
    /// writer wins. Predicates describe the current subscriber's
    /// interest, not an accumulated history.
    pub(crate) fn merge(&mut self, other: Watch) {
        self.predicates = other.predicates;
    }

    /// Mark not started so a later `start` re-installs it.
    pub(crate) fn reset(&mut self) {
        self.started = false;
        self.forward = None;
    }

    /// Run the subscriber predicate chain in order.
    pub(crate) fn approves(&self, event: &SubjectEvent) -> bool {
        self.predicates.iter().all(|p| eval(p.as_ref(), event))
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("subject", &self.subject)
            .field("predicates", &self.predicates.len())
            .field("started", &self.started)
            .finish()
    }
}

/// A subscriber fed by one or more watches.
#[derive(Clone)]
pub struct Relay {
    /// Delivery channel; opaque relay identity.
    pub channel: Channel,
    /// Included verbatim in every delivered event.
    pub target: WatchObject,
    /// The subject kinds this relay cares about.
    pub watches: Vec<Watch>,
}

impl Relay {
    pub fn new(channel: Channel, target: WatchObject, watches: Vec<Watch>) -> Self {
        Self {
            channel,
            target,
            watches,
        }
    }

    /// Relays are identified by their delivery channel.
    pub fn matches(&self, other: &Relay) -> bool {
        self.channel.same_channel(&other.channel)
    }

    /// Merge another relay: union of watches keyed by subject kind,
    /// per-watch predicates last-writer-wins.
    pub(crate) fn merge(&mut self, other: Relay) {
        for watch in other.watches {
            match self
                .watches
                .iter_mut()
                .find(|w| w.matches(&watch.subject))
            {
                Some(existing) => existing.merge(watch),
                None => self.watches.push(watch),
            }
        }
    }

    /// Deliver one generic event carrying the relay target.
    ///
    /// Best-effort: a full or closed channel drops the event rather
    /// than blocking or crashing the forward path.
    pub(crate) fn send(&self) {
        let event = GenericEvent {
            meta: self.target.clone(),
            object: self.target.clone(),
        };
        if let Err(err) = self.channel.try_send(event) {
            trace!(object = %self.target.name, %err, "relay delivery dropped");
        }
    }
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("target", &self.target)
            .field("watches", &self.watches)
            .finish()
    }
}
