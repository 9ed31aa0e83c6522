//! A remote cluster session carrying a dynamic set of watches and
//! relays.
//!
//! The remote multiplexes one upstream subscription per resource kind
//! into the relays registered on it. The forward filter never owns the
//! remote; it holds the remote's identity and resolves it through the
//! container when it fires.

use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::container::Container;
use crate::error::{Error, Result};
use crate::event::{OwnerRef, SubjectEvent, WatchObject};
use crate::predicate::Predicate;
use crate::relay::{eval, Channel, Relay, Watch};

/// Buffer for the upstream subscription feed.
const FEED_BUFFER: usize = 256;

/// REST configuration of a remote cluster session.
///
/// Two remotes are equivalent iff their configurations are
/// structurally equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub insecure: bool,
}

/// Watches, relays and the running flag, guarded by one lock.
///
/// The forward path takes the read lock only; mutating operations take
/// the write lock.
#[derive(Default, Debug)]
struct State {
    watches: Vec<Watch>,
    relays: Vec<Relay>,
    started: bool,
}

/// Registration of a remote in its container.
#[derive(Debug)]
struct Binding {
    owner: OwnerRef,
    container: Weak<Container>,
}

/// The once-started subscription manager: the upstream feed publisher
/// and the worker draining it.
#[derive(Debug)]
struct Session {
    feed: mpsc::Sender<SubjectEvent>,
    done: watch::Sender<bool>,
}

/// A long-lived connection to one remote cluster.
#[derive(Debug)]
pub struct Remote {
    pub name: String,
    pub rest_cfg: Option<RestConfig>,
    state: RwLock<State>,
    binding: RwLock<Option<Binding>>,
    session: Mutex<Option<Session>>,
}

impl Remote {
    pub fn new(name: impl Into<String>, rest_cfg: Option<RestConfig>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            rest_cfg,
            state: RwLock::new(State::default()),
            binding: RwLock::new(None),
            session: Mutex::new(None),
        })
    }

    /// Register this remote with its container. Called by the
    /// container when the remote is inserted.
    pub(crate) fn bind(&self, owner: OwnerRef, container: Weak<Container>) {
        *self.binding.write().unwrap() = Some(Binding { owner, container });
    }

    /// Structural equality on REST configuration.
    pub fn equals(&self, other: &Remote) -> bool {
        self.rest_cfg == other.rest_cfg
    }

    /// Construct the subscription manager, install every registered
    /// watch and launch the upstream worker. Idempotent.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.started {
            return Ok(());
        }
        if self.rest_cfg.is_none() {
            return Err(Error::Configuration("not configured".into()));
        }
        let (owner, container) = self.bound()?;

        let (feed_tx, feed_rx) = mpsc::channel(FEED_BUFFER);
        let (done_tx, done_rx) = watch::channel(false);
        tokio::spawn(upstream_worker(
            self.name.clone(),
            owner,
            container,
            feed_rx,
            done_rx,
        ));
        *self.session.lock().unwrap() = Some(Session {
            feed: feed_tx,
            done: done_tx,
        });

        state.started = true;
        let watches = std::mem::take(&mut state.watches);
        for mut w in watches {
            self.install_watch(&mut w)?;
            state.watches.push(w);
        }
        info!(remote = %self.name, "started");

        Ok(())
    }

    /// Publisher handle for the upstream session feed. `None` until
    /// the remote is started.
    pub fn feed(&self) -> Option<mpsc::Sender<SubjectEvent>> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.feed.clone())
    }

    /// Stop the subscription manager. Idempotent; a second shutdown is
    /// a no-op.
    pub fn shutdown(&self) {
        let session = self.session.lock().unwrap().take();
        if let Some(session) = session {
            let _ = session.done.send(true);
            info!(remote = %self.name, "shutdown");
        }
        self.state.write().unwrap().started = false;
    }

    /// Clear watches and relays. Must not be called while the
    /// upstream worker is running.
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.watches.clear();
        state.relays.clear();
    }

    /// Atomically move the other remote's watches and relays into this
    /// one, marked not-started so `start` re-installs them. Leaves the
    /// other remote reset.
    pub fn take_workload(&self, other: &Remote) -> Result<()> {
        let (watches, relays) = {
            let mut state = other.state.write().unwrap();
            (
                std::mem::take(&mut state.watches),
                std::mem::take(&mut state.relays),
            )
        };
        for mut watch in watches {
            watch.reset();
            self.ensure_watch(watch)?;
        }
        for relay in relays {
            self.ensure_relay(relay)?;
        }

        Ok(())
    }

    /// Add or update a watch. An existing watch of the same kind has
    /// its predicate chain replaced; a new watch is appended and, when
    /// the remote is running, started.
    pub fn ensure_watch(&self, watch: Watch) -> Result<()> {
        let mut state = self.state.write().unwrap();
        self.ensure_watch_locked(&mut state, watch)
    }

    /// Add or merge a relay, then ensure a watch exists for every
    /// subject kind the relay mentions.
    pub fn ensure_relay(&self, relay: Relay) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let subjects: Vec<String> = relay.watches.iter().map(|w| w.subject.clone()).collect();
        match state.relays.iter_mut().find(|r| r.matches(&relay)) {
            Some(existing) => existing.merge(relay),
            None => state.relays.push(relay),
        }
        for subject in subjects {
            self.ensure_watch_locked(&mut state, Watch::new(subject))?;
        }

        Ok(())
    }

    /// Remove every relay delivering on the channel.
    pub fn end_relay(&self, channel: &Channel) {
        let mut state = self.state.write().unwrap();
        state.relays.retain(|r| !r.channel.same_channel(channel));
    }

    /// Watch kinds currently registered.
    pub fn watched_subjects(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        state.watches.iter().map(|w| w.subject.clone()).collect()
    }

    /// Whether a started watch exists for the kind.
    pub fn is_subscribed(&self, kind: &str) -> bool {
        let state = self.state.read().unwrap();
        state
            .watches
            .iter()
            .any(|w| w.matches(kind) && w.is_started())
    }

    /// Number of relays delivering on the channel.
    pub fn relay_count(&self, channel: &Channel) -> usize {
        let state = self.state.read().unwrap();
        state
            .relays
            .iter()
            .filter(|r| r.channel.same_channel(channel))
            .count()
    }

    fn ensure_watch_locked(&self, state: &mut State, watch: Watch) -> Result<()> {
        if let Some(existing) = state
            .watches
            .iter_mut()
            .find(|w| w.matches(&watch.subject))
        {
            existing.merge(watch);
            return Ok(());
        }
        let mut watch = watch;
        if state.started {
            self.install_watch(&mut watch)?;
        }
        state.watches.push(watch);

        Ok(())
    }

    /// Append the forward filter as the last element of the chain and
    /// mark the watch started.
    fn install_watch(&self, watch: &mut Watch) -> Result<()> {
        let (owner, container) = self.bound()?;
        watch.forward = Some(Arc::new(Forward { owner, container }));
        watch.started = true;
        debug!(remote = %self.name, subject = %watch.subject, "watch installed");

        Ok(())
    }

    fn bound(&self) -> Result<(OwnerRef, Weak<Container>)> {
        let binding = self.binding.read().unwrap();
        match binding.as_ref() {
            Some(b) => Ok((b.owner.clone(), b.container.clone())),
            None => Err(Error::Configuration(
                "not registered in a container".into(),
            )),
        }
    }

    /// Run an upstream event through the started watch chains.
    ///
    /// The chains are snapshotted under the read lock and evaluated
    /// without it: the forward filter at the end of each chain
    /// re-enters this remote through the container and takes the read
    /// lock again.
    pub(crate) fn forward(&self, event: &SubjectEvent) {
        let gates: Vec<Watch> = {
            let state = self.state.read().unwrap();
            state
                .watches
                .iter()
                .filter(|w| w.is_started() && w.matches(event.kind()))
                .cloned()
                .collect()
        };
        for gate in gates {
            if !gate.approves(event) {
                continue;
            }
            if let Some(forward) = &gate.forward {
                // Always returns false; the chain ends here.
                eval(forward.as_ref(), event);
            }
        }
    }

    /// Fan an approved event out to every relay whose watch chain
    /// matches. No deduplication across watches of one relay; callers
    /// must be idempotent.
    pub(crate) fn fan_out(&self, event: &SubjectEvent) {
        let state = self.state.read().unwrap();
        for relay in &state.relays {
            for watch in &relay.watches {
                if watch.matches(event.kind()) && watch.approves(event) {
                    relay.send();
                }
            }
        }
    }
}

/// Forward filter.
///
/// Installed as the last predicate of every started watch; fans the
/// event into the remote's relays and returns `false` so nothing after
/// it ever enqueues the raw upstream event. Holds the remote's
/// identity, never the remote.
struct Forward {
    owner: OwnerRef,
    container: Weak<Container>,
}

impl Forward {
    fn fan(&self, event: &SubjectEvent) -> bool {
        if let Some(container) = self.container.upgrade() {
            if let Some(remote) = container.find(&self.owner) {
                remote.fan_out(event);
            }
        }

        false
    }
}

impl Predicate for Forward {
    fn create(&self, object: &WatchObject) -> bool {
        self.fan(&SubjectEvent::Created(object.clone()))
    }

    fn update(&self, old: &WatchObject, new: &WatchObject) -> bool {
        self.fan(&SubjectEvent::Updated {
            old: old.clone(),
            new: new.clone(),
        })
    }

    fn delete(&self, object: &WatchObject) -> bool {
        self.fan(&SubjectEvent::Deleted(object.clone()))
    }

    fn generic(&self, object: &WatchObject) -> bool {
        self.fan(&SubjectEvent::Generic(object.clone()))
    }
}

/// Drains the subscription feed and forwards each event through the
/// owning remote, resolved through the container on every event so the
/// worker never keeps the remote alive.
async fn upstream_worker(
    name: String,
    owner: OwnerRef,
    container: Weak<Container>,
    mut feed: mpsc::Receiver<SubjectEvent>,
    mut done: watch::Receiver<bool>,
) {
    debug!(remote = %name, "upstream worker started");
    loop {
        tokio::select! {
            _ = done.changed() => break,
            event = feed.recv() => match event {
                Some(event) => {
                    let Some(container) = container.upgrade() else {
                        break;
                    };
                    let Some(remote) = container.find(&owner) else {
                        continue;
                    };
                    remote.forward(&event);
                }
                None => break,
            },
        }
    }
    debug!(remote = %name, "upstream worker stopped");
}
