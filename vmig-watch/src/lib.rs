//! vmig-watch: remote watch multiplexing.
//!
//! Demultiplexes a single upstream change stream per remote cluster into
//! many predicate-filtered downstream relays. Subscribers describe the
//! topology they want with a [`RelayDefinition`]; the [`Container`]
//! reconciles the actual set of remotes, watches and relays to match.

pub mod container;
pub mod error;
pub mod event;
pub mod predicate;
pub mod relay;
pub mod remote;

pub use container::{Container, RelayDefinition, WatchDefinition};
pub use error::{Error, Result};
pub use event::{GenericEvent, OwnerRef, SubjectEvent, WatchObject};
pub use predicate::{Always, Predicate};
pub use relay::{Channel, Relay, Watch};
pub use remote::{Remote, RestConfig};
