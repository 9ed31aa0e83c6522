//! Event predicates.
//!
//! A watch carries an ordered predicate chain; every predicate must
//! approve an event before it reaches the forward filter.

use crate::event::WatchObject;

/// Boolean gate over create/update/delete/generic events.
///
/// Default methods approve everything, so implementors only override
/// the event kinds they care about.
pub trait Predicate: Send + Sync {
    fn create(&self, _object: &WatchObject) -> bool {
        true
    }

    fn update(&self, _old: &WatchObject, _new: &WatchObject) -> bool {
        true
    }

    fn delete(&self, _object: &WatchObject) -> bool {
        true
    }

    fn generic(&self, _object: &WatchObject) -> bool {
        true
    }
}

/// Approves every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct Always;

impl Predicate for Always {}
