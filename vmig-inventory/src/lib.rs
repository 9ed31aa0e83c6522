//! vmig-inventory: per-provider inventory for the vmig control plane.
//!
//! For every declared provider a reconciler attaches to the remote
//! endpoint, bulk-lists the object graph into a local SQLite file, and
//! then applies the endpoint's incremental update stream. The local
//! view is served read-only over REST.

pub mod adapter;
pub mod client;
pub mod container;
pub mod error;
pub mod model;
pub mod provider;
pub mod reconciler;
pub mod web;
