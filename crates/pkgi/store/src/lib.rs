//! pkgi Store - Cluster state for the package install controller
//!
//! The controller never talks to a concrete backend. Every resource kind is
//! reached through a [`Store`], which offers keyed reads, namespace listing,
//! compare-and-swap writes on `resource_version` and a watch stream.
//!
//! [`ClusterStore`] bundles in-memory stores for the three kinds the
//! controller uses. [`GarbageCollector`] deletes dependents whose controller
//! owner no longer exists.

#![deny(unsafe_code)]

pub mod error;
pub mod gc;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use gc::GarbageCollector;
pub use memory::{ClusterStore, InMemoryStore};
pub use traits::{Store, WatchEvent};
