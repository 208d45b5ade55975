//! pkgi Controller - Reconciliation of InstallRequests
//!
//! Each InstallRequest is driven through one pass at a time:
//!
//! 1. fetch the request; a missing request ends the pass
//! 2. resolve its version selection against the [`Catalog`]
//! 3. derive the DependentDeployment spec, validating user values
//! 4. create or update the dependent through the [`Synchronizer`]
//! 5. report status through the [`StatusReporter`]
//!
//! The [`Controller`] feeds passes from a [`WorkQueue`], which the
//! [`EventPump`] fills from store watches via the [`EventRouter`].

#![deny(unsafe_code)]

pub mod catalog;
pub mod config;
pub mod controller;
pub mod deriver;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod reconciler;
pub mod router;
pub mod schema;
pub mod status;
pub mod sync;

pub use catalog::{Catalog, Compatibility};
pub use config::{CatalogConfig, CompatibilityConfig, ControllerConfig, Settings};
pub use controller::Controller;
pub use deriver::derive;
pub use error::{ReconcileError, SyncError, ValidationError};
pub use metrics::{export, ControllerMetrics, PassOutcome};
pub use queue::WorkQueue;
pub use reconciler::{Action, Reconciler};
pub use router::{Event, EventPump, EventRouter};
pub use schema::Violation;
pub use status::{Outcome, StatusReporter};
pub use sync::{SyncOutcome, Synchronizer};
