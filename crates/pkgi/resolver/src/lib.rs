//! pkgi Resolver - Version selection for package installs
//!
//! Resolution is a pure function of a [`VersionSelection`] and the candidate
//! version strings visible in the catalog:
//!
//! - **Ranges** (`>=1.0.0 <2.0.0`, `1.x`, `~1.2`, `^1.2.3`, `1.0 - 1.4`)
//!   admit prereleases whenever their precedence falls inside the range
//! - **Pins** (`1.2.3`) are single-point ranges
//! - **Latest** (empty, `*`, `latest`) picks the highest release and skips
//!   prereleases unless a prerelease policy opts in
//!
//! A constraint nothing satisfies is a normal [`Resolution::NoMatch`], not an
//! error. Only malformed constraints produce a [`ConstraintError`].
//!
//! [`VersionSelection`]: pkgi_types::VersionSelection

#![deny(unsafe_code)]

pub mod constraint;
pub mod error;
pub mod resolve;

pub use constraint::Constraint;
pub use error::{ConstraintError, Result};
pub use resolve::{parse_version, resolve, satisfies, NoMatch, Resolution};
