//! Core types and utilities for convoy.
//!
//! This crate provides the foundational types used throughout the convoy
//! migration platform:
//!
//! - **Identifiers**: Strongly-typed IDs for hypervisors, resources,
//!   migrations, and services
//! - **Error types**: Common error definitions shared across crates
//!
//! # Example
//!
//! ```
//! use convoy_core::{HypervisorId, ResourceId, MigrationId};
//!
//! // Generate fresh ids
//! let hypervisor_id = HypervisorId::generate();
//! let resource_id = ResourceId::generate();
//!
//! // Parse a migration ID from its canonical string form
//! let migration_id: MigrationId = "7c9e6679-7425-40de-944b-e07fc1f90ae7"
//!     .parse()
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;

pub use error::{CoreError, Result};
pub use ids::{HypervisorId, IdError, MigrationId, ResourceId, ServiceId};
