//! Host selection for convoy migration workers.
//!
//! This crate tracks what every worker host can currently do and picks the
//! best host for a migration request. It has three layers:
//!
//! - [`HostManager`] — the capability registry: last-write-wins snapshots
//!   of periodic worker capability reports, liveness reconciliation
//!   against the service registry, and append-only ingestion of the
//!   resources a source worker discovers.
//! - [`filters`] / [`weights`] — an ordered chain of filter predicates
//!   narrows the live, capable host set; an ordered chain of weighers
//!   ranks the survivors.
//! - [`SchedulerService`] — the role surface: consumes capability-update
//!   messages and answers host-selection requests, reporting not-ready
//!   until every registered worker has reported in.
//!
//! A request with zero surviving hosts is a scheduling failure
//! ([`SchedulerError::NoValidHost`]), not a panic or a silent fallback;
//! the caller must not dispatch a migration to a nonexistent host.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod filters;
pub mod host_manager;
pub mod service;
pub mod types;
pub mod weights;

pub use error::{Result, SchedulerError};
pub use filters::{CapabilityFilter, CapacityFilter, HostFilter};
pub use host_manager::{HostManager, HostState};
pub use service::{SchedulerRpcHandler, SchedulerService};
pub use types::{
    CapabilityReport, DiscoveredResource, RequestSpec, SchedulerConfig, StampedReport,
    UpdateCapabilitiesRequest,
};
pub use weights::{CapacityWeigher, HostWeigher};
