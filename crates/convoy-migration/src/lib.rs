//! Migration orchestration for convoy.
//!
//! This crate drives a migration through its lifecycle, from API
//! acceptance to re-creation of the resource at the destination cloud:
//!
//! ```text
//! ┌──────────┐   create_migration    ┌────────────────────┐
//! │   API    │──────cast────────────▶│   SourceWorker     │
//! │ service  │                       │ fetch + convert    │
//! └──────────┘                       └─────────┬──────────┘
//!      │  select_host                          │ cast
//!      ▼                                       ▼
//! ┌──────────┐                       ┌────────────────────┐
//! │Scheduler │◀──capability casts────│ DestinationWorker  │
//! └──────────┘                       │ create + finalize  │
//!                                    └────────────────────┘
//! ```
//!
//! The status machine is `Initiating → Inprogress → {Completed | Error}`;
//! terminal states are never mutated again, and retrying means creating a
//! brand-new migration. Fine-grained phases travel in the migration's
//! `event` breadcrumb, which is cleared in terminal states.
//!
//! Provider failures are converted into an `Error`-status update at the
//! phase boundary; they never cross the messaging fabric as errors.
//! Concurrent work on one resource is serialized by an advisory lock keyed
//! by `(resource_id, operation)`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod convert;
pub mod destination;
pub mod error;
pub mod lifecycle;
pub mod locks;
pub mod provider;
pub mod report;
pub mod service;
pub mod source;
pub mod types;

pub use convert::{ImageConverter, QemuImgConverter};
pub use destination::DestinationWorker;
pub use error::{MigrationError, Result};
pub use locks::{OperationGuard, OperationLocks};
pub use provider::{
    DestinationProvider, DiskArtifact, DiskFormat, ProviderError, ProviderRegistry, SourceProvider,
};
pub use service::MigrationService;
pub use source::SourceWorker;
pub use types::{
    CreateMigrationRequest, GetResourceRequest, HypervisorSpec, InstancePayload, MigrationFilters,
    NetworkPayload, ValidateForMigrationRequest, VolumePayload, WorkerConfig,
};
