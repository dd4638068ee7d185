//! `RocksDB` storage layer for convoy.
//!
//! This crate provides persistent storage for hypervisors, discovered
//! resources, migrations, and worker service records, using `RocksDB` with
//! column families for efficient indexing.
//!
//! # Architecture
//!
//! The storage uses the following column families:
//!
//! - `hypervisors`: Primary hypervisor records, keyed by `hypervisor_id`
//! - `hypervisors_by_name`: Name index (registration upserts by name)
//! - `resources`: Primary resource records, keyed by `resource_id`
//! - `resources_by_source`: `(source_hypervisor, id_at_source)` index,
//!   which also backs the per-hypervisor uniqueness check
//! - `migrations`: Primary migration records, keyed by `migration_id`
//! - `migrations_by_resource`: Index for listing a resource's migrations
//! - `services`: Worker service records with heartbeat timestamps
//! - `services_by_host`: `(host, binary)` lookup index
//!
//! Deletion is always soft: tombstoned records stay in their primary column
//! family, index entries are removed, and every read filters tombstones.
//!
//! # Example
//!
//! ```no_run
//! use convoy_store::{RocksStore, Store};
//!
//! let store = RocksStore::open("/var/lib/convoy/db").unwrap();
//! let hypervisors = store.list_hypervisors().unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;
pub use types::{
    Hypervisor, HypervisorKind, Migration, MigrationStatus, Resource, ResourceKind, Service,
};

use convoy_core::{HypervisorId, MigrationId, ResourceId, ServiceId};

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations. All getters return `Ok(None)` for records that are
/// absent or soft-deleted; callers decide whether that is an error.
pub trait Store: Send + Sync {
    // =========================================================================
    // Hypervisor Operations
    // =========================================================================

    /// Insert or update a hypervisor record, maintaining the name index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_hypervisor(&self, hypervisor: &Hypervisor) -> Result<()>;

    /// Get a hypervisor by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_hypervisor(&self, id: &HypervisorId) -> Result<Option<Hypervisor>>;

    /// Get a hypervisor by registration name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_hypervisor_by_name(&self, name: &str) -> Result<Option<Hypervisor>>;

    /// List all live hypervisors.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_hypervisors(&self) -> Result<Vec<Hypervisor>>;

    /// Tombstone a hypervisor.
    ///
    /// Discovered resources are cascaded separately via
    /// [`Store::soft_delete_resources_by_hypervisor`].
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the hypervisor doesn't exist.
    fn soft_delete_hypervisor(&self, id: &HypervisorId) -> Result<()>;

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Insert or update a resource record, maintaining the source index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_resource(&self, resource: &Resource) -> Result<()>;

    /// Get a resource by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>>;

    /// Get a resource by its provider-native id on a source hypervisor.
    ///
    /// This is the existence check that keeps discovery ingestion
    /// idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_resource_by_source(
        &self,
        hypervisor: &HypervisorId,
        id_at_source: &str,
    ) -> Result<Option<Resource>>;

    /// List all live resources discovered on a hypervisor.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_resources_by_hypervisor(&self, hypervisor: &HypervisorId) -> Result<Vec<Resource>>;

    /// List all live resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_resources(&self) -> Result<Vec<Resource>>;

    /// Tombstone a resource.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the resource doesn't exist.
    fn soft_delete_resource(&self, id: &ResourceId) -> Result<()>;

    /// Tombstone every resource discovered on a hypervisor.
    ///
    /// Returns the number of resources tombstoned. This is the only path
    /// that removes resources from the inventory.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn soft_delete_resources_by_hypervisor(&self, hypervisor: &HypervisorId) -> Result<u64>;

    // =========================================================================
    // Migration Operations
    // =========================================================================

    /// Insert or update a migration record, maintaining the resource index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_migration(&self, migration: &Migration) -> Result<()>;

    /// Get a migration by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_migration(&self, id: &MigrationId) -> Result<Option<Migration>>;

    /// List all live migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_migrations(&self) -> Result<Vec<Migration>>;

    /// List all live migrations for a resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_migrations_by_resource(&self, resource: &ResourceId) -> Result<Vec<Migration>>;

    /// Update a migration's status and event in one write.
    ///
    /// Sets `finish_time` when the new status is terminal. Returns the
    /// updated record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the migration doesn't exist.
    fn update_migration_status(
        &self,
        id: &MigrationId,
        status: MigrationStatus,
        event: Option<String>,
    ) -> Result<Migration>;

    /// Tombstone a migration.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the migration doesn't exist.
    fn soft_delete_migration(&self, id: &MigrationId) -> Result<()>;

    // =========================================================================
    // Service Operations
    // =========================================================================

    /// Insert or update a service record, maintaining the host index.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_service(&self, service: &Service) -> Result<()>;

    /// Get a service by its `(host, binary)` pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_service_by_host_and_binary(&self, host: &str, binary: &str)
        -> Result<Option<Service>>;

    /// List all live, non-disabled services on a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_services_by_topic(&self, topic: &str) -> Result<Vec<Service>>;

    /// Tombstone a service record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the service doesn't exist.
    fn soft_delete_service(&self, id: &ServiceId) -> Result<()>;
}
