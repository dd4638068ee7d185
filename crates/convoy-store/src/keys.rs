//! Key encoding utilities for the convoy database.
//!
//! Primary records are keyed by the raw 16-byte UUID of their id. Index
//! keys are concatenations designed for prefix scans: all UUID segments are
//! fixed-width, and string segments only ever appear in the final position
//! (or separated by a NUL, which cannot occur in hostnames or role names).

use convoy_core::{HypervisorId, MigrationId, ResourceId};

/// Encode a hypervisor primary key.
#[must_use]
pub fn hypervisor_key(id: &HypervisorId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode a hypervisor name-index key.
#[must_use]
pub fn hypervisor_name_key(name: &str) -> Vec<u8> {
    name.as_bytes().to_vec()
}

/// Encode a resource primary key.
#[must_use]
pub fn resource_key(id: &ResourceId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode the source-uniqueness index key: `source_hypervisor || id_at_source`.
#[must_use]
pub fn resource_source_key(hypervisor: &HypervisorId, id_at_source: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + id_at_source.len());
    key.extend_from_slice(hypervisor.as_bytes());
    key.extend_from_slice(id_at_source.as_bytes());
    key
}

/// Encode a prefix for scanning all resources of a hypervisor.
#[must_use]
pub fn hypervisor_resource_prefix(hypervisor: &HypervisorId) -> Vec<u8> {
    hypervisor.as_bytes().to_vec()
}

/// Encode a migration primary key.
#[must_use]
pub fn migration_key(id: &MigrationId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode a resource-migration index key: `resource_id || migration_id`.
#[must_use]
pub fn resource_migration_key(resource: &ResourceId, migration: &MigrationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(resource.as_bytes());
    key.extend_from_slice(migration.as_bytes());
    key
}

/// Encode a prefix for scanning all migrations of a resource.
#[must_use]
pub fn resource_migration_prefix(resource: &ResourceId) -> Vec<u8> {
    resource.as_bytes().to_vec()
}

/// Encode a service primary key.
#[must_use]
pub fn service_key(id: &convoy_core::ServiceId) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode the service lookup key: `host \0 binary`.
#[must_use]
pub fn service_host_key(host: &str, binary: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(host.len() + 1 + binary.len());
    key.extend_from_slice(host.as_bytes());
    key.push(0);
    key.extend_from_slice(binary.as_bytes());
    key
}
