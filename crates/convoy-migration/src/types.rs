//! Request, payload, and configuration types for migration orchestration.
//!
//! The payload structs are what actually travels over the message fabric
//! between roles, serialized to plain JSON values.

use std::path::PathBuf;

use convoy_core::{HypervisorId, ResourceId};
use convoy_store::{HypervisorKind, Migration, MigrationStatus, Resource, ResourceKind};
use serde::{Deserialize, Serialize};

use crate::provider::{DiskArtifact, DiskFormat};

/// Request to register (or re-register) a hypervisor.
///
/// Registration is an idempotent upsert keyed by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorSpec {
    /// Registration name, the upsert key.
    pub name: String,
    /// Source or destination role.
    pub kind: HypervisorKind,
    /// Driver identifier, validated against the provider registry.
    pub driver: String,
    /// Provider credentials.
    #[serde(default)]
    pub credentials: serde_json::Value,
    /// Resource kinds the driver supports.
    pub capabilities: Vec<ResourceKind>,
    /// Regex patterns for provider-native ids/names excluded from
    /// discovery.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Disk staging and conversion directory.
    pub conversion_dir: PathBuf,
    /// Worker host that owns this hypervisor.
    pub registered_host: String,
}

/// Request to create a migration for one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMigrationRequest {
    /// Human-readable name.
    pub name: String,
    /// Optional free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Resource to migrate.
    pub resource_id: ResourceId,
    /// Target hypervisor.
    pub destination_hypervisor: HypervisorId,
    /// Destination-specific creation parameters (flavor, network, keypair).
    #[serde(default)]
    pub extra_params: serde_json::Value,
}

/// Filters for migration listings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationFilters {
    /// Only migrations of this resource.
    #[serde(default)]
    pub resource_id: Option<ResourceId>,
    /// Only migrations in this status.
    #[serde(default)]
    pub status: Option<MigrationStatus>,
}

/// The source-side entry point payload: fetch a resource and forward it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResourceRequest {
    /// The migration being driven.
    pub migration: Migration,
    /// The resource to fetch.
    pub resource: Resource,
    /// Worker host owning the destination hypervisor.
    pub dest_host: String,
}

/// Destination payload for instance creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstancePayload {
    /// The migration being driven.
    pub migration: Migration,
    /// The resource being re-created.
    pub resource: Resource,
    /// Converted disk images, boot disk first.
    pub disks: Vec<DiskArtifact>,
}

/// Destination payload for volume creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumePayload {
    /// The migration being driven.
    pub migration: Migration,
    /// The resource being re-created.
    pub resource: Resource,
    /// Staged volume image path.
    pub path: PathBuf,
    /// Volume size in gigabytes.
    pub size_gb: u64,
}

/// Destination payload for network creation.
///
/// Network migration needs nothing from the source hypervisor beyond the
/// connectivity parameters already captured at discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPayload {
    /// The migration being driven.
    pub migration: Migration,
    /// The resource being re-created.
    pub resource: Resource,
}

/// The read-only validation query a source worker answers before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateForMigrationRequest {
    /// Kind of resource the migration will fetch.
    pub resource_kind: ResourceKind,
    /// Conversion-directory space the migration is expected to need.
    #[serde(default)]
    pub size_required: u64,
}

/// Configuration for a source or destination worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Host name this worker answers on (`<role>.<host>` topic).
    pub host: String,
    /// Hypervisor registration this worker serves.
    pub hypervisor_id: HypervisorId,
    /// Disk staging and conversion directory.
    pub conversion_dir: PathBuf,
    /// Resource kinds the driver supports.
    pub capabilities: Vec<ResourceKind>,
    /// Regex patterns for provider-native ids/names excluded from
    /// discovery.
    pub exclude: Vec<String>,
    /// Format fetched disks are converted to before forwarding.
    pub target_disk_format: DiskFormat,
    /// Capability report cadence, seconds.
    pub report_interval_secs: u64,
    /// Bounded wait for the per-resource operation lock, seconds.
    pub lock_wait_secs: u64,
}

impl WorkerConfig {
    /// A worker configuration with conventional defaults.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        hypervisor_id: HypervisorId,
        conversion_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            hypervisor_id,
            conversion_dir: conversion_dir.into(),
            capabilities: vec![ResourceKind::Instance],
            exclude: Vec::new(),
            target_disk_format: DiskFormat::Qcow2,
            report_interval_secs: 60,
            lock_wait_secs: 30,
        }
    }

    /// Derive a worker configuration from a hypervisor registration.
    #[must_use]
    pub fn for_hypervisor(hypervisor: &convoy_store::Hypervisor) -> Self {
        Self {
            host: hypervisor.registered_host.clone(),
            hypervisor_id: hypervisor.hypervisor_id,
            conversion_dir: hypervisor.conversion_dir.clone(),
            capabilities: hypervisor.capabilities.clone(),
            exclude: hypervisor.exclude.clone(),
            target_disk_format: DiskFormat::Qcow2,
            report_interval_secs: 60,
            lock_wait_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_defaults() {
        let config = WorkerConfig::new("worker-a", HypervisorId::generate(), "/stage");
        assert_eq!(config.capabilities, vec![ResourceKind::Instance]);
        assert_eq!(config.target_disk_format, DiskFormat::Qcow2);
        assert_eq!(config.report_interval_secs, 60);
    }

    #[test]
    fn create_request_defaults_are_permissive() {
        let json = serde_json::json!({
            "name": "move-vm1",
            "resource_id": ResourceId::generate().to_string(),
            "destination_hypervisor": HypervisorId::generate().to_string(),
        });
        let request: CreateMigrationRequest = serde_json::from_value(json).unwrap();
        assert!(request.description.is_none());
        assert!(request.extra_params.is_null());
    }
}
