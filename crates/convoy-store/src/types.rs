//! Domain types stored in the database.
//!
//! These types represent the persisted state of hypervisors, discovered
//! resources, migrations, and worker service records. Every record carries
//! tombstone fields: deletion is always soft, and reads filter tombstones.
//!
//! Structured fields (credentials, properties, extra parameters) are
//! `serde_json::Value` in memory; they are only flattened to bytes at the
//! storage boundary.

use chrono::{DateTime, Utc};
use convoy_core::{HypervisorId, MigrationId, ResourceId, ServiceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A registered source or destination migration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypervisor {
    /// Unique identifier for the hypervisor registration.
    pub hypervisor_id: HypervisorId,
    /// Registration name; unique among live records, upsert key.
    pub name: String,
    /// Whether this endpoint is a migration source or destination.
    pub kind: HypervisorKind,
    /// Driver identifier, resolved through the provider registry.
    pub driver: String,
    /// Provider credentials, structured in memory.
    pub credentials: serde_json::Value,
    /// Resource kinds the driver supports.
    pub capabilities: Vec<ResourceKind>,
    /// Provider-native ids/names excluded from discovery (regex patterns).
    pub exclude: Vec<String>,
    /// Local directory used for disk staging and format conversion.
    pub conversion_dir: PathBuf,
    /// Disabled hypervisors are skipped by scheduling and reporting.
    pub enabled: bool,
    /// Worker host that owns this hypervisor.
    pub registered_host: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag.
    pub deleted: bool,
    /// When the record was tombstoned.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Role of a hypervisor endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypervisorKind {
    /// Workloads are pulled off this endpoint.
    Source,
    /// Workloads are re-created on this endpoint.
    Destination,
}

/// A migratable entity discovered on a source hypervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Unique identifier for the resource record.
    pub resource_id: ResourceId,
    /// Provider-native identifier; unique per source hypervisor.
    pub id_at_source: String,
    /// Human-readable name reported by the provider.
    pub name: String,
    /// What kind of entity this is.
    pub kind: ResourceKind,
    /// Hypervisor the resource was discovered on.
    pub source_hypervisor: HypervisorId,
    /// Provider-specific properties, structured in memory.
    pub properties: serde_json::Value,
    /// Flips false -> true exactly once, on destination-side completion.
    pub migrated: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag.
    pub deleted: bool,
    /// When the record was tombstoned.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Kind of a migratable resource.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ResourceKind {
    /// A virtual machine instance.
    Instance = 1,
    /// A block storage volume.
    Volume = 2,
    /// A virtual network.
    Network = 3,
}

impl ResourceKind {
    /// Convert the kind to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `ResourceKind`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Instance),
            2 => Some(Self::Volume),
            3 => Some(Self::Network),
            _ => None,
        }
    }

    /// Stable lowercase name, used in reports and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Volume => "volume",
            Self::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to move a single resource to a destination hypervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    /// Unique identifier for the migration attempt.
    pub migration_id: MigrationId,
    /// Human-readable name.
    pub name: String,
    /// Optional free-form description.
    pub description: Option<String>,
    /// Resource being migrated.
    pub resource_id: ResourceId,
    /// Target hypervisor.
    pub destination_hypervisor: HypervisorId,
    /// Coarse lifecycle status.
    pub status: MigrationStatus,
    /// Fine-grained phase breadcrumb; `None` in terminal states.
    pub event: Option<String>,
    /// Destination-specific creation parameters (flavor, network, keypair).
    pub extra_params: serde_json::Value,
    /// When the migration was accepted.
    pub start_time: DateTime<Utc>,
    /// When the migration reached a terminal status.
    pub finish_time: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag.
    pub deleted: bool,
    /// When the record was tombstoned.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Coarse lifecycle status of a migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MigrationStatus {
    /// Accepted, scheduling or waiting for the source worker.
    Initiating = 1,
    /// A worker is actively fetching, converting, or creating.
    Inprogress = 2,
    /// The resource was re-created at the destination.
    Completed = 3,
    /// A phase failed; a new migration must be created to retry.
    Error = 4,
}

impl MigrationStatus {
    /// Convert the status to its numeric representation.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert a numeric value to a `MigrationStatus`.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Initiating),
            2 => Some(Self::Inprogress),
            3 => Some(Self::Completed),
            4 => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initiating => "Initiating",
            Self::Inprogress => "Inprogress",
            Self::Completed => "Completed",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

/// A running worker service on a host.
///
/// `updated_at` doubles as the heartbeat timestamp: a service whose last
/// update is older than the configured down-time window is considered down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique identifier for the service record.
    pub service_id: ServiceId,
    /// Host the service runs on.
    pub host: String,
    /// Role binary name (`convoy-source`, `convoy-destination`).
    pub binary: String,
    /// Messaging topic the service listens on.
    pub topic: String,
    /// Number of heartbeats reported so far.
    pub report_count: u64,
    /// Disabled services are excluded from scheduling.
    pub disabled: bool,
    /// Operator-supplied reason when disabled.
    pub disabled_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last heartbeat timestamp.
    pub updated_at: DateTime<Utc>,
    /// Tombstone flag.
    pub deleted: bool,
    /// When the record was tombstoned.
    pub deleted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kind_round_trip() {
        for kind in [
            ResourceKind::Instance,
            ResourceKind::Volume,
            ResourceKind::Network,
        ] {
            assert_eq!(ResourceKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(ResourceKind::from_u8(0), None);
        assert_eq!(ResourceKind::from_u8(9), None);
    }

    #[test]
    fn migration_status_round_trip() {
        for status in [
            MigrationStatus::Initiating,
            MigrationStatus::Inprogress,
            MigrationStatus::Completed,
            MigrationStatus::Error,
        ] {
            assert_eq!(MigrationStatus::from_u8(status.as_u8()), Some(status));
        }
        assert_eq!(MigrationStatus::from_u8(0), None);
    }

    #[test]
    fn status_display_matches_vocabulary() {
        assert_eq!(MigrationStatus::Initiating.to_string(), "Initiating");
        assert_eq!(MigrationStatus::Inprogress.to_string(), "Inprogress");
        assert_eq!(MigrationStatus::Completed.to_string(), "Completed");
        assert_eq!(MigrationStatus::Error.to_string(), "Error");
    }
}
