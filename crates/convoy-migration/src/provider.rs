//! Provider capability interfaces and the driver registry.
//!
//! A provider is the pluggable integration implementing hypervisor-specific
//! operations: source providers enumerate and fetch resources, destination
//! providers create them. Hypervisor records reference a provider by driver
//! identifier; [`ProviderRegistry`] resolves identifiers to factories and
//! is consulted at registration time, so an unknown driver is rejected
//! synchronously instead of failing at dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::MigrationId;
use convoy_scheduler::DiscoveredResource;
use convoy_store::{Hypervisor, HypervisorKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by provider operations.
///
/// These are always terminal for the current migration attempt: the phase
/// boundary converts them into an `Error`-status update and they are never
/// re-raised across the messaging fabric.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider endpoint could not be reached or authenticated.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// A provider operation failed.
    #[error("provider operation {operation} failed: {message}")]
    Failed {
        /// The operation that failed.
        operation: String,
        /// Provider-reported failure.
        message: String,
    },

    /// A polled remote state did not settle within the attempt budget.
    #[error("provider operation {operation} timed out after {attempts} attempts")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// How many probes were made.
        attempts: u32,
    },
}

/// On-disk image formats handled by the conversion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskFormat {
    /// QEMU copy-on-write v2.
    Qcow2,
    /// Raw block image.
    Raw,
    /// VMware virtual disk.
    Vmdk,
}

impl DiskFormat {
    /// Format name as passed to conversion tooling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qcow2 => "qcow2",
            Self::Raw => "raw",
            Self::Vmdk => "vmdk",
        }
    }

    /// Conventional file extension for the format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        self.as_str()
    }
}

/// A disk image staged in the conversion directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskArtifact {
    /// Position of the disk on the instance (0 is the boot disk).
    pub index: usize,
    /// Local path of the staged image.
    pub path: PathBuf,
    /// Current format of the image.
    pub format: DiskFormat,
}

/// Source-side provider operations: enumerate and fetch.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Enumerate migratable instances on the source hypervisor.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if the hypervisor cannot be queried.
    async fn list_instances(&self) -> Result<Vec<DiscoveredResource>, ProviderError>;

    /// Enumerate migratable volumes on the source hypervisor.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if the hypervisor cannot be queried.
    async fn list_volumes(&self) -> Result<Vec<DiscoveredResource>, ProviderError>;

    /// Enumerate migratable networks on the source hypervisor.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if the hypervisor cannot be queried.
    async fn list_networks(&self) -> Result<Vec<DiscoveredResource>, ProviderError>;

    /// Download an instance's disks into the staging directory.
    ///
    /// Returns one artifact per disk, boot disk first.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if the download fails or the instance is
    /// stuck in an unexpected state.
    async fn fetch_instance(
        &self,
        id_at_source: &str,
        staging_dir: &Path,
    ) -> Result<Vec<DiskArtifact>, ProviderError>;

    /// Download a volume image into the staging directory.
    ///
    /// The migration id names the staged file so a re-run of the same
    /// attempt lands on the same path.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if the download fails.
    async fn fetch_volume(
        &self,
        id_at_source: &str,
        migration_id: &MigrationId,
        staging_dir: &Path,
    ) -> Result<PathBuf, ProviderError>;
}

/// Destination-side provider operations: create.
#[async_trait]
pub trait DestinationProvider: Send + Sync {
    /// Create an instance from converted disk images.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if creation fails.
    async fn create_instance(
        &self,
        name: &str,
        disks: &[DiskArtifact],
        extra_params: &serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Create a volume from a staged image.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if creation fails.
    async fn create_volume(
        &self,
        name: &str,
        path: &Path,
        size_gb: u64,
        extra_params: &serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Create a network from its connectivity parameters.
    ///
    /// # Errors
    ///
    /// Returns a `ProviderError` if creation fails.
    async fn create_network(
        &self,
        name: &str,
        properties: &serde_json::Value,
        extra_params: &serde_json::Value,
    ) -> Result<(), ProviderError>;
}

/// Factory producing a source provider for a hypervisor registration.
pub type SourceFactory =
    Arc<dyn Fn(&Hypervisor) -> Result<Arc<dyn SourceProvider>, ProviderError> + Send + Sync>;

/// Factory producing a destination provider for a hypervisor registration.
pub type DestinationFactory =
    Arc<dyn Fn(&Hypervisor) -> Result<Arc<dyn DestinationProvider>, ProviderError> + Send + Sync>;

/// Mapping from driver identifier strings to provider factories.
///
/// Identifiers are validated against this registry when a hypervisor is
/// registered; dispatch-time resolution cannot fail on an unknown driver.
#[derive(Default)]
pub struct ProviderRegistry {
    sources: RwLock<HashMap<String, SourceFactory>>,
    destinations: RwLock<HashMap<String, DestinationFactory>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source driver.
    pub fn register_source(&self, driver: impl Into<String>, factory: SourceFactory) {
        self.sources.write().insert(driver.into(), factory);
    }

    /// Register a destination driver.
    pub fn register_destination(&self, driver: impl Into<String>, factory: DestinationFactory) {
        self.destinations.write().insert(driver.into(), factory);
    }

    /// Whether a driver identifier resolves for the given hypervisor kind.
    #[must_use]
    pub fn is_registered(&self, kind: HypervisorKind, driver: &str) -> bool {
        match kind {
            HypervisorKind::Source => self.sources.read().contains_key(driver),
            HypervisorKind::Destination => self.destinations.read().contains_key(driver),
        }
    }

    /// Build a source provider for a hypervisor.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Unavailable` for an unregistered driver, or
    /// the factory's own error.
    pub fn source_provider(
        &self,
        hypervisor: &Hypervisor,
    ) -> Result<Arc<dyn SourceProvider>, ProviderError> {
        let factory = self
            .sources
            .read()
            .get(&hypervisor.driver)
            .cloned()
            .ok_or_else(|| {
                ProviderError::Unavailable(format!("unknown source driver: {}", hypervisor.driver))
            })?;
        factory(hypervisor)
    }

    /// Build a destination provider for a hypervisor.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Unavailable` for an unregistered driver, or
    /// the factory's own error.
    pub fn destination_provider(
        &self,
        hypervisor: &Hypervisor,
    ) -> Result<Arc<dyn DestinationProvider>, ProviderError> {
        let factory = self
            .destinations
            .read()
            .get(&hypervisor.driver)
            .cloned()
            .ok_or_else(|| {
                ProviderError::Unavailable(format!(
                    "unknown destination driver: {}",
                    hypervisor.driver
                ))
            })?;
        factory(hypervisor)
    }
}

/// Poll a remote state with a bounded attempt budget and exponential
/// backoff.
///
/// The probe returns `Ok(Some(value))` when the awaited state is reached,
/// `Ok(None)` to keep waiting. Exhausting the budget escalates to
/// [`ProviderError::Timeout`]; there are no unbounded polling loops in
/// this system.
///
/// # Errors
///
/// Returns the probe's error as-is, or `ProviderError::Timeout` once the
/// attempt budget is spent.
pub async fn poll_bounded<T, F, Fut>(
    operation: &str,
    max_attempts: u32,
    initial_backoff: Duration,
    mut probe: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, ProviderError>>,
{
    let mut backoff = initial_backoff;

    for attempt in 1..=max_attempts {
        if let Some(value) = probe().await? {
            return Ok(value);
        }

        if attempt < max_attempts {
            tracing::debug!(operation, attempt, backoff_ms = backoff.as_millis() as u64, "state not ready, backing off");
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
        }
    }

    Err(ProviderError::Timeout {
        operation: operation.to_string(),
        attempts: max_attempts,
    })
}
