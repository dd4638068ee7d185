//! The destination worker role.
//!
//! A destination worker owns one destination hypervisor. It answers the
//! `create_instance` / `create_volume` / `create_network` requests
//! forwarded by source workers, invoking the destination provider and
//! settling the migration: `Completed` with the resource's `migrated` flag
//! flipped on success, `Error` with the resource untouched on failure.
//!
//! The migration row is written before the resource row; a crash between
//! the two can leave a completed migration with a not-yet-flagged
//! resource, the one inconsistency window this design tolerates.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use convoy_core::{MigrationId, ResourceId};
use convoy_messaging::{Handler, MessageBus, Topic};
use convoy_scheduler::CapabilityReport;
use convoy_store::{Migration, MigrationStatus, Store};
use serde_json::Value;

use crate::convert;
use crate::error::Result;
use crate::lifecycle;
use crate::provider::{DestinationProvider, ProviderError};
use crate::report;
use crate::types::{InstancePayload, NetworkPayload, VolumePayload, WorkerConfig};

/// A worker hosting a destination provider.
pub struct DestinationWorker<S> {
    config: WorkerConfig,
    store: Arc<S>,
    bus: Arc<dyn MessageBus>,
    provider: Arc<dyn DestinationProvider>,
}

impl<S: Store + 'static> DestinationWorker<S> {
    /// Create a destination worker.
    #[must_use]
    pub fn new(
        config: WorkerConfig,
        store: Arc<S>,
        bus: Arc<dyn MessageBus>,
        provider: Arc<dyn DestinationProvider>,
    ) -> Self {
        Self {
            config,
            store,
            bus,
            provider,
        }
    }

    /// Subscribe this worker on its point-to-point topic.
    pub fn subscribe(self: &Arc<Self>, bus: &convoy_messaging::LocalBus) {
        let handler: Arc<dyn Handler> = Arc::clone(self);
        bus.subscribe(&Topic::destination(&self.config.host), handler);
    }

    // =========================================================================
    // Creation Phase
    // =========================================================================

    /// Create an instance from converted disks.
    pub async fn create_instance(&self, payload: InstancePayload) {
        tracing::info!(
            migration_id = %payload.migration.migration_id,
            instance = %payload.resource.name,
            "create instance started"
        );

        let Some(_migration) = self.begin(&payload.migration.migration_id) else {
            return;
        };
        let outcome = self
            .provider
            .create_instance(
                &payload.resource.name,
                &payload.disks,
                &payload.migration.extra_params,
            )
            .await;
        self.finish(
            &payload.migration.migration_id,
            &payload.resource.resource_id,
            outcome,
        );
    }

    /// Create a volume from a staged image.
    pub async fn create_volume(&self, payload: VolumePayload) {
        tracing::info!(
            migration_id = %payload.migration.migration_id,
            volume = %payload.resource.name,
            "create volume started"
        );

        let Some(_migration) = self.begin(&payload.migration.migration_id) else {
            return;
        };
        let outcome = self
            .provider
            .create_volume(
                &payload.resource.name,
                &payload.path,
                payload.size_gb,
                &payload.migration.extra_params,
            )
            .await;
        self.finish(
            &payload.migration.migration_id,
            &payload.resource.resource_id,
            outcome,
        );
    }

    /// Create a network from its connectivity parameters.
    pub async fn create_network(&self, payload: NetworkPayload) {
        tracing::info!(
            migration_id = %payload.migration.migration_id,
            network = %payload.resource.name,
            "create network started"
        );

        let Some(_migration) = self.begin(&payload.migration.migration_id) else {
            return;
        };
        let outcome = self
            .provider
            .create_network(
                &payload.resource.name,
                &payload.resource.properties,
                &payload.migration.extra_params,
            )
            .await;
        self.finish(
            &payload.migration.migration_id,
            &payload.resource.resource_id,
            outcome,
        );
    }

    /// Mark the creation phase, refusing settled migrations.
    ///
    /// Returns `None` when the handler must not run (redelivery of a
    /// settled migration, or a store failure that is logged here).
    fn begin(&self, migration_id: &MigrationId) -> Option<Migration> {
        match self.store.get_migration(migration_id) {
            Ok(Some(migration)) if lifecycle::is_terminal(migration.status) => {
                tracing::warn!(
                    migration_id = %migration_id,
                    status = %migration.status,
                    "ignoring creation request for settled migration"
                );
                None
            }
            Ok(Some(_)) => match self.store.update_migration_status(
                migration_id,
                MigrationStatus::Inprogress,
                Some("Creating at destination".to_string()),
            ) {
                Ok(migration) => Some(migration),
                Err(error) => {
                    tracing::error!(migration_id = %migration_id, %error, "failed to mark creation phase");
                    None
                }
            },
            Ok(None) => {
                tracing::error!(migration_id = %migration_id, "migration vanished before creation");
                None
            }
            Err(error) => {
                tracing::error!(migration_id = %migration_id, %error, "failed to load migration");
                None
            }
        }
    }

    /// Settle the migration from the provider outcome.
    ///
    /// On success the migration is completed first, then the resource's
    /// `migrated` flag flips; on failure the migration is errored and the
    /// resource is left unmigrated. The provider error is logged with both
    /// identifiers and never re-raised.
    fn finish(
        &self,
        migration_id: &MigrationId,
        resource_id: &ResourceId,
        outcome: std::result::Result<(), ProviderError>,
    ) {
        match outcome {
            Ok(()) => {
                if let Err(error) =
                    self.store
                        .update_migration_status(migration_id, MigrationStatus::Completed, None)
                {
                    tracing::error!(migration_id = %migration_id, %error, "failed to complete migration");
                    return;
                }

                match self.store.get_resource(resource_id) {
                    Ok(Some(mut resource)) => {
                        resource.migrated = true;
                        resource.updated_at = Utc::now();
                        if let Err(error) = self.store.put_resource(&resource) {
                            tracing::error!(resource_id = %resource_id, %error, "failed to flag resource migrated");
                        }
                    }
                    Ok(None) => {
                        tracing::error!(resource_id = %resource_id, "resource vanished before completion");
                    }
                    Err(error) => {
                        tracing::error!(resource_id = %resource_id, %error, "failed to load resource");
                    }
                }

                tracing::info!(
                    migration_id = %migration_id,
                    resource_id = %resource_id,
                    "migration completed"
                );
            }
            Err(error) => {
                tracing::error!(
                    migration_id = %migration_id,
                    resource_id = %resource_id,
                    %error,
                    "creation failed at destination"
                );
                if let Err(store_error) =
                    self.store
                        .update_migration_status(migration_id, MigrationStatus::Error, None)
                {
                    tracing::error!(
                        migration_id = %migration_id,
                        error = %store_error,
                        "failed to record migration error"
                    );
                }
            }
        }
    }

    // =========================================================================
    // Capability Reporting
    // =========================================================================

    /// Collect the worker's capability snapshot.
    ///
    /// Destination reports carry no resource enumeration.
    #[must_use]
    pub fn build_report(&self) -> CapabilityReport {
        let free_space = match convert::free_space(&self.config.conversion_dir) {
            Ok(free) => free,
            Err(error) => {
                tracing::warn!(
                    conversion_dir = %self.config.conversion_dir.display(),
                    %error,
                    "failed to get the available free space"
                );
                0
            }
        };

        CapabilityReport {
            hypervisor: None,
            capabilities: self.config.capabilities.clone(),
            free_space,
            resources: BTreeMap::new(),
        }
    }

    /// Heartbeat the service record and broadcast a capability snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat or broadcast fails.
    pub async fn publish_capabilities(&self) -> Result<()> {
        report::upsert_service_heartbeat(self.store.as_ref(), &self.config.host, "destination")?;
        let snapshot = self.build_report();
        report::publish(self.bus.as_ref(), "destination", &self.config.host, snapshot).await
    }

    /// Start the fixed-interval reporting task.
    pub fn spawn_reporting(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(worker.config.report_interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(error) = worker.publish_capabilities().await {
                    tracing::warn!(%error, "capability report failed");
                }
            }
        })
    }
}

#[async_trait]
impl<S: Store + 'static> Handler for DestinationWorker<S> {
    async fn handle(&self, method: &str, payload: Value) -> std::result::Result<Value, String> {
        match method {
            "create_instance" => {
                let payload: InstancePayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                self.create_instance(payload).await;
                Ok(Value::Null)
            }
            "create_volume" => {
                let payload: VolumePayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                self.create_volume(payload).await;
                Ok(Value::Null)
            }
            "create_network" => {
                let payload: NetworkPayload =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                self.create_network(payload).await;
                Ok(Value::Null)
            }
            "publish_service_capabilities" => {
                self.publish_capabilities().await.map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            other => Err(format!("unknown destination method: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{DiskArtifact, DiskFormat};
    use convoy_core::HypervisorId;
    use convoy_messaging::LocalBus;
    use convoy_store::{Resource, ResourceKind, RocksStore};
    use parking_lot::Mutex;
    use std::path::Path;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeDestination {
        fail: bool,
        created: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DestinationProvider for FakeDestination {
        async fn create_instance(
            &self,
            name: &str,
            _disks: &[DiskArtifact],
            _extra_params: &Value,
        ) -> std::result::Result<(), ProviderError> {
            if self.fail {
                return Err(ProviderError::Failed {
                    operation: "create_instance".to_string(),
                    message: "flavor not found".to_string(),
                });
            }
            self.created.lock().push(name.to_string());
            Ok(())
        }

        async fn create_volume(
            &self,
            name: &str,
            _path: &Path,
            _size_gb: u64,
            _extra_params: &Value,
        ) -> std::result::Result<(), ProviderError> {
            self.created.lock().push(name.to_string());
            Ok(())
        }

        async fn create_network(
            &self,
            name: &str,
            _properties: &Value,
            _extra_params: &Value,
        ) -> std::result::Result<(), ProviderError> {
            self.created.lock().push(name.to_string());
            Ok(())
        }
    }

    struct Fixture {
        worker: DestinationWorker<RocksStore>,
        store: Arc<RocksStore>,
        provider: Arc<FakeDestination>,
        _dirs: (TempDir, TempDir),
    }

    fn fixture(fail: bool) -> Fixture {
        let db_dir = TempDir::new().unwrap();
        let staging_dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(db_dir.path()).unwrap());
        let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
        let provider = Arc::new(FakeDestination {
            fail,
            created: Mutex::new(Vec::new()),
        });

        let config = WorkerConfig::new("worker-b", HypervisorId::generate(), staging_dir.path());
        let worker = DestinationWorker::new(
            config,
            Arc::clone(&store),
            bus,
            Arc::clone(&provider),
        );

        Fixture {
            worker,
            store,
            provider,
            _dirs: (db_dir, staging_dir),
        }
    }

    fn seed(store: &RocksStore) -> InstancePayload {
        let now = Utc::now();
        let resource = Resource {
            resource_id: ResourceId::generate(),
            id_at_source: "i-1".to_string(),
            name: "vm1".to_string(),
            kind: ResourceKind::Instance,
            source_hypervisor: HypervisorId::generate(),
            properties: Value::Null,
            migrated: false,
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        };
        store.put_resource(&resource).unwrap();

        let migration = Migration {
            migration_id: MigrationId::generate(),
            name: "move-vm1".to_string(),
            description: None,
            resource_id: resource.resource_id,
            destination_hypervisor: HypervisorId::generate(),
            status: MigrationStatus::Inprogress,
            event: Some("Fetching from source".to_string()),
            extra_params: Value::Null,
            start_time: now,
            finish_time: None,
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        };
        store.put_migration(&migration).unwrap();

        InstancePayload {
            migration,
            resource,
            disks: vec![DiskArtifact {
                index: 0,
                path: "/stage/disk0.qcow2".into(),
                format: DiskFormat::Qcow2,
            }],
        }
    }

    #[tokio::test]
    async fn success_completes_and_flags_resource() {
        let fx = fixture(false);
        let payload = seed(&fx.store);

        fx.worker.create_instance(payload.clone()).await;

        let migration = fx
            .store
            .get_migration(&payload.migration.migration_id)
            .unwrap()
            .unwrap();
        assert_eq!(migration.status, MigrationStatus::Completed);
        assert!(migration.event.is_none());
        assert!(migration.finish_time.is_some());

        let resource = fx
            .store
            .get_resource(&payload.resource.resource_id)
            .unwrap()
            .unwrap();
        assert!(resource.migrated);
        assert_eq!(fx.provider.created.lock().as_slice(), ["vm1"]);
    }

    #[tokio::test]
    async fn failure_errors_and_leaves_resource_unmigrated() {
        let fx = fixture(true);
        let payload = seed(&fx.store);

        fx.worker.create_instance(payload.clone()).await;

        let migration = fx
            .store
            .get_migration(&payload.migration.migration_id)
            .unwrap()
            .unwrap();
        assert_eq!(migration.status, MigrationStatus::Error);
        assert!(migration.event.is_none());

        let resource = fx
            .store
            .get_resource(&payload.resource.resource_id)
            .unwrap()
            .unwrap();
        assert!(!resource.migrated);
    }

    #[tokio::test]
    async fn settled_migration_redelivery_is_skipped() {
        let fx = fixture(false);
        let payload = seed(&fx.store);

        fx.worker.create_instance(payload.clone()).await;
        assert_eq!(fx.provider.created.lock().len(), 1);

        // redelivery after completion: the provider is not invoked again
        fx.worker.create_instance(payload).await;
        assert_eq!(fx.provider.created.lock().len(), 1);
    }

    #[tokio::test]
    async fn destination_report_has_no_discovery() {
        let fx = fixture(false);
        let snapshot = fx.worker.build_report();
        assert!(snapshot.hypervisor.is_none());
        assert!(snapshot.resources.is_empty());
        assert!(snapshot.free_space > 0);
    }
}
