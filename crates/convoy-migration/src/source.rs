//! The source worker role.
//!
//! A source worker owns one source hypervisor. It answers `get_resource`
//! requests — pull the resource off the hypervisor, convert any disk
//! artifacts, forward a creation request to the destination worker — and
//! broadcasts periodic capability reports that double as resource
//! discovery.
//!
//! A provider failure inside a handler is terminal for the migration: the
//! worker records the `Error` status, logs the cause with the migration and
//! resource identifiers, and returns cleanly to the fabric. Nothing is
//! re-raised across the messaging boundary and nothing is retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use convoy_core::MigrationId;
use convoy_messaging::{Handler, MessageBus, Topic};
use convoy_scheduler::{CapabilityReport, DiscoveredResource};
use convoy_store::{MigrationStatus, ResourceKind, Store};
use regex::Regex;
use serde_json::Value;

use crate::convert::{self, ImageConverter};
use crate::error::{MigrationError, Result};
use crate::lifecycle;
use crate::locks::OperationLocks;
use crate::provider::SourceProvider;
use crate::report;
use crate::types::{
    GetResourceRequest, InstancePayload, NetworkPayload, ValidateForMigrationRequest,
    VolumePayload, WorkerConfig,
};

/// A worker hosting a source provider.
pub struct SourceWorker<S> {
    config: WorkerConfig,
    store: Arc<S>,
    bus: Arc<dyn MessageBus>,
    provider: Arc<dyn SourceProvider>,
    converter: Arc<dyn ImageConverter>,
    locks: OperationLocks,
    exclude: Vec<Regex>,
}

impl<S: Store + 'static> SourceWorker<S> {
    /// Create a source worker.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Validation` if an exclude pattern does not
    /// compile.
    pub fn new(
        config: WorkerConfig,
        store: Arc<S>,
        bus: Arc<dyn MessageBus>,
        provider: Arc<dyn SourceProvider>,
        converter: Arc<dyn ImageConverter>,
    ) -> Result<Self> {
        let exclude = config
            .exclude
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    MigrationError::Validation(format!(
                        "invalid exclude pattern {pattern:?}: {e}"
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let locks = OperationLocks::new(Duration::from_secs(config.lock_wait_secs));

        Ok(Self {
            config,
            store,
            bus,
            provider,
            converter,
            locks,
            exclude,
        })
    }

    /// Subscribe this worker on its point-to-point topic.
    pub fn subscribe(self: &Arc<Self>, bus: &convoy_messaging::LocalBus) {
        let handler: Arc<dyn Handler> = Arc::clone(self);
        bus.subscribe(&Topic::source(&self.config.host), handler);
    }

    // =========================================================================
    // Fetch Phase
    // =========================================================================

    /// Handle a `get_resource` request.
    ///
    /// All failures are absorbed into the migration's `Error` status.
    pub async fn get_resource(&self, request: GetResourceRequest) {
        let migration_id = request.migration.migration_id;
        let resource_id = request.resource.resource_id;

        if let Err(error) = self.process_get_resource(request).await {
            tracing::error!(
                migration_id = %migration_id,
                resource_id = %resource_id,
                %error,
                "resource fetch failed"
            );
            if let Err(store_error) =
                self.store
                    .update_migration_status(&migration_id, MigrationStatus::Error, None)
            {
                tracing::error!(
                    migration_id = %migration_id,
                    error = %store_error,
                    "failed to record migration error"
                );
            }
        }
    }

    async fn process_get_resource(&self, request: GetResourceRequest) -> Result<()> {
        let _guard = self
            .locks
            .acquire(request.resource.resource_id, "get_resource")
            .await?;

        // At-least-once delivery: a redelivered request for a settled
        // migration is dropped, not re-run.
        let migration = self
            .store
            .get_migration(&request.migration.migration_id)?
            .ok_or(MigrationError::MigrationNotFound(
                request.migration.migration_id,
            ))?;
        if lifecycle::is_terminal(migration.status) {
            tracing::warn!(
                migration_id = %migration.migration_id,
                status = %migration.status,
                "ignoring fetch request for settled migration"
            );
            return Ok(());
        }

        match request.resource.kind {
            ResourceKind::Instance => self.get_instance(&request).await,
            ResourceKind::Volume => self.get_volume(&request).await,
            ResourceKind::Network => self.get_network(&request).await,
        }
    }

    /// Apply a status/event update, validating real status changes.
    fn advance(
        &self,
        migration_id: &MigrationId,
        status: MigrationStatus,
        event: &str,
    ) -> Result<()> {
        let current = self
            .store
            .get_migration(migration_id)?
            .ok_or(MigrationError::MigrationNotFound(*migration_id))?;
        if current.status != status {
            lifecycle::validate_transition(migration_id, current.status, status)?;
        }
        self.store
            .update_migration_status(migration_id, status, Some(event.to_string()))?;
        Ok(())
    }

    async fn get_instance(&self, request: &GetResourceRequest) -> Result<()> {
        let migration_id = request.migration.migration_id;
        tracing::info!(
            migration_id = %migration_id,
            instance_id = %request.resource.id_at_source,
            "getting instance from source hypervisor"
        );

        self.advance(&migration_id, MigrationStatus::Inprogress, "Fetching from source")?;
        let disks = self
            .provider
            .fetch_instance(&request.resource.id_at_source, &self.config.conversion_dir)
            .await?;

        self.advance(&migration_id, MigrationStatus::Inprogress, "Converting disk formats")?;
        let disks = convert::convert_disks(
            self.converter.as_ref(),
            disks,
            self.config.target_disk_format,
        )
        .await?;

        let payload = InstancePayload {
            migration: self.current(&migration_id)?,
            resource: request.resource.clone(),
            disks,
        };
        self.cast_to_destination(&request.dest_host, "create_instance", &payload)
            .await
    }

    async fn get_volume(&self, request: &GetResourceRequest) -> Result<()> {
        let migration_id = request.migration.migration_id;
        tracing::info!(
            migration_id = %migration_id,
            volume_id = %request.resource.id_at_source,
            "getting volume from source hypervisor"
        );

        self.advance(&migration_id, MigrationStatus::Inprogress, "Fetching from source")?;
        let path = self
            .provider
            .fetch_volume(
                &request.resource.id_at_source,
                &migration_id,
                &self.config.conversion_dir,
            )
            .await?;

        let size_gb = request
            .resource
            .properties
            .get("size")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                MigrationError::Validation(format!(
                    "volume resource {} has no size property",
                    request.resource.resource_id
                ))
            })?;

        let payload = VolumePayload {
            migration: self.current(&migration_id)?,
            resource: request.resource.clone(),
            path,
            size_gb,
        };
        self.cast_to_destination(&request.dest_host, "create_volume", &payload)
            .await
    }

    async fn get_network(&self, request: &GetResourceRequest) -> Result<()> {
        let migration_id = request.migration.migration_id;
        tracing::info!(
            migration_id = %migration_id,
            network_id = %request.resource.id_at_source,
            "forwarding network information from inventory"
        );

        // Network migration carries no artifact: the connectivity
        // parameters captured at discovery are the whole payload.
        self.advance(&migration_id, MigrationStatus::Inprogress, "Fetching from source")?;

        let payload = NetworkPayload {
            migration: self.current(&migration_id)?,
            resource: request.resource.clone(),
        };
        self.cast_to_destination(&request.dest_host, "create_network", &payload)
            .await
    }

    fn current(&self, migration_id: &MigrationId) -> Result<convoy_store::Migration> {
        self.store
            .get_migration(migration_id)?
            .ok_or(MigrationError::MigrationNotFound(*migration_id))
    }

    async fn cast_to_destination<T: serde::Serialize>(
        &self,
        dest_host: &str,
        method: &str,
        payload: &T,
    ) -> Result<()> {
        self.bus
            .cast(
                &Topic::destination(dest_host),
                method,
                report::encode(payload)?,
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    // Capability Reporting
    // =========================================================================

    fn is_excluded(&self, resource: &DiscoveredResource) -> bool {
        self.exclude
            .iter()
            .any(|re| re.is_match(&resource.id_at_source) || re.is_match(&resource.name))
    }

    /// Collect the worker's current capability snapshot.
    ///
    /// Enumeration failures for one kind are logged and skipped; the
    /// report is opportunistic, not transactional.
    pub async fn build_report(&self) -> CapabilityReport {
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

        let mut resources = BTreeMap::new();
        for kind in &self.config.capabilities {
            let listed = match kind {
                ResourceKind::Instance => self.provider.list_instances().await,
                ResourceKind::Volume => self.provider.list_volumes().await,
                ResourceKind::Network => self.provider.list_networks().await,
            };

            match listed {
                Ok(list) => {
                    let kept: Vec<_> =
                        list.into_iter().filter(|r| !self.is_excluded(r)).collect();
                    if !kept.is_empty() {
                        resources.insert(*kind, kept);
                    }
                }
                Err(error) => {
                    tracing::warn!(kind = %kind, %error, "resource enumeration failed");
                }
            }
        }

        CapabilityReport {
            hypervisor: Some(self.config.hypervisor_id),
            capabilities: self.config.capabilities.clone(),
            free_space,
            resources,
        }
    }

    /// Heartbeat the service record and broadcast a capability snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the heartbeat or broadcast fails.
    pub async fn publish_capabilities(&self) -> Result<()> {
        report::upsert_service_heartbeat(self.store.as_ref(), &self.config.host, "source")?;
        let snapshot = self.build_report().await;
        report::publish(self.bus.as_ref(), "source", &self.config.host, snapshot).await
    }

    /// Start the fixed-interval reporting task.
    ///
    /// The task runs independently of migration handling and never blocks
    /// on it.
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

    /// Answer the pre-dispatch validation query.
    fn validate_for_migration(&self, request: &ValidateForMigrationRequest) -> bool {
        if !self.config.capabilities.contains(&request.resource_kind) {
            return false;
        }
        convert::free_space(&self.config.conversion_dir)
            .map_or(true, |free| free >= request.size_required)
    }
}

#[async_trait]
impl<S: Store + 'static> Handler for SourceWorker<S> {
    async fn handle(&self, method: &str, payload: Value) -> std::result::Result<Value, String> {
        match method {
            "get_resource" => {
                let request: GetResourceRequest =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                self.get_resource(request).await;
                Ok(Value::Null)
            }
            "validate_for_migration" => {
                let request: ValidateForMigrationRequest =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                Ok(Value::Bool(self.validate_for_migration(&request)))
            }
            "publish_service_capabilities" => {
                self.publish_capabilities().await.map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            other => Err(format!("unknown source method: {other}")),
        }
    }
}
