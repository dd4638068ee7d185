//! API-facing migration orchestration service.
//!
//! `MigrationService` is the surface the (external) REST layer drives:
//! hypervisor registration, migration creation, and migration queries.
//! Creation validates synchronously, persists the migration in
//! `Initiating`, resolves the source worker host, and dispatches the
//! asynchronous fetch request; everything after that is driven by the
//! workers.

use std::sync::Arc;

use chrono::Utc;
use convoy_core::{HypervisorId, MigrationId, ResourceId};
use convoy_messaging::{MessageBus, Topic};
use convoy_scheduler::{RequestSpec, SchedulerError, SchedulerService};
use convoy_store::{Hypervisor, HypervisorKind, Migration, MigrationStatus, Store};
use regex::Regex;
use serde_json::Value;

use crate::error::{MigrationError, Result};
use crate::lifecycle;
use crate::locks::OperationLocks;
use crate::provider::ProviderRegistry;
use crate::report::encode;
use crate::types::{
    CreateMigrationRequest, GetResourceRequest, HypervisorSpec, MigrationFilters,
    ValidateForMigrationRequest,
};

/// Event recorded when host selection fails for a new migration.
const NO_VALID_HOST_EVENT: &str = "No valid host found";

/// The migration orchestration service.
pub struct MigrationService<S> {
    store: Arc<S>,
    bus: Arc<dyn MessageBus>,
    providers: Arc<ProviderRegistry>,
    scheduler: Option<Arc<SchedulerService<S>>>,
    locks: OperationLocks,
}

impl<S: Store> MigrationService<S> {
    /// Create a service that targets source workers directly through the
    /// owning hypervisor's registered host.
    #[must_use]
    pub fn new(store: Arc<S>, bus: Arc<dyn MessageBus>, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            store,
            bus,
            providers,
            scheduler: None,
            locks: OperationLocks::default(),
        }
    }

    /// Route host selection through the scheduler instead of direct
    /// source-hypervisor targeting.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<SchedulerService<S>>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Access the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    // =========================================================================
    // Hypervisor Operations
    // =========================================================================

    /// Register a hypervisor, or update it if the name is already taken.
    ///
    /// The driver identifier must resolve in the provider registry and
    /// every exclude pattern must be a valid regex; both are rejected here,
    /// at registration time, never at dispatch.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Validation` for bad input.
    pub fn register_hypervisor(&self, spec: HypervisorSpec) -> Result<Hypervisor> {
        if spec.name.trim().is_empty() {
            return Err(MigrationError::Validation(
                "hypervisor name cannot be empty".to_string(),
            ));
        }
        if spec.capabilities.is_empty() {
            return Err(MigrationError::Validation(
                "hypervisor must declare at least one capability".to_string(),
            ));
        }
        if !self.providers.is_registered(spec.kind, &spec.driver) {
            return Err(MigrationError::Validation(format!(
                "driver {} does not resolve to a registered {:?} provider",
                spec.driver, spec.kind
            )));
        }
        for pattern in &spec.exclude {
            Regex::new(pattern).map_err(|e| {
                MigrationError::Validation(format!("invalid exclude pattern {pattern:?}: {e}"))
            })?;
        }

        let now = Utc::now();
        let hypervisor = match self.store.get_hypervisor_by_name(&spec.name)? {
            Some(mut existing) => {
                existing.kind = spec.kind;
                existing.driver = spec.driver;
                existing.credentials = spec.credentials;
                existing.capabilities = spec.capabilities;
                existing.exclude = spec.exclude;
                existing.conversion_dir = spec.conversion_dir;
                existing.registered_host = spec.registered_host;
                existing.updated_at = now;
                existing
            }
            None => Hypervisor {
                hypervisor_id: HypervisorId::generate(),
                name: spec.name,
                kind: spec.kind,
                driver: spec.driver,
                credentials: spec.credentials,
                capabilities: spec.capabilities,
                exclude: spec.exclude,
                conversion_dir: spec.conversion_dir,
                enabled: true,
                registered_host: spec.registered_host,
                created_at: now,
                updated_at: now,
                deleted: false,
                deleted_at: None,
            },
        };

        self.store.put_hypervisor(&hypervisor)?;

        tracing::info!(
            hypervisor_id = %hypervisor.hypervisor_id,
            name = %hypervisor.name,
            kind = ?hypervisor.kind,
            "registered hypervisor"
        );

        Ok(hypervisor)
    }

    /// Get a hypervisor by ID.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::HypervisorNotFound` if absent or deleted.
    pub fn get_hypervisor(&self, id: &HypervisorId) -> Result<Hypervisor> {
        self.store
            .get_hypervisor(id)?
            .ok_or(MigrationError::HypervisorNotFound(*id))
    }

    /// List all live hypervisors.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn list_hypervisors(&self) -> Result<Vec<Hypervisor>> {
        Ok(self.store.list_hypervisors()?)
    }

    /// Remove a hypervisor, cascading to its discovered resources.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::HypervisorNotFound` if absent or deleted.
    pub fn remove_hypervisor(&self, id: &HypervisorId) -> Result<()> {
        let hypervisor = self.get_hypervisor(id)?;

        self.store.soft_delete_hypervisor(id)?;
        let removed = self.store.soft_delete_resources_by_hypervisor(id)?;

        tracing::info!(
            hypervisor_id = %id,
            name = %hypervisor.name,
            resources_removed = removed,
            "removed hypervisor"
        );

        Ok(())
    }

    // =========================================================================
    // Migration Operations
    // =========================================================================

    /// Create a migration and dispatch its fetch phase.
    ///
    /// # Errors
    ///
    /// - `MigrationError::Validation` for bad input, before anything is
    ///   dispatched
    /// - `MigrationError::Conflict` when another migration is actively
    ///   processing the resource
    /// - `MigrationError::SchedulingFailed` when no eligible worker host is
    ///   found; the migration is left `Initiating` with an explanatory
    ///   event and nothing is dispatched
    pub async fn create_migration(&self, request: CreateMigrationRequest) -> Result<Migration> {
        if request.name.trim().is_empty() {
            return Err(MigrationError::Validation(
                "migration name cannot be empty".to_string(),
            ));
        }

        let resource = self
            .store
            .get_resource(&request.resource_id)?
            .ok_or(MigrationError::ResourceNotFound(request.resource_id))?;
        if resource.migrated {
            return Err(MigrationError::Validation(format!(
                "resource {} is already migrated",
                resource.resource_id
            )));
        }

        let destination = self.get_hypervisor(&request.destination_hypervisor)?;
        if destination.kind != HypervisorKind::Destination {
            return Err(MigrationError::Validation(format!(
                "hypervisor {} is not a destination",
                destination.name
            )));
        }
        if !destination.enabled {
            return Err(MigrationError::Validation(format!(
                "destination hypervisor {} is disabled",
                destination.name
            )));
        }

        let source_hypervisor = self.get_hypervisor(&resource.source_hypervisor)?;

        // Serialize concurrent creation attempts against the same resource,
        // then reject while an earlier migration is still active.
        let _guard = self
            .locks
            .acquire(resource.resource_id, "create_migration")
            .await?;

        // A migration that never got a host was never dispatched: no worker
        // will touch it, so it does not hold the resource.
        if let Some(active) = self
            .store
            .list_migrations_by_resource(&resource.resource_id)?
            .into_iter()
            .find(|m| {
                lifecycle::is_active(m.status) && m.event.as_deref() != Some(NO_VALID_HOST_EVENT)
            })
        {
            return Err(MigrationError::Conflict(format!(
                "resource {} is already being migrated by {}",
                resource.resource_id, active.migration_id
            )));
        }

        let now = Utc::now();
        let migration = Migration {
            migration_id: MigrationId::generate(),
            name: request.name,
            description: request.description,
            resource_id: resource.resource_id,
            destination_hypervisor: destination.hypervisor_id,
            status: MigrationStatus::Initiating,
            event: Some("Scheduling".to_string()),
            extra_params: request.extra_params,
            start_time: now,
            finish_time: None,
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        };
        self.store.put_migration(&migration)?;

        tracing::info!(
            migration_id = %migration.migration_id,
            resource_id = %resource.resource_id,
            destination = %destination.name,
            "created migration"
        );

        let source_host = match self.resolve_source_host(&resource, &source_hypervisor) {
            Ok(host) => host,
            Err(error) => return self.fail_scheduling(&migration.migration_id, error),
        };

        // The selected worker confirms capability and space before the
        // fetch is dispatched.
        if !self.validate_with_worker(&source_host, &resource).await {
            return self.fail_scheduling(
                &migration.migration_id,
                MigrationError::SchedulingFailed(SchedulerError::NoValidHost),
            );
        }

        let payload = GetResourceRequest {
            migration: migration.clone(),
            resource,
            dest_host: destination.registered_host,
        };
        self.bus
            .cast(
                &Topic::source(&source_host),
                "get_resource",
                encode(&payload)?,
            )
            .await?;

        tracing::info!(
            migration_id = %migration.migration_id,
            source_host = %source_host,
            "dispatched fetch request"
        );

        Ok(migration)
    }

    /// Resolve the worker host that should run the fetch phase.
    fn resolve_source_host(
        &self,
        resource: &convoy_store::Resource,
        source_hypervisor: &Hypervisor,
    ) -> Result<String> {
        match &self.scheduler {
            Some(scheduler) => Ok(scheduler.select_host(&RequestSpec::source(resource.kind, 0))?),
            None => Ok(source_hypervisor.registered_host.clone()),
        }
    }

    /// Ask the selected source worker whether it can serve the migration.
    async fn validate_with_worker(
        &self,
        source_host: &str,
        resource: &convoy_store::Resource,
    ) -> bool {
        let request = ValidateForMigrationRequest {
            resource_kind: resource.kind,
            size_required: 0,
        };
        let Ok(payload) = encode(&request) else {
            return false;
        };

        match self
            .bus
            .call(&Topic::source(source_host), "validate_for_migration", payload)
            .await
        {
            Ok(Value::Bool(accepted)) => accepted,
            Ok(_) => false,
            Err(error) => {
                tracing::warn!(source_host, %error, "source worker validation unavailable");
                false
            }
        }
    }

    /// Record a scheduling failure and surface it, leaving the migration
    /// in `Initiating` with an explanatory event.
    fn fail_scheduling(&self, migration_id: &MigrationId, error: MigrationError) -> Result<Migration> {
        tracing::warn!(migration_id = %migration_id, %error, "migration not dispatched");
        self.store.update_migration_status(
            migration_id,
            MigrationStatus::Initiating,
            Some(NO_VALID_HOST_EVENT.to_string()),
        )?;
        Err(error)
    }

    /// Get a migration by ID.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::MigrationNotFound` if absent or deleted.
    pub fn get_migration(&self, id: &MigrationId) -> Result<Migration> {
        self.store
            .get_migration(id)?
            .ok_or(MigrationError::MigrationNotFound(*id))
    }

    /// List migrations matching the given filters.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub fn list_migrations(&self, filters: &MigrationFilters) -> Result<Vec<Migration>> {
        let migrations = match filters.resource_id {
            Some(resource_id) => self.store.list_migrations_by_resource(&resource_id)?,
            None => self.store.list_migrations()?,
        };

        Ok(migrations
            .into_iter()
            .filter(|m| filters.status.map_or(true, |status| m.status == status))
            .collect())
    }

    /// Soft-delete a migration.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::MigrationNotFound` if absent or deleted.
    pub fn delete_migration(&self, id: &MigrationId) -> Result<()> {
        self.get_migration(id)?;
        self.store.soft_delete_migration(id)?;

        tracing::info!(migration_id = %id, "deleted migration");
        Ok(())
    }

    /// Get a resource by ID.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::ResourceNotFound` if absent or deleted.
    pub fn get_resource(&self, id: &ResourceId) -> Result<convoy_store::Resource> {
        self.store
            .get_resource(id)?
            .ok_or(MigrationError::ResourceNotFound(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, SourceFactory};
    use async_trait::async_trait;
    use convoy_messaging::{Handler, LocalBus};
    use convoy_store::{Resource, ResourceKind, RocksStore};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn registry() -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        let fail_source: SourceFactory =
            Arc::new(|_| Err(ProviderError::Unavailable("not wired in tests".to_string())));
        registry.register_source("openstack", fail_source);
        registry.register_destination(
            "openstack",
            Arc::new(|_| Err(ProviderError::Unavailable("not wired in tests".to_string()))),
        );
        Arc::new(registry)
    }

    fn setup() -> (MigrationService<RocksStore>, Arc<LocalBus>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let bus = Arc::new(LocalBus::new());
        let bus_dyn: Arc<dyn MessageBus> = Arc::clone(&bus);
        let service = MigrationService::new(store, bus_dyn, registry());
        (service, bus, dir)
    }

    fn source_spec(name: &str) -> HypervisorSpec {
        HypervisorSpec {
            name: name.to_string(),
            kind: HypervisorKind::Source,
            driver: "openstack".to_string(),
            credentials: serde_json::json!({"auth_url": "http://keystone:5000"}),
            capabilities: vec![ResourceKind::Instance],
            exclude: vec![],
            conversion_dir: "/var/lib/convoy/staging".into(),
            registered_host: "worker-a".to_string(),
        }
    }

    fn destination_spec(name: &str) -> HypervisorSpec {
        HypervisorSpec {
            kind: HypervisorKind::Destination,
            registered_host: "worker-b".to_string(),
            ..source_spec(name)
        }
    }

    fn seed_resource(service: &MigrationService<RocksStore>, hypervisor: &HypervisorId) -> Resource {
        let now = Utc::now();
        let resource = Resource {
            resource_id: convoy_core::ResourceId::generate(),
            id_at_source: "i-1".to_string(),
            name: "vm1".to_string(),
            kind: ResourceKind::Instance,
            source_hypervisor: *hypervisor,
            properties: serde_json::json!({"memory": 2048}),
            migrated: false,
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        };
        service.store().put_resource(&resource).unwrap();
        resource
    }

    /// Source-worker stand-in: accepts validation, records fetch casts.
    struct AcceptingWorker {
        tx: mpsc::UnboundedSender<serde_json::Value>,
    }

    #[async_trait]
    impl Handler for AcceptingWorker {
        async fn handle(
            &self,
            method: &str,
            payload: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, String> {
            match method {
                "validate_for_migration" => Ok(Value::Bool(true)),
                "get_resource" => {
                    self.tx.send(payload).map_err(|e| e.to_string())?;
                    Ok(Value::Null)
                }
                other => Err(format!("unexpected method {other}")),
            }
        }
    }

    fn accepting_worker(
        bus: &LocalBus,
        host: &str,
    ) -> mpsc::UnboundedReceiver<serde_json::Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(&Topic::source(host), Arc::new(AcceptingWorker { tx }));
        rx
    }

    #[test]
    fn register_rejects_unknown_driver() {
        let (service, _bus, _dir) = setup();
        let mut spec = source_spec("os-src-1");
        spec.driver = "xen".to_string();

        let result = service.register_hypervisor(spec);
        assert!(matches!(result, Err(MigrationError::Validation(_))));
    }

    #[test]
    fn register_rejects_bad_exclude_pattern() {
        let (service, _bus, _dir) = setup();
        let mut spec = source_spec("os-src-1");
        spec.exclude = vec!["te[st".to_string()];

        let result = service.register_hypervisor(spec);
        assert!(matches!(result, Err(MigrationError::Validation(_))));
    }

    #[test]
    fn register_is_an_upsert_by_name() {
        let (service, _bus, _dir) = setup();

        let first = service.register_hypervisor(source_spec("os-src-1")).unwrap();

        let mut updated = source_spec("os-src-1");
        updated.registered_host = "worker-z".to_string();
        let second = service.register_hypervisor(updated).unwrap();

        assert_eq!(second.hypervisor_id, first.hypervisor_id);
        assert_eq!(second.registered_host, "worker-z");
        assert_eq!(service.list_hypervisors().unwrap().len(), 1);
    }

    #[test]
    fn remove_hypervisor_cascades_to_resources() {
        let (service, _bus, _dir) = setup();
        let hypervisor = service.register_hypervisor(source_spec("os-src-1")).unwrap();
        let resource = seed_resource(&service, &hypervisor.hypervisor_id);

        service.remove_hypervisor(&hypervisor.hypervisor_id).unwrap();

        assert!(matches!(
            service.get_hypervisor(&hypervisor.hypervisor_id),
            Err(MigrationError::HypervisorNotFound(_))
        ));
        assert!(matches!(
            service.get_resource(&resource.resource_id),
            Err(MigrationError::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn create_migration_dispatches_fetch() {
        let (service, bus, _dir) = setup();
        let source = service.register_hypervisor(source_spec("os-src-1")).unwrap();
        let destination = service
            .register_hypervisor(destination_spec("os-dst-1"))
            .unwrap();
        let resource = seed_resource(&service, &source.hypervisor_id);
        let mut rx = accepting_worker(&bus, "worker-a");

        let migration = service
            .create_migration(CreateMigrationRequest {
                name: "move-vm1".to_string(),
                description: None,
                resource_id: resource.resource_id,
                destination_hypervisor: destination.hypervisor_id,
                extra_params: serde_json::json!({"flavor": "m1.small"}),
            })
            .await
            .unwrap();

        assert_eq!(migration.status, MigrationStatus::Initiating);
        assert_eq!(migration.event.as_deref(), Some("Scheduling"));

        let payload = rx.recv().await.unwrap();
        let request: GetResourceRequest = serde_json::from_value(payload).unwrap();
        assert_eq!(request.migration.migration_id, migration.migration_id);
        assert_eq!(request.resource.resource_id, resource.resource_id);
        assert_eq!(request.dest_host, "worker-b");
    }

    #[tokio::test]
    async fn create_migration_rejects_unknown_resource() {
        let (service, _bus, _dir) = setup();
        let destination = service
            .register_hypervisor(destination_spec("os-dst-1"))
            .unwrap();

        let result = service
            .create_migration(CreateMigrationRequest {
                name: "move-vm1".to_string(),
                description: None,
                resource_id: convoy_core::ResourceId::generate(),
                destination_hypervisor: destination.hypervisor_id,
                extra_params: Value::Null,
            })
            .await;
        assert!(matches!(result, Err(MigrationError::ResourceNotFound(_))));
    }

    #[tokio::test]
    async fn create_migration_rejects_migrated_resource() {
        let (service, _bus, _dir) = setup();
        let source = service.register_hypervisor(source_spec("os-src-1")).unwrap();
        let destination = service
            .register_hypervisor(destination_spec("os-dst-1"))
            .unwrap();
        let mut resource = seed_resource(&service, &source.hypervisor_id);
        resource.migrated = true;
        service.store().put_resource(&resource).unwrap();

        let result = service
            .create_migration(CreateMigrationRequest {
                name: "move-vm1".to_string(),
                description: None,
                resource_id: resource.resource_id,
                destination_hypervisor: destination.hypervisor_id,
                extra_params: Value::Null,
            })
            .await;
        assert!(matches!(result, Err(MigrationError::Validation(_))));
    }

    #[tokio::test]
    async fn create_migration_rejects_source_as_destination() {
        let (service, _bus, _dir) = setup();
        let source = service.register_hypervisor(source_spec("os-src-1")).unwrap();
        let resource = seed_resource(&service, &source.hypervisor_id);

        let result = service
            .create_migration(CreateMigrationRequest {
                name: "move-vm1".to_string(),
                description: None,
                resource_id: resource.resource_id,
                destination_hypervisor: source.hypervisor_id,
                extra_params: Value::Null,
            })
            .await;
        assert!(matches!(result, Err(MigrationError::Validation(_))));
    }

    #[tokio::test]
    async fn second_active_migration_conflicts() {
        let (service, bus, _dir) = setup();
        let source = service.register_hypervisor(source_spec("os-src-1")).unwrap();
        let destination = service
            .register_hypervisor(destination_spec("os-dst-1"))
            .unwrap();
        let resource = seed_resource(&service, &source.hypervisor_id);
        let _rx = accepting_worker(&bus, "worker-a");

        let request = CreateMigrationRequest {
            name: "move-vm1".to_string(),
            description: None,
            resource_id: resource.resource_id,
            destination_hypervisor: destination.hypervisor_id,
            extra_params: Value::Null,
        };

        service.create_migration(request.clone()).await.unwrap();
        let second = service.create_migration(request).await;
        assert!(matches!(second, Err(MigrationError::Conflict(_))));
    }

    #[tokio::test]
    async fn unreachable_worker_is_a_scheduling_failure() {
        let (service, _bus, _dir) = setup();
        let source = service.register_hypervisor(source_spec("os-src-1")).unwrap();
        let destination = service
            .register_hypervisor(destination_spec("os-dst-1"))
            .unwrap();
        let resource = seed_resource(&service, &source.hypervisor_id);

        // no worker subscribed on source.worker-a
        let result = service
            .create_migration(CreateMigrationRequest {
                name: "move-vm1".to_string(),
                description: None,
                resource_id: resource.resource_id,
                destination_hypervisor: destination.hypervisor_id,
                extra_params: Value::Null,
            })
            .await;
        assert!(matches!(result, Err(MigrationError::SchedulingFailed(_))));

        // the migration row survives with the explanatory event
        let migrations = service.list_migrations(&MigrationFilters::default()).unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].status, MigrationStatus::Initiating);
        assert_eq!(migrations[0].event.as_deref(), Some("No valid host found"));

        // an undispatched row does not block a retry attempt
        let retry = service
            .create_migration(CreateMigrationRequest {
                name: "move-vm1-again".to_string(),
                description: None,
                resource_id: resource.resource_id,
                destination_hypervisor: destination.hypervisor_id,
                extra_params: Value::Null,
            })
            .await;
        assert!(matches!(retry, Err(MigrationError::SchedulingFailed(_))));
    }

    #[tokio::test]
    async fn list_migrations_filters_by_status() {
        let (service, bus, _dir) = setup();
        let source = service.register_hypervisor(source_spec("os-src-1")).unwrap();
        let destination = service
            .register_hypervisor(destination_spec("os-dst-1"))
            .unwrap();
        let resource = seed_resource(&service, &source.hypervisor_id);
        let _rx = accepting_worker(&bus, "worker-a");

        let migration = service
            .create_migration(CreateMigrationRequest {
                name: "move-vm1".to_string(),
                description: None,
                resource_id: resource.resource_id,
                destination_hypervisor: destination.hypervisor_id,
                extra_params: Value::Null,
            })
            .await
            .unwrap();

        let initiating = service
            .list_migrations(&MigrationFilters {
                resource_id: Some(resource.resource_id),
                status: Some(MigrationStatus::Initiating),
            })
            .unwrap();
        assert_eq!(initiating.len(), 1);

        let completed = service
            .list_migrations(&MigrationFilters {
                resource_id: None,
                status: Some(MigrationStatus::Completed),
            })
            .unwrap();
        assert!(completed.is_empty());

        service.delete_migration(&migration.migration_id).unwrap();
        assert!(matches!(
            service.get_migration(&migration.migration_id),
            Err(MigrationError::MigrationNotFound(_))
        ));
    }
}
