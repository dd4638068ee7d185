//! `RocksDB` storage implementation.
//!
//! This module provides the `RocksStore` implementation of the `Store`
//! trait. Records are CBOR-encoded; indexes are maintained atomically with
//! the primary record through write batches.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use convoy_core::{HypervisorId, MigrationId, ResourceId, ServiceId};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Hypervisor, Migration, MigrationStatus, Resource, Service};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read and decode a primary record, returning `None` for tombstones.
    fn get_record<T>(&self, cf_name: &str, key: &[u8], live: impl Fn(&T) -> bool) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let handle = self.cf(cf_name)?;
        let data = self
            .db
            .get_cf(&handle, key)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match data {
            Some(bytes) => {
                let record: T = Self::deserialize(&bytes)?;
                Ok(live(&record).then_some(record))
            }
            None => Ok(None),
        }
    }

    /// Collect every index value under a key prefix.
    fn scan_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let handle = self.cf(cf_name)?;
        let mut out = Vec::new();

        for item in self
            .db
            .iterator_cf(&handle, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }

        Ok(out)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn id_from_index(value: &[u8]) -> Result<[u8; 16]> {
        value
            .try_into()
            .map_err(|_| StoreError::Database("malformed index value".to_string()))
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Hypervisor Operations
    // =========================================================================

    fn put_hypervisor(&self, hypervisor: &Hypervisor) -> Result<()> {
        let cf_primary = self.cf(cf::HYPERVISORS)?;
        let cf_by_name = self.cf(cf::HYPERVISORS_BY_NAME)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_primary,
            keys::hypervisor_key(&hypervisor.hypervisor_id),
            Self::serialize(hypervisor)?,
        );

        let name_key = keys::hypervisor_name_key(&hypervisor.name);
        if hypervisor.deleted {
            batch.delete_cf(&cf_by_name, name_key);
        } else {
            batch.put_cf(&cf_by_name, name_key, hypervisor.hypervisor_id.as_bytes());
        }

        self.write(batch)
    }

    fn get_hypervisor(&self, id: &HypervisorId) -> Result<Option<Hypervisor>> {
        self.get_record(cf::HYPERVISORS, &keys::hypervisor_key(id), |h: &Hypervisor| {
            !h.deleted
        })
    }

    fn get_hypervisor_by_name(&self, name: &str) -> Result<Option<Hypervisor>> {
        let cf_by_name = self.cf(cf::HYPERVISORS_BY_NAME)?;
        let id = self
            .db
            .get_cf(&cf_by_name, keys::hypervisor_name_key(name))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match id {
            Some(bytes) => {
                self.get_hypervisor(&HypervisorId::from_bytes(Self::id_from_index(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn list_hypervisors(&self) -> Result<Vec<Hypervisor>> {
        let handle = self.cf(cf::HYPERVISORS)?;
        let mut out = Vec::new();

        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let hypervisor: Hypervisor = Self::deserialize(&value)?;
            if !hypervisor.deleted {
                out.push(hypervisor);
            }
        }

        Ok(out)
    }

    fn soft_delete_hypervisor(&self, id: &HypervisorId) -> Result<()> {
        let mut hypervisor = self
            .get_hypervisor(id)?
            .ok_or(StoreError::NotFound("hypervisor"))?;

        let now = Utc::now();
        hypervisor.deleted = true;
        hypervisor.deleted_at = Some(now);
        hypervisor.updated_at = now;

        self.put_hypervisor(&hypervisor)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    fn put_resource(&self, resource: &Resource) -> Result<()> {
        let cf_primary = self.cf(cf::RESOURCES)?;
        let cf_by_source = self.cf(cf::RESOURCES_BY_SOURCE)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_primary,
            keys::resource_key(&resource.resource_id),
            Self::serialize(resource)?,
        );

        let source_key =
            keys::resource_source_key(&resource.source_hypervisor, &resource.id_at_source);
        if resource.deleted {
            batch.delete_cf(&cf_by_source, source_key);
        } else {
            batch.put_cf(&cf_by_source, source_key, resource.resource_id.as_bytes());
        }

        self.write(batch)
    }

    fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        self.get_record(cf::RESOURCES, &keys::resource_key(id), |r: &Resource| {
            !r.deleted
        })
    }

    fn get_resource_by_source(
        &self,
        hypervisor: &HypervisorId,
        id_at_source: &str,
    ) -> Result<Option<Resource>> {
        let cf_by_source = self.cf(cf::RESOURCES_BY_SOURCE)?;
        let id = self
            .db
            .get_cf(&cf_by_source, keys::resource_source_key(hypervisor, id_at_source))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match id {
            Some(bytes) => self.get_resource(&ResourceId::from_bytes(Self::id_from_index(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_resources_by_hypervisor(&self, hypervisor: &HypervisorId) -> Result<Vec<Resource>> {
        let entries = self.scan_prefix(
            cf::RESOURCES_BY_SOURCE,
            &keys::hypervisor_resource_prefix(hypervisor),
        )?;

        let mut out = Vec::with_capacity(entries.len());
        for (_, value) in entries {
            let id = ResourceId::from_bytes(Self::id_from_index(&value)?);
            if let Some(resource) = self.get_resource(&id)? {
                out.push(resource);
            }
        }

        Ok(out)
    }

    fn list_resources(&self) -> Result<Vec<Resource>> {
        let handle = self.cf(cf::RESOURCES)?;
        let mut out = Vec::new();

        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let resource: Resource = Self::deserialize(&value)?;
            if !resource.deleted {
                out.push(resource);
            }
        }

        Ok(out)
    }

    fn soft_delete_resource(&self, id: &ResourceId) -> Result<()> {
        let mut resource = self.get_resource(id)?.ok_or(StoreError::NotFound("resource"))?;

        let now = Utc::now();
        resource.deleted = true;
        resource.deleted_at = Some(now);
        resource.updated_at = now;

        self.put_resource(&resource)
    }

    fn soft_delete_resources_by_hypervisor(&self, hypervisor: &HypervisorId) -> Result<u64> {
        let resources = self.list_resources_by_hypervisor(hypervisor)?;
        let count = resources.len() as u64;

        for resource in resources {
            self.soft_delete_resource(&resource.resource_id)?;
        }

        Ok(count)
    }

    // =========================================================================
    // Migration Operations
    // =========================================================================

    fn put_migration(&self, migration: &Migration) -> Result<()> {
        let cf_primary = self.cf(cf::MIGRATIONS)?;
        let cf_by_resource = self.cf(cf::MIGRATIONS_BY_RESOURCE)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_primary,
            keys::migration_key(&migration.migration_id),
            Self::serialize(migration)?,
        );

        let index_key =
            keys::resource_migration_key(&migration.resource_id, &migration.migration_id);
        if migration.deleted {
            batch.delete_cf(&cf_by_resource, index_key);
        } else {
            batch.put_cf(&cf_by_resource, index_key, b"");
        }

        self.write(batch)
    }

    fn get_migration(&self, id: &MigrationId) -> Result<Option<Migration>> {
        self.get_record(cf::MIGRATIONS, &keys::migration_key(id), |m: &Migration| {
            !m.deleted
        })
    }

    fn list_migrations(&self) -> Result<Vec<Migration>> {
        let handle = self.cf(cf::MIGRATIONS)?;
        let mut out = Vec::new();

        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let migration: Migration = Self::deserialize(&value)?;
            if !migration.deleted {
                out.push(migration);
            }
        }

        Ok(out)
    }

    fn list_migrations_by_resource(&self, resource: &ResourceId) -> Result<Vec<Migration>> {
        let entries = self.scan_prefix(
            cf::MIGRATIONS_BY_RESOURCE,
            &keys::resource_migration_prefix(resource),
        )?;

        let mut out = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            // index key layout is resource_id (16) || migration_id (16)
            let id = MigrationId::from_bytes(Self::id_from_index(&key[16..])?);
            if let Some(migration) = self.get_migration(&id)? {
                out.push(migration);
            }
        }

        Ok(out)
    }

    fn update_migration_status(
        &self,
        id: &MigrationId,
        status: MigrationStatus,
        event: Option<String>,
    ) -> Result<Migration> {
        let mut migration = self
            .get_migration(id)?
            .ok_or(StoreError::NotFound("migration"))?;

        let now = Utc::now();
        migration.status = status;
        migration.event = event;
        migration.updated_at = now;
        if matches!(status, MigrationStatus::Completed | MigrationStatus::Error)
            && migration.finish_time.is_none()
        {
            migration.finish_time = Some(now);
        }

        self.put_migration(&migration)?;
        Ok(migration)
    }

    fn soft_delete_migration(&self, id: &MigrationId) -> Result<()> {
        let mut migration = self
            .get_migration(id)?
            .ok_or(StoreError::NotFound("migration"))?;

        let now = Utc::now();
        migration.deleted = true;
        migration.deleted_at = Some(now);
        migration.updated_at = now;

        self.put_migration(&migration)
    }

    // =========================================================================
    // Service Operations
    // =========================================================================

    fn put_service(&self, service: &Service) -> Result<()> {
        let cf_primary = self.cf(cf::SERVICES)?;
        let cf_by_host = self.cf(cf::SERVICES_BY_HOST)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_primary,
            keys::service_key(&service.service_id),
            Self::serialize(service)?,
        );

        let host_key = keys::service_host_key(&service.host, &service.binary);
        if service.deleted {
            batch.delete_cf(&cf_by_host, host_key);
        } else {
            batch.put_cf(&cf_by_host, host_key, service.service_id.as_bytes());
        }

        self.write(batch)
    }

    fn get_service_by_host_and_binary(
        &self,
        host: &str,
        binary: &str,
    ) -> Result<Option<Service>> {
        let cf_by_host = self.cf(cf::SERVICES_BY_HOST)?;
        let id = self
            .db
            .get_cf(&cf_by_host, keys::service_host_key(host, binary))
            .map_err(|e| StoreError::Database(e.to_string()))?;

        match id {
            Some(bytes) => {
                let id = ServiceId::from_bytes(Self::id_from_index(&bytes)?);
                self.get_record(cf::SERVICES, &keys::service_key(&id), |s: &Service| {
                    !s.deleted
                })
            }
            None => Ok(None),
        }
    }

    fn list_services_by_topic(&self, topic: &str) -> Result<Vec<Service>> {
        let handle = self.cf(cf::SERVICES)?;
        let mut out = Vec::new();

        for item in self.db.iterator_cf(&handle, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let service: Service = Self::deserialize(&value)?;
            if !service.deleted && !service.disabled && service.topic == topic {
                out.push(service);
            }
        }

        Ok(out)
    }

    fn soft_delete_service(&self, id: &ServiceId) -> Result<()> {
        let service = self.get_record(cf::SERVICES, &keys::service_key(id), |s: &Service| {
            !s.deleted
        })?;
        let mut service = service.ok_or(StoreError::NotFound("service"))?;

        let now = Utc::now();
        service.deleted = true;
        service.deleted_at = Some(now);
        service.updated_at = now;

        self.put_service(&service)
    }
}
