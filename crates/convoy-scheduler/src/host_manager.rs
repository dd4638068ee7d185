//! The capability registry: per-host worker state tracking.
//!
//! Workers broadcast periodic capability reports; this module stores the
//! latest snapshot per host (last-write-wins, no history), ingests the
//! resources source workers discover, and reconciles the snapshot set
//! against the live service registry on every scheduling decision.
//!
//! Registry state is owned exclusively by [`HostManager`]: it is built at
//! construction and refreshed explicitly, never reached through a global.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use convoy_core::ResourceId;
use convoy_store::{Resource, Service, Store};
use parking_lot::RwLock;

use crate::error::Result;
use crate::types::{CapabilityReport, SchedulerConfig, StampedReport};

/// Snapshot of one live, reporting worker host.
#[derive(Debug, Clone)]
pub struct HostState {
    /// Bare host name (the messaging topic is `<topic>.<host>`).
    pub host: String,
    /// Role topic the host's service listens on.
    pub topic: String,
    /// Last capability report received from the host.
    pub capabilities: CapabilityReport,
    /// The service registration backing this host.
    pub service: Service,
    /// When the capability report was received.
    pub updated: DateTime<Utc>,
}

impl HostState {
    /// Bytes free in the host's conversion directory.
    #[must_use]
    pub const fn free_space(&self) -> u64 {
        self.capabilities.free_space
    }

    /// Whether the host's driver supports the given resource kind.
    #[must_use]
    pub fn supports(&self, kind: convoy_store::ResourceKind) -> bool {
        self.capabilities.supports(kind)
    }
}

/// The capability registry.
///
/// Keys in all three maps are `<topic>.<host>` strings, so one physical
/// host running both a source and a destination worker is tracked twice.
pub struct HostManager<S> {
    store: Arc<S>,
    config: SchedulerConfig,
    service_states: RwLock<HashMap<String, StampedReport>>,
    host_state_map: RwLock<HashMap<String, HostState>>,
    no_capabilities_hosts: RwLock<HashSet<String>>,
}

impl<S: Store> HostManager<S> {
    /// Create a registry over the given store.
    #[must_use]
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        Self {
            store,
            config,
            service_states: RwLock::new(HashMap::new()),
            host_state_map: RwLock::new(HashMap::new()),
            no_capabilities_hosts: RwLock::new(HashSet::new()),
        }
    }

    /// Process a capability update from a worker.
    ///
    /// Reports from service names outside the configured worker topics are
    /// ignored. Source reports additionally feed resource discovery: every
    /// enumerated resource not already known by `(source_hypervisor,
    /// id_at_source)` is created. Re-reporting a known resource is a no-op,
    /// so the inventory is append-only and idempotent under re-reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if resource ingestion fails at the store.
    pub fn update_service_capabilities(
        &self,
        service_name: &str,
        host: &str,
        capabilities: CapabilityReport,
    ) -> Result<()> {
        if !self.config.worker_topics.iter().any(|t| t == service_name) {
            tracing::debug!(service_name, host, "ignoring service update");
            return Ok(());
        }

        let created = self.ingest_discovered(&capabilities)?;
        if created > 0 {
            tracing::info!(host, created, "discovered new resources");
        }

        let key = format!("{service_name}.{host}");
        self.service_states.write().insert(
            key.clone(),
            StampedReport {
                report: capabilities,
                received_at: Utc::now(),
            },
        );
        self.no_capabilities_hosts.write().remove(&key);

        tracing::debug!(service_name, host, "received service update");
        Ok(())
    }

    /// Create resource records for newly discovered entities.
    fn ingest_discovered(&self, report: &CapabilityReport) -> Result<usize> {
        let Some(hypervisor) = report.hypervisor else {
            return Ok(0);
        };

        let mut created = 0;
        for (kind, discovered) in &report.resources {
            for entry in discovered {
                if self
                    .store
                    .get_resource_by_source(&hypervisor, &entry.id_at_source)?
                    .is_some()
                {
                    continue;
                }

                let now = Utc::now();
                self.store.put_resource(&Resource {
                    resource_id: ResourceId::generate(),
                    id_at_source: entry.id_at_source.clone(),
                    name: entry.name.clone(),
                    kind: *kind,
                    source_hypervisor: hypervisor,
                    properties: entry.properties.clone(),
                    migrated: false,
                    created_at: now,
                    updated_at: now,
                    deleted: false,
                    deleted_at: None,
                })?;
                created += 1;
            }
        }

        Ok(created)
    }

    /// Whether every registered, live worker has reported capabilities.
    #[must_use]
    pub fn has_all_capabilities(&self) -> bool {
        self.no_capabilities_hosts.read().is_empty()
    }

    /// Whether a service's heartbeat is within the allowed gap.
    fn service_is_up(&self, service: &Service) -> bool {
        let max_gap = Duration::seconds(
            i64::try_from(self.config.service_down_time_secs).unwrap_or(i64::MAX),
        );
        Utc::now() - service.updated_at <= max_gap
    }

    /// Reconcile the registry against the live service set.
    ///
    /// Hosts with an active service registration but no capability snapshot
    /// are flagged no-capabilities (excluded from eligibility). Hosts whose
    /// service registration is gone are evicted from the state map. A down
    /// heartbeat skips the host for this round but does not evict its
    /// capability snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the service registry cannot be listed.
    pub fn refresh(&self) -> Result<()> {
        let mut active = HashSet::new();
        let mut no_capabilities = HashSet::new();

        for topic in &self.config.worker_topics {
            for service in self.store.list_services_by_topic(topic)? {
                let key = format!("{topic}.{}", service.host);

                if !self.service_is_up(&service) {
                    tracing::warn!(host = %service.host, topic = %topic, "worker service is down");
                    continue;
                }

                let Some(stamped) = self.service_states.read().get(&key).cloned() else {
                    no_capabilities.insert(key);
                    continue;
                };

                self.host_state_map.write().insert(
                    key.clone(),
                    HostState {
                        host: service.host.clone(),
                        topic: topic.clone(),
                        capabilities: stamped.report,
                        service,
                        updated: stamped.received_at,
                    },
                );
                active.insert(key);
            }
        }

        *self.no_capabilities_hosts.write() = no_capabilities;

        self.host_state_map.write().retain(|key, _| {
            let keep = active.contains(key);
            if !keep {
                tracing::info!(host = %key, "removing non-active host from scheduler cache");
            }
            keep
        });

        Ok(())
    }

    /// Reconcile, then snapshot every tracked host.
    ///
    /// # Errors
    ///
    /// Returns an error if reconciliation fails.
    pub fn get_all_host_states(&self) -> Result<Vec<HostState>> {
        self.refresh()?;
        Ok(self.host_state_map.read().values().cloned().collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use convoy_core::ServiceId;
    use convoy_store::ResourceKind;
    use std::collections::BTreeMap;

    /// A live service record for tests.
    pub fn service(host: &str, topic: &str) -> Service {
        let now = Utc::now();
        Service {
            service_id: ServiceId::generate(),
            host: host.to_string(),
            binary: format!("convoy-{topic}"),
            topic: topic.to_string(),
            report_count: 1,
            disabled: false,
            disabled_reason: None,
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        }
    }

    /// A capability report with no discovery payload.
    pub fn report(kinds: &[ResourceKind], free_space: u64) -> CapabilityReport {
        CapabilityReport {
            hypervisor: None,
            capabilities: kinds.to_vec(),
            free_space,
            resources: BTreeMap::new(),
        }
    }

    /// A fully-populated host state for filter/weigher tests.
    pub fn host_state(
        host: &str,
        topic: &str,
        kinds: &[ResourceKind],
        free_space: u64,
    ) -> HostState {
        HostState {
            host: host.to_string(),
            topic: topic.to_string(),
            capabilities: report(kinds, free_space),
            service: service(host, topic),
            updated: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{report, service};
    use super::*;
    use crate::types::DiscoveredResource;
    use convoy_core::HypervisorId;
    use convoy_store::{ResourceKind, RocksStore};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn manager() -> (HostManager<RocksStore>, Arc<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let manager = HostManager::new(Arc::clone(&store), SchedulerConfig::default());
        (manager, store, dir)
    }

    fn discovery_report(hypervisor: HypervisorId, ids: &[&str]) -> CapabilityReport {
        let mut resources = BTreeMap::new();
        resources.insert(
            ResourceKind::Instance,
            ids.iter()
                .map(|id| DiscoveredResource {
                    id_at_source: (*id).to_string(),
                    name: format!("vm-{id}"),
                    properties: serde_json::json!({"memory": 1024}),
                })
                .collect(),
        );
        CapabilityReport {
            hypervisor: Some(hypervisor),
            capabilities: vec![ResourceKind::Instance],
            free_space: 1 << 30,
            resources,
        }
    }

    #[test]
    fn unknown_service_name_is_ignored() {
        let (manager, _store, _dir) = manager();
        manager
            .update_service_capabilities("identity", "worker-a", report(&[], 0))
            .unwrap();
        assert!(manager.service_states.read().is_empty());
    }

    #[test]
    fn discovery_is_idempotent_under_re_reporting() {
        let (manager, store, _dir) = manager();
        let hypervisor = HypervisorId::generate();

        manager
            .update_service_capabilities(
                "source",
                "worker-a",
                discovery_report(hypervisor, &["i-1", "i-2"]),
            )
            .unwrap();
        assert_eq!(store.list_resources().unwrap().len(), 2);

        // re-report the same enumeration: no duplicates
        manager
            .update_service_capabilities(
                "source",
                "worker-a",
                discovery_report(hypervisor, &["i-1", "i-2"]),
            )
            .unwrap();
        assert_eq!(store.list_resources().unwrap().len(), 2);

        // a new resource in the next report is appended
        manager
            .update_service_capabilities(
                "source",
                "worker-a",
                discovery_report(hypervisor, &["i-1", "i-2", "i-3"]),
            )
            .unwrap();
        assert_eq!(store.list_resources().unwrap().len(), 3);
    }

    #[test]
    fn discovered_resource_shape() {
        let (manager, store, _dir) = manager();
        let hypervisor = HypervisorId::generate();

        manager
            .update_service_capabilities(
                "source",
                "worker-a",
                discovery_report(hypervisor, &["i-1"]),
            )
            .unwrap();

        let resource = store
            .get_resource_by_source(&hypervisor, "i-1")
            .unwrap()
            .unwrap();
        assert_eq!(resource.kind, ResourceKind::Instance);
        assert_eq!(resource.name, "vm-i-1");
        assert!(!resource.migrated);
    }

    #[test]
    fn unreported_host_flags_not_ready() {
        let (manager, store, _dir) = manager();
        store.put_service(&service("worker-a", "source")).unwrap();

        manager.refresh().unwrap();
        assert!(!manager.has_all_capabilities());

        manager
            .update_service_capabilities("source", "worker-a", report(&[ResourceKind::Instance], 1))
            .unwrap();
        manager.refresh().unwrap();
        assert!(manager.has_all_capabilities());
        assert_eq!(manager.get_all_host_states().unwrap().len(), 1);
    }

    #[test]
    fn vanished_service_is_evicted() {
        let (manager, store, _dir) = manager();
        let svc = service("worker-a", "source");
        store.put_service(&svc).unwrap();
        manager
            .update_service_capabilities("source", "worker-a", report(&[ResourceKind::Instance], 1))
            .unwrap();

        manager.refresh().unwrap();
        assert_eq!(manager.get_all_host_states().unwrap().len(), 1);

        store.soft_delete_service(&svc.service_id).unwrap();
        manager.refresh().unwrap();
        assert!(manager.get_all_host_states().unwrap().is_empty());
    }

    #[test]
    fn down_heartbeat_skips_host_but_keeps_snapshot() {
        let (manager, store, _dir) = manager();
        let mut svc = service("worker-a", "source");
        svc.updated_at = Utc::now() - Duration::seconds(3600);
        store.put_service(&svc).unwrap();

        manager
            .update_service_capabilities("source", "worker-a", report(&[ResourceKind::Instance], 1))
            .unwrap();
        manager.refresh().unwrap();

        // not eligible while down, but the capability snapshot survives
        assert!(manager.get_all_host_states().unwrap().is_empty());
        assert!(manager.service_states.read().contains_key("source.worker-a"));

        // a fresh heartbeat brings it straight back
        svc.updated_at = Utc::now();
        store.put_service(&svc).unwrap();
        manager.refresh().unwrap();
        assert_eq!(manager.get_all_host_states().unwrap().len(), 1);
    }
}
