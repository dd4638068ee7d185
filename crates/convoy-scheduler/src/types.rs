//! Types for the scheduler crate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use convoy_core::HypervisorId;
use convoy_store::ResourceKind;
use serde::{Deserialize, Serialize};

/// A resource enumerated by a source worker's periodic report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredResource {
    /// Provider-native identifier on the source hypervisor.
    pub id_at_source: String,
    /// Name reported by the provider.
    pub name: String,
    /// Provider-specific properties carried through to migration payloads.
    #[serde(default)]
    pub properties: serde_json::Value,
}

/// A periodic, unsolicited capability snapshot from one worker.
///
/// Source workers include a fresh enumeration of migratable resources per
/// supported kind; destination workers report capabilities and free space
/// only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityReport {
    /// Hypervisor the reporting worker owns; `None` for destination-only
    /// reports that carry no discovery payload.
    #[serde(default)]
    pub hypervisor: Option<HypervisorId>,
    /// Resource kinds the worker's driver supports.
    pub capabilities: Vec<ResourceKind>,
    /// Bytes free in the worker's conversion directory.
    pub free_space: u64,
    /// Freshly enumerated resources, per supported kind.
    #[serde(default)]
    pub resources: BTreeMap<ResourceKind, Vec<DiscoveredResource>>,
}

impl CapabilityReport {
    /// Whether the worker supports migrating the given resource kind.
    #[must_use]
    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.capabilities.contains(&kind)
    }
}

/// A capability report plus its receipt timestamp (last-write-wins).
#[derive(Debug, Clone)]
pub struct StampedReport {
    /// The snapshot itself.
    pub report: CapabilityReport,
    /// When the registry received it.
    pub received_at: DateTime<Utc>,
}

/// The capability-update message consumed from the scheduler topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCapabilitiesRequest {
    /// Role name of the reporting service (`source` or `destination`).
    pub service_name: String,
    /// Host the report came from.
    pub host: String,
    /// The capability snapshot.
    pub capabilities: CapabilityReport,
}

/// A migration request's scheduling requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Role topic to select a host from (`source` or `destination`).
    pub topic: String,
    /// Resource kind the selected host must support.
    pub resource_kind: ResourceKind,
    /// Conversion-directory space the migration is expected to need.
    #[serde(default)]
    pub size_required: u64,
    /// Filter chain override; the configured default when `None`.
    #[serde(default)]
    pub filter_names: Option<Vec<String>>,
    /// Weigher chain override; the configured default when `None`.
    #[serde(default)]
    pub weigher_names: Option<Vec<String>>,
}

impl RequestSpec {
    /// A spec selecting a source worker for the given kind.
    #[must_use]
    pub fn source(resource_kind: ResourceKind, size_required: u64) -> Self {
        Self {
            topic: "source".to_string(),
            resource_kind,
            size_required,
            filter_names: None,
            weigher_names: None,
        }
    }
}

/// Configuration for the scheduler role.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Role topics whose services are reconciled into the registry.
    pub worker_topics: Vec<String>,
    /// Maximum heartbeat gap before a service is considered down, seconds.
    pub service_down_time_secs: u64,
    /// Filter chain applied when a request names none.
    pub default_filters: Vec<String>,
    /// Weigher chain applied when a request names none.
    pub default_weighers: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_topics: vec!["source".to_string(), "destination".to_string()],
            service_down_time_secs: 60,
            default_filters: vec![
                "CapacityFilter".to_string(),
                "CapabilityFilter".to_string(),
            ],
            default_weighers: vec!["CapacityWeigher".to_string()],
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables.
    ///
    /// Supported environment variables:
    /// - `CONVOY_SERVICE_DOWN_TIME`: seconds without a heartbeat before a
    ///   service is treated as down
    /// - `CONVOY_SCHEDULER_DEFAULT_FILTERS`: comma-separated filter names
    /// - `CONVOY_SCHEDULER_DEFAULT_WEIGHERS`: comma-separated weigher names
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CONVOY_SERVICE_DOWN_TIME") {
            if let Ok(n) = val.parse() {
                config.service_down_time_secs = n;
            }
        }
        if let Ok(val) = std::env::var("CONVOY_SCHEDULER_DEFAULT_FILTERS") {
            config.default_filters = val.split(',').map(str::to_string).collect();
        }
        if let Ok(val) = std::env::var("CONVOY_SCHEDULER_DEFAULT_WEIGHERS") {
            config.default_weighers = val.split(',').map(str::to_string).collect();
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_supports() {
        let report = CapabilityReport {
            hypervisor: None,
            capabilities: vec![ResourceKind::Instance, ResourceKind::Volume],
            free_space: 0,
            resources: BTreeMap::new(),
        };
        assert!(report.supports(ResourceKind::Instance));
        assert!(!report.supports(ResourceKind::Network));
    }

    #[test]
    fn config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_filters, ["CapacityFilter", "CapabilityFilter"]);
        assert_eq!(config.default_weighers, ["CapacityWeigher"]);
        assert_eq!(config.service_down_time_secs, 60);
    }

    #[test]
    fn report_serde_round_trip() {
        let mut resources = BTreeMap::new();
        resources.insert(
            ResourceKind::Instance,
            vec![DiscoveredResource {
                id_at_source: "i-1".to_string(),
                name: "vm1".to_string(),
                properties: serde_json::json!({"memory": 2048}),
            }],
        );
        let report = CapabilityReport {
            hypervisor: Some(HypervisorId::generate()),
            capabilities: vec![ResourceKind::Instance],
            free_space: 1 << 30,
            resources,
        };

        let json = serde_json::to_string(&report).unwrap();
        let back: CapabilityReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.capabilities, report.capabilities);
        assert_eq!(back.free_space, report.free_space);
        assert_eq!(back.resources[&ResourceKind::Instance].len(), 1);
    }
}
