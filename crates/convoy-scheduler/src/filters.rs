//! Host filter predicates.
//!
//! Filters run as an ordered chain: a host must pass every filter to stay
//! eligible. The default chain is capacity then capability.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::host_manager::HostState;
use crate::types::RequestSpec;

/// A predicate over one candidate host.
pub trait HostFilter: Send + Sync {
    /// Registered name, matched against requested filter chains.
    fn name(&self) -> &'static str;

    /// Whether the host stays eligible for this request.
    fn host_passes(&self, host: &HostState, spec: &RequestSpec) -> bool;
}

/// Passes hosts with enough free conversion-directory space.
#[derive(Debug, Default)]
pub struct CapacityFilter;

impl HostFilter for CapacityFilter {
    fn name(&self) -> &'static str {
        "CapacityFilter"
    }

    fn host_passes(&self, host: &HostState, spec: &RequestSpec) -> bool {
        let passes = host.free_space() >= spec.size_required;
        if !passes {
            tracing::debug!(
                host = %host.host,
                free_space = host.free_space(),
                required = spec.size_required,
                "host filtered: insufficient conversion space"
            );
        }
        passes
    }
}

/// Passes hosts whose driver supports the requested resource kind.
#[derive(Debug, Default)]
pub struct CapabilityFilter;

impl HostFilter for CapabilityFilter {
    fn name(&self) -> &'static str {
        "CapabilityFilter"
    }

    fn host_passes(&self, host: &HostState, spec: &RequestSpec) -> bool {
        let passes = host.supports(spec.resource_kind);
        if !passes {
            tracing::debug!(
                host = %host.host,
                kind = %spec.resource_kind,
                "host filtered: capability not supported"
            );
        }
        passes
    }
}

/// All filters known to the scheduler, by registered name.
#[must_use]
pub fn all_filters() -> HashMap<&'static str, Arc<dyn HostFilter>> {
    let filters: Vec<Arc<dyn HostFilter>> =
        vec![Arc::new(CapacityFilter), Arc::new(CapabilityFilter)];
    filters.into_iter().map(|f| (f.name(), f)).collect()
}

/// Resolve a requested filter chain against the registered set.
///
/// # Errors
///
/// Returns `SchedulerError::FilterNotFound` naming every unknown filter.
pub fn choose_filters(
    registered: &HashMap<&'static str, Arc<dyn HostFilter>>,
    names: &[String],
) -> Result<Vec<Arc<dyn HostFilter>>> {
    let mut chain = Vec::with_capacity(names.len());
    let mut missing = Vec::new();

    for name in names {
        match registered.get(name.as_str()) {
            Some(filter) => chain.push(Arc::clone(filter)),
            None => missing.push(name.clone()),
        }
    }

    if missing.is_empty() {
        Ok(chain)
    } else {
        Err(SchedulerError::FilterNotFound(missing.join(", ")))
    }
}

/// Run the chain, keeping only hosts that pass every filter.
#[must_use]
pub fn filtered_hosts<'a>(
    chain: &[Arc<dyn HostFilter>],
    hosts: Vec<&'a HostState>,
    spec: &RequestSpec,
) -> Vec<&'a HostState> {
    hosts
        .into_iter()
        .filter(|host| chain.iter().all(|f| f.host_passes(host, spec)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_manager::test_support::host_state;
    use convoy_store::ResourceKind;

    #[test]
    fn capacity_filter_compares_free_space() {
        let host = host_state("worker-a", "source", &[ResourceKind::Instance], 100);
        let filter = CapacityFilter;

        let mut spec = RequestSpec::source(ResourceKind::Instance, 50);
        assert!(filter.host_passes(&host, &spec));

        spec.size_required = 200;
        assert!(!filter.host_passes(&host, &spec));
    }

    #[test]
    fn capability_filter_checks_kind() {
        let host = host_state("worker-a", "source", &[ResourceKind::Instance], 100);
        let filter = CapabilityFilter;

        assert!(filter.host_passes(&host, &RequestSpec::source(ResourceKind::Instance, 0)));
        assert!(!filter.host_passes(&host, &RequestSpec::source(ResourceKind::Volume, 0)));
    }

    #[test]
    fn unknown_filter_name_is_an_error() {
        let registered = all_filters();
        let err = choose_filters(&registered, &["NoSuchFilter".to_string()]);
        assert!(matches!(err, Err(SchedulerError::FilterNotFound(_))));
    }

    #[test]
    fn chain_requires_every_filter_to_pass() {
        let registered = all_filters();
        let chain = choose_filters(
            &registered,
            &["CapacityFilter".to_string(), "CapabilityFilter".to_string()],
        )
        .unwrap();

        let big = host_state("worker-a", "source", &[ResourceKind::Instance], 1000);
        let small = host_state("worker-b", "source", &[ResourceKind::Instance], 10);
        let wrong_kind = host_state("worker-c", "source", &[ResourceKind::Network], 1000);

        let spec = RequestSpec::source(ResourceKind::Instance, 100);
        let survivors = filtered_hosts(&chain, vec![&big, &small, &wrong_kind], &spec);

        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].host, "worker-a");
    }
}
