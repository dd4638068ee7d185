//! Host weighing functions.
//!
//! Weighers rank the hosts that survived filtering; the host with the
//! highest summed weight wins. The default chain is capacity only.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::host_manager::HostState;
use crate::types::RequestSpec;

/// A ranking function over one candidate host.
pub trait HostWeigher: Send + Sync {
    /// Registered name, matched against requested weigher chains.
    fn name(&self) -> &'static str;

    /// Relative desirability of the host; higher is better.
    fn weigh(&self, host: &HostState, spec: &RequestSpec) -> f64;
}

/// Prefers hosts with more free conversion-directory space.
#[derive(Debug, Default)]
pub struct CapacityWeigher;

impl HostWeigher for CapacityWeigher {
    fn name(&self) -> &'static str {
        "CapacityWeigher"
    }

    #[allow(clippy::cast_precision_loss)]
    fn weigh(&self, host: &HostState, _spec: &RequestSpec) -> f64 {
        host.free_space() as f64
    }
}

/// All weighers known to the scheduler, by registered name.
#[must_use]
pub fn all_weighers() -> HashMap<&'static str, Arc<dyn HostWeigher>> {
    let weighers: Vec<Arc<dyn HostWeigher>> = vec![Arc::new(CapacityWeigher)];
    weighers.into_iter().map(|w| (w.name(), w)).collect()
}

/// Resolve a requested weigher chain against the registered set.
///
/// # Errors
///
/// Returns `SchedulerError::WeigherNotFound` naming every unknown weigher.
pub fn choose_weighers(
    registered: &HashMap<&'static str, Arc<dyn HostWeigher>>,
    names: &[String],
) -> Result<Vec<Arc<dyn HostWeigher>>> {
    let mut chain = Vec::with_capacity(names.len());
    let mut missing = Vec::new();

    for name in names {
        match registered.get(name.as_str()) {
            Some(weigher) => chain.push(Arc::clone(weigher)),
            None => missing.push(name.clone()),
        }
    }

    if missing.is_empty() {
        Ok(chain)
    } else {
        Err(SchedulerError::WeigherNotFound(missing.join(", ")))
    }
}

/// Rank hosts by summed weight, best first.
#[must_use]
pub fn weighed_hosts<'a>(
    chain: &[Arc<dyn HostWeigher>],
    hosts: Vec<&'a HostState>,
    spec: &RequestSpec,
) -> Vec<&'a HostState> {
    let mut scored: Vec<(f64, &HostState)> = hosts
        .into_iter()
        .map(|host| {
            let weight: f64 = chain.iter().map(|w| w.weigh(host, spec)).sum();
            (weight, host)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, host)| host).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_manager::test_support::host_state;
    use convoy_store::ResourceKind;

    #[test]
    fn capacity_weigher_prefers_more_space() {
        let registered = all_weighers();
        let chain = choose_weighers(&registered, &["CapacityWeigher".to_string()]).unwrap();

        let small = host_state("worker-a", "source", &[ResourceKind::Instance], 10);
        let big = host_state("worker-b", "source", &[ResourceKind::Instance], 1000);

        let spec = RequestSpec::source(ResourceKind::Instance, 0);
        let ranked = weighed_hosts(&chain, vec![&small, &big], &spec);

        assert_eq!(ranked[0].host, "worker-b");
        assert_eq!(ranked[1].host, "worker-a");
    }

    #[test]
    fn unknown_weigher_name_is_an_error() {
        let registered = all_weighers();
        let err = choose_weighers(&registered, &["NoSuchWeigher".to_string()]);
        assert!(matches!(err, Err(SchedulerError::WeigherNotFound(_))));
    }
}
