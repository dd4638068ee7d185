//! The scheduler role surface.
//!
//! `SchedulerService` glues the capability registry to the filter and
//! weigher chains, and exposes the two operations other roles use: the
//! capability-update sink and best-host selection. `SchedulerRpcHandler`
//! adapts the service onto the message bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use convoy_messaging::Handler;
use convoy_store::Store;
use serde_json::Value;

use crate::error::{Result, SchedulerError};
use crate::filters::{self, HostFilter};
use crate::host_manager::{HostManager, HostState};
use crate::types::{CapabilityReport, RequestSpec, SchedulerConfig, UpdateCapabilitiesRequest};
use crate::weights::{self, HostWeigher};

/// Chooses a host to perform a migration operation.
pub struct SchedulerService<S> {
    host_manager: HostManager<S>,
    filters: HashMap<&'static str, Arc<dyn HostFilter>>,
    weighers: HashMap<&'static str, Arc<dyn HostWeigher>>,
    config: SchedulerConfig,
}

impl<S: Store> SchedulerService<S> {
    /// Create a scheduler over the given store.
    #[must_use]
    pub fn new(store: Arc<S>, config: SchedulerConfig) -> Self {
        Self {
            host_manager: HostManager::new(store, config.clone()),
            filters: filters::all_filters(),
            weighers: weights::all_weighers(),
            config,
        }
    }

    /// Create with default configuration.
    #[must_use]
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, SchedulerConfig::default())
    }

    /// Access the underlying capability registry.
    #[must_use]
    pub const fn host_manager(&self) -> &HostManager<S> {
        &self.host_manager
    }

    /// Process a capability update from a worker.
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
        self.host_manager
            .update_service_capabilities(service_name, host, capabilities)
    }

    /// Whether the scheduler can make decisions yet.
    ///
    /// False while any registered, live worker has not reported
    /// capabilities; this prevents premature decisions at process startup.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.host_manager.has_all_capabilities()
    }

    /// Select the best host for a request.
    ///
    /// Reconciles the registry, narrows the live host set through the
    /// filter chain, ranks survivors through the weigher chain, and
    /// returns the best host's name.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::NotReady` before every worker has reported
    /// - `SchedulerError::FilterNotFound` / `WeigherNotFound` for unknown
    ///   chain names
    /// - `SchedulerError::NoValidHost` when no host survives filtering
    pub fn select_host(&self, spec: &RequestSpec) -> Result<String> {
        let states = self.host_manager.get_all_host_states()?;

        if !self.host_manager.has_all_capabilities() {
            return Err(SchedulerError::NotReady);
        }

        let filter_names = spec
            .filter_names
            .as_deref()
            .unwrap_or(&self.config.default_filters);
        let filter_chain = filters::choose_filters(&self.filters, filter_names)?;

        let weigher_names = spec
            .weigher_names
            .as_deref()
            .unwrap_or(&self.config.default_weighers);
        let weigher_chain = weights::choose_weighers(&self.weighers, weigher_names)?;

        let candidates: Vec<&HostState> =
            states.iter().filter(|s| s.topic == spec.topic).collect();
        let survivors = filters::filtered_hosts(&filter_chain, candidates, spec);
        let ranked = weights::weighed_hosts(&weigher_chain, survivors, spec);

        match ranked.first() {
            Some(best) => {
                tracing::info!(
                    host = %best.host,
                    kind = %spec.resource_kind,
                    "selected migration host"
                );
                Ok(best.host.clone())
            }
            None => {
                tracing::warn!(kind = %spec.resource_kind, topic = %spec.topic, "no valid host found");
                Err(SchedulerError::NoValidHost)
            }
        }
    }
}

/// Message-bus adapter for the scheduler role.
pub struct SchedulerRpcHandler<S> {
    service: Arc<SchedulerService<S>>,
}

impl<S> SchedulerRpcHandler<S> {
    /// Wrap a scheduler service for bus subscription.
    #[must_use]
    pub const fn new(service: Arc<SchedulerService<S>>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S: Store + 'static> Handler for SchedulerRpcHandler<S> {
    async fn handle(&self, method: &str, payload: Value) -> std::result::Result<Value, String> {
        match method {
            "update_service_capabilities" => {
                let request: UpdateCapabilitiesRequest =
                    serde_json::from_value(payload).map_err(|e| e.to_string())?;
                self.service
                    .update_service_capabilities(
                        &request.service_name,
                        &request.host,
                        request.capabilities,
                    )
                    .map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            other => Err(format!("unknown scheduler method: {other}")),
        }
    }
}
