//! Shared pieces of the periodic capability-reporting path.
//!
//! Every worker tick does two things: bump the worker's service heartbeat
//! row and broadcast a capability snapshot to the scheduler fanout topic.

use chrono::Utc;
use convoy_core::ServiceId;
use convoy_messaging::{MessageBus, MessagingError, Topic};
use convoy_scheduler::{CapabilityReport, UpdateCapabilitiesRequest};
use convoy_store::{Service, Store};

use crate::error::Result;

/// Encode a payload for the message fabric.
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| MessagingError::Payload(e.to_string()).into())
}

/// Record a heartbeat for the worker's service registration, creating the
/// record on first report.
///
/// # Errors
///
/// Returns an error if the store cannot be read or written.
pub fn upsert_service_heartbeat<S: Store + ?Sized>(
    store: &S,
    host: &str,
    topic: &str,
) -> Result<Service> {
    let binary = format!("convoy-{topic}");
    let now = Utc::now();

    let service = match store.get_service_by_host_and_binary(host, &binary)? {
        Some(mut service) => {
            service.report_count += 1;
            service.updated_at = now;
            service
        }
        None => Service {
            service_id: ServiceId::generate(),
            host: host.to_string(),
            binary,
            topic: topic.to_string(),
            report_count: 1,
            disabled: false,
            disabled_reason: None,
            created_at: now,
            updated_at: now,
            deleted: false,
            deleted_at: None,
        },
    };

    store.put_service(&service)?;
    Ok(service)
}

/// Broadcast a capability snapshot on the scheduler fanout topic.
///
/// # Errors
///
/// Returns an error if the payload cannot be encoded or the cast fails.
pub async fn publish(
    bus: &dyn MessageBus,
    service_name: &str,
    host: &str,
    capabilities: CapabilityReport,
) -> Result<()> {
    let request = UpdateCapabilitiesRequest {
        service_name: service_name.to_string(),
        host: host.to_string(),
        capabilities,
    };

    bus.cast(
        &Topic::scheduler(),
        "update_service_capabilities",
        encode(&request)?,
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_store::RocksStore;
    use tempfile::TempDir;

    #[test]
    fn heartbeat_creates_then_increments() {
        let dir = TempDir::new().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();

        let first = upsert_service_heartbeat(&store, "worker-a", "source").unwrap();
        assert_eq!(first.report_count, 1);
        assert_eq!(first.binary, "convoy-source");
        assert_eq!(first.topic, "source");

        let second = upsert_service_heartbeat(&store, "worker-a", "source").unwrap();
        assert_eq!(second.service_id, first.service_id);
        assert_eq!(second.report_count, 2);
        assert!(second.updated_at >= first.updated_at);
    }
}
