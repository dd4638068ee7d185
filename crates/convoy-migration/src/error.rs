//! Error types for migration orchestration.

use convoy_core::{HypervisorId, MigrationId, ResourceId};
use convoy_store::MigrationStatus;
use thiserror::Error;

use crate::provider::ProviderError;

/// A result type using `MigrationError`.
pub type Result<T> = std::result::Result<T, MigrationError>;

/// Errors that can occur in migration orchestration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The requested migration was not found.
    #[error("migration not found: {0}")]
    MigrationNotFound(MigrationId),

    /// The requested resource was not found.
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// The requested hypervisor was not found.
    #[error("hypervisor not found: {0}")]
    HypervisorNotFound(HypervisorId),

    /// Bad input, rejected before any asynchronous work is dispatched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested status transition is not allowed.
    #[error(
        "invalid status transition for migration {migration_id}: \
         cannot transition from {from:?} to {to:?}"
    )]
    InvalidTransition {
        /// The migration being transitioned.
        migration_id: MigrationId,
        /// The current status.
        from: MigrationStatus,
        /// The requested target status.
        to: MigrationStatus,
    },

    /// A source or destination hypervisor call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// No eligible worker host survived scheduling.
    #[error("scheduling failed: {0}")]
    SchedulingFailed(#[from] convoy_scheduler::SchedulerError),

    /// The advisory lock for a resource and operation is already held, or
    /// another migration is actively processing the resource.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage layer error.
    #[error("storage error: {0}")]
    Store(#[from] convoy_store::StoreError),

    /// Messaging layer error.
    #[error("messaging error: {0}")]
    Messaging(#[from] convoy_messaging::MessagingError),
}

impl MigrationError {
    /// Returns the appropriate HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::MigrationNotFound(_)
            | Self::ResourceNotFound(_)
            | Self::HypervisorNotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::InvalidTransition { .. } | Self::Conflict(_) => 409,
            Self::SchedulingFailed(_) => 503,
            Self::Provider(_) | Self::Store(_) | Self::Messaging(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_codes() {
        assert_eq!(
            MigrationError::MigrationNotFound(MigrationId::generate()).http_status_code(),
            404
        );
        assert_eq!(
            MigrationError::Validation("bad".to_string()).http_status_code(),
            400
        );
        assert_eq!(
            MigrationError::Conflict("locked".to_string()).http_status_code(),
            409
        );
        assert_eq!(
            MigrationError::SchedulingFailed(convoy_scheduler::SchedulerError::NoValidHost)
                .http_status_code(),
            503
        );
    }
}
