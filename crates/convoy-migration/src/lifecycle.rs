//! Migration status machine.
//!
//! This module defines the valid status transitions for migrations and
//! provides validation logic to ensure the machine's invariants hold.
//!
//! # Status Machine
//!
//! ```text
//! ┌────────────┐        ┌────────────┐        ┌───────────┐
//! │ Initiating │───────▶│ Inprogress │───────▶│ Completed │
//! └─────┬──────┘        └─────┬──────┘        └───────────┘
//!       │                     │
//!       └─────────┬───────────┘
//!                 ▼
//!            ┌─────────┐
//!            │  Error  │
//!            └─────────┘
//! ```
//!
//! `Completed` and `Error` are terminal: the pipeline never mutates a
//! migration again once it reaches either. Retrying a failed migration
//! means creating a new one.

use convoy_core::MigrationId;
use convoy_store::MigrationStatus;

use crate::error::{MigrationError, Result};

/// Validates a status transition and returns the target status if valid.
///
/// # Errors
///
/// Returns `MigrationError::InvalidTransition` if the transition is not
/// allowed.
pub fn validate_transition(
    migration_id: &MigrationId,
    from: MigrationStatus,
    to: MigrationStatus,
) -> Result<MigrationStatus> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(MigrationError::InvalidTransition {
            migration_id: *migration_id,
            from,
            to,
        })
    }
}

/// Check if a status transition is valid according to the status machine.
#[must_use]
pub const fn is_valid_transition(from: MigrationStatus, to: MigrationStatus) -> bool {
    use MigrationStatus::{Completed, Error, Initiating, Inprogress};

    matches!(
        (from, to),
        // Fetch begins: the source worker takes over
        (Initiating, Inprogress)
            // Creation succeeded at the destination
            | (Inprogress, Completed)
            // Any active phase can fail
            | (Initiating | Inprogress, Error)
    )
}

/// Returns true if the status is terminal.
#[must_use]
pub const fn is_terminal(status: MigrationStatus) -> bool {
    matches!(status, MigrationStatus::Completed | MigrationStatus::Error)
}

/// Returns true if a migration in this status is actively holding its
/// resource (at most one such migration may exist per resource).
#[must_use]
pub const fn is_active(status: MigrationStatus) -> bool {
    matches!(
        status,
        MigrationStatus::Initiating | MigrationStatus::Inprogress
    )
}
