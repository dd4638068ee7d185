//! Common error types for convoy.
//!
//! This module provides shared error types that are used across multiple crates.

use crate::ids::{MigrationId, ResourceId};
use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the convoy system.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A migration with the specified ID was not found.
    #[error("migration not found: {0}")]
    MigrationNotFound(MigrationId),

    /// A resource with the specified ID was not found.
    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    /// An invalid identifier was provided.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] crate::ids::IdError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}
