//! Core identifier types for convoy.
//!
//! This module provides strongly-typed identifiers for hypervisors,
//! resources, migrations, and service records. All IDs wrap a UUID and
//! serialize as the canonical hyphenated string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Errors that can occur when parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The input was not a valid UUID string.
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Return the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Return the raw 16-byte representation, used for store keys.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }

            /// Reconstruct an identifier from its raw 16-byte key form.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|_| IdError::InvalidUuid(s.to_string()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.to_string()
            }
        }
    };
}

entity_id! {
    /// Identifier of a registered source or destination hypervisor.
    HypervisorId
}

entity_id! {
    /// Identifier of a discovered migratable resource.
    ResourceId
}

entity_id! {
    /// Identifier of a single migration attempt.
    MigrationId
}

entity_id! {
    /// Identifier of a running worker service record.
    ServiceId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_unique() {
        let a = MigrationId::generate();
        let b = MigrationId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn parse_round_trip() {
        let id = ResourceId::generate();
        let parsed: ResourceId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<HypervisorId>();
        assert!(matches!(err, Err(IdError::InvalidUuid(_))));
    }

    #[test]
    fn bytes_round_trip() {
        let id = HypervisorId::generate();
        let restored = HypervisorId::from_bytes(*id.as_bytes());
        assert_eq!(id, restored);
    }

    #[test]
    fn serde_uses_string_form() {
        let id = ServiceId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));

        let back: ServiceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
