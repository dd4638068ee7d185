//! Topic addressing for role-to-role messaging.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The worker roles that exchange messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The scheduling role consuming capability updates.
    Scheduler,
    /// Source workers pulling resources off source hypervisors.
    Source,
    /// Destination workers re-creating resources on the target cloud.
    Destination,
}

impl Role {
    /// Stable lowercase topic segment for this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduler => "scheduler",
            Self::Source => "source",
            Self::Destination => "destination",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message destination.
///
/// A topic with a host is point-to-point (`source.worker-a`); a topic
/// without one addresses every subscriber of the role (fanout).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    role: Role,
    host: Option<String>,
}

impl Topic {
    /// A point-to-point topic for one host in a role.
    #[must_use]
    pub fn for_host(role: Role, host: impl Into<String>) -> Self {
        Self {
            role,
            host: Some(host.into()),
        }
    }

    /// A fanout topic addressing every subscriber of a role.
    #[must_use]
    pub const fn fanout(role: Role) -> Self {
        Self { role, host: None }
    }

    /// A source worker's topic.
    #[must_use]
    pub fn source(host: impl Into<String>) -> Self {
        Self::for_host(Role::Source, host)
    }

    /// A destination worker's topic.
    #[must_use]
    pub fn destination(host: impl Into<String>) -> Self {
        Self::for_host(Role::Destination, host)
    }

    /// The scheduler fanout topic (capability-update broadcasts).
    #[must_use]
    pub const fn scheduler() -> Self {
        Self::fanout(Role::Scheduler)
    }

    /// The role segment of this topic.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// The host segment, if this topic is point-to-point.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Whether this topic fans out to every subscriber of the role.
    #[must_use]
    pub const fn is_fanout(&self) -> bool {
        self.host.is_none()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{}.{host}", self.role),
            None => write!(f, "{}", self.role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        assert_eq!(Topic::source("worker-a").to_string(), "source.worker-a");
        assert_eq!(
            Topic::destination("worker-b").to_string(),
            "destination.worker-b"
        );
        assert_eq!(Topic::scheduler().to_string(), "scheduler");
    }

    #[test]
    fn fanout_has_no_host() {
        let topic = Topic::fanout(Role::Source);
        assert!(topic.is_fanout());
        assert!(topic.host().is_none());

        let topic = Topic::source("worker-a");
        assert!(!topic.is_fanout());
        assert_eq!(topic.host(), Some("worker-a"));
    }
}
