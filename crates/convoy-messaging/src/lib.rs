//! Asynchronous message fabric for convoy worker roles.
//!
//! This crate defines the messaging boundary between the API, scheduler,
//! source, and destination roles:
//!
//! - [`MessageBus::cast`] — fire-and-forget delivery for state-changing
//!   operations; no return value, delivery is at-least-once, and there is
//!   no ordering guarantee across independent migrations.
//! - [`MessageBus::call`] — synchronous request/response, used only for
//!   read-only validation queries.
//!
//! Topics are host-scoped (`source.worker-a`) for point-to-point dispatch
//! or role-wide (`scheduler`) for fanout broadcasts such as capability
//! updates.
//!
//! [`LocalBus`] is the in-process implementation used to wire roles
//! together inside one process and in tests. Payloads are plain
//! serializable JSON values; typed payload structs live with the role that
//! owns them.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod error;
pub mod topic;

pub use bus::{Handler, LocalBus, MessageBus};
pub use error::{MessagingError, Result};
pub use topic::{Role, Topic};
