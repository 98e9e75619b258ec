//! Reshard protocol types.
//!
//! This crate defines the events exchanged between the components of the
//! migration orchestrator and the client-facing SQL error identifiers.
//!
//! # Modules
//!
//! - [`event`] - Migration trigger and rule switch events
//! - [`sql_error`] - Client-facing errors with stable vendor codes and SQL states
//! - [`error`] - Protocol error types

pub mod error;
pub mod event;
pub mod sql_error;

pub use error::Error;

pub use event::{ClusterEvent, EventKind, MigrationTrigger, SwitchRuleConfiguration};
pub use sql_error::{error_codes, sql_state, KernelSqlError, SqlErrorReport};

/// Version of the event format.
///
/// Trigger documents carrying a different version are rejected by
/// [`MigrationTrigger::from_yaml`].
pub const EVENT_FORMAT_VERSION: u32 = 1;
