//! Server error types.

use reshard_core::{ConfigurationParseError, ScalingError, SwitchError};
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] reshard_core::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] reshard_proto::Error),

    /// Topology text could not be parsed.
    #[error("configuration parse error: {0}")]
    ConfigurationParse(#[from] ConfigurationParseError),

    /// Job admission or tracking failed.
    #[error("scaling error: {0}")]
    Scaling(#[from] ScalingError),

    /// A rule could not be staged or switched.
    #[error("switch error: {0}")]
    Switch(#[from] SwitchError),

    /// Coordinator failure while handling a trigger.
    #[error("coordinator error: {0}")]
    Coordinator(#[from] crate::coordinator::CoordinatorError),

    /// Event could not be queued for delivery.
    #[error("event bus error: {0}")]
    Bus(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(reshard_core::Error::Storage(e))
    }
}
