//! Client-facing SQL errors.
//!
//! These errors cross the middleware boundary and are reported to client
//! tooling verbatim. Their vendor codes and SQL states are part of the
//! public contract and never change.

use thiserror::Error;

/// Vendor error codes.
pub mod error_codes {
    /// An operation touched more than one logical schema inside a transaction.
    pub const TRANSACTION_ACROSS_SCHEMAS: u32 = 11321;
}

/// X/Open SQL states.
pub mod sql_state {
    /// Invalid transaction state.
    pub const INVALID_TRANSACTION_STATE: &str = "25000";
}

/// Kernel errors reported to SQL clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelSqlError {
    /// A transaction tried to span several logical schemas.
    #[error("operations across multiple logical databases are not supported in a transaction")]
    CrossSchemaTransaction {
        /// Schema the transaction is bound to.
        bound_schema: String,
        /// Schema the rejected operation targeted.
        requested_schema: String,
    },
}

impl KernelSqlError {
    /// Stable vendor error code.
    pub fn vendor_code(&self) -> u32 {
        match self {
            KernelSqlError::CrossSchemaTransaction { .. } => {
                error_codes::TRANSACTION_ACROSS_SCHEMAS
            }
        }
    }

    /// Stable SQL state.
    pub fn sql_state(&self) -> &'static str {
        match self {
            KernelSqlError::CrossSchemaTransaction { .. } => sql_state::INVALID_TRANSACTION_STATE,
        }
    }

    /// Wire representation of this error.
    pub fn report(&self) -> SqlErrorReport {
        SqlErrorReport {
            vendor_code: self.vendor_code(),
            sql_state: self.sql_state().to_string(),
            message: self.to_string(),
        }
    }
}

/// Error triple sent to SQL clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlErrorReport {
    /// Vendor error code.
    pub vendor_code: u32,
    /// Five character SQL state.
    pub sql_state: String,
    /// Human readable message.
    pub message: String,
}

impl From<&KernelSqlError> for SqlErrorReport {
    fn from(err: &KernelSqlError) -> Self {
        err.report()
    }
}
