//! Rule switch errors.

use crate::topology::ConfigurationParseError;
use thiserror::Error;

/// A rule could not be staged or activated. The previous rule stays active.
#[derive(Debug, Error)]
pub enum SwitchError {
    /// No staged rule has this id.
    #[error("no staged rule '{rule_cache_id}' for schema '{schema_name}'")]
    UnknownRuleCacheId {
        /// Schema named by the switch event.
        schema_name: String,
        /// The unknown id.
        rule_cache_id: String,
    },

    /// The switch event names a different schema than the staged rule.
    #[error("staged rule '{rule_cache_id}' belongs to schema '{staged}', not '{requested}'")]
    SchemaMismatch {
        /// The staged rule.
        rule_cache_id: String,
        /// Schema of the staged snapshot.
        staged: String,
        /// Schema named by the switch event.
        requested: String,
    },

    /// A rule is already staged under this id.
    #[error("rule cache id '{0}' is already in use")]
    DuplicateRuleCacheId(String),

    /// Rule cache ids must not be blank.
    #[error("rule cache id is blank")]
    BlankRuleCacheId,

    /// The snapshot to stage is inconsistent.
    #[error("cannot stage rule: {0}")]
    InvalidSnapshot(#[from] ConfigurationParseError),

    /// The snapshot could not be fingerprinted.
    #[error("cannot stage rule: {0}")]
    Encoding(#[from] crate::error::Error),
}
