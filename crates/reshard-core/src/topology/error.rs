//! Topology parsing and validation errors.

use super::rule_config::RuleKind;
use thiserror::Error;

/// A serialized topology could not be turned into a snapshot.
///
/// Any of these errors means no snapshot was produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationParseError {
    /// The schema name is empty or whitespace.
    #[error("schema name is blank")]
    BlankSchemaName,

    /// The data source blob is not a mapping of name to properties.
    #[error("malformed data sources for schema '{schema_name}': {reason}")]
    MalformedDataSources {
        /// Schema being parsed.
        schema_name: String,
        /// Parser message.
        reason: String,
    },

    /// The rule blob is not a list of rule configurations.
    #[error("malformed rules for schema '{schema_name}': {reason}")]
    MalformedRules {
        /// Schema being parsed.
        schema_name: String,
        /// Parser message.
        reason: String,
    },

    /// An inline expression could not be parsed.
    #[error("invalid inline expression '{expression}': {reason}")]
    InvalidInlineExpression {
        /// The offending expression.
        expression: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A data node is not of the form `<data source>.<table>`.
    #[error("invalid data node '{node}': expected <data source>.<table>")]
    InvalidDataNode {
        /// The offending node text.
        node: String,
    },

    /// A rule references a data source the snapshot does not declare.
    #[error("{owner} references unknown data source '{data_source}'")]
    UnknownDataSource {
        /// Table or logical data source holding the reference.
        owner: String,
        /// The missing data source.
        data_source: String,
    },

    /// An encrypt column references an undeclared encryptor.
    #[error("column '{table}.{column}' references unknown encryptor '{encryptor}'")]
    UnknownEncryptor {
        /// Encrypted table.
        table: String,
        /// Encrypted column.
        column: String,
        /// The missing encryptor.
        encryptor: String,
    },

    /// Two rules of the same kind were configured.
    #[error("duplicate {kind} rule")]
    DuplicateRule {
        /// Kind configured more than once.
        kind: RuleKind,
    },

    /// Snapshots of a job disagree on the schema.
    #[error("schema mismatch: workflow is '{expected}', snapshot is '{actual}'")]
    SchemaMismatch {
        /// Schema named by the workflow.
        expected: String,
        /// Schema found on a snapshot.
        actual: String,
    },

    /// A stored job configuration could not be decoded.
    #[error("corrupted job configuration: {0}")]
    Corrupted(String),
}
