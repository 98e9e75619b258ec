//! Physical table locations.

use super::error::ConfigurationParseError;
use serde::{Deserialize, Serialize};

/// A physical table on a data source, written `ds.table`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataNode {
    /// Data source holding the table.
    pub data_source: String,
    /// Physical table name.
    pub table: String,
}

impl DataNode {
    /// Create a new data node.
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
        }
    }

    /// Parse `ds.table`. The data source ends at the first dot.
    pub fn parse(text: &str) -> Result<Self, ConfigurationParseError> {
        let text = text.trim();
        match text.split_once('.') {
            Some((data_source, table)) if !data_source.is_empty() && !table.is_empty() => {
                Ok(Self::new(data_source.trim(), table.trim()))
            }
            _ => Err(ConfigurationParseError::InvalidDataNode {
                node: text.to_string(),
            }),
        }
    }

    /// Case-insensitive match against a data source and table.
    pub fn matches(&self, data_source: &str, table: &str) -> bool {
        self.data_source.eq_ignore_ascii_case(data_source) && self.table.eq_ignore_ascii_case(table)
    }
}

impl std::fmt::Display for DataNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}
