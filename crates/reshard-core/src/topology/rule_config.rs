//! Serialized rule configurations.
//!
//! Rules are written as a YAML list of tagged mappings:
//!
//! ```yaml
//! - !SHARDING
//!   tables:
//!     t_order:
//!       actualDataNodes: ds_${0..1}.t_order_${0..1}
//!       tableStrategy:
//!         shardingColumn: order_id
//!         algorithmExpression: t_order_${order_id % 2}
//! - !ENCRYPT
//!   encryptors:
//!     aes:
//!       type: AES
//!       props: {aes-key-value: 123456abc}
//!   tables:
//!     t_user:
//!       columns:
//!         pwd: {cipherColumn: pwd_cipher, encryptorName: aes}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Arbitrary property values attached to data sources and algorithms.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// Closed set of rule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuleKind {
    /// Horizontal sharding.
    Sharding,
    /// Column encryption.
    Encrypt,
    /// Primary/replica read-write splitting.
    ReadwriteSplitting,
    /// Unsharded tables pinned to one data source.
    Single,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKind::Sharding => write!(f, "sharding"),
            RuleKind::Encrypt => write!(f, "encrypt"),
            RuleKind::ReadwriteSplitting => write!(f, "readwrite-splitting"),
            RuleKind::Single => write!(f, "single"),
        }
    }
}

/// One entry of a schema's rule list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleConfiguration {
    /// `!SHARDING`
    #[serde(rename = "SHARDING")]
    Sharding(ShardingRuleConfiguration),
    /// `!ENCRYPT`
    #[serde(rename = "ENCRYPT")]
    Encrypt(EncryptRuleConfiguration),
    /// `!READWRITE_SPLITTING`
    #[serde(rename = "READWRITE_SPLITTING")]
    ReadwriteSplitting(ReadwriteSplittingRuleConfiguration),
    /// `!SINGLE`
    #[serde(rename = "SINGLE")]
    Single(SingleRuleConfiguration),
}

impl RuleConfiguration {
    /// The kind tag of this rule.
    pub fn kind(&self) -> RuleKind {
        match self {
            RuleConfiguration::Sharding(_) => RuleKind::Sharding,
            RuleConfiguration::Encrypt(_) => RuleKind::Encrypt,
            RuleConfiguration::ReadwriteSplitting(_) => RuleKind::ReadwriteSplitting,
            RuleConfiguration::Single(_) => RuleKind::Single,
        }
    }
}

/// Sharding rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingRuleConfiguration {
    /// Sharded tables keyed by logic table name.
    #[serde(default)]
    pub tables: BTreeMap<String, ShardingTableConfiguration>,
    /// Groups of tables sharded identically, as comma-separated lists.
    #[serde(default)]
    pub binding_tables: Vec<String>,
    /// Tables replicated to every data source.
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
}

/// Sharding configuration for one logic table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingTableConfiguration {
    /// Inline expression listing the physical tables.
    #[serde(default)]
    pub actual_data_nodes: Option<String>,
    /// How rows are routed to data sources.
    #[serde(default)]
    pub database_strategy: Option<ShardingStrategyConfiguration>,
    /// How rows are routed to tables within a data source.
    #[serde(default)]
    pub table_strategy: Option<ShardingStrategyConfiguration>,
    /// Column filled by a key generator.
    #[serde(default)]
    pub key_generate_column: Option<String>,
}

/// Inline sharding strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardingStrategyConfiguration {
    /// Column the algorithm reads.
    pub sharding_column: String,
    /// Expression producing the target name.
    pub algorithm_expression: String,
}

/// Encrypt rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptRuleConfiguration {
    /// Encrypted tables keyed by table name.
    #[serde(default)]
    pub tables: BTreeMap<String, EncryptTableConfiguration>,
    /// Named encryption algorithms.
    #[serde(default)]
    pub encryptors: BTreeMap<String, AlgorithmConfiguration>,
}

/// Encrypted columns of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptTableConfiguration {
    /// Columns keyed by logic column name.
    #[serde(default)]
    pub columns: BTreeMap<String, EncryptColumnConfiguration>,
}

/// Storage layout of one encrypted column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptColumnConfiguration {
    /// Physical column holding ciphertext.
    pub cipher_column: String,
    /// Physical column holding plaintext, if kept.
    #[serde(default)]
    pub plain_column: Option<String>,
    /// Name of the encryptor in [`EncryptRuleConfiguration::encryptors`].
    pub encryptor_name: String,
}

/// A named algorithm with its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmConfiguration {
    /// Algorithm type, e.g. `AES`.
    #[serde(rename = "type")]
    pub algorithm_type: String,
    /// Algorithm properties.
    #[serde(default)]
    pub props: Properties,
}

/// Read-write splitting rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadwriteSplittingRuleConfiguration {
    /// Logical data sources keyed by name.
    #[serde(default)]
    pub data_sources: BTreeMap<String, ReadwriteSplittingDataSourceConfiguration>,
}

/// One logical primary/replica group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadwriteSplittingDataSourceConfiguration {
    /// Physical data source receiving writes.
    pub write_data_source_name: String,
    /// Physical data sources serving reads.
    #[serde(default)]
    pub read_data_source_names: Vec<String>,
    /// Load balancer for reads.
    #[serde(default)]
    pub load_balancer_name: Option<String>,
}

/// Single-table rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleRuleConfiguration {
    /// Unsharded tables.
    #[serde(default)]
    pub tables: Vec<String>,
    /// Data source holding unsharded tables.
    #[serde(default)]
    pub default_data_source: Option<String>,
}
