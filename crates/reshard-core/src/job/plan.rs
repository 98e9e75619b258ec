//! Migration planning.
//!
//! Compares where each table's rows live in the source and target topology.
//! An empty plan means the two snapshots are operationally equivalent and
//! the target rule can be activated without moving data.

use crate::rule::Rule;
use crate::topology::{
    AlgorithmConfiguration, ConfigurationParseError, DataNode, EncryptColumnConfiguration,
    ShardingStrategyConfiguration, TopologySnapshot,
};
use std::collections::{BTreeMap, BTreeSet};

/// Why a table needs its data moved or rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MigrationReason {
    /// The set of physical tables changed.
    DataNodesChanged,
    /// Routing of rows to physical tables changed.
    StrategyChanged,
    /// Encrypted columns or their algorithms changed.
    EncryptChanged,
    /// The table became governed by a placement rule.
    TableAdded,
    /// The table is no longer governed by a placement rule.
    TableRemoved,
}

impl std::fmt::Display for MigrationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationReason::DataNodesChanged => write!(f, "data_nodes_changed"),
            MigrationReason::StrategyChanged => write!(f, "strategy_changed"),
            MigrationReason::EncryptChanged => write!(f, "encrypt_changed"),
            MigrationReason::TableAdded => write!(f, "table_added"),
            MigrationReason::TableRemoved => write!(f, "table_removed"),
        }
    }
}

/// Data movement for one logic table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMigration {
    /// Logic table name.
    pub logic_table: String,
    /// Physical tables holding the rows today.
    pub source_nodes: Vec<DataNode>,
    /// Physical tables that must hold the rows afterwards.
    pub target_nodes: Vec<DataNode>,
    /// Every reason this table is in the plan, ordered.
    pub reasons: Vec<MigrationReason>,
}

/// Ordered list of table migrations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    tables: Vec<TableMigration>,
    default_data_source_change: Option<(String, String)>,
}

type Strategies = (
    Option<ShardingStrategyConfiguration>,
    Option<ShardingStrategyConfiguration>,
);

#[derive(Debug, Default)]
struct Placement {
    nodes: BTreeSet<DataNode>,
    strategies: Strategies,
}

type EncryptLayout = BTreeMap<String, (EncryptColumnConfiguration, Option<AlgorithmConfiguration>)>;

impl MigrationPlan {
    /// Compute the table migrations needed to go from `source` to `target`.
    ///
    /// Data source property changes never move data on their own.
    pub fn compute(
        source: &TopologySnapshot,
        target: &TopologySnapshot,
    ) -> Result<Self, ConfigurationParseError> {
        let source_placements = placements(source)?;
        let target_placements = placements(target)?;
        let source_encrypt = encrypt_layouts(source);
        let target_encrypt = encrypt_layouts(target);

        let tables: BTreeSet<&String> = source_placements
            .keys()
            .chain(target_placements.keys())
            .chain(source_encrypt.keys())
            .chain(target_encrypt.keys())
            .collect();

        let mut plan = Vec::new();
        for table in tables {
            let mut reasons = BTreeSet::new();

            let source_placement = source_placements.get(table);
            let target_placement = target_placements.get(table);
            let source_nodes = match source_placement {
                Some(p) => p.nodes.clone(),
                None => default_nodes(source, table),
            };
            let target_nodes = match target_placement {
                Some(p) => p.nodes.clone(),
                None => default_nodes(target, table),
            };

            match (source_placement, target_placement) {
                (None, Some(_)) if source_nodes != target_nodes => {
                    reasons.insert(MigrationReason::TableAdded);
                }
                (Some(_), None) if source_nodes != target_nodes => {
                    reasons.insert(MigrationReason::TableRemoved);
                }
                (Some(from), Some(to)) => {
                    if from.nodes != to.nodes {
                        reasons.insert(MigrationReason::DataNodesChanged);
                    }
                    if from.strategies != to.strategies {
                        reasons.insert(MigrationReason::StrategyChanged);
                    }
                }
                _ => {}
            }

            if source_encrypt.get(table) != target_encrypt.get(table) {
                reasons.insert(MigrationReason::EncryptChanged);
            }

            if !reasons.is_empty() {
                plan.push(TableMigration {
                    logic_table: table.clone(),
                    source_nodes: source_nodes.into_iter().collect(),
                    target_nodes: target_nodes.into_iter().collect(),
                    reasons: reasons.into_iter().collect(),
                });
            }
        }

        let default_data_source_change =
            match (source.default_data_source(), target.default_data_source()) {
                (Some(from), Some(to)) if from != to => Some((from, to)),
                _ => None,
            };

        Ok(Self {
            tables: plan,
            default_data_source_change,
        })
    }

    /// Source and target default data source, when they differ.
    ///
    /// Tables no rule names are not known to the plan, so their rows cannot
    /// be moved; a topology that re-homes them is not migratable.
    pub fn default_data_source_change(&self) -> Option<(&str, &str)> {
        self.default_data_source_change
            .as_ref()
            .map(|(from, to)| (from.as_str(), to.as_str()))
    }

    /// Whether no data has to move.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of tables to migrate.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Table migrations ordered by logic table name.
    pub fn tables(&self) -> &[TableMigration] {
        &self.tables
    }

    /// Look up the migration for one table.
    pub fn table(&self, logic_table: &str) -> Option<&TableMigration> {
        self.tables.iter().find(|t| t.logic_table == logic_table)
    }
}

/// Where rule-governed tables live.
fn placements(
    snapshot: &TopologySnapshot,
) -> Result<BTreeMap<String, Placement>, ConfigurationParseError> {
    let mut result = BTreeMap::new();
    let logical = snapshot.logical_data_source_names();

    for rule in snapshot.build_rules()? {
        match rule {
            Rule::Sharding(sharding) => {
                for table_rule in sharding.table_rules() {
                    let (database, table) = table_rule.strategies();
                    result.insert(
                        table_rule.logic_table().to_string(),
                        Placement {
                            nodes: table_rule.actual_data_nodes().iter().cloned().collect(),
                            strategies: (database.cloned(), table.cloned()),
                        },
                    );
                }
                for table in sharding.broadcast_tables() {
                    result.insert(
                        table.clone(),
                        Placement {
                            nodes: logical.iter().map(|ds| DataNode::new(ds, table)).collect(),
                            ..Default::default()
                        },
                    );
                }
            }
            Rule::Single(single) => {
                for table in &single.tables {
                    result
                        .entry(table.clone())
                        .or_insert_with(|| Placement {
                            nodes: default_nodes(snapshot, table),
                            ..Default::default()
                        });
                }
            }
            Rule::Encrypt(_) | Rule::ReadwriteSplitting(_) => {}
        }
    }
    Ok(result)
}

/// Placement of a table no rule governs.
fn default_nodes(snapshot: &TopologySnapshot, table: &str) -> BTreeSet<DataNode> {
    snapshot
        .default_data_source()
        .map(|ds| DataNode::new(ds, table))
        .into_iter()
        .collect()
}

/// Encrypted columns per table, with the algorithm each column uses.
fn encrypt_layouts(snapshot: &TopologySnapshot) -> BTreeMap<String, EncryptLayout> {
    let Some(encrypt) = snapshot.encrypt_rule() else {
        return BTreeMap::new();
    };
    encrypt
        .tables
        .iter()
        .map(|(table, config)| {
            let columns = config
                .columns
                .iter()
                .map(|(column, column_config)| {
                    let algorithm = encrypt.encryptors.get(&column_config.encryptor_name).cloned();
                    (column.clone(), (column_config.clone(), algorithm))
                })
                .collect();
            (table.clone(), columns)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_SOURCE: &str = "ds_0: {url: a}";
    const TWO_SOURCES: &str = "ds_0: {url: a}\nds_1: {url: b}";

    fn snapshot(data_sources: &str, rules: &str) -> TopologySnapshot {
        TopologySnapshot::build("sharding_db", data_sources, rules).unwrap()
    }

    #[test]
    fn test_identical_snapshots_need_no_migration() {
        let rules = "- !SHARDING\n  tables:\n    t_order:\n      actualDataNodes: ds_${0..1}.t_order_${0..1}\n";
        let plan =
            MigrationPlan::compute(&snapshot(TWO_SOURCES, rules), &snapshot(TWO_SOURCES, rules))
                .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_data_source_properties_do_not_move_data() {
        let plan = MigrationPlan::compute(
            &snapshot(ONE_SOURCE, ""),
            &snapshot("ds_0: {url: changed, maxPoolSize: 10}\nds_1: {url: b}", ""),
        )
        .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_adding_shards() {
        let source = snapshot(
            TWO_SOURCES,
            "- !SHARDING\n  tables:\n    t_order:\n      actualDataNodes: ds_0.t_order_${0..1}\n",
        );
        let target = snapshot(
            TWO_SOURCES,
            "- !SHARDING\n  tables:\n    t_order:\n      actualDataNodes: ds_${0..1}.t_order_${0..1}\n",
        );
        let plan = MigrationPlan::compute(&source, &target).unwrap();
        assert_eq!(plan.len(), 1);
        let order = plan.table("t_order").unwrap();
        assert_eq!(order.reasons, vec![MigrationReason::DataNodesChanged]);
        assert_eq!(order.source_nodes.len(), 2);
        assert_eq!(order.target_nodes.len(), 4);
    }

    #[test]
    fn test_strategy_change() {
        let rules = |column: &str| {
            format!(
                "- !SHARDING\n  tables:\n    t_order:\n      actualDataNodes: ds_0.t_order_${{0..1}}\n      tableStrategy:\n        shardingColumn: {column}\n        algorithmExpression: t_order_${{{column} % 2}}\n"
            )
        };
        let plan = MigrationPlan::compute(
            &snapshot(ONE_SOURCE, &rules("order_id")),
            &snapshot(ONE_SOURCE, &rules("user_id")),
        )
        .unwrap();
        assert_eq!(
            plan.table("t_order").unwrap().reasons,
            vec![MigrationReason::StrategyChanged]
        );
    }

    #[test]
    fn test_newly_sharded_table_moves_from_default_data_source() {
        let source = snapshot(TWO_SOURCES, "");
        let target = snapshot(
            TWO_SOURCES,
            "- !SHARDING\n  tables:\n    t_order:\n      actualDataNodes: ds_${0..1}.t_order\n",
        );
        let plan = MigrationPlan::compute(&source, &target).unwrap();
        let order = plan.table("t_order").unwrap();
        assert_eq!(order.reasons, vec![MigrationReason::TableAdded]);
        assert_eq!(order.source_nodes, vec![DataNode::new("ds_0", "t_order")]);

        let back = MigrationPlan::compute(&target, &source).unwrap();
        assert_eq!(
            back.table("t_order").unwrap().reasons,
            vec![MigrationReason::TableRemoved]
        );
    }

    #[test]
    fn test_rule_covering_default_placement_is_equivalent() {
        let source = snapshot(ONE_SOURCE, "");
        let target = snapshot(ONE_SOURCE, "- !SINGLE\n  tables: [t_dict]\n");
        assert!(MigrationPlan::compute(&source, &target).unwrap().is_empty());
    }

    #[test]
    fn test_default_data_source_change_is_reported() {
        let source = snapshot("ds_1: {url: b}", "");
        let target = snapshot(TWO_SOURCES, "");
        let plan = MigrationPlan::compute(&source, &target).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.default_data_source_change(), Some(("ds_1", "ds_0")));

        let pinned = snapshot(TWO_SOURCES, "- !SINGLE\n  defaultDataSource: ds_1\n");
        let plan = MigrationPlan::compute(&source, &pinned).unwrap();
        assert_eq!(plan.default_data_source_change(), None);

        let plan = MigrationPlan::compute(&snapshot(ONE_SOURCE, ""), &target).unwrap();
        assert_eq!(plan.default_data_source_change(), None);
    }

    #[test]
    fn test_encrypt_change() {
        let rules = |key: &str| {
            format!(
                "- !ENCRYPT\n  encryptors:\n    aes: {{type: AES, props: {{aes-key-value: {key}}}}}\n  tables:\n    t_user:\n      columns:\n        pwd: {{cipherColumn: pwd_cipher, encryptorName: aes}}\n"
            )
        };
        let plan = MigrationPlan::compute(
            &snapshot(ONE_SOURCE, &rules("k1")),
            &snapshot(ONE_SOURCE, &rules("k2")),
        )
        .unwrap();
        let user = plan.table("t_user").unwrap();
        assert_eq!(user.reasons, vec![MigrationReason::EncryptChanged]);
        assert_eq!(user.source_nodes, user.target_nodes);
    }
}
