//! Runtime sharding rule with expanded data nodes.

use crate::topology::{
    ConfigurationParseError, DataNode, InlineExpression, ShardingRuleConfiguration,
    ShardingStrategyConfiguration, ShardingTableConfiguration,
};
use std::collections::BTreeMap;

/// One logic table and the physical tables backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRule {
    logic_table: String,
    actual_data_nodes: Vec<DataNode>,
    database_strategy: Option<ShardingStrategyConfiguration>,
    table_strategy: Option<ShardingStrategyConfiguration>,
}

impl TableRule {
    /// Expand a table configuration against the available data sources.
    ///
    /// Without `actualDataNodes` the logic table lives once on every data
    /// source.
    pub fn new(
        logic_table: &str,
        config: &ShardingTableConfiguration,
        data_sources: &[String],
    ) -> Result<Self, ConfigurationParseError> {
        let actual_data_nodes = match &config.actual_data_nodes {
            Some(expression) => {
                let nodes = InlineExpression::parse(expression)?
                    .expand()
                    .iter()
                    .map(|text| DataNode::parse(text))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(node) = nodes
                    .iter()
                    .find(|node| !data_sources.contains(&node.data_source))
                {
                    return Err(ConfigurationParseError::UnknownDataSource {
                        owner: format!("table '{}'", logic_table),
                        data_source: node.data_source.clone(),
                    });
                }
                nodes
            }
            None => data_sources
                .iter()
                .map(|ds| DataNode::new(ds, logic_table))
                .collect(),
        };

        Ok(Self {
            logic_table: logic_table.to_string(),
            actual_data_nodes,
            database_strategy: config.database_strategy.clone(),
            table_strategy: config.table_strategy.clone(),
        })
    }

    /// Logic table name.
    pub fn logic_table(&self) -> &str {
        &self.logic_table
    }

    /// Physical tables in declaration order.
    pub fn actual_data_nodes(&self) -> &[DataNode] {
        &self.actual_data_nodes
    }

    /// Whether `data_source.table` is one of this rule's physical tables.
    pub fn contains(&self, data_source: &str, table: &str) -> bool {
        self.actual_data_nodes
            .iter()
            .any(|node| node.matches(data_source, table))
    }

    /// Routing strategies, database first.
    pub fn strategies(
        &self,
    ) -> (
        Option<&ShardingStrategyConfiguration>,
        Option<&ShardingStrategyConfiguration>,
    ) {
        (self.database_strategy.as_ref(), self.table_strategy.as_ref())
    }
}

/// Sharding rule of one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingRule {
    table_rules: BTreeMap<String, TableRule>,
    broadcast_tables: Vec<String>,
}

impl ShardingRule {
    /// Build from configuration, resolving nodes against `data_sources`.
    pub fn new(
        config: &ShardingRuleConfiguration,
        data_sources: &[String],
    ) -> Result<Self, ConfigurationParseError> {
        let mut table_rules = BTreeMap::new();
        for (logic_table, table_config) in &config.tables {
            let rule = TableRule::new(logic_table, table_config, data_sources)?;
            table_rules.insert(logic_table.clone(), rule);
        }
        Ok(Self {
            table_rules,
            broadcast_tables: config.broadcast_tables.clone(),
        })
    }

    /// All table rules, ordered by logic table name.
    pub fn table_rules(&self) -> impl Iterator<Item = &TableRule> {
        self.table_rules.values()
    }

    /// Table rule for a logic table, ignoring case.
    pub fn table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.table_rules.get(logic_table).or_else(|| {
            self.table_rules
                .values()
                .find(|rule| rule.logic_table.eq_ignore_ascii_case(logic_table))
        })
    }

    /// Logic table owning the physical table `data_source.actual_table`.
    pub fn find_logic_table_by_actual(
        &self,
        data_source: &str,
        actual_table: &str,
    ) -> Option<&str> {
        self.table_rules
            .values()
            .find(|rule| rule.contains(data_source, actual_table))
            .map(|rule| rule.logic_table())
    }

    /// Tables replicated to every data source.
    pub fn broadcast_tables(&self) -> &[String] {
        &self.broadcast_tables
    }
}
