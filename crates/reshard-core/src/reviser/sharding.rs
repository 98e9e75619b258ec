//! Sharding table name reviser.

use super::TableNameReviser;
use crate::rule::ShardingRule;

/// Maps a physical table to the logic table it backs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardingTableNameReviser;

impl TableNameReviser<ShardingRule> for ShardingTableNameReviser {
    fn revise(&self, original_name: &str, data_source_name: &str, rule: &ShardingRule) -> String {
        rule.find_logic_table_by_actual(data_source_name, original_name)
            .unwrap_or(original_name)
            .to_string()
    }
}
