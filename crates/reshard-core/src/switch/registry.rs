//! The rule currently serving traffic for each schema.

use crate::topology::TopologySnapshot;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Active rule of one schema.
#[derive(Debug, Clone)]
pub struct ActiveRule {
    /// Topology in effect.
    pub snapshot: Arc<TopologySnapshot>,
    /// Staged rule this came from; `None` for the rule loaded at startup.
    pub rule_cache_id: Option<String>,
    /// Increases by one on every switch.
    pub version: u64,
}

/// Active rules keyed by schema.
///
/// Writers replace a schema's whole entry under the write lock; readers
/// clone an `Arc` and never see a partially applied switch.
#[derive(Debug, Default)]
pub struct ActiveRuleRegistry {
    rules: RwLock<HashMap<String, Arc<ActiveRule>>>,
}

impl ActiveRuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the startup rule of a schema unless one is already active.
    ///
    /// Returns the version now in effect.
    pub fn register_initial(&self, snapshot: TopologySnapshot) -> u64 {
        let mut rules = self.rules.write();
        rules
            .entry(snapshot.schema_name().to_string())
            .or_insert_with(|| {
                Arc::new(ActiveRule {
                    snapshot: Arc::new(snapshot),
                    rule_cache_id: None,
                    version: 1,
                })
            })
            .version
    }

    /// Replace a schema's active rule. Returns the new version.
    pub fn replace(&self, snapshot: Arc<TopologySnapshot>, rule_cache_id: &str) -> u64 {
        let mut rules = self.rules.write();
        let schema_name = snapshot.schema_name().to_string();
        let version = rules.get(&schema_name).map_or(1, |rule| rule.version + 1);
        rules.insert(
            schema_name,
            Arc::new(ActiveRule {
                snapshot,
                rule_cache_id: Some(rule_cache_id.to_string()),
                version,
            }),
        );
        version
    }

    /// The active rule of a schema.
    pub fn current(&self, schema_name: &str) -> Option<Arc<ActiveRule>> {
        self.rules.read().get(schema_name).cloned()
    }

    /// Schemas with an active rule, sorted.
    pub fn schemas(&self) -> Vec<String> {
        let mut names: Vec<String> = self.rules.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(data_sources: &str) -> TopologySnapshot {
        TopologySnapshot::build("sharding_db", data_sources, "").unwrap()
    }

    #[test]
    fn test_register_and_replace() {
        let registry = ActiveRuleRegistry::new();
        assert!(registry.current("sharding_db").is_none());

        assert_eq!(registry.register_initial(snapshot("ds_0: {}")), 1);
        assert_eq!(registry.register_initial(snapshot("ds_9: {}")), 1);
        let before = registry.current("sharding_db").unwrap();
        assert_eq!(before.snapshot.data_source_names(), vec!["ds_0"]);

        let version = registry.replace(Arc::new(snapshot("ds_0: {}\nds_1: {}")), "42");
        assert_eq!(version, 2);

        // Readers holding the old Arc keep a consistent view.
        assert_eq!(before.snapshot.data_source_names(), vec!["ds_0"]);
        let after = registry.current("sharding_db").unwrap();
        assert_eq!(after.snapshot.data_source_names(), vec!["ds_0", "ds_1"]);
        assert_eq!(after.rule_cache_id.as_deref(), Some("42"));
        assert_eq!(registry.schemas(), vec!["sharding_db"]);
    }
}
