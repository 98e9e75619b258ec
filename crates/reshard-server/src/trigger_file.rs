//! Trigger documents loaded at startup.
//!
//! Two layouts are accepted. The flat layout is the wire form of
//! [`MigrationTrigger`], with each topology given as embedded YAML text. The
//! nested layout is easier to write by hand:
//!
//! ```yaml
//! schemaName: sharding_db
//! ruleCacheId: "42"          # optional, generated when absent
//! source:
//!   dataSources:
//!     ds_0: {url: "jdbc:mysql://127.0.0.1:3306/demo_ds_0"}
//!   rules: []
//! target:
//!   dataSources:
//!     ds_0: {url: "jdbc:mysql://127.0.0.1:3306/demo_ds_0"}
//!     ds_1: {url: "jdbc:mysql://127.0.0.1:3306/demo_ds_1"}
//!   rules:
//!     - !SHARDING
//!       tables:
//!         t_order: {actualDataNodes: "ds_${0..1}.t_order"}
//! ```
//!
//! Loading a document stages its target rule in the rule cache and registers
//! its source as the schema's active rule if none is active yet.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use reshard_core::{RuleSwitch, TopologySnapshot};
use reshard_proto::{MigrationTrigger, EVENT_FORMAT_VERSION};

use crate::error::Error;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NestedDocument {
    #[serde(default)]
    version: Option<u32>,
    schema_name: String,
    #[serde(default)]
    rule_cache_id: Option<String>,
    source: TopologyDocument,
    target: TopologyDocument,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopologyDocument {
    #[serde(default)]
    data_sources: serde_yaml::Value,
    #[serde(default)]
    rules: serde_yaml::Value,
}

impl TopologyDocument {
    fn data_sources_text(&self) -> Result<String, Error> {
        value_text(&self.data_sources)
    }

    fn rules_text(&self) -> Result<String, Error> {
        value_text(&self.rules)
    }
}

fn value_text(value: &serde_yaml::Value) -> Result<String, Error> {
    if value.is_null() {
        return Ok(String::new());
    }
    serde_yaml::to_string(value)
        .map_err(|e| reshard_proto::Error::Serialization(e.to_string()).into())
}

/// Parse a trigger document without staging anything.
///
/// A nested document without `ruleCacheId` yields a trigger with a blank id.
pub fn parse_trigger(text: &str) -> Result<MigrationTrigger, Error> {
    let value: serde_yaml::Value = serde_yaml::from_str(text)
        .map_err(|e| reshard_proto::Error::Deserialization(e.to_string()))?;
    if value.get("source").is_none() {
        return Ok(MigrationTrigger::from_yaml(text)?);
    }

    let document: NestedDocument = serde_yaml::from_value(value)
        .map_err(|e| reshard_proto::Error::Deserialization(e.to_string()))?;
    if let Some(version) = document.version {
        if version != EVENT_FORMAT_VERSION {
            return Err(reshard_proto::Error::VersionMismatch {
                expected: EVENT_FORMAT_VERSION,
                actual: version,
            }
            .into());
        }
    }
    Ok(MigrationTrigger::new(
        document.schema_name,
        document.rule_cache_id.unwrap_or_default(),
        document.source.data_sources_text()?,
        document.source.rules_text()?,
        document.target.data_sources_text()?,
        document.target.rules_text()?,
    ))
}

/// Stage a trigger's target rule and register its source rule.
///
/// A blank rule cache id is replaced by a generated one. The returned trigger
/// is ready to post.
pub fn stage_trigger(
    mut trigger: MigrationTrigger,
    switch: &RuleSwitch,
) -> Result<MigrationTrigger, Error> {
    let source = TopologySnapshot::build(
        &trigger.schema_name,
        &trigger.source_data_source,
        &trigger.source_rule,
    )?;
    let target = TopologySnapshot::build(
        &trigger.schema_name,
        &trigger.target_data_source,
        &trigger.target_rule,
    )?;

    if trigger.rule_cache_id.trim().is_empty() {
        trigger.rule_cache_id = switch.cache().stage(target)?;
    } else {
        switch
            .cache()
            .stage_with_id(trigger.rule_cache_id.clone(), target)?;
    }
    let version = switch.registry().register_initial(source);

    info!(
        schema_name = %trigger.schema_name,
        rule_cache_id = %trigger.rule_cache_id,
        active_version = version,
        "trigger staged"
    );
    Ok(trigger)
}

/// Read, parse and stage a trigger file.
pub fn load_trigger(path: &Path, switch: &RuleSwitch) -> Result<MigrationTrigger, Error> {
    let text = std::fs::read_to_string(path)?;
    let trigger = parse_trigger(&text)?;
    stage_trigger(trigger, switch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reshard_core::{ActiveRuleRegistry, RuleCache, RuleCacheState};
    use std::sync::Arc;

    const NESTED: &str = r#"
schemaName: sharding_db
ruleCacheId: "42"
source:
  dataSources:
    ds_0: {url: a}
target:
  dataSources:
    ds_0: {url: a}
    ds_1: {url: b}
  rules:
    - !SHARDING
      tables:
        t_order:
          actualDataNodes: ds_${0..1}.t_order
"#;

    fn switch() -> RuleSwitch {
        RuleSwitch::new(Arc::new(RuleCache::new()), Arc::new(ActiveRuleRegistry::new()))
    }

    #[test]
    fn test_parse_nested_document() {
        let trigger = parse_trigger(NESTED).unwrap();
        assert_eq!(trigger.schema_name, "sharding_db");
        assert_eq!(trigger.rule_cache_id, "42");
        assert!(trigger.source_rule.is_empty());

        let target = TopologySnapshot::build(
            &trigger.schema_name,
            &trigger.target_data_source,
            &trigger.target_rule,
        )
        .unwrap();
        assert_eq!(target.data_source_names(), vec!["ds_0", "ds_1"]);
        assert!(target.sharding_rule().is_some());
    }

    #[test]
    fn test_parse_flat_document() {
        let flat = MigrationTrigger::new("sharding_db", "7", "ds_0: {}", "", "ds_0: {}", "");
        let parsed = parse_trigger(&flat.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, flat);
    }

    #[test]
    fn test_version_mismatch() {
        let text = format!("version: 9\n{}", NESTED);
        assert!(matches!(
            parse_trigger(&text),
            Err(Error::Protocol(reshard_proto::Error::VersionMismatch { actual: 9, .. }))
        ));
    }

    #[test]
    fn test_stage_registers_source_and_target() {
        let switch = switch();
        let trigger = stage_trigger(parse_trigger(NESTED).unwrap(), &switch).unwrap();

        let entry = switch.cache().get("42").unwrap();
        assert_eq!(entry.state, RuleCacheState::Pending);
        assert_eq!(entry.snapshot.unwrap().data_sources().len(), 2);

        let active = switch.registry().current("sharding_db").unwrap();
        assert_eq!(active.snapshot.data_sources().len(), 1);
        assert_eq!(trigger.rule_cache_id, "42");
    }

    #[test]
    fn test_missing_id_is_generated() {
        let switch = switch();
        let text = NESTED.replace("ruleCacheId: \"42\"\n", "");
        let trigger = stage_trigger(parse_trigger(&text).unwrap(), &switch).unwrap();
        assert_eq!(trigger.rule_cache_id.len(), 16);
        assert!(switch.cache().get(&trigger.rule_cache_id).is_some());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trigger.yaml");
        std::fs::write(&path, NESTED).unwrap();

        let switch = switch();
        let trigger = load_trigger(&path, &switch).unwrap();
        assert_eq!(trigger.switch_event().rule_cache_id, "42");
    }
}
