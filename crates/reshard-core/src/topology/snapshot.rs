//! Point-in-time topology snapshots.

use super::error::ConfigurationParseError;
use super::rule_config::{
    EncryptRuleConfiguration, Properties, ReadwriteSplittingRuleConfiguration, RuleConfiguration,
    RuleKind, ShardingRuleConfiguration, SingleRuleConfiguration,
};
use crate::error::Error;
use crate::rule::{Rule, ShardingRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Connection properties of one data source.
pub type DataSourceProperties = Properties;

/// Immutable description of a schema's data sources and rules.
///
/// Snapshots own all of their data. Building one from serialized text never
/// shares state with a live configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    schema_name: String,
    data_sources: BTreeMap<String, DataSourceProperties>,
    rules: Vec<RuleConfiguration>,
}

impl TopologySnapshot {
    /// Parse serialized data sources and rules into a validated snapshot.
    ///
    /// Blank data source text is an empty mapping and blank rule text is an
    /// empty list.
    pub fn build(
        schema_name: &str,
        data_sources: &str,
        rules: &str,
    ) -> Result<Self, ConfigurationParseError> {
        if schema_name.trim().is_empty() {
            return Err(ConfigurationParseError::BlankSchemaName);
        }
        let data_sources = parse_data_sources(schema_name, data_sources)?;
        let rules = parse_rules(schema_name, rules)?;
        Self::new(schema_name, data_sources, rules)
    }

    /// Assemble a snapshot from already structured parts.
    pub fn new(
        schema_name: impl Into<String>,
        data_sources: BTreeMap<String, DataSourceProperties>,
        rules: Vec<RuleConfiguration>,
    ) -> Result<Self, ConfigurationParseError> {
        let snapshot = Self {
            schema_name: schema_name.into(),
            data_sources,
            rules,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check the internal consistency of this snapshot.
    pub fn validate(&self) -> Result<(), ConfigurationParseError> {
        if self.schema_name.trim().is_empty() {
            return Err(ConfigurationParseError::BlankSchemaName);
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.kind()) {
                return Err(ConfigurationParseError::DuplicateRule { kind: rule.kind() });
            }
        }

        if let Some(readwrite) = self.readwrite_splitting_rule() {
            for (name, group) in &readwrite.data_sources {
                let members = std::iter::once(&group.write_data_source_name)
                    .chain(group.read_data_source_names.iter());
                for member in members {
                    if !self.data_sources.contains_key(member) {
                        return Err(ConfigurationParseError::UnknownDataSource {
                            owner: format!("readwrite-splitting data source '{}'", name),
                            data_source: member.clone(),
                        });
                    }
                }
            }
        }

        let logical = self.logical_data_source_names();

        if let Some(sharding) = self.sharding_rule() {
            ShardingRule::new(sharding, &logical)?;
        }

        if let Some(encrypt) = self.encrypt_rule() {
            for (table, table_config) in &encrypt.tables {
                for (column, column_config) in &table_config.columns {
                    if !encrypt.encryptors.contains_key(&column_config.encryptor_name) {
                        return Err(ConfigurationParseError::UnknownEncryptor {
                            table: table.clone(),
                            column: column.clone(),
                            encryptor: column_config.encryptor_name.clone(),
                        });
                    }
                }
            }
        }

        if let Some(single) = self.single_rule() {
            if let Some(default) = &single.default_data_source {
                if !logical.iter().any(|name| name == default) {
                    return Err(ConfigurationParseError::UnknownDataSource {
                        owner: "single rule".to_string(),
                        data_source: default.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// The logical schema this snapshot describes.
    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// Physical data sources keyed by name.
    pub fn data_sources(&self) -> &BTreeMap<String, DataSourceProperties> {
        &self.data_sources
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[RuleConfiguration] {
        &self.rules
    }

    /// Physical data source names, sorted.
    pub fn data_source_names(&self) -> Vec<String> {
        self.data_sources.keys().cloned().collect()
    }

    /// Data source names visible to sharding and single rules, sorted.
    ///
    /// Read-write splitting groups replace their member data sources.
    pub fn logical_data_source_names(&self) -> Vec<String> {
        let Some(readwrite) = self.readwrite_splitting_rule() else {
            return self.data_source_names();
        };

        let members: HashSet<&String> = readwrite
            .data_sources
            .values()
            .flat_map(|g| {
                std::iter::once(&g.write_data_source_name).chain(&g.read_data_source_names)
            })
            .collect();

        let names: BTreeSet<String> = readwrite
            .data_sources
            .keys()
            .cloned()
            .chain(
                self.data_sources
                    .keys()
                    .filter(|name| !members.contains(name))
                    .cloned(),
            )
            .collect();
        names.into_iter().collect()
    }

    /// Data source that hosts tables no sharding rule covers.
    ///
    /// The single rule's default wins; otherwise the first logical data source.
    pub fn default_data_source(&self) -> Option<String> {
        self.single_rule()
            .and_then(|single| single.default_data_source.clone())
            .or_else(|| self.logical_data_source_names().into_iter().next())
    }

    /// The rule of the given kind, if configured.
    pub fn rule(&self, kind: RuleKind) -> Option<&RuleConfiguration> {
        self.rules.iter().find(|rule| rule.kind() == kind)
    }

    /// The sharding rule, if configured.
    pub fn sharding_rule(&self) -> Option<&ShardingRuleConfiguration> {
        self.rules.iter().find_map(|rule| match rule {
            RuleConfiguration::Sharding(config) => Some(config),
            _ => None,
        })
    }

    /// The encrypt rule, if configured.
    pub fn encrypt_rule(&self) -> Option<&EncryptRuleConfiguration> {
        self.rules.iter().find_map(|rule| match rule {
            RuleConfiguration::Encrypt(config) => Some(config),
            _ => None,
        })
    }

    /// The read-write splitting rule, if configured.
    pub fn readwrite_splitting_rule(&self) -> Option<&ReadwriteSplittingRuleConfiguration> {
        self.rules.iter().find_map(|rule| match rule {
            RuleConfiguration::ReadwriteSplitting(config) => Some(config),
            _ => None,
        })
    }

    /// The single-table rule, if configured.
    pub fn single_rule(&self) -> Option<&SingleRuleConfiguration> {
        self.rules.iter().find_map(|rule| match rule {
            RuleConfiguration::Single(config) => Some(config),
            _ => None,
        })
    }

    /// Resolve every rule into its runtime form.
    pub fn build_rules(&self) -> Result<Vec<Rule>, ConfigurationParseError> {
        Rule::build_all(self)
    }

    /// Content hash of this snapshot, hex encoded.
    ///
    /// Equal snapshots always produce equal fingerprints because every map is
    /// ordered before hashing.
    pub fn fingerprint(&self) -> Result<String, Error> {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, self).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }

    /// Render the data sources in the serialized grammar.
    pub fn data_sources_text(&self) -> Result<String, Error> {
        serde_yaml::to_string(&self.data_sources).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Render the rules in the serialized grammar.
    pub fn rules_text(&self) -> Result<String, Error> {
        serde_yaml::to_string(&self.rules).map_err(|e| Error::Serialization(e.to_string()))
    }
}

fn parse_data_sources(
    schema_name: &str,
    text: &str,
) -> Result<BTreeMap<String, DataSourceProperties>, ConfigurationParseError> {
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    serde_yaml::from_str::<Option<BTreeMap<String, DataSourceProperties>>>(text)
        .map(Option::unwrap_or_default)
        .map_err(|e| ConfigurationParseError::MalformedDataSources {
            schema_name: schema_name.to_string(),
            reason: e.to_string(),
        })
}

fn parse_rules(
    schema_name: &str,
    text: &str,
) -> Result<Vec<RuleConfiguration>, ConfigurationParseError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_yaml::from_str::<Option<Vec<RuleConfiguration>>>(text)
        .map(Option::unwrap_or_default)
        .map_err(|e| ConfigurationParseError::MalformedRules {
            schema_name: schema_name.to_string(),
            reason: e.to_string(),
        })
}
