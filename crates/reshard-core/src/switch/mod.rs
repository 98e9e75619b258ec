//! Atomic activation of staged target rules.
//!
//! A target rule is staged in the [`RuleCache`] before its migration starts.
//! Once data is in place a switch event names the staged rule, and
//! [`RuleSwitch::apply`] moves it into the [`ActiveRuleRegistry`], exactly
//! once per rule cache id.

pub mod cache;
pub mod error;
pub mod registry;

pub use cache::{generate_rule_cache_id, Activation, RuleCache, RuleCacheEntry, RuleCacheState};
pub use error::SwitchError;
pub use registry::{ActiveRule, ActiveRuleRegistry};

use reshard_proto::SwitchRuleConfiguration;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of applying a switch event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The staged rule is now active at this version.
    Activated {
        /// New active version of the schema.
        version: u64,
    },
    /// The rule was activated by an earlier event.
    AlreadyActive,
}

/// Applies switch events against a rule cache and a registry.
#[derive(Debug, Clone)]
pub struct RuleSwitch {
    cache: Arc<RuleCache>,
    registry: Arc<ActiveRuleRegistry>,
}

impl RuleSwitch {
    /// Create a switch over shared state.
    pub fn new(cache: Arc<RuleCache>, registry: Arc<ActiveRuleRegistry>) -> Self {
        Self { cache, registry }
    }

    /// The staged rules.
    pub fn cache(&self) -> &Arc<RuleCache> {
        &self.cache
    }

    /// The active rules.
    pub fn registry(&self) -> &Arc<ActiveRuleRegistry> {
        &self.registry
    }

    /// Activate the staged rule named by `event`.
    ///
    /// On error the previously active rule is left untouched.
    pub fn apply(&self, event: &SwitchRuleConfiguration) -> Result<SwitchOutcome, SwitchError> {
        let activation = self.cache.activate(event, |snapshot| {
            self.registry.replace(snapshot, &event.rule_cache_id)
        })?;
        match activation {
            Activation::Activated(version) => {
                info!(
                    schema_name = %event.schema_name,
                    rule_cache_id = %event.rule_cache_id,
                    version,
                    "rule configuration switched"
                );
                Ok(SwitchOutcome::Activated { version })
            }
            Activation::AlreadyActive => {
                debug!(
                    schema_name = %event.schema_name,
                    rule_cache_id = %event.rule_cache_id,
                    "rule configuration already active"
                );
                Ok(SwitchOutcome::AlreadyActive)
            }
        }
    }
}
