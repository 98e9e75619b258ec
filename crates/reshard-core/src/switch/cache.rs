//! Staged target rules awaiting activation.

use super::error::SwitchError;
use crate::job::current_timestamp;
use crate::topology::TopologySnapshot;
use dashmap::DashMap;
use reshard_proto::SwitchRuleConfiguration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Activation state of a staged rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCacheState {
    /// Staged, not yet serving traffic.
    Pending,
    /// Activated. Never goes back.
    Active,
}

/// One staged rule.
///
/// The snapshot is released once the rule is active; the registry owns it
/// from then on and the entry only remembers which schema it belonged to.
#[derive(Debug, Clone)]
pub struct RuleCacheEntry {
    /// Id the switch event refers to.
    pub rule_cache_id: String,
    /// Schema the rule belongs to.
    pub schema_name: String,
    /// Target topology, `None` once active.
    pub snapshot: Option<Arc<TopologySnapshot>>,
    /// Activation state.
    pub state: RuleCacheState,
    /// When the rule was staged (microseconds since epoch).
    pub staged_at: u64,
}

/// Result of an activation attempt on the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation<T> {
    /// This call performed the activation.
    Activated(T),
    /// An earlier call already did.
    AlreadyActive,
}

/// Derive a fresh rule cache id for a snapshot.
///
/// Mixes the snapshot fingerprint with a per-cache sequence number and the
/// current time, so staging the same topology twice yields different ids.
pub fn generate_rule_cache_id(
    snapshot: &TopologySnapshot,
    sequence: u64,
) -> Result<String, crate::Error> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(snapshot.fingerprint()?.as_bytes());
    hasher.update(&sequence.to_be_bytes());
    hasher.update(&current_timestamp().to_be_bytes());
    Ok(hex::encode(&hasher.finalize().as_bytes()[..8]))
}

/// Staged target rules keyed by rule cache id.
#[derive(Debug, Default)]
pub struct RuleCache {
    entries: DashMap<String, RuleCacheEntry>,
    sequence: AtomicU64,
}

impl RuleCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a snapshot under a generated id.
    pub fn stage(&self, snapshot: TopologySnapshot) -> Result<String, SwitchError> {
        snapshot.validate()?;
        loop {
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
            let rule_cache_id = generate_rule_cache_id(&snapshot, sequence)?;
            if !self.entries.contains_key(&rule_cache_id) {
                self.insert(rule_cache_id.clone(), snapshot)?;
                return Ok(rule_cache_id);
            }
        }
    }

    /// Stage a snapshot under an id chosen by the caller.
    pub fn stage_with_id(
        &self,
        rule_cache_id: impl Into<String>,
        snapshot: TopologySnapshot,
    ) -> Result<(), SwitchError> {
        let rule_cache_id = rule_cache_id.into();
        if rule_cache_id.trim().is_empty() {
            return Err(SwitchError::BlankRuleCacheId);
        }
        snapshot.validate()?;
        self.insert(rule_cache_id, snapshot)
    }

    fn insert(&self, rule_cache_id: String, snapshot: TopologySnapshot) -> Result<(), SwitchError> {
        use dashmap::mapref::entry::Entry;
        match self.entries.entry(rule_cache_id.clone()) {
            Entry::Occupied(_) => Err(SwitchError::DuplicateRuleCacheId(rule_cache_id)),
            Entry::Vacant(slot) => {
                slot.insert(RuleCacheEntry {
                    rule_cache_id,
                    schema_name: snapshot.schema_name().to_string(),
                    snapshot: Some(Arc::new(snapshot)),
                    state: RuleCacheState::Pending,
                    staged_at: current_timestamp(),
                });
                Ok(())
            }
        }
    }

    /// Look up a staged rule.
    pub fn get(&self, rule_cache_id: &str) -> Option<RuleCacheEntry> {
        self.entries.get(rule_cache_id).map(|e| e.clone())
    }

    /// Activation state of a staged rule.
    pub fn state(&self, rule_cache_id: &str) -> Option<RuleCacheState> {
        self.entries.get(rule_cache_id).map(|e| e.state)
    }

    /// Drop a rule that never became active.
    ///
    /// Returns whether an entry was removed. Active entries are kept so a
    /// repeated switch event stays a no-op.
    pub fn discard(&self, rule_cache_id: &str) -> bool {
        self.entries
            .remove_if(rule_cache_id, |_, e| e.state == RuleCacheState::Pending)
            .is_some()
    }

    /// Number of staged rules, active or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Activate the rule named by `event`, running `apply` at most once per id.
    ///
    /// The entry stays locked while `apply` runs, so concurrent switches for
    /// the same id observe either `Pending` (and wait) or `Active`.
    pub fn activate<T>(
        &self,
        event: &SwitchRuleConfiguration,
        apply: impl FnOnce(Arc<TopologySnapshot>) -> T,
    ) -> Result<Activation<T>, SwitchError> {
        let mut entry = self.entries.get_mut(&event.rule_cache_id).ok_or_else(|| {
            SwitchError::UnknownRuleCacheId {
                schema_name: event.schema_name.clone(),
                rule_cache_id: event.rule_cache_id.clone(),
            }
        })?;

        if entry.schema_name != event.schema_name {
            return Err(SwitchError::SchemaMismatch {
                rule_cache_id: event.rule_cache_id.clone(),
                staged: entry.schema_name.clone(),
                requested: event.schema_name.clone(),
            });
        }

        let Some(snapshot) = entry.snapshot.take() else {
            return Ok(Activation::AlreadyActive);
        };

        let result = apply(snapshot);
        entry.state = RuleCacheState::Active;
        Ok(Activation::Activated(result))
    }
}
