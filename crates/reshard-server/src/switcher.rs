//! Subscriber that applies switch events to the active rule registry.

use async_trait::async_trait;
use reshard_core::RuleSwitch;
use reshard_proto::{ClusterEvent, EventKind};

use crate::bus::EventSubscriber;
use crate::error::Error;

/// Activates staged rules when switch events arrive.
pub struct RuleSwitcher {
    switch: RuleSwitch,
}

impl RuleSwitcher {
    const KINDS: &'static [EventKind] = &[EventKind::SwitchRuleConfiguration];

    /// Create a switcher over shared rule state.
    pub fn new(switch: RuleSwitch) -> Self {
        Self { switch }
    }
}

#[async_trait]
impl EventSubscriber for RuleSwitcher {
    fn name(&self) -> &str {
        "rule-switcher"
    }

    fn kinds(&self) -> &[EventKind] {
        Self::KINDS
    }

    async fn handle(&self, event: &ClusterEvent) -> Result<(), Error> {
        if let ClusterEvent::SwitchRuleConfiguration(switch) = event {
            self.switch.apply(switch)?;
        }
        Ok(())
    }
}
