//! Scaling coordinator.
//!
//! Turns migration triggers into job configurations, submits them for
//! admission, and activates the target rule right away when no data has to
//! move. Jobs that do move data are switched later by the finished-check
//! executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use reshard_core::{
    Admission, ConfigurationParseError, HandleConfiguration, JobConfiguration, MigrationControl,
    RuleCache, ScalingError,
};
use reshard_proto::{ClusterEvent, EventKind, MigrationTrigger};

use crate::bus::{EventBus, EventSubscriber};
use crate::error::Error;
use crate::executor::ExecutorSet;

/// What handling a trigger achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// No migration was needed and the switch event has been delivered.
    Switched,
    /// A background job was admitted.
    JobStarted(u64),
}

/// A trigger could not be handled. No switch event was emitted.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The trigger is missing its identity.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(#[from] reshard_proto::Error),

    /// Source or target topology could not be parsed.
    #[error("{0}")]
    ConfigurationParse(#[from] ConfigurationParseError),

    /// The control API refused the job.
    #[error("job admission failed: {0}")]
    JobAdmission(#[from] ScalingError),

    /// A subscriber rejected the immediate switch.
    #[error("rule switch for schema '{schema_name}' rejected: {reasons}")]
    SwitchRejected {
        /// Schema being switched.
        schema_name: String,
        /// Subscriber errors.
        reasons: String,
    },
}

/// Single long-lived coordinator of scaling triggers.
///
/// Failed triggers are remembered by rule cache id so callers can tell a
/// refused trigger from one still in flight.
pub struct ScalingCoordinator {
    control: Arc<dyn MigrationControl>,
    bus: Arc<EventBus>,
    handle: HandleConfiguration,
    executors: Option<ExecutorSet>,
    rule_cache: Option<Arc<RuleCache>>,
    rejected: Mutex<HashMap<String, String>>,
    started: AtomicBool,
}

impl ScalingCoordinator {
    const KINDS: &'static [EventKind] = &[EventKind::StartScaling];

    /// Create a coordinator submitting jobs to `control`.
    pub fn new(
        control: Arc<dyn MigrationControl>,
        bus: Arc<EventBus>,
        handle: HandleConfiguration,
    ) -> Self {
        Self {
            control,
            bus,
            handle,
            executors: None,
            rule_cache: None,
            rejected: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Attach the background executors started with the coordinator.
    pub fn with_executors(mut self, executors: ExecutorSet) -> Self {
        self.executors = Some(executors);
        self
    }

    /// Drop staged target rules of refused triggers from `cache`.
    pub fn with_rule_cache(mut self, cache: Arc<RuleCache>) -> Self {
        self.rule_cache = Some(cache);
        self
    }

    /// Why the trigger staged under `rule_cache_id` was refused, if it was.
    pub fn rejection(&self, rule_cache_id: &str) -> Option<String> {
        self.rejected.lock().get(rule_cache_id).cloned()
    }

    /// Subscribe to triggers and start the executors.
    ///
    /// Only the first call does anything; later calls return false.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("scaling coordinator already started");
            return false;
        }
        let subscriber: Arc<dyn EventSubscriber> = Arc::clone(self) as Arc<dyn EventSubscriber>;
        self.bus.subscribe(subscriber).await;
        if let Some(executors) = &self.executors {
            executors.start();
        }
        info!(
            executors = self.executors.is_some(),
            "scaling coordinator started"
        );
        true
    }

    /// Stop the executors and wait for them.
    pub async fn stop(&self) {
        if let Some(executors) = &self.executors {
            executors.stop().await;
        }
        info!("scaling coordinator stopped");
    }

    /// Whether the attached executors are running.
    pub fn is_running(&self) -> bool {
        self.executors.as_ref().is_some_and(ExecutorSet::is_running)
    }

    /// Handle one migration trigger.
    ///
    /// When no migration is needed the switch event is posted, and has been
    /// handled by every subscriber, before this returns. On error the
    /// trigger's staged rule is discarded unless it already became active.
    pub async fn on_trigger(
        &self,
        trigger: &MigrationTrigger,
    ) -> Result<TriggerOutcome, CoordinatorError> {
        let result = self.handle_trigger(trigger).await;
        if let Err(e) = &result {
            let discarded = self
                .rule_cache
                .as_ref()
                .is_some_and(|cache| cache.discard(&trigger.rule_cache_id));
            error!(
                schema_name = %trigger.schema_name,
                rule_cache_id = %trigger.rule_cache_id,
                discarded,
                error = %e,
                "scaling trigger failed"
            );
            self.rejected
                .lock()
                .insert(trigger.rule_cache_id.clone(), e.to_string());
        }
        result
    }

    async fn handle_trigger(
        &self,
        trigger: &MigrationTrigger,
    ) -> Result<TriggerOutcome, CoordinatorError> {
        trigger.validate()?;
        let configuration = JobConfiguration::from_trigger(trigger, self.handle)?;
        debug!(
            schema_name = %trigger.schema_name,
            rule_cache_id = %trigger.rule_cache_id,
            source_data_sources = configuration.source().data_sources().len(),
            target_data_sources = configuration.target().data_sources().len(),
            "job configuration built"
        );

        match self.control.start(configuration).await? {
            Admission::NoMigrationNeeded => {
                let report = self.bus.post(trigger.switch_event().into()).await;
                if !report.is_success() {
                    let reasons: Vec<String> = report
                        .failures
                        .iter()
                        .map(|f| format!("{}: {}", f.subscriber, f.error))
                        .collect();
                    return Err(CoordinatorError::SwitchRejected {
                        schema_name: trigger.schema_name.clone(),
                        reasons: reasons.join("; "),
                    });
                }
                info!(
                    schema_name = %trigger.schema_name,
                    rule_cache_id = %trigger.rule_cache_id,
                    "no migration needed, rule switched"
                );
                Ok(TriggerOutcome::Switched)
            }
            Admission::JobStarted(job_id) => {
                info!(
                    job_id,
                    schema_name = %trigger.schema_name,
                    rule_cache_id = %trigger.rule_cache_id,
                    "scaling job started"
                );
                Ok(TriggerOutcome::JobStarted(job_id))
            }
        }
    }
}

#[async_trait]
impl EventSubscriber for ScalingCoordinator {
    fn name(&self) -> &str {
        "scaling-coordinator"
    }

    fn kinds(&self) -> &[EventKind] {
        Self::KINDS
    }

    async fn handle(&self, event: &ClusterEvent) -> Result<(), Error> {
        if let ClusterEvent::StartScaling(trigger) = event {
            self.on_trigger(trigger).await?;
        }
        Ok(())
    }
}
