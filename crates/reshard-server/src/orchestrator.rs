//! Process-wide wiring of the migration orchestrator.

use std::sync::Arc;

use tracing::{error, info};

use reshard_core::{
    ActiveRuleRegistry, DataSynchronizer, JobStatus, RuleCache, RuleCacheState, RuleSwitch,
    ScalingApi,
};
use reshard_proto::MigrationTrigger;

use crate::bus::{start_dispatcher, DispatcherHandle, EventBus};
use crate::config::ServerConfig;
use crate::coordinator::ScalingCoordinator;
use crate::error::Error;
use crate::executor::ExecutorSet;
use crate::switcher::RuleSwitcher;
use crate::trigger_file;

/// Everything one orchestrator process owns.
pub struct Orchestrator {
    db: sled::Db,
    api: Arc<ScalingApi>,
    bus: Arc<EventBus>,
    switch: RuleSwitch,
    coordinator: Arc<ScalingCoordinator>,
    dispatcher: DispatcherHandle,
}

impl Orchestrator {
    /// Open job storage and wire the bus, switcher, coordinator and executors.
    ///
    /// Nothing runs until [`Orchestrator::start`] is called.
    pub async fn open(
        config: &ServerConfig,
        synchronizer: Arc<dyn DataSynchronizer>,
    ) -> Result<Self, Error> {
        let db = sled::open(&config.data_path)?;
        Self::with_db(db, config, synchronizer).await
    }

    /// Wire an orchestrator over an already opened database.
    ///
    /// Target rules of jobs recovered from storage are staged again so the
    /// finished-check executor can switch them once their data is in place.
    pub async fn with_db(
        db: sled::Db,
        config: &ServerConfig,
        synchronizer: Arc<dyn DataSynchronizer>,
    ) -> Result<Self, Error> {
        let api = Arc::new(ScalingApi::open(&db)?);
        let bus = Arc::new(EventBus::new());
        let switch = RuleSwitch::new(
            Arc::new(RuleCache::new()),
            Arc::new(ActiveRuleRegistry::new()),
        );
        bus.subscribe(Arc::new(RuleSwitcher::new(switch.clone())))
            .await;
        restage_unfinished(&api, &switch);

        let executors = ExecutorSet::new(
            Arc::clone(&api),
            Arc::clone(&bus),
            synchronizer,
            config.executor,
        );
        let coordinator = Arc::new(
            ScalingCoordinator::new(
                Arc::clone(&api) as Arc<dyn reshard_core::MigrationControl>,
                Arc::clone(&bus),
                config.executor.handle,
            )
            .with_executors(executors)
            .with_rule_cache(Arc::clone(switch.cache())),
        );
        let dispatcher = start_dispatcher(Arc::clone(&bus), config.event_buffer);

        Ok(Self {
            db,
            api,
            bus,
            switch,
            coordinator,
            dispatcher,
        })
    }

    /// Start the coordinator and its executors.
    pub async fn start(&self) -> bool {
        self.coordinator.start().await
    }

    /// Stage a trigger and queue it for the coordinator.
    pub async fn submit(&self, trigger: MigrationTrigger) -> Result<MigrationTrigger, Error> {
        let trigger = trigger_file::stage_trigger(trigger, &self.switch)?;
        self.dispatcher.send(trigger.clone()).await?;
        Ok(trigger)
    }

    /// Load a trigger file and queue it.
    pub async fn submit_file(&self, path: &std::path::Path) -> Result<MigrationTrigger, Error> {
        let trigger = trigger_file::load_trigger(path, &self.switch)?;
        self.dispatcher.send(trigger.clone()).await?;
        info!(path = %path.display(), schema_name = %trigger.schema_name, "trigger submitted");
        Ok(trigger)
    }

    /// Whether a submitted trigger needs no more work.
    ///
    /// A trigger is settled once its rule is active, once the coordinator
    /// refused it, or once the job moving its data has failed.
    pub fn is_settled(&self, trigger: &MigrationTrigger) -> Result<bool, Error> {
        let rule_cache_id = &trigger.rule_cache_id;
        if self.switch.cache().state(rule_cache_id) == Some(RuleCacheState::Active) {
            return Ok(true);
        }
        if self.coordinator.rejection(rule_cache_id).is_some() {
            return Ok(true);
        }
        let failed = self.api.list()?.iter().any(|job| {
            job.rule_cache_id == trigger.rule_cache_id && job.status == JobStatus::Failed
        });
        Ok(failed)
    }

    /// Stop the executors and flush job storage.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.coordinator.stop().await;
        self.db.flush_async().await?;
        info!(events_posted = self.bus.posted(), "orchestrator stopped");
        Ok(())
    }

    /// Job control API.
    pub fn api(&self) -> &Arc<ScalingApi> {
        &self.api
    }

    /// Event bus shared by every component.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Rule cache and active rule registry.
    pub fn switch(&self) -> &RuleSwitch {
        &self.switch
    }

    /// The scaling coordinator.
    pub fn coordinator(&self) -> &Arc<ScalingCoordinator> {
        &self.coordinator
    }
}

fn restage_unfinished(api: &ScalingApi, switch: &RuleSwitch) {
    for (job_id, configuration) in api.unfinished_configurations() {
        let rule_cache_id = configuration.rule_cache_id();
        switch
            .registry()
            .register_initial(configuration.source().clone());
        match switch
            .cache()
            .stage_with_id(rule_cache_id, configuration.target().clone())
        {
            Ok(()) => info!(
                job_id,
                schema_name = %configuration.schema_name(),
                rule_cache_id,
                "target rule of recovered job staged"
            ),
            Err(e) => {
                let reason = format!("cannot stage target rule: {}", e);
                if let Err(e) = api.mark_failed(job_id, &reason) {
                    error!(job_id, error = %e, "cannot fail recovered job");
                }
            }
        }
    }
}
