//! Integration tests for trigger handling, job execution and rule switching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use reshard_core::job::TableStatus;
use reshard_core::{
    ActiveRuleRegistry, Admission, DataSynchronizer, DryRunSynchronizer, HandleConfiguration,
    JobConfiguration, JobStatus, RuleCache, RuleCacheState, RuleSwitch, ScalingApi, ScalingError,
    SyncError, SyncReport, TableMigration, WorkflowConfiguration,
};
use reshard_proto::MigrationTrigger;
use reshard_server::executor::{FinishedCheckJobExecutor, ScalingJobExecutor};
use reshard_server::trigger_file::stage_trigger;
use reshard_server::{
    CoordinatorError, EventBus, ExecutorConfig, Orchestrator, RuleSwitcher, ScalingCoordinator,
    ServerConfig, TriggerOutcome,
};

const ONE_SOURCE: &str = "ds_0: {url: 'jdbc:mysql://127.0.0.1:3306/demo_ds_0'}";
const TWO_SOURCES: &str = "ds_0: {url: 'jdbc:mysql://127.0.0.1:3306/demo_ds_0'}\n\
                           ds_1: {url: 'jdbc:mysql://127.0.0.1:3306/demo_ds_1'}";
const ON_ONE: &str = "- !SHARDING\n  tables:\n    t_order:\n      actualDataNodes: ds_0.t_order_${0..1}\n    t_order_item:\n      actualDataNodes: ds_0.t_order_item_${0..1}\n";
const ON_TWO: &str = "- !SHARDING\n  tables:\n    t_order:\n      actualDataNodes: ds_${0..1}.t_order_${0..1}\n    t_order_item:\n      actualDataNodes: ds_${0..1}.t_order_item_${0..1}\n";

/// Fails the first `failures` attempts of every table.
struct FlakySynchronizer {
    failures: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl FlakySynchronizer {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: Mutex::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl DataSynchronizer for FlakySynchronizer {
    async fn synchronize(
        &self,
        _workflow: &WorkflowConfiguration,
        table: &TableMigration,
    ) -> Result<SyncReport, SyncError> {
        let attempt = {
            let mut attempts = self.attempts.lock();
            let count = attempts.entry(table.logic_table.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= self.failures {
            return Err(SyncError::DataSourceUnavailable("ds_1".to_string()));
        }
        Ok(SyncReport { rows_copied: 100 })
    }
}

/// Takes `delay` per table and counts calls.
struct SlowSynchronizer {
    delay: Duration,
    calls: AtomicUsize,
}

impl SlowSynchronizer {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DataSynchronizer for SlowSynchronizer {
    async fn synchronize(
        &self,
        _workflow: &WorkflowConfiguration,
        _table: &TableMigration,
    ) -> Result<SyncReport, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(SyncReport { rows_copied: 10 })
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

struct TestContext {
    api: Arc<ScalingApi>,
    bus: Arc<EventBus>,
    switch: RuleSwitch,
    _db: sled::Db,
}

impl TestContext {
    async fn new() -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let api = Arc::new(ScalingApi::open(&db).unwrap());
        let bus = Arc::new(EventBus::new());
        let switch = RuleSwitch::new(
            Arc::new(RuleCache::new()),
            Arc::new(ActiveRuleRegistry::new()),
        );
        bus.subscribe(Arc::new(RuleSwitcher::new(switch.clone()))).await;
        Self {
            api,
            bus,
            switch,
            _db: db,
        }
    }

    fn coordinator(&self, handle: HandleConfiguration) -> ScalingCoordinator {
        ScalingCoordinator::new(self.api.clone(), Arc::clone(&self.bus), handle)
    }

    fn stage(
        &self,
        id: &str,
        source_rule: &str,
        target_data_source: &str,
        target_rule: &str,
    ) -> MigrationTrigger {
        let trigger = MigrationTrigger::new(
            "sharding_db",
            id,
            ONE_SOURCE,
            source_rule,
            target_data_source,
            target_rule,
        );
        stage_trigger(trigger, &self.switch).unwrap()
    }

    fn executors(
        &self,
        synchronizer: Arc<dyn DataSynchronizer>,
        config: ExecutorConfig,
    ) -> (Arc<ScalingJobExecutor>, Arc<FinishedCheckJobExecutor>) {
        (
            ScalingJobExecutor::new(self.api.clone(), synchronizer, config),
            FinishedCheckJobExecutor::new(self.api.clone(), Arc::clone(&self.bus), config),
        )
    }
}

#[tokio::test]
async fn test_unchanged_topology_switches_immediately() {
    let ctx = TestContext::new().await;
    let trigger = ctx.stage("42", ON_ONE, ONE_SOURCE, ON_ONE);
    let coordinator = ctx.coordinator(HandleConfiguration::default());

    let outcome = coordinator.on_trigger(&trigger).await.unwrap();
    assert_eq!(outcome, TriggerOutcome::Switched);

    assert_eq!(ctx.switch.cache().state("42"), Some(RuleCacheState::Active));
    let active = ctx.switch.registry().current("sharding_db").unwrap();
    assert_eq!(active.rule_cache_id.as_deref(), Some("42"));
    assert_eq!(active.version, 2);
    assert!(ctx.api.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_data_source_only_change_switches_without_job() {
    let ctx = TestContext::new().await;
    let trigger = ctx.stage("42", "", TWO_SOURCES, "");
    let coordinator = ctx.coordinator(HandleConfiguration::default());

    assert_eq!(
        coordinator.on_trigger(&trigger).await.unwrap(),
        TriggerOutcome::Switched
    );
    let active = ctx.switch.registry().current("sharding_db").unwrap();
    assert_eq!(active.snapshot.data_source_names(), vec!["ds_0", "ds_1"]);
}

#[tokio::test]
async fn test_job_runs_with_retries_then_switches() {
    let ctx = TestContext::new().await;
    let trigger = ctx.stage("42", ON_ONE, TWO_SOURCES, ON_TWO);
    let handle = HandleConfiguration {
        concurrency: 2,
        retry_times: 2,
    };
    let coordinator = ctx.coordinator(handle);

    let TriggerOutcome::JobStarted(job_id) = coordinator.on_trigger(&trigger).await.unwrap() else {
        panic!("expected a job");
    };
    assert_eq!(ctx.switch.cache().state("42"), Some(RuleCacheState::Pending));
    assert_eq!(ctx.switch.registry().current("sharding_db").unwrap().version, 1);

    let (scaling, finished) = ctx.executors(FlakySynchronizer::new(2), ExecutorConfig::default());
    assert_eq!(scaling.run_once().await, 1);

    let state = ctx.api.status(job_id).unwrap();
    assert_eq!(state.status, JobStatus::Succeeded);
    assert_eq!(state.tables.len(), 2);
    for table in &state.tables {
        assert_eq!(table.status, TableStatus::Complete);
        assert_eq!(table.attempts, 3);
        assert_eq!(table.rows_copied, 100);
    }

    assert_eq!(finished.run_once().await, 1);
    assert_eq!(ctx.api.status(job_id).unwrap().status, JobStatus::Switched);
    let active = ctx.switch.registry().current("sharding_db").unwrap();
    assert_eq!(active.rule_cache_id.as_deref(), Some("42"));
    assert_eq!(active.snapshot.data_sources().len(), 2);
    assert!(ctx.switch.cache().get("42").unwrap().snapshot.is_none());

    // Nothing left to do.
    assert_eq!(scaling.run_once().await, 0);
    assert_eq!(finished.run_once().await, 0);
}

#[tokio::test]
async fn test_exhausted_retries_fail_job_and_keep_rule() {
    let ctx = TestContext::new().await;
    let trigger = ctx.stage("42", ON_ONE, TWO_SOURCES, ON_TWO);
    let handle = HandleConfiguration {
        concurrency: 1,
        retry_times: 1,
    };
    let coordinator = ctx.coordinator(handle);
    let TriggerOutcome::JobStarted(job_id) = coordinator.on_trigger(&trigger).await.unwrap() else {
        panic!("expected a job");
    };

    let (scaling, finished) = ctx.executors(FlakySynchronizer::new(5), ExecutorConfig::default());
    scaling.run_once().await;

    let state = ctx.api.status(job_id).unwrap();
    assert_eq!(state.status, JobStatus::Failed);
    assert!(state.error.unwrap().contains("ds_1"));
    assert!(state.tables.iter().all(|t| t.status == TableStatus::Failed && t.attempts == 2));

    assert_eq!(finished.run_once().await, 0);
    assert_eq!(ctx.switch.cache().state("42"), Some(RuleCacheState::Pending));
    assert!(ctx.switch.registry().current("sharding_db").unwrap().rule_cache_id.is_none());
}

#[tokio::test]
async fn test_second_trigger_for_busy_schema_is_refused() {
    let ctx = TestContext::new().await;
    let coordinator = ctx
        .coordinator(HandleConfiguration::default())
        .with_rule_cache(Arc::clone(ctx.switch.cache()));
    let first = ctx.stage("1", ON_ONE, TWO_SOURCES, ON_TWO);
    let second = ctx.stage("2", ON_ONE, ONE_SOURCE, ON_ONE);

    assert!(matches!(
        coordinator.on_trigger(&first).await.unwrap(),
        TriggerOutcome::JobStarted(_)
    ));
    let err = coordinator.on_trigger(&second).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::JobAdmission(ScalingError::MigrationInProgress { .. })
    ));
    assert_eq!(ctx.switch.cache().state("1"), Some(RuleCacheState::Pending));
    assert_eq!(ctx.switch.cache().state("2"), None);
    assert!(coordinator.rejection("2").is_some());
    assert!(coordinator.rejection("1").is_none());
}

#[tokio::test]
async fn test_watchdog_fails_stuck_job() {
    let ctx = TestContext::new().await;
    let trigger = ctx.stage("42", ON_ONE, TWO_SOURCES, ON_TWO);
    let coordinator = ctx.coordinator(HandleConfiguration::default());
    let TriggerOutcome::JobStarted(job_id) = coordinator.on_trigger(&trigger).await.unwrap() else {
        panic!("expected a job");
    };

    // A worker claimed the job and never came back.
    ctx.api.mark_running(job_id).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let config = ExecutorConfig {
        job_timeout: Duration::from_millis(1),
        ..ExecutorConfig::default()
    };
    let (_, finished) = ctx.executors(Arc::new(DryRunSynchronizer), config);
    assert_eq!(finished.run_once().await, 0);

    let state = ctx.api.status(job_id).unwrap();
    assert_eq!(state.status, JobStatus::Failed);
    assert!(state.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_watchdog_stops_copy_in_flight() {
    let ctx = TestContext::new().await;
    let trigger = ctx.stage("42", ON_ONE, TWO_SOURCES, ON_TWO);
    let handle = HandleConfiguration {
        concurrency: 1,
        retry_times: 0,
    };
    let coordinator = ctx.coordinator(handle);
    let TriggerOutcome::JobStarted(job_id) = coordinator.on_trigger(&trigger).await.unwrap() else {
        panic!("expected a job");
    };

    let synchronizer = SlowSynchronizer::new(Duration::from_millis(200));
    let config = ExecutorConfig {
        job_timeout: Duration::from_millis(1),
        ..ExecutorConfig::default()
    };
    let (scaling, finished) = ctx.executors(synchronizer.clone(), config);
    let copy = tokio::spawn(async move { scaling.run_once().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(ctx.api.status(job_id).unwrap().status, JobStatus::Running);
    finished.run_once().await;
    assert_eq!(copy.await.unwrap(), 1);

    let state = ctx.api.status(job_id).unwrap();
    assert_eq!(state.status, JobStatus::Failed);
    assert!(state.error.unwrap().contains("timed out"));
    assert!(state.tables.iter().all(|t| t.status != TableStatus::Complete));
    assert_eq!(synchronizer.calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.switch.cache().state("42"), Some(RuleCacheState::Pending));
}

#[tokio::test]
async fn test_jobs_of_different_schemas_run_side_by_side() {
    let ctx = TestContext::new().await;
    let coordinator = ctx.coordinator(HandleConfiguration {
        concurrency: 1,
        retry_times: 0,
    });
    for schema in ["db_a", "db_b"] {
        let trigger =
            MigrationTrigger::new(schema, schema, ONE_SOURCE, ON_ONE, TWO_SOURCES, ON_TWO);
        let trigger = stage_trigger(trigger, &ctx.switch).unwrap();
        coordinator.on_trigger(&trigger).await.unwrap();
    }

    let synchronizer = SlowSynchronizer::new(Duration::from_millis(100));
    let (scaling, _) = ctx.executors(synchronizer.clone(), ExecutorConfig::default());
    let started = std::time::Instant::now();
    assert_eq!(scaling.run_once().await, 2);

    // Two tables per job, one at a time within a job.
    assert!(started.elapsed() < Duration::from_millis(390));
    assert_eq!(synchronizer.calls.load(Ordering::SeqCst), 4);
    assert!(ctx
        .api
        .list()
        .unwrap()
        .iter()
        .all(|job| job.status == JobStatus::Succeeded));
}

#[tokio::test]
async fn test_recovered_job_switches_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = sled::open(dir.path()).unwrap();
        let api = ScalingApi::open(&db).unwrap();
        let trigger =
            MigrationTrigger::new("sharding_db", "42", ONE_SOURCE, ON_ONE, TWO_SOURCES, ON_TWO);
        let configuration =
            JobConfiguration::from_trigger(&trigger, HandleConfiguration::default()).unwrap();
        assert_eq!(api.admit(configuration).unwrap(), Admission::JobStarted(1));
        api.mark_running(1).unwrap();
        db.flush().unwrap();
    }

    let config = ServerConfig::new(dir.path()).with_poll_interval(Duration::from_millis(10));
    let orchestrator = Orchestrator::open(&config, Arc::new(DryRunSynchronizer))
        .await
        .unwrap();
    assert_eq!(
        orchestrator.switch().cache().state("42"),
        Some(RuleCacheState::Pending)
    );
    let before = orchestrator.switch().registry().current("sharding_db").unwrap();
    assert_eq!(before.version, 1);
    assert_eq!(before.snapshot.data_sources().len(), 1);

    assert!(orchestrator.start().await);
    let api = Arc::clone(orchestrator.api());
    wait_until(|| api.status(1).unwrap().is_terminal()).await;

    let state = api.status(1).unwrap();
    assert_eq!(state.status, JobStatus::Switched, "{:?}", state.error);
    let active = orchestrator.switch().registry().current("sharding_db").unwrap();
    assert_eq!(active.rule_cache_id.as_deref(), Some("42"));
    assert_eq!(active.version, 2);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_refused_trigger_settles() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new(dir.path()).with_poll_interval(Duration::from_millis(10));
    let synchronizer = SlowSynchronizer::new(Duration::from_millis(100));
    let orchestrator = Orchestrator::open(&config, synchronizer).await.unwrap();
    assert!(orchestrator.start().await);

    let mut triggers = Vec::new();
    for id in ["1", "2"] {
        let trigger =
            MigrationTrigger::new("sharding_db", id, ONE_SOURCE, ON_ONE, TWO_SOURCES, ON_TWO);
        triggers.push(orchestrator.submit(trigger).await.unwrap());
    }

    wait_until(|| {
        triggers
            .iter()
            .all(|trigger| orchestrator.is_settled(trigger).unwrap())
    })
    .await;

    let refused: Vec<_> = triggers
        .iter()
        .filter_map(|t| orchestrator.coordinator().rejection(&t.rule_cache_id).map(|r| (t, r)))
        .collect();
    assert_eq!(refused.len(), 1);
    let (trigger, reason) = &refused[0];
    assert!(reason.contains("migration already in progress"));
    assert_eq!(orchestrator.switch().cache().state(&trigger.rule_cache_id), None);

    let jobs = orchestrator.api().list().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_ne!(jobs[0].rule_cache_id, trigger.rule_cache_id);
    orchestrator.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_orchestrator_settles_submitted_triggers() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new(dir.path()).with_poll_interval(Duration::from_millis(10));
    let orchestrator = Orchestrator::open(&config, Arc::new(DryRunSynchronizer))
        .await
        .unwrap();
    assert!(orchestrator.start().await);
    assert!(!orchestrator.start().await);

    let scale_out = orchestrator
        .submit(MigrationTrigger::new(
            "sharding_db",
            "",
            ONE_SOURCE,
            ON_ONE,
            TWO_SOURCES,
            ON_TWO,
        ))
        .await
        .unwrap();
    let renamed = orchestrator
        .submit(MigrationTrigger::new("other_db", "7", ONE_SOURCE, "", ONE_SOURCE, ""))
        .await
        .unwrap();
    assert!(!scale_out.rule_cache_id.is_empty());

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let settled = orchestrator.is_settled(&scale_out).unwrap()
                && orchestrator.is_settled(&renamed).unwrap();
            let jobs_done = orchestrator
                .api()
                .list()
                .unwrap()
                .iter()
                .all(|job| job.is_terminal());
            if settled && jobs_done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let jobs = orchestrator.api().list().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Switched);
    assert_eq!(jobs[0].rule_cache_id, scale_out.rule_cache_id);

    let registry = orchestrator.switch().registry();
    assert_eq!(registry.current("sharding_db").unwrap().version, 2);
    assert_eq!(registry.current("other_db").unwrap().version, 2);

    orchestrator.shutdown().await.unwrap();
    assert!(!orchestrator.coordinator().is_running());
}
