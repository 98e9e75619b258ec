//! Integration tests for planning, job tracking and rule switching.

use std::sync::Arc;

use reshard_core::job::TableStatus;
use reshard_core::{
    revise_all, ActiveRuleRegistry, Admission, HandleConfiguration, JobConfiguration, JobStatus,
    MigrationControl, MigrationReason, RuleCache, RuleSwitch, ScalingApi, SwitchOutcome,
    TopologySnapshot, TransactionSchemaGuard,
};
use reshard_proto::{error_codes, MigrationTrigger, SwitchRuleConfiguration};

const SOURCE_DATA_SOURCES: &str = "ds_0: {url: 'jdbc:mysql://127.0.0.1:3306/demo_ds_0'}";
const TARGET_DATA_SOURCES: &str = "ds_0: {url: 'jdbc:mysql://127.0.0.1:3306/demo_ds_0'}\n\
                                   ds_1: {url: 'jdbc:mysql://127.0.0.1:3306/demo_ds_1'}";
const SOURCE_RULES: &str = r#"
- !SHARDING
  tables:
    t_order:
      actualDataNodes: ds_0.t_order_${0..1}
      tableStrategy:
        shardingColumn: order_id
        algorithmExpression: t_order_${order_id % 2}
  broadcastTables: [t_config]
- !SINGLE
  tables: [t_dict]
"#;
const TARGET_RULES: &str = r#"
- !SHARDING
  tables:
    t_order:
      actualDataNodes: ds_${0..1}.t_order_${0..1}
      databaseStrategy:
        shardingColumn: user_id
        algorithmExpression: ds_${user_id % 2}
      tableStrategy:
        shardingColumn: order_id
        algorithmExpression: t_order_${order_id % 2}
  broadcastTables: [t_config]
- !SINGLE
  tables: [t_dict]
"#;

struct TestContext {
    api: ScalingApi,
    switch: RuleSwitch,
    _db: sled::Db,
}

impl TestContext {
    fn new() -> Self {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let api = ScalingApi::open(&db).unwrap();
        let switch = RuleSwitch::new(
            Arc::new(RuleCache::new()),
            Arc::new(ActiveRuleRegistry::new()),
        );
        Self {
            api,
            switch,
            _db: db,
        }
    }

    fn trigger(&self) -> MigrationTrigger {
        MigrationTrigger::new(
            "sharding_db",
            "42",
            SOURCE_DATA_SOURCES,
            SOURCE_RULES,
            TARGET_DATA_SOURCES,
            TARGET_RULES,
        )
    }
}

#[tokio::test]
async fn test_scale_out_lifecycle() {
    let ctx = TestContext::new();
    let trigger = ctx.trigger();
    let configuration =
        JobConfiguration::from_trigger(&trigger, HandleConfiguration::default()).unwrap();

    ctx.switch
        .registry()
        .register_initial(configuration.source().clone());
    ctx.switch
        .cache()
        .stage_with_id("42", configuration.target().clone())
        .unwrap();

    let Admission::JobStarted(job_id) = ctx.api.start(configuration).await.unwrap() else {
        panic!("expected a job");
    };

    // t_order moves to ds_1 and t_config is broadcast to it; t_dict stays put.
    let plan = ctx.api.job_plan(job_id).unwrap();
    let tables: Vec<&str> = plan.tables().iter().map(|t| t.logic_table.as_str()).collect();
    assert_eq!(tables, vec!["t_config", "t_order"]);
    let order = plan.table("t_order").unwrap();
    assert!(order.reasons.contains(&MigrationReason::DataNodesChanged));
    assert!(order.reasons.contains(&MigrationReason::StrategyChanged));
    assert!(plan.table("t_dict").is_none());

    ctx.api.mark_running(job_id).unwrap();
    for table in tables {
        ctx.api
            .record_table_progress(job_id, table, |t| {
                t.start_attempt();
                t.complete(10);
            })
            .unwrap();
    }
    let state = ctx.api.mark_succeeded(job_id).unwrap();
    assert!(state.tables.iter().all(|t| t.status == TableStatus::Complete));

    let outcome = ctx
        .switch
        .apply(&SwitchRuleConfiguration::new("sharding_db", "42"))
        .unwrap();
    assert_eq!(outcome, SwitchOutcome::Activated { version: 2 });
    ctx.api.mark_switched(job_id).unwrap();
    assert_eq!(ctx.api.status(job_id).unwrap().status, JobStatus::Switched);

    // Metadata loaded from ds_1 now surfaces under logic names.
    let active = ctx.switch.registry().current("sharding_db").unwrap();
    let rules = active.snapshot.build_rules().unwrap();
    assert_eq!(revise_all("t_order_1", "ds_1", &rules), "t_order");
    assert_eq!(revise_all("t_dict", "ds_0", &rules), "t_dict");
}

#[tokio::test]
async fn test_failed_switch_keeps_previous_rule() {
    let ctx = TestContext::new();
    let source = TopologySnapshot::build("sharding_db", SOURCE_DATA_SOURCES, SOURCE_RULES).unwrap();
    let fingerprint = source.fingerprint().unwrap();
    ctx.switch.registry().register_initial(source);

    assert!(ctx
        .switch
        .apply(&SwitchRuleConfiguration::new("sharding_db", "missing"))
        .is_err());

    let active = ctx.switch.registry().current("sharding_db").unwrap();
    assert_eq!(active.version, 1);
    assert_eq!(active.snapshot.fingerprint().unwrap(), fingerprint);
}

#[test]
fn test_cross_schema_transaction_error_code() {
    let mut guard = TransactionSchemaGuard::new();
    guard.begin();
    guard.check("sharding_db").unwrap();
    let err = guard.check("other_db").unwrap_err();

    let report = err.report();
    assert_eq!(report.vendor_code, error_codes::TRANSACTION_ACROSS_SCHEMAS);
    assert_eq!(report.sql_state, "25000");

    guard.rollback();
    assert!(guard.check("other_db").is_ok());
}
