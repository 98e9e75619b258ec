//! Executor that switches rules for finished jobs.
//!
//! Also acts as the watchdog: jobs running longer than the configured
//! timeout are failed instead of being left running forever.

use std::sync::Arc;

use tracing::{error, info, warn};

use reshard_core::job::current_timestamp;
use reshard_core::{JobState, ScalingApi};
use reshard_proto::SwitchRuleConfiguration;

use super::Poller;
use crate::bus::EventBus;
use crate::config::ExecutorConfig;

/// Posts switch events for succeeded jobs and fails stuck ones.
pub struct FinishedCheckJobExecutor {
    api: Arc<ScalingApi>,
    bus: Arc<EventBus>,
    config: ExecutorConfig,
    poller: Poller,
}

impl FinishedCheckJobExecutor {
    /// Create a new executor.
    pub fn new(api: Arc<ScalingApi>, bus: Arc<EventBus>, config: ExecutorConfig) -> Arc<Self> {
        Arc::new(Self {
            api,
            bus,
            config,
            poller: Poller::new("finished-check"),
        })
    }

    /// Start polling. Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let this = Arc::clone(self);
        self.poller.start(self.config.poll_interval, move || {
            let this = Arc::clone(&this);
            async move {
                this.run_once().await;
            }
        })
    }

    /// Stop polling and wait for the current pass to finish.
    pub async fn stop(&self) {
        self.poller.stop().await;
    }

    /// Whether the polling loop is running.
    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    /// Fail timed out jobs, then switch every succeeded job.
    ///
    /// Returns how many jobs were switched.
    pub async fn run_once(&self) -> usize {
        self.check_timeouts();

        let succeeded = match self.api.succeeded_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "cannot list succeeded jobs");
                return 0;
            }
        };

        let mut switched = 0;
        for job in succeeded {
            if self.switch(&job).await {
                switched += 1;
            }
        }
        switched
    }

    fn check_timeouts(&self) {
        let running = match self.api.running_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "cannot list running jobs");
                return;
            }
        };

        let now = current_timestamp();
        let timeout = self.config.job_timeout.as_micros() as u64;
        for job in running {
            let Some(elapsed) = job.running_for(now) else {
                continue;
            };
            if elapsed > timeout {
                let reason = format!(
                    "timed out after {}ms",
                    self.config.job_timeout.as_millis()
                );
                if let Err(e) = self.api.mark_failed(job.job_id, &reason) {
                    warn!(job_id = job.job_id, error = %e, "cannot fail timed out job");
                }
            }
        }
    }

    async fn switch(&self, job: &JobState) -> bool {
        let event = SwitchRuleConfiguration::new(&job.schema_name, &job.rule_cache_id);
        let report = self.bus.post(event.into()).await;

        if !report.is_success() {
            let reasons: Vec<String> = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.subscriber, f.error))
                .collect();
            if let Err(e) = self
                .api
                .mark_failed(job.job_id, &format!("rule switch rejected: {}", reasons.join("; ")))
            {
                error!(job_id = job.job_id, error = %e, "cannot fail job after rejected switch");
            }
            return false;
        }

        if !report.reached_anyone() {
            warn!(
                job_id = job.job_id,
                schema_name = %job.schema_name,
                rule_cache_id = %job.rule_cache_id,
                "no subscriber applied the switch, retrying on next pass"
            );
            return false;
        }

        match self.api.mark_switched(job.job_id) {
            Ok(_) => {
                info!(
                    job_id = job.job_id,
                    schema_name = %job.schema_name,
                    rule_cache_id = %job.rule_cache_id,
                    "scaling job switched"
                );
                true
            }
            Err(e) => {
                error!(job_id = job.job_id, error = %e, "cannot mark job switched");
                false
            }
        }
    }
}
