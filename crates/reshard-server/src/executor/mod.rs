//! Background job executors.
//!
//! Two polling loops drive admitted jobs to completion:
//! [`ScalingJobExecutor`] copies data for pending jobs and
//! [`FinishedCheckJobExecutor`] switches rules for succeeded jobs and fails
//! jobs that run too long.

pub mod finished_check;
pub mod scaling;

pub use finished_check::FinishedCheckJobExecutor;
pub use scaling::ScalingJobExecutor;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reshard_core::{DataSynchronizer, ScalingApi};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::bus::EventBus;
use crate::config::ExecutorConfig;

/// A periodic task with a shutdown signal.
pub(crate) struct Poller {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub(crate) fn new(name: &'static str) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            name,
            shutdown,
            handle: Mutex::new(None),
        }
    }

    /// Spawn the loop. Returns false if it is already running.
    pub(crate) fn start<F, Fut>(&self, interval: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return false;
        }

        let mut shutdown = self.shutdown.subscribe();
        let name = self.name;
        *handle = Some(tokio::spawn(async move {
            info!(executor = name, "executor started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
            info!(executor = name, "executor stopped");
        }));
        true
    }

    /// Signal the loop and wait for it to finish its current tick.
    pub(crate) async fn stop(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = self.shutdown.send(true);
            if let Err(e) = handle.await {
                error!(executor = self.name, error = %e, "executor task panicked");
            }
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

/// The two executors owned by the coordinator.
pub struct ExecutorSet {
    /// Copies data for pending jobs.
    pub scaling: Arc<ScalingJobExecutor>,
    /// Switches rules for finished jobs.
    pub finished_check: Arc<FinishedCheckJobExecutor>,
}

impl ExecutorSet {
    /// Build both executors over shared state.
    pub fn new(
        api: Arc<ScalingApi>,
        bus: Arc<EventBus>,
        synchronizer: Arc<dyn DataSynchronizer>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            scaling: ScalingJobExecutor::new(Arc::clone(&api), synchronizer, config),
            finished_check: FinishedCheckJobExecutor::new(api, bus, config),
        }
    }

    /// Start both executors. Returns false if they were already running.
    pub fn start(&self) -> bool {
        let scaling = self.scaling.start();
        let finished = self.finished_check.start();
        scaling || finished
    }

    /// Stop both executors and wait for them.
    pub async fn stop(&self) {
        self.scaling.stop().await;
        self.finished_check.stop().await;
    }

    /// Whether either executor is running.
    pub fn is_running(&self) -> bool {
        self.scaling.is_running() || self.finished_check.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poller_start_stop() {
        let poller = Poller::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        assert!(poller.start(Duration::from_millis(5), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        assert!(!poller.start(Duration::from_millis(5), || async {}));
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_millis(30)).await;
        poller.stop().await;
        assert!(!poller.is_running());

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
