//! Server configuration.

use clap::Parser;
use reshard_core::HandleConfiguration;
use std::path::PathBuf;
use std::time::Duration;

/// Default executor poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Default time a job may stay running before it is failed, in seconds.
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;

/// Default capacity of the event dispatch queue.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Background executor settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// How often executors look for work.
    pub poll_interval: Duration,
    /// Running jobs older than this are failed by the watchdog.
    pub job_timeout: Duration,
    /// Per-job worker tuning.
    pub handle: HandleConfiguration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            handle: HandleConfiguration::default(),
        }
    }
}

/// Reshard server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the job state directory.
    pub data_path: PathBuf,

    /// Trigger documents posted at startup.
    pub triggers: Vec<PathBuf>,

    /// Executor settings.
    pub executor: ExecutorConfig,

    /// Capacity of the event dispatch queue.
    pub event_buffer: usize,

    /// Stop after this long even if triggers are unsettled. None runs until
    /// every trigger settles or ctrl-c.
    pub run_for: Option<Duration>,
}

impl ServerConfig {
    /// Create a new server configuration with the given data path.
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            triggers: Vec::new(),
            executor: ExecutorConfig::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
            run_for: None,
        }
    }

    /// Add a trigger document.
    pub fn with_trigger(mut self, path: impl Into<PathBuf>) -> Self {
        self.triggers.push(path.into());
        self
    }

    /// Set the executor poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.executor.poll_interval = interval;
        self
    }

    /// Set the running job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.executor.job_timeout = timeout;
        self
    }

    /// Set how many tables a job synchronizes in parallel.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.executor.handle.concurrency = concurrency.max(1);
        self
    }

    /// Set the number of retries per table.
    pub fn with_retry_times(mut self, retry_times: u32) -> Self {
        self.executor.handle.retry_times = retry_times;
        self
    }

    /// Stop after the given duration.
    pub fn with_run_for(mut self, duration: Duration) -> Self {
        self.run_for = Some(duration);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("./data")
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "reshard-server")]
#[command(version, about = "Reshard online data migration orchestrator", long_about = None)]
pub struct Args {
    /// Path to the job state directory.
    #[arg(short, long, default_value = "./data")]
    pub data_path: PathBuf,

    /// Trigger document to post at startup. May be repeated.
    #[arg(short, long)]
    pub trigger: Vec<PathBuf>,

    /// Executor poll interval in milliseconds.
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Seconds a job may run before the watchdog fails it.
    #[arg(long, default_value_t = DEFAULT_JOB_TIMEOUT_SECS)]
    pub job_timeout_secs: u64,

    /// Tables synchronized in parallel per job.
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,

    /// Retries per table before a job fails.
    #[arg(long, default_value_t = 3)]
    pub retry_times: u32,

    /// Stop after this many seconds (0 = until settled or ctrl-c).
    #[arg(long, default_value_t = 0)]
    pub run_for_secs: u64,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> ServerConfig {
        let run_for = if self.run_for_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.run_for_secs))
        };

        ServerConfig {
            data_path: self.data_path,
            triggers: self.trigger,
            executor: ExecutorConfig {
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
                job_timeout: Duration::from_secs(self.job_timeout_secs),
                handle: HandleConfiguration {
                    concurrency: self.concurrency.max(1),
                    retry_times: self.retry_times,
                },
            },
            event_buffer: DEFAULT_EVENT_BUFFER,
            run_for,
        }
    }
}
