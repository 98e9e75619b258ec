//! Reshard server library.
//!
//! This crate runs the migration orchestrator: the in-process event bus, the
//! scaling coordinator that turns triggers into jobs, the background
//! executors that move data and switch rules, and the switcher that applies
//! rule switches.

pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod switcher;
pub mod trigger_file;

pub use bus::{DeliveryReport, DispatcherHandle, EventBus, EventSubscriber};
pub use config::{Args, ExecutorConfig, ServerConfig};
pub use coordinator::{CoordinatorError, ScalingCoordinator, TriggerOutcome};
pub use error::Error;
pub use executor::{ExecutorSet, FinishedCheckJobExecutor, ScalingJobExecutor};
pub use orchestrator::Orchestrator;
pub use switcher::RuleSwitcher;
