//! Reshard server - online data-migration orchestrator.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reshard_core::DryRunSynchronizer;
use reshard_server::{Args, Orchestrator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reshard_server=info,reshard_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        event_format_version = reshard_proto::EVENT_FORMAT_VERSION,
        "starting reshard server"
    );

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        data_path = %config.data_path.display(),
        triggers = config.triggers.len(),
        poll_interval_ms = config.executor.poll_interval.as_millis() as u64,
        job_timeout_secs = config.executor.job_timeout.as_secs(),
        concurrency = config.executor.handle.concurrency,
        retry_times = config.executor.handle.retry_times,
        "configuration loaded"
    );

    let orchestrator = Orchestrator::open(&config, Arc::new(DryRunSynchronizer)).await?;
    orchestrator.start().await;

    let mut submitted = Vec::with_capacity(config.triggers.len());
    for path in &config.triggers {
        match orchestrator.submit_file(path).await {
            Ok(trigger) => submitted.push(trigger),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load trigger");
            }
        }
    }

    let settled = async {
        if submitted.is_empty() {
            return std::future::pending::<()>().await;
        }
        let mut ticker = tokio::time::interval(config.executor.poll_interval);
        loop {
            ticker.tick().await;
            let mut all_settled = true;
            for trigger in &submitted {
                match orchestrator.is_settled(trigger) {
                    Ok(true) => {}
                    Ok(false) => all_settled = false,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read job state");
                        all_settled = false;
                    }
                }
            }
            if all_settled {
                tracing::info!(triggers = submitted.len(), "all triggers settled");
                return;
            }
        }
    };

    let deadline = async {
        match config.run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
            }
            tracing::info!("received shutdown signal");
        }
        _ = deadline => {
            tracing::info!("run duration elapsed");
        }
        _ = settled => {}
    }

    orchestrator.shutdown().await?;
    tracing::info!("server shutdown complete");
    Ok(())
}
