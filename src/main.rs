use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

mod app;
mod config;
mod db;
mod distance;
mod input;
mod logger;
mod metrics;
mod monitor;
mod sink;
mod status;
mod supabase;
mod tasks;

use crate::app::{build_sink, AppState};
use crate::config::Config;
use crate::status::report_status_periodically;
use crate::tasks::metrics::{collect_until_shutdown, FlushScheduler};
use crate::tasks::monitor::refresh_monitors_periodically;

fn main() -> Result<()> {
    let config = Config::load()?;
    let log_path = logger::init(&config.logging)?;
    log::info!("Starting input tally...");

    if let Some(path) = &log_path {
        if std::env::var_os("INPUT_TALLY_OPEN_LOG").is_some() {
            if let Err(e) = logger::open_log_file(path) {
                log::warn!("{:#}", e);
            }
        }
    }

    let rt = Runtime::new()?;
    let result = rt.block_on(run(config));
    if let Err(e) = &result {
        log::error!("input tally stopped: {:#}", e);
    }
    result
}

async fn run(config: Config) -> Result<()> {
    let sink = build_sink(&config).await?;
    let state = AppState::initialize(&config, sink.as_ref()).await?;

    let scheduler = Arc::new(
        FlushScheduler::new(Arc::clone(&state), sink, config.flush_interval())
            .skip_empty(config.flush.skip_empty),
    );

    if config.monitors.is_empty() {
        tokio::spawn(refresh_monitors_periodically(
            Arc::clone(&state),
            Duration::from_secs(config.display.refresh_interval_secs.max(1)),
        ));
    }
    tokio::spawn(report_status_periodically(
        Arc::clone(&state),
        config.display.unit,
        Duration::from_secs(config.display.status_interval_secs.max(1)),
    ));

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Shutting down");
        Ok::<(), anyhow::Error>(())
    };
    collect_until_shutdown(state, scheduler, input::source_for(&config.input), shutdown).await
}
