mod cli;
mod config;
mod error;
mod fault;
mod logging;
mod poller;
mod rate_limit;
mod scheduler;
mod service;
mod simulation;
mod state_machine;
mod store;
mod ui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use config::{ConfigUpdate, ServiceConfig};
use fault::{FaultPolicy, RandomFaults};
use service::JobService;
use simulation::SessionPlan;
use ui::SessionProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = ServiceConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            free,
            premium,
            identity,
            seed,
            tick_ms,
            duration_ms,
            error_rate,
            worker_failure_rate,
            no_cancel,
            json,
        } => {
            let faults: Arc<dyn FaultPolicy> = match seed {
                Some(seed) => Arc::new(RandomFaults::from_seed(seed)),
                None => Arc::new(RandomFaults::from_entropy()),
            };
            let svc = Arc::new(JobService::new(config, faults));
            svc.set_config(&ConfigUpdate {
                processing_duration_base_ms: duration_ms,
                error_rate,
                ..Default::default()
            })?;

            let plan = SessionPlan {
                free_jobs: free,
                premium_jobs: premium,
                identity,
                tick: Duration::from_millis(tick_ms.max(1)),
                worker_failure_rate,
                cancel_first_free: !no_cancel,
                seed: seed.unwrap_or_else(rand::random),
            };

            let progress = SessionProgress::new();
            let report = simulation::run_session(svc, &plan, &progress).await?;
            if json {
                progress.print_json(&report)?;
            } else {
                progress.print_report(&report);
            }
        }
        Command::Config => {
            ui::print_config(&config::ConfigHandle::new(config).snapshot())?;
        }
    }

    Ok(())
}
