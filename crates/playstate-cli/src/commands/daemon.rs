use crate::commands::AppContext;
use crate::output::Output;
use chrono::Utc;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use playstate_core::TaskScheduler;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Queue whatever is due, runs on the blocking pool since storage is synchronous
async fn tick(scheduler: Arc<TaskScheduler>) {
    let result = tokio::task::spawn_blocking(move || scheduler.tick(Utc::now())).await;

    match result {
        Ok(Ok(queued)) if !queued.is_empty() => {
            info!(operation = "scheduler_tick", queued = queued.len(), "Queued due tasks");
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(operation = "scheduler_tick", error = %e, "Scheduler tick failed"),
        Err(e) => error!(operation = "scheduler_tick", error = %e, "Scheduler tick panicked"),
    }
}

pub async fn run_daemon(ctx: &AppContext, tick_override: Option<String>, no_startup: bool, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    let scheduler = Arc::new(ctx.scheduler(&database));

    let schedule = tick_override.unwrap_or_else(|| ctx.config.daemon.tick.clone());
    let run_on_startup = ctx.config.daemon.run_on_startup && !no_startup;

    if run_on_startup {
        info!(operation = "scheduler_startup", "Running initial scheduler tick");
        tick(Arc::clone(&scheduler)).await;
    }

    let mut sched = JobScheduler::new().await?;
    let job_scheduler = Arc::clone(&scheduler);
    let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
        let scheduler = Arc::clone(&job_scheduler);
        Box::pin(async move {
            tick(scheduler).await;
        })
    })
    .map_err(|e| eyre!("Invalid daemon tick '{}': {}", schedule, e))?;

    sched.add(job).await?;
    sched.start().await?;

    info!(
        operation = "scheduler_started",
        schedule = %schedule,
        tasks = scheduler.tasks().len(),
        "Scheduler started"
    );
    output.info(format!("Daemon running with tick '{}', press Ctrl+C to stop", schedule));

    tokio::signal::ctrl_c().await?;

    info!(operation = "scheduler_stopping", "Shutting down scheduler");
    sched.shutdown().await?;
    Ok(())
}
