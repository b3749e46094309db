use crate::commands::{format_date, AppContext};
use crate::output::{new_table, Output};
use chrono::Utc;
use color_eyre::Result;
use playstate_core::SchedulerError;

pub fn run_list(ctx: &AppContext, all: bool, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    let scheduler = ctx.scheduler(&database);
    let views = scheduler.list(all)?;

    let mut table = new_table(vec!["Name", "Enabled", "Timer", "Next run", "Previous run", "Queued", "Command"]);
    for view in &views {
        table.add_row(vec![
            view.task.name.clone(),
            if view.task.enabled { "yes" } else { "no" }.to_string(),
            view.task.timer.clone(),
            format_date(view.next_run),
            format_date(view.prev_run),
            if view.queued { "yes" } else { "no" }.to_string(),
            format!("{} {}", view.task.command, view.task.args),
        ]);
    }

    output.table(table, &views);
    Ok(())
}

pub fn run_show(ctx: &AppContext, name: &str, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    let view = ctx.scheduler(&database).view(name)?;

    let mut table = new_table(vec!["Field", "Value"]);
    table.add_row(vec!["Name".to_string(), view.task.name.clone()]);
    table.add_row(vec!["Description".to_string(), view.task.description.clone()]);
    table.add_row(vec!["Enabled".to_string(), view.task.enabled.to_string()]);
    table.add_row(vec!["Timer".to_string(), view.task.timer.clone()]);
    table.add_row(vec!["Next run".to_string(), format_date(view.next_run)]);
    table.add_row(vec!["Previous run".to_string(), format_date(view.prev_run)]);
    table.add_row(vec!["Queued".to_string(), view.queued.to_string()]);
    table.add_row(vec!["Command".to_string(), format!("{} {}", view.task.command, view.task.args)]);

    output.table(table, &view);
    Ok(())
}

pub fn run_queue(ctx: &AppContext, name: &str, output: &Output) -> Result<()> {
    let database = ctx.database()?;

    match ctx.scheduler(&database).queue(name) {
        Ok(event) => {
            output.success(format!(
                "Queued task '{}' as event {}",
                name,
                event.id.as_deref().unwrap_or("-")
            ));
            Ok(())
        }
        Err(SchedulerError::AlreadyQueued(_)) => {
            output.warn(format!("Task '{}' is already queued", name));
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn run_cancel(ctx: &AppContext, name: &str, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    ctx.scheduler(&database).cancel(name)?;
    output.success(format!("Cancelled queued task '{}'", name));
    Ok(())
}

/// One scheduler pass outside the daemon
pub fn run_tick(ctx: &AppContext, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    let queued = ctx.scheduler(&database).tick(Utc::now())?;

    if queued.is_empty() {
        output.info("No tasks are due");
    }
    for event in &queued {
        output.success(format!(
            "Queued {} ({})",
            event.reference.as_deref().unwrap_or("-"),
            event.id.as_deref().unwrap_or("-")
        ));
    }
    Ok(())
}
