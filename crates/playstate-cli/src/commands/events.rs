use crate::commands::{format_date, AppContext};
use crate::output::{new_table, Output};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use playstate_core::{EventCriteria, EventQueue};
use playstate_models::EventStatus;
use std::sync::Arc;

fn parse_status(status: &str) -> Result<EventStatus> {
    match status.to_lowercase().as_str() {
        "pending" => Ok(EventStatus::Pending),
        "running" => Ok(EventStatus::Running),
        "success" => Ok(EventStatus::Success),
        "failed" => Ok(EventStatus::Failed),
        "cancelled" => Ok(EventStatus::Cancelled),
        other => Err(eyre!(
            "Unknown status '{}', expected pending, running, success, failed or cancelled",
            other
        )),
    }
}

pub fn run_list(
    ctx: &AppContext,
    status: Option<String>,
    reference: Option<String>,
    limit: usize,
    output: &Output,
) -> Result<()> {
    let mut criteria = EventCriteria::new();
    if let Some(status) = status {
        criteria = criteria.status(parse_status(&status)?);
    }
    if let Some(reference) = reference {
        criteria = criteria.reference(reference);
    }

    let database = ctx.database()?;
    let mut events = database.events.find_all(&criteria, None)?;
    events.truncate(limit);

    let mut table = new_table(vec!["Id", "Event", "Reference", "Status", "Attempts", "Created", "Updated"]);
    for event in &events {
        table.add_row(vec![
            event.id.clone().unwrap_or_default(),
            event.event.clone(),
            event.reference.clone().unwrap_or_default(),
            event.status.to_string(),
            event.attempts.to_string(),
            format_date(Some(event.created_at)),
            format_date(event.updated_at),
        ]);
    }

    output.table(table, &events);
    Ok(())
}

pub fn run_show(ctx: &AppContext, id: &str, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    let event = database
        .events
        .find_by_id(id)?
        .ok_or_else(|| eyre!("Event '{}' not found", id))?;

    let mut table = new_table(vec!["Field", "Value"]);
    table.add_row(vec!["Id".to_string(), id.to_string()]);
    table.add_row(vec!["Event".to_string(), event.event.clone()]);
    table.add_row(vec!["Status".to_string(), event.status.to_string()]);
    table.add_row(vec!["Data".to_string(), event.event_data.to_string()]);
    table.add_row(vec!["Logs".to_string(), event.logs.iter().cloned().collect::<Vec<_>>().join("\n")]);

    output.table(table, &event);
    Ok(())
}

pub fn run_cancel(ctx: &AppContext, id: &str, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    EventQueue::new(Arc::clone(&database.events)).cancel(id)?;
    output.success(format!("Cancelled event {}", id));
    Ok(())
}

/// Delete the newest pending event for a reference
pub fn run_remove(ctx: &AppContext, reference: &str, any_status: bool, output: &Output) -> Result<()> {
    let database = ctx.database()?;

    let removed = if any_status {
        // Newest event whatever its status
        match database.events.find_by_reference(reference, None)? {
            Some(event) => database.events.remove(&event)?,
            None => false,
        }
    } else {
        database.events.remove_by_reference(reference, None)?
    };

    if removed {
        output.success(format!("Removed event for '{}'", reference));
    } else {
        output.warn(format!("No matching event for '{}'", reference));
    }
    Ok(())
}
