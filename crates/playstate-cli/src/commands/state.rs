use crate::commands::AppContext;
use crate::output::{new_table, Output};
use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use playstate_core::{AddOutcome, ExportMapper, ImportMapper, ImportOptions, MapperOptions, MemoryMapper, StateStorage};
use playstate_models::Entity;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const EXPORT_DIRECTION: &str = "export";

fn read_entities(file: &Path) -> Result<Vec<Value>> {
    let content = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("Failed to read {}", file.display()))?;

    match serde_json::from_str::<Value>(&content)? {
        Value::Array(items) => Ok(items),
        _ => Err(eyre!("{} must contain a JSON array of items", file.display())),
    }
}

/// Feed backend reported items from a file through the import mapper
pub fn run_import(
    ctx: &AppContext,
    file: &Path,
    after: Option<DateTime<Utc>>,
    metadata_only: bool,
    dry_run: bool,
    output: &Output,
) -> Result<()> {
    let database = ctx.database()?;
    let mut mapper = MemoryMapper::new(Arc::clone(&database.storage));
    mapper.set_up(MapperOptions {
        priority: ctx.config.mapper.priority(),
        dry_run,
    });

    let since = if ctx.config.mapper.lazy_load { after } else { None };
    mapper.load_data(since)?;

    let options = ImportOptions { after, metadata_only };
    let mut invalid = 0;
    for (idx, raw) in read_entities(file)?.into_iter().enumerate() {
        let entity = match Entity::from_value(raw) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(item = idx, error = %e, "Skipping unreadable item");
                invalid += 1;
                continue;
            }
        };

        if let AddOutcome::Rejected(reason) = mapper.add(entity, &options) {
            warn!(item = idx, reason = %reason, "Item rejected");
        }
    }

    let report = mapper.commit()?;
    info!(
        operation = "state_import",
        added = report.added(),
        updated = report.updated(),
        failed = report.failed(),
        rejected = mapper.rejected_count(),
        dry_run = dry_run,
        "Import finished"
    );

    let mut table = new_table(vec!["Type", "Added", "Updated", "Failed"]);
    table.add_row(vec![
        "movie".to_string(),
        report.movie.added.to_string(),
        report.movie.updated.to_string(),
        report.movie.failed.to_string(),
    ]);
    table.add_row(vec![
        "episode".to_string(),
        report.episode.added.to_string(),
        report.episode.updated.to_string(),
        report.episode.failed.to_string(),
    ]);

    output.table(
        table,
        &json!({ "report": report, "rejected": mapper.rejected_count(), "invalid": invalid, "dry_run": dry_run }),
    );
    if mapper.rejected_count() + invalid > 0 {
        output.warn(format!("{} items rejected, {} unreadable", mapper.rejected_count(), invalid));
    }
    Ok(())
}

/// Show what an export to `backend` would push
pub fn run_pending(
    ctx: &AppContext,
    backend: &str,
    since: Option<DateTime<Utc>>,
    mark: bool,
    output: &Output,
) -> Result<()> {
    if !ctx.config.backends.contains_key(backend) {
        return Err(eyre!("Backend '{}' is not configured", backend));
    }

    let since = match since {
        Some(since) => Some(since),
        None => ctx.credentials()?.get_last_sync(backend, EXPORT_DIRECTION),
    };

    let database = ctx.database()?;
    let mut mapper = ExportMapper::new(Arc::clone(&database.storage));
    mapper.set_up(MapperOptions {
        priority: ctx.config.mapper.priority(),
        dry_run: true,
    });
    mapper.load_data(None)?;

    let count = mapper.queue_changes(backend, since);
    let requests: Vec<_> = mapper.take_queue().drain();

    let mut table = new_table(vec!["Entity", "Remote id", "Action", "Item"]);
    for request in &requests {
        table.add_row(vec![
            request.entity_id.map(|id| id.to_string()).unwrap_or_default(),
            request.remote_id.clone(),
            format!("{:?}", request.action),
            request.payload["name"].as_str().unwrap_or_default().to_string(),
        ]);
    }

    output.table(table, &requests);
    output.info(format!("{} changes pending for '{}'", count, backend));

    if mark {
        let mut credentials = ctx.credentials()?;
        credentials.set_last_sync(backend, EXPORT_DIRECTION, Utc::now());
        credentials.save().map_err(|e| eyre!("Failed to save credentials: {}", e))?;
        output.success(format!("Marked '{}' as exported", backend));
    }
    Ok(())
}

pub fn run_stats(ctx: &AppContext, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    let entities = database.storage.get_all(None)?;

    let movies = entities.iter().filter(|e| e.is_movie()).count();
    let episodes = entities.len() - movies;
    let watched = entities.iter().filter(|e| e.watched).count();

    let mut table = new_table(vec!["Movies", "Episodes", "Watched", "Total"]);
    table.add_row(vec![
        movies.to_string(),
        episodes.to_string(),
        watched.to_string(),
        database.storage.count(None)?.to_string(),
    ]);

    output.table(
        table,
        &json!({ "movies": movies, "episodes": episodes, "watched": watched, "total": entities.len() }),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_entities_requires_array() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("items.json");

        std::fs::write(&file, r#"[{"type": "movie"}]"#).unwrap();
        assert_eq!(read_entities(&file).unwrap().len(), 1);

        std::fs::write(&file, r#"{"type": "movie"}"#).unwrap();
        assert!(read_entities(&file).is_err());
    }
}
