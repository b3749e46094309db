use crate::commands::AppContext;
use crate::output::Output;
use color_eyre::Result;
use playstate_core::{open_pool, MigrationDirection, SqliteStorage, StateStorage};

pub fn run_migrate(ctx: &AppContext, down: bool, output: &Output) -> Result<()> {
    let path = ctx.database_file();
    let storage = SqliteStorage::new(open_pool(&path, 1)?);

    let direction = if down { MigrationDirection::Down } else { MigrationDirection::Up };
    storage.migrate(direction)?;

    output.success(format!("Migrated {} {:?}", path.display(), direction));
    Ok(())
}

pub fn run_maintenance(ctx: &AppContext, output: &Output) -> Result<()> {
    let database = ctx.database()?;
    let report = database.storage.maintenance()?;

    if report.integrity_ok {
        output.success("Integrity check passed, database vacuumed and analyzed");
    } else {
        for message in &report.messages {
            output.error(message);
        }
    }
    output.data(&report);
    Ok(())
}
