use chrono::{DateTime, Utc};
use clap::{ArgAction, Parser, Subcommand};
use commands::{backends, config, daemon, db, events, state, tasks, AppContext};
use std::path::PathBuf;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "playstate")]
#[command(about = "playstate - keep watch state in line across Plex, Jellyfin and Emby")]
#[command(version)]
struct Cli {
    /// Enable verbose output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and queue scheduled tasks
    Tasks {
        #[command(subcommand)]
        cmd: TaskCommands,
    },
    /// Inspect the event queue
    Events {
        #[command(subcommand)]
        cmd: EventCommands,
    },
    /// Canonical play state
    State {
        #[command(subcommand)]
        cmd: StateCommands,
    },
    /// Talk to configured backends
    Backends {
        #[command(subcommand)]
        cmd: BackendCommands,
    },
    /// Database schema and upkeep
    Db {
        #[command(subcommand)]
        cmd: DbCommands,
    },
    /// Show, validate or create the configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommands,
    },
    /// Run the task scheduler until interrupted
    #[command(long_about = "Run the internal scheduler. Every tick queues the tasks whose timer fired since the previous tick. Tasks that still have a pending run are not queued twice.")]
    Daemon {
        /// 6 field cron expression for the scheduler tick, overrides [daemon] tick
        #[arg(long, value_name = "CRON")]
        tick: Option<String>,

        /// Skip the tick on startup
        #[arg(long, action = ArgAction::SetTrue)]
        no_startup_tick: bool,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List tasks with their next and previous run
    List {
        /// Include hidden tasks
        #[arg(long, action = ArgAction::SetTrue)]
        all: bool,
    },
    Show { name: String },
    /// Queue a task run now
    Queue { name: String },
    /// Cancel a queued task run
    Cancel { name: String },
    /// Queue every due task once
    Tick,
}

#[derive(Subcommand)]
enum EventCommands {
    List {
        /// pending, running, success, failed or cancelled
        #[arg(long)]
        status: Option<String>,

        #[arg(long)]
        reference: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Show { id: String },
    /// Cancel a pending event
    Cancel { id: String },
    /// Remove the newest pending event for a reference
    Remove {
        reference: String,

        /// Remove the newest event whatever its status
        #[arg(long, action = ArgAction::SetTrue)]
        any_status: bool,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Import items reported by a backend from a JSON file
    Import {
        file: PathBuf,

        /// Items not newer than this only contribute metadata (RFC 3339)
        #[arg(long)]
        after: Option<DateTime<Utc>>,

        /// Never create items or change play state
        #[arg(long, action = ArgAction::SetTrue)]
        metadata_only: bool,

        #[arg(long, action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Changes an export would push to a backend
    Pending {
        backend: String,

        /// Only items changed since (RFC 3339), defaults to the last export
        #[arg(long)]
        since: Option<DateTime<Utc>>,

        /// Record now as the last export
        #[arg(long, action = ArgAction::SetTrue)]
        mark: bool,
    },
    Stats,
}

#[derive(Subcommand)]
enum BackendCommands {
    List,
    /// Fetch raw item metadata
    Metadata { backend: String, id: String },
    /// List servers reachable with a token
    Discover {
        backend: String,

        /// Defaults to the configured token
        #[arg(long)]
        token: Option<String>,
    },
    /// Fetch and store an access token for a managed user
    UserToken {
        backend: String,
        user_id: String,
        username: String,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Apply or roll back the schema
    Migrate {
        #[arg(long, action = ArgAction::SetTrue)]
        down: bool,
    },
    /// Integrity check, vacuum and analyze
    Maintenance,
}

#[derive(Subcommand)]
enum ConfigCommands {
    Show {
        /// Show tokens unmasked
        #[arg(long, action = ArgAction::SetTrue)]
        full: bool,
    },
    Validate,
    /// Write a default config file
    Init,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let ctx = AppContext::load(cli.config)?;

    let log_file = match (&cli.command, &ctx.config.logging.file) {
        (_, Some(file)) => Some(file.clone()),
        (Commands::Daemon { .. }, None) => Some(ctx.paths.daemon_log_file()),
        _ => None,
    };
    logging::init_logging_with_file(
        cli.verbose,
        cli.quiet,
        &ctx.config.logging.level,
        ctx.config.logging.json.then_some(true),
        log_file,
    )
    .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    let output = output::Output::new(cli.output, cli.quiet);

    let result = match cli.command {
        Commands::Tasks { cmd } => match cmd {
            TaskCommands::List { all } => tasks::run_list(&ctx, all, &output),
            TaskCommands::Show { name } => tasks::run_show(&ctx, &name, &output),
            TaskCommands::Queue { name } => tasks::run_queue(&ctx, &name, &output),
            TaskCommands::Cancel { name } => tasks::run_cancel(&ctx, &name, &output),
            TaskCommands::Tick => tasks::run_tick(&ctx, &output),
        },
        Commands::Events { cmd } => match cmd {
            EventCommands::List { status, reference, limit } => {
                events::run_list(&ctx, status, reference, limit, &output)
            }
            EventCommands::Show { id } => events::run_show(&ctx, &id, &output),
            EventCommands::Cancel { id } => events::run_cancel(&ctx, &id, &output),
            EventCommands::Remove { reference, any_status } => {
                events::run_remove(&ctx, &reference, any_status, &output)
            }
        },
        Commands::State { cmd } => match cmd {
            StateCommands::Import { file, after, metadata_only, dry_run } => {
                state::run_import(&ctx, &file, after, metadata_only, dry_run, &output)
            }
            StateCommands::Pending { backend, since, mark } => {
                state::run_pending(&ctx, &backend, since, mark, &output)
            }
            StateCommands::Stats => state::run_stats(&ctx, &output),
        },
        Commands::Backends { cmd } => match cmd {
            BackendCommands::List => backends::run_list(&ctx, &output),
            BackendCommands::Metadata { backend, id } => backends::run_metadata(&ctx, &backend, &id, &output).await,
            BackendCommands::Discover { backend, token } => {
                backends::run_discover(&ctx, &backend, token, &output).await
            }
            BackendCommands::UserToken { backend, user_id, username } => {
                backends::run_user_token(&ctx, &backend, &user_id, &username, &output).await
            }
        },
        Commands::Db { cmd } => match cmd {
            DbCommands::Migrate { down } => db::run_migrate(&ctx, down, &output),
            DbCommands::Maintenance => db::run_maintenance(&ctx, &output),
        },
        Commands::Config { cmd } => match cmd {
            ConfigCommands::Show { full } => config::run_show(&ctx, full, &output),
            ConfigCommands::Validate => config::run_validate(&ctx, &output),
            ConfigCommands::Init => config::run_init(&ctx, &output),
        },
        Commands::Daemon { tick, no_startup_tick } => daemon::run_daemon(&ctx, tick, no_startup_tick, &output).await,
    };

    if let Err(e) = &result {
        output.error(format!("{}", e));
    }
    result
}
