use anyhow::Result;
use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing_subscriber::{
    layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};
use tracing_subscriber::fmt::{self, time::ChronoUtc};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Filter directives for the `-v`/`-q` flags, `None` defers to `RUST_LOG` or `default_level`
fn filter_directives(verbose_level: u8, quiet: bool) -> Option<&'static str> {
    if quiet {
        return Some("error");
    }

    match verbose_level {
        0 => None,
        // hyper is chatty at debug
        1 => Some("debug,hyper::proto::h1=warn,hyper::client::pool=warn"),
        _ => Some("trace"),
    }
}

/// Split `logs/playstate.log` into the directory and the rotation prefix `playstate`
fn rotation_target(log_path: &Path) -> Result<(PathBuf, String)> {
    let log_dir = log_path.parent()
        .ok_or_else(|| anyhow::anyhow!("Log file path has no parent directory"))?;
    let log_filename = log_path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid log filename"))?;

    let log_prefix = log_filename
        .rsplit_once('.')
        .map(|(prefix, _)| prefix)
        .unwrap_or(log_filename);

    Ok((log_dir.to_path_buf(), log_prefix.to_string()))
}

pub fn init_logging_with_file(
    verbose_level: u8,
    quiet: bool,
    default_level: &str,
    json: Option<bool>,
    log_file: Option<PathBuf>,
) -> Result<()> {
    let filter = match filter_directives(verbose_level, quiet) {
        Some("error") => EnvFilter::new("error"),
        Some(directives) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
    };

    let json = std::env::var("RUST_LOG_JSON")
        .map(|v| v == "true")
        .ok()
        .or(json)
        .unwrap_or_else(|| !io::stdout().is_terminal());

    let registry = Registry::default().with(filter);

    if let Some(log_path) = log_file {
        let (log_dir, log_prefix) = rotation_target(&log_path)?;
        std::fs::create_dir_all(&log_dir)?;

        // playstate.2026-01-17 style daily files
        let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, log_prefix);

        if json {
            let json_layer = fmt::layer()
                .json()
                .with_timer(ChronoUtc::rfc_3339())
                .with_writer(file_appender);

            registry.with(json_layer).init();
        } else {
            let fmt_layer = fmt::layer()
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false)
                .with_writer(file_appender);

            registry.with(fmt_layer).init();
        }
    } else if json {
        let json_layer = fmt::layer()
            .json()
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(io::stderr);

        registry.with(json_layer).init();
    } else {
        let fmt_layer = fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(io::stderr);

        registry.with(fmt_layer).init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives(3, true), Some("error"));
        assert_eq!(filter_directives(0, false), None);
        assert!(filter_directives(1, false).unwrap().starts_with("debug"));
        assert_eq!(filter_directives(2, false), Some("trace"));
    }

    #[test]
    fn test_rotation_target() {
        let (dir, prefix) = rotation_target(Path::new("/app/logs/playstate.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/app/logs"));
        assert_eq!(prefix, "playstate");

        let (_, prefix) = rotation_target(Path::new("logs/daemon")).unwrap();
        assert_eq!(prefix, "daemon");
    }
}
