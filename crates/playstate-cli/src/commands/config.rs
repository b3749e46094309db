use crate::commands::AppContext;
use crate::output::{new_table, Output};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use comfy_table::{Cell, Color};
use owo_colors::OwoColorize;
use serde_json::json;

fn mask_string(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.is_empty() {
        return "<not set>".to_string();
    }
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}***{}", head, tail)
}

pub fn run_show(ctx: &AppContext, full: bool, output: &Output) -> Result<()> {
    let config = &ctx.config;

    if !output.is_human() {
        let backends: serde_json::Map<String, serde_json::Value> = config
            .backends
            .iter()
            .map(|(name, b)| {
                let token = if full { b.token.clone() } else { mask_string(&b.token) };
                (
                    name.clone(),
                    json!({ "type": b.backend_type, "url": b.url, "token": token, "user": b.user,
                            "import": b.import, "export": b.export }),
                )
            })
            .collect();

        output.data(&json!({
            "config_file": ctx.config_file,
            "database": ctx.database_file(),
            "source_priority": config.mapper.source_priority,
            "backends": backends,
        }));
        return Ok(());
    }

    println!("\n{}", "Configuration".bright_cyan().bold());

    let mut info = new_table(vec!["Setting", "Value"]);
    info.add_row(vec!["Config file".to_string(), ctx.config_file.display().to_string()]);
    info.add_row(vec!["Database".to_string(), ctx.database_file().display().to_string()]);
    info.add_row(vec!["Pool size".to_string(), config.database.pool_size.to_string()]);
    info.add_row(vec!["Source priority".to_string(), config.mapper.source_priority.join(", ")]);
    info.add_row(vec!["Lazy load".to_string(), config.mapper.lazy_load.to_string()]);
    info.add_row(vec!["Daemon tick".to_string(), config.daemon.tick.clone()]);
    println!("{}", info);

    if config.backends.is_empty() {
        println!("{}", "No backends configured".bright_black());
        return Ok(());
    }

    let mut backends = new_table(vec!["Backend", "Type", "Url", "Token", "Import", "Export"]);
    for (name, backend) in &config.backends {
        let token = if full { backend.token.clone() } else { mask_string(&backend.token) };
        backends.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(backend.backend_type),
            Cell::new(&backend.url),
            Cell::new(token),
            Cell::new(if backend.import { "✓".green().to_string() } else { "✗".red().to_string() }),
            Cell::new(if backend.export { "✓".green().to_string() } else { "✗".red().to_string() }),
        ]);
    }
    println!("{}", backends);
    Ok(())
}

pub fn run_validate(ctx: &AppContext, output: &Output) -> Result<()> {
    ctx.config.validate().map_err(|e| eyre!("{}: {}", ctx.config_file.display(), e))?;
    output.success(format!("{} is valid", ctx.config_file.display()));
    Ok(())
}

/// Write the defaults unless a file already exists
pub fn run_init(ctx: &AppContext, output: &Output) -> Result<()> {
    if ctx.config_file.exists() {
        output.warn(format!("{} already exists, leaving it untouched", ctx.config_file.display()));
        return Ok(());
    }

    ctx.config
        .save_to_file(&ctx.config_file)
        .map_err(|e| eyre!("Failed to write {}: {}", ctx.config_file.display(), e))?;
    ctx.paths.ensure_directories().map_err(|e| eyre!("{}", e))?;

    output.success(format!("Wrote {}", ctx.config_file.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_string() {
        assert_eq!(mask_string(""), "<not set>");
        assert_eq!(mask_string("abc"), "***");
        assert_eq!(mask_string("abcdefgh"), "ab***gh");
        assert_eq!(mask_string("äöüßéèà"), "äö***èà");
    }
}
