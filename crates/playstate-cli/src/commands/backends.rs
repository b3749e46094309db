use crate::commands::AppContext;
use crate::output::{new_table, Output};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use playstate_backends::{BackendClient, ClientRegistry};
use std::sync::Arc;
use tracing::debug;

fn client(ctx: &AppContext, name: &str) -> Result<Arc<dyn BackendClient>> {
    ClientRegistry::from_config(&ctx.config)
        .get(name)
        .ok_or_else(|| eyre!("Backend '{}' is not configured", name))
}

pub fn run_list(ctx: &AppContext, output: &Output) -> Result<()> {
    let mut table = new_table(vec!["Name", "Type", "Url", "User", "Import", "Export"]);
    for (name, backend) in &ctx.config.backends {
        table.add_row(vec![
            name.clone(),
            backend.backend_type.to_string(),
            backend.url.clone(),
            backend.user.clone().unwrap_or_default(),
            backend.import.to_string(),
            backend.export.to_string(),
        ]);
    }

    let names: Vec<&String> = ctx.config.backends.keys().collect();
    output.table(table, &names);
    Ok(())
}

pub async fn run_metadata(ctx: &AppContext, name: &str, id: &str, output: &Output) -> Result<()> {
    let metadata = client(ctx, name)?.get_metadata(id).await?;

    if output.is_human() {
        output.info(serde_json::to_string_pretty(&metadata)?);
    } else {
        output.data(&metadata);
    }
    Ok(())
}

pub async fn run_discover(ctx: &AppContext, name: &str, token: Option<String>, output: &Output) -> Result<()> {
    let client = client(ctx, name)?;
    let token = token.unwrap_or_else(|| client.context().token.clone());
    let servers = client.discover(&token).await?;

    let mut table = new_table(vec!["Name", "Identifier", "Protocol", "Address", "Port", "Uri", "Local"]);
    for server in &servers {
        table.add_row(vec![
            server.name.clone(),
            server.identifier.clone(),
            server.protocol.clone(),
            server.address.clone(),
            server.port.to_string(),
            server.uri.clone(),
            server.local.to_string(),
        ]);
    }

    output.table(table, &servers);
    Ok(())
}

/// Fetch a managed user's token and keep it in the credentials file
pub async fn run_user_token(
    ctx: &AppContext,
    name: &str,
    user_id: &str,
    username: &str,
    output: &Output,
) -> Result<()> {
    let mut credentials = ctx.credentials()?;
    if credentials.get_user_token(name, username).is_some() {
        debug!(backend = name, username = username, "Replacing stored user token");
    }

    let token = client(ctx, name)?.get_user_token(user_id, username).await?;
    credentials.set_user_token(name, username, token);
    credentials.save().map_err(|e| eyre!("Failed to save credentials: {}", e))?;

    output.success(format!("Stored access token for '{}' on '{}'", username, name));
    Ok(())
}
