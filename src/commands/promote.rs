//! `overskill-deploy promote` — copies an already-built script from one
//! environment's namespace into another without rebuilding (spec §4.I).

use anyhow::{Context, Result};
use colored::Colorize;

use overskill_deploy::config::Config;
use overskill_deploy::domain::Environment;

use super::clients::Clients;
use super::manifest;

pub async fn execute(config: &Config, app_id: String, from: Environment, to: Environment, initiated_by: String) -> Result<()> {
    let clients = Clients::build(config).await?;
    let mut app = manifest::load(&app_id)?;

    let deployment = clients
        .promotion
        .promote(&mut app, from, to, &initiated_by)
        .await
        .context("promotion failed")?;

    manifest::save(&app)?;
    clients.persist_state().await?;

    println!(
        "{} promoted {} from {} to {}: {}",
        "✓".green(),
        app.id.bold(),
        from.as_str(),
        to.as_str(),
        deployment.url.as_deref().unwrap_or("<no url>")
    );
    Ok(())
}
