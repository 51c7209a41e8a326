//! `overskill-deploy status` — shows the latest deployment per environment
//! (spec §4.I `status`).

use anyhow::Result;
use colored::Colorize;

use overskill_deploy::config::Config;
use overskill_deploy::domain::Environment;
use overskill_deploy::services::EnvStatusKind;

use super::clients::Clients;
use super::manifest;

pub async fn execute(config: &Config, app_id: String) -> Result<()> {
    let clients = Clients::build(config).await?;
    let app = manifest::load(&app_id)?;

    let status = clients.promotion.status(&app.id).await;

    println!("{}", app.name.bold());
    for env in [Environment::Preview, Environment::Staging, Environment::Production] {
        let entry = &status[&env];
        match entry.status {
            EnvStatusKind::Deployed => {
                let age = entry
                    .last_deployed_at
                    .and_then(|at| (chrono::Utc::now() - at).to_std().ok())
                    .map(|d| format!("{} ago", humantime::format_duration(d)))
                    .unwrap_or_default();
                println!(
                    "  {:<12} {} {} {}",
                    env.as_str(),
                    "deployed".green(),
                    entry.url.as_deref().unwrap_or(""),
                    age.dimmed()
                );
            }
            EnvStatusKind::NotDeployed => {
                println!("  {:<12} {}", env.as_str(), "not deployed".dimmed());
            }
        }
    }
    Ok(())
}
