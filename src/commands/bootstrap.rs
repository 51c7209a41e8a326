//! `overskill-deploy bootstrap` — provisions a tenant repository and pushes
//! its initial file tree (spec §4.D step 1).

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::info;

use overskill_deploy::config::Config;
use overskill_deploy::domain::App;
use overskill_deploy::services::{BootstrapMode, DeploySecrets, TemplateContext};

use super::clients::Clients;
use super::{files, manifest};

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    config: &Config,
    app_id: String,
    app_name: String,
    owner_id: String,
    mode: BootstrapMode,
    subdomain: Option<String>,
    files_dir: Option<String>,
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
) -> Result<()> {
    let clients = Clients::build(config).await?;

    let mut app = App::new(app_id, app_name, owner_id);
    app.subdomain_slug = subdomain;
    if let Some(dir) = files_dir {
        let tree = files::load_tree(std::path::Path::new(&dir))?;
        app.set_files(tree);
    }

    let ctx = TemplateContext {
        app_id: app.id.clone(),
        owner_id: app.owning_team_id.clone(),
        supabase_url,
        supabase_anon_key,
    };
    let secrets = DeploySecrets {
        cloudflare_api_token: std::env::var("CLOUDFLARE_API_TOKEN").ok(),
        cloudflare_account_id: std::env::var("CLOUDFLARE_ACCOUNT_ID").ok(),
    };

    let commit_sha = clients.orchestrator.bootstrap(&mut app, mode, &ctx, &secrets).await.context("repository bootstrap failed")?;

    manifest::save(&app)?;

    info!(app_id = %app.id, repo = ?app.repository_full_name(), commit_sha = %commit_sha, "repository bootstrapped");
    println!(
        "{} {} bootstrapped at {} (commit {})",
        "✓".green(),
        app.repository_full_name().unwrap_or("<unknown>").bold(),
        app.id,
        &commit_sha[..commit_sha.len().min(12)]
    );
    Ok(())
}
