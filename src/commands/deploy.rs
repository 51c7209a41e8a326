//! `overskill-deploy deploy` — publishes the current file tree as one
//! commit and drives the build monitor to a terminal outcome (spec §4.D
//! step 4, §4.G).

use anyhow::{bail, Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use overskill_deploy::config::Config;
use overskill_deploy::domain::Environment;
use overskill_deploy::services::{BuildMonitor, MonitorConfig, Outcome, ProgressEvent};

use super::clients::Clients;
use super::{files, manifest};

pub async fn execute(config: &Config, app_id: String, environment: Environment, files_dir: String, initiated_by: String) -> Result<()> {
    let clients = Clients::build(config).await?;

    let mut app = manifest::load(&app_id)?;
    let tree = files::load_tree(std::path::Path::new(&files_dir))?;
    app.set_files(tree);

    let marker = format!("{}-{}", app.id, chrono::Utc::now().timestamp());
    let commit_sha = clients.orchestrator.publish(&app, &marker).await.context("publishing file tree commit")?;

    let deployment_id = app.script_name(environment);
    let handle = clients
        .state
        .begin(&app.id, environment, deployment_id, &initiated_by, json!({ "commit_sha": commit_sha }))
        .await;

    let monitor = BuildMonitor::new(
        clients.source.clone(),
        clients.orchestrator.clone(),
        clients.dispatch.clone(),
        clients.state.clone(),
        MonitorConfig::default(),
        clients.zone.clone(),
    );

    let cancellation = CancellationToken::new();
    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let (progress_tx, progress_rx) = watch::channel(ProgressEvent {
        status: "queued".to_string(),
        elapsed_s: 0,
        estimated_total_s: MonitorConfig::default().estimated_total_s,
        run_id: 0,
    });
    let spinner = spawn_progress_spinner(progress_rx);

    info!(app_id = %app.id, environment = environment.as_str(), commit_sha = %commit_sha, "monitoring build");
    let outcome = monitor
        .monitor(&mut app, environment, &handle, commit_sha, Some(progress_tx), cancellation)
        .await?;

    manifest::save(&app)?;
    clients.persist_state().await?;

    match outcome {
        Outcome::Success { url, elapsed_s, .. } => {
            spinner.finish_with_message(format!("deployed to {url} in {}", humantime::format_duration(std::time::Duration::from_secs(elapsed_s))));
            println!("{} deployed to {} in {}s", "✓".green(), url.bold(), elapsed_s);
            Ok(())
        }
        Outcome::Failure { error, elapsed_s, .. } => {
            spinner.finish_with_message("build failed".to_string());
            bail!("{} deploy failed after {elapsed_s}s: {error}", "✗".red());
        }
    }
}

/// Renders a spinner that tracks the build monitor's at-most-one-in-flight
/// progress channel (spec §4.G step 2, §5).
fn spawn_progress_spinner(mut rx: watch::Receiver<ProgressEvent>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}").unwrap());
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let updater = spinner.clone();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let event = rx.borrow().clone();
            updater.set_message(format!("{} ({}s / ~{}s)", event.status, event.elapsed_s, event.estimated_total_s));
        }
    });

    spinner
}
