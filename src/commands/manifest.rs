//! On-disk persistence for the CLI's single-process view of an [`App`].
//!
//! The data model (spec §3) assumes a durable relational store behind the
//! App/AppVersion/Deployment tables; this operator CLI is a short-lived
//! process with no such store of its own; it keeps the minimal `App`
//! snapshot it needs between invocations as one JSON file per app under
//! `.overskill/apps/`, and the deployment log under `.overskill/deployments.json`
//! (see `commands::clients::Clients::persist_state`). An embedding service
//! would instead back both with its own database and never touch disk here.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use overskill_deploy::domain::App;

const WORKSPACE_DIR: &str = ".overskill";

fn apps_dir() -> PathBuf {
    Path::new(WORKSPACE_DIR).join("apps")
}

fn manifest_path(app_id: &str) -> PathBuf {
    apps_dir().join(format!("{}.json", app_id.to_lowercase()))
}

pub fn save(app: &App) -> Result<()> {
    std::fs::create_dir_all(apps_dir()).context("creating .overskill/apps directory")?;
    let path = manifest_path(&app.id);
    let json = serde_json::to_string_pretty(app).context("serializing app manifest")?;
    std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))
}

pub fn load(app_id: &str) -> Result<App> {
    let path = manifest_path(app_id);
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("no app manifest at {} — run `bootstrap` first", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))
}
