//! CLI definitions for `overskill-deploy`.
//!
//! This module contains all CLI argument parsing structures using clap. The
//! binary is a thin operator-facing shell over the `overskill_deploy`
//! library — every subcommand here corresponds to one control-plane
//! operation (bootstrap, deploy, promote, status) that an embedding service
//! would otherwise call directly.

use clap::{Parser, Subcommand, ValueEnum};

use overskill_deploy::domain::Environment;
use overskill_deploy::services::BootstrapMode;

#[derive(Parser)]
#[command(
    name = "overskill-deploy",
    version,
    about = "Deployment control plane for tenant apps published to an edge dispatch platform",
    long_about = "Orchestrates a source-code host and an edge-compute dispatch platform to publish,\nmonitor, and promote AI-generated tenant applications."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum EnvironmentArg {
    Preview,
    Staging,
    Production,
}

impl From<EnvironmentArg> for Environment {
    fn from(value: EnvironmentArg) -> Self {
        match value {
            EnvironmentArg::Preview => Environment::Preview,
            EnvironmentArg::Staging => Environment::Staging,
            EnvironmentArg::Production => Environment::Production,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum BootstrapModeArg {
    NewRepo,
    Fork,
}

impl From<BootstrapModeArg> for BootstrapMode {
    fn from(value: BootstrapModeArg) -> Self {
        match value {
            BootstrapModeArg::NewRepo => BootstrapMode::NewRepo,
            BootstrapModeArg::Fork => BootstrapMode::Fork,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a tenant repository (new repo or template fork) and push
    /// the initial file tree, CI workflow, and edge-platform config.
    Bootstrap {
        /// Opaque tenant app id
        #[arg(long)]
        app_id: String,

        /// Human-readable app name
        #[arg(long)]
        app_name: String,

        /// Owning team id
        #[arg(long)]
        owner_id: String,

        /// Bootstrap strategy: a fresh private repo, or a fork of the
        /// configured template repo
        #[arg(long, value_enum, default_value = "new-repo")]
        mode: BootstrapModeArg,

        /// Production subdomain slug, if already assigned
        #[arg(long)]
        subdomain: Option<String>,

        /// Directory containing the app's initial source tree
        #[arg(long)]
        files_dir: Option<String>,

        #[arg(long)]
        supabase_url: Option<String>,

        #[arg(long)]
        supabase_anon_key: Option<String>,
    },

    /// Publish the current file tree as a single commit, then monitor CI
    /// for the resulting run to a terminal outcome (auto-fixing on failure).
    Deploy {
        #[arg(long)]
        app_id: String,

        #[arg(long, value_enum)]
        environment: EnvironmentArg,

        /// Directory containing the app's current source tree
        #[arg(long)]
        files_dir: String,

        #[arg(long, default_value = "cli")]
        initiated_by: String,
    },

    /// Copy an already-built script from one environment's namespace into
    /// another without rebuilding.
    Promote {
        #[arg(long)]
        app_id: String,

        #[arg(long, value_enum)]
        from: EnvironmentArg,

        #[arg(long, value_enum)]
        to: EnvironmentArg,

        #[arg(long, default_value = "cli")]
        initiated_by: String,
    },

    /// Show the latest deployment status per environment.
    Status {
        #[arg(long)]
        app_id: String,
    },
}
