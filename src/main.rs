use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{Cli, Commands};
use overskill_deploy::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING").or_else(|_| std::env::var("LOG_LEVEL")).unwrap_or_else(|_| {
        if cli.verbose {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .init();

    let config = Config::from_env()?;

    match cli.command {
        Commands::Bootstrap {
            app_id,
            app_name,
            owner_id,
            mode,
            subdomain,
            files_dir,
            supabase_url,
            supabase_anon_key,
        } => {
            commands::bootstrap::execute(
                &config,
                app_id,
                app_name,
                owner_id,
                mode.into(),
                subdomain,
                files_dir,
                supabase_url,
                supabase_anon_key,
            )
            .await?;
        }
        Commands::Deploy {
            app_id,
            environment,
            files_dir,
            initiated_by,
        } => {
            commands::deploy::execute(&config, app_id, environment.into(), files_dir, initiated_by).await?;
        }
        Commands::Promote { app_id, from, to, initiated_by } => {
            commands::promote::execute(&config, app_id, from.into(), to.into(), initiated_by).await?;
        }
        Commands::Status { app_id } => {
            commands::status::execute(&config, app_id).await?;
        }
    }

    Ok(())
}
