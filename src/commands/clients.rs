//! Wires the configured infrastructure clients and orchestration services
//! together for the CLI binary. An embedding service would assemble these
//! the same way, but back the deployment store with its own database
//! instead of [`persist_state`](Clients::persist_state).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use overskill_deploy::config::Config;
use overskill_deploy::domain::Deployment;
use overskill_deploy::infrastructure::{CredentialProvider, EdgePlatformClient, SourceHostClient};
use overskill_deploy::services::{DeploymentStore, DispatchPublisher, PromotionService, RepositoryOrchestrator};
use tracing::warn;

const DEPLOYMENTS_LOG_PATH: &str = ".overskill/deployments.json";

pub struct Clients {
    pub source: Arc<SourceHostClient>,
    pub dispatch: Arc<DispatchPublisher>,
    pub orchestrator: Arc<RepositoryOrchestrator>,
    pub state: Arc<DeploymentStore>,
    pub promotion: Arc<PromotionService>,
    /// Zone id routes are registered against; `None` when `apps_domain`
    /// isn't configured or its zone lookup failed.
    pub zone: Option<String>,
}

impl Clients {
    pub async fn build(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("overskill-deploy/0.1")
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;

        let credentials = Arc::new(CredentialProvider::new(
            http.clone(),
            config.source_host_api_base.clone(),
            config.source_host_app_id.clone(),
            config.signing_key_pem.clone(),
        ));
        let source = Arc::new(SourceHostClient::new(
            http.clone(),
            config.source_host_api_base.clone(),
            credentials,
            config.source_host_org.clone(),
        ));
        let edge = Arc::new(EdgePlatformClient::new(
            http.clone(),
            config.edge_platform_api_base.clone(),
            config.edge_account_id.clone(),
            config.edge_api_token.clone(),
        ));
        let dispatch = Arc::new(DispatchPublisher::new(edge.clone(), config.runtime_env, config.apps_domain.clone()));
        let orchestrator = Arc::new(RepositoryOrchestrator::new(source.clone(), config.template_repo.clone()));

        // Account-wide infra, installed idempotently on every boot; a
        // failure here degrades every route through it, so surface it
        // immediately rather than letting deploys fail downstream.
        dispatch.ensure_dispatch_worker().await.context("installing overskill-dispatch worker")?;

        let state = Arc::new(DeploymentStore::new());
        if let Some(rows) = load_deployment_log()? {
            state.import_rows(rows).await;
        }

        // Route creation needs a zone id; when `apps_domain` isn't
        // configured there is nothing to look up and promotion/dispatch
        // degrade to path-style URLs (spec §4.E).
        let zone = match &config.apps_domain {
            Some(domain) => match edge.zone_id(domain).await {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(domain, error = %e, "zone lookup failed, routes will not be created");
                    None
                }
            },
            None => None,
        };

        let promotion = Arc::new(PromotionService::new(edge, dispatch.clone(), state.clone(), zone.clone()));

        Ok(Self {
            source,
            dispatch,
            orchestrator,
            state,
            promotion,
            zone,
        })
    }

    /// Flushes the in-process deployment log to disk so the next CLI
    /// invocation observes prior deployments (see module docs).
    pub async fn persist_state(&self) -> Result<()> {
        let rows = self.state.export_all().await;
        if let Some(parent) = Path::new(DEPLOYMENTS_LOG_PATH).parent() {
            std::fs::create_dir_all(parent).context("creating .overskill directory")?;
        }
        let json = serde_json::to_string_pretty(&rows).context("serializing deployment log")?;
        std::fs::write(DEPLOYMENTS_LOG_PATH, json).context("writing deployment log")
    }
}

fn load_deployment_log() -> Result<Option<Vec<Deployment>>> {
    match std::fs::read_to_string(DEPLOYMENTS_LOG_PATH) {
        Ok(json) => Ok(Some(serde_json::from_str(&json).context("parsing deployment log")?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).context("reading deployment log"),
    }
}
