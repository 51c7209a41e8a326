//! Promotion and status API (spec §4.I): cross-environment copy of
//! compiled scripts without rebuilding, and status aggregation across
//! namespaces.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::{App, Deployment, DeploymentStatus, Environment};
use crate::error::PromotionError;
use crate::infrastructure::edge_platform::{EdgePlatformClient, ScriptMetadata};
use crate::services::dispatch_publisher::DispatchPublisher;
use crate::services::state_store::DeploymentStore;

/// Status of one `(app, environment)` pair (spec §4.I `status`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvStatusKind {
    Deployed,
    NotDeployed,
}

#[derive(Debug, Clone)]
pub struct EnvStatus {
    pub url: Option<String>,
    pub status: EnvStatusKind,
    pub last_deployed_at: Option<DateTime<Utc>>,
}

/// The two promotion edges this system allows (spec §4.I). Promotion never
/// skips a stage and never flows backward.
fn is_valid_pair(from: Environment, to: Environment) -> bool {
    matches!((from, to), (Environment::Preview, Environment::Staging) | (Environment::Staging, Environment::Production))
}

pub struct PromotionService {
    edge: Arc<EdgePlatformClient>,
    dispatch: Arc<DispatchPublisher>,
    state: Arc<DeploymentStore>,
    /// Zone id routes are registered against; `None` skips route creation
    /// entirely (no `apps_domain` configured, spec §4.E url derivation).
    zone: Option<String>,
}

impl PromotionService {
    pub fn new(edge: Arc<EdgePlatformClient>, dispatch: Arc<DispatchPublisher>, state: Arc<DeploymentStore>, zone: Option<String>) -> Self {
        Self { edge, dispatch, state, zone }
    }

    /// Copies the compiled script from `from` into `to` and records a new
    /// deployment row. No rebuild, no commit (spec §4.I, scenario 4).
    pub async fn promote(&self, app: &mut App, from: Environment, to: Environment, initiated_by: &str) -> Result<Deployment, PromotionError> {
        if !is_valid_pair(from, to) {
            return Err(PromotionError::InvalidPair {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }

        let from_namespace = self.dispatch.namespace_for(from);
        let from_script = app.script_name(from);
        let bytes = self.edge.get_script(&from_namespace, &from_script).await?;
        let digest = hex_sha256(&bytes);

        let to_namespace = self.dispatch.namespace_for(to);
        let to_script = app.script_name(to);
        self.dispatch.ensure_namespace(to).await?;

        let metadata = ScriptMetadata {
            main_module: "index.js".to_string(),
            compatibility_date: Utc::now().format("%Y-%m-%d").to_string(),
            tags: vec![app.id.clone(), to.as_str().to_string()],
            bindings: vec![],
        };
        self.edge.upload_script(&to_namespace, &to_script, bytes, &metadata).await?;

        if let Some(zone) = &self.zone {
            // Route creation failures degrade to path-style URL; never fail
            // the promotion itself (spec §4.E, §7).
            let _ = self.dispatch.ensure_route(zone, app, to).await;
        }

        let handle = self
            .state
            .begin(
                &app.id,
                to,
                to_script.clone(),
                initiated_by,
                json!({ "promoted_from": from.as_str(), "digest": digest }),
            )
            .await;

        let url = self.dispatch.derive_url(app, to).await?;
        self.state.complete(&handle, url.url.clone()).await?;
        app.record_deploy(to, Utc::now());

        self.state
            .latest(&app.id, to)
            .await
            .ok_or_else(|| PromotionError::StateStore(crate::error::StateStoreError::NoOpenDeployment {
                app_id: app.id.clone(),
                environment: to.as_str().to_string(),
            }))
    }

    /// Aggregates the latest row per environment into the public status
    /// shape (spec §4.I `status`). Missing rows degrade to `NotDeployed`
    /// rather than erroring — there is always a well-formed status for
    /// every environment.
    pub async fn status(&self, app_id: &str) -> std::collections::HashMap<Environment, EnvStatus> {
        let rows = self.state.status_by_env(app_id).await;
        [Environment::Preview, Environment::Staging, Environment::Production]
            .into_iter()
            .map(|env| {
                let status = match rows.get(&env) {
                    Some(row) if row.status == DeploymentStatus::Deployed => EnvStatus {
                        url: row.url.clone(),
                        status: EnvStatusKind::Deployed,
                        last_deployed_at: Some(row.updated_at),
                    },
                    _ => EnvStatus {
                        url: None,
                        status: EnvStatusKind::NotDeployed,
                        last_deployed_at: None,
                    },
                };
                (env, status)
            })
            .collect()
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

mod hex {
    /// Minimal lower-hex encoder so this module doesn't pull in the `hex`
    /// crate for a single call site.
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_to_staging_and_staging_to_production_are_valid() {
        assert!(is_valid_pair(Environment::Preview, Environment::Staging));
        assert!(is_valid_pair(Environment::Staging, Environment::Production));
    }

    #[test]
    fn other_pairs_are_rejected() {
        assert!(!is_valid_pair(Environment::Production, Environment::Staging));
        assert!(!is_valid_pair(Environment::Preview, Environment::Production));
        assert!(!is_valid_pair(Environment::Staging, Environment::Staging));
    }

    #[test]
    fn hex_sha256_matches_known_digest() {
        // sha256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        assert_eq!(hex_sha256(b""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }

    #[tokio::test]
    async fn failed_latest_row_reports_not_deployed() {
        let state = Arc::new(DeploymentStore::new());
        let handle = state
            .begin("ab12cd", Environment::Preview, "dep-1", "user-1", json!({}))
            .await;
        state.fail(&handle, json!({"error": "boom"})).await.unwrap();

        let rows = state.status_by_env("ab12cd").await;
        let row = rows.get(&Environment::Preview).unwrap();
        assert_eq!(row.status, DeploymentStatus::Failed);

        // Mirror PromotionService::status's mapping without constructing the
        // full edge/dispatch client graph.
        let mapped = match rows.get(&Environment::Preview) {
            Some(r) if r.status == DeploymentStatus::Deployed => EnvStatusKind::Deployed,
            _ => EnvStatusKind::NotDeployed,
        };
        assert_eq!(mapped, EnvStatusKind::NotDeployed);
    }
}
