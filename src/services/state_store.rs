//! Deployment state store (spec §4.H): durable per-`(app, environment)`
//! records with guarded transitions. Writes are serialized per `(app, env)`
//! key (spec §5); unrelated keys never contend the same lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::deployment::{Deployment, DeploymentStatus, Environment};
use crate::error::StateStoreError;

/// An open handle to a `Deploying` row, returned by [`DeploymentStore::begin`]
/// and required to call `complete`/`fail`.
#[derive(Debug, Clone)]
pub struct DeploymentHandle {
    pub app_id: String,
    pub environment: Environment,
    pub deployment_id: String,
}

#[derive(Default)]
struct Partition {
    rows: Vec<Deployment>,
}

/// In-process, lock-partitioned implementation of the append-only
/// deployment table described in spec §3/§4.H. Partitioned by
/// `(app_id, environment)` so concurrent deploys across environments never
/// contend a single lock (spec §5).
pub struct DeploymentStore {
    partitions: Mutex<HashMap<(String, Environment), Arc<Mutex<Partition>>>>,
}

impl Default for DeploymentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentStore {
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
        }
    }

    async fn partition_for(&self, app_id: &str, env: Environment) -> Arc<Mutex<Partition>> {
        let mut partitions = self.partitions.lock().await;
        partitions
            .entry((app_id.to_string(), env))
            .or_insert_with(|| Arc::new(Mutex::new(Partition::default())))
            .clone()
    }

    /// Opens a new `Deploying` row. Per spec §5, a given `(app, env)` must
    /// be totally ordered — callers are expected to await any previous
    /// open deployment's terminal transition before beginning a new one;
    /// this store does not itself block a second `begin`, since ordering
    /// is a caller-level (build-monitor task) responsibility.
    pub async fn begin(
        &self,
        app_id: &str,
        env: Environment,
        deployment_id: impl Into<String>,
        initiated_by: impl Into<String>,
        metadata: serde_json::Value,
    ) -> DeploymentHandle {
        let partition = self.partition_for(app_id, env).await;
        let deployment_id = deployment_id.into();
        let row = Deployment::begin(deployment_id.clone(), app_id, env, initiated_by, Utc::now(), metadata);
        partition.lock().await.rows.push(row);
        DeploymentHandle {
            app_id: app_id.to_string(),
            environment: env,
            deployment_id,
        }
    }

    pub async fn complete(&self, handle: &DeploymentHandle, url: impl Into<String>) -> Result<(), StateStoreError> {
        self.transition(handle, DeploymentStatus::Deployed, Some(url.into()), None).await
    }

    pub async fn fail(&self, handle: &DeploymentHandle, error: serde_json::Value) -> Result<(), StateStoreError> {
        self.transition(handle, DeploymentStatus::Failed, None, Some(error)).await
    }

    async fn transition(
        &self,
        handle: &DeploymentHandle,
        to: DeploymentStatus,
        url: Option<String>,
        error_metadata: Option<serde_json::Value>,
    ) -> Result<(), StateStoreError> {
        let partition = self.partition_for(&handle.app_id, handle.environment).await;
        let mut partition = partition.lock().await;
        let row = partition
            .rows
            .iter_mut()
            .rev()
            .find(|r| r.deployment_id == handle.deployment_id)
            .ok_or_else(|| StateStoreError::NoOpenDeployment {
                app_id: handle.app_id.clone(),
                environment: handle.environment.as_str().to_string(),
            })?;

        row.transition(to, Utc::now())?;
        if let Some(url) = url {
            row.url = Some(url);
        }
        if let Some(error) = error_metadata {
            if let serde_json::Value::Object(ref mut map) = row.metadata {
                map.insert("error".to_string(), error);
            } else {
                row.metadata = serde_json::json!({ "error": error });
            }
        }
        Ok(())
    }

    pub async fn latest(&self, app_id: &str, env: Environment) -> Option<Deployment> {
        let partition = self.partition_for(app_id, env).await;
        partition.lock().await.rows.last().cloned()
    }

    pub async fn list(&self, app_id: &str) -> Vec<Deployment> {
        let mut all = Vec::new();
        for env in [Environment::Preview, Environment::Staging, Environment::Production] {
            let partition = self.partition_for(app_id, env).await;
            all.extend(partition.lock().await.rows.iter().cloned());
        }
        all
    }

    pub async fn status_by_env(&self, app_id: &str) -> HashMap<Environment, Deployment> {
        let mut result = HashMap::new();
        for env in [Environment::Preview, Environment::Staging, Environment::Production] {
            if let Some(row) = self.latest(app_id, env).await {
                result.insert(env, row);
            }
        }
        result
    }

    /// Snapshots every row across every `(app, env)` partition. Used by the
    /// CLI binary to persist the otherwise-in-process store to disk between
    /// invocations (spec §6 "Persisted state" describes a relational table;
    /// a one-shot CLI process has no long-lived process to hold it in).
    pub async fn export_all(&self) -> Vec<Deployment> {
        let partitions = self.partitions.lock().await;
        let mut all = Vec::new();
        for partition in partitions.values() {
            all.extend(partition.lock().await.rows.iter().cloned());
        }
        all
    }

    /// Restores rows previously produced by [`Self::export_all`], each back
    /// into its `(app_id, environment)` partition in order.
    pub async fn import_rows(&self, rows: Vec<Deployment>) {
        for row in rows {
            let partition = self.partition_for(&row.app_id, row.environment).await;
            partition.lock().await.rows.push(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn complete_transitions_deploying_to_deployed() {
        let store = DeploymentStore::new();
        let handle = store.begin("ab12cd", Environment::Production, "ab12cd", "system", serde_json::json!({})).await;
        store.complete(&handle, "https://ab12cd.overskill.app").await.unwrap();

        let latest = store.latest("ab12cd", Environment::Production).await.unwrap();
        assert_eq!(latest.status, DeploymentStatus::Deployed);
        assert_eq!(latest.url.as_deref(), Some("https://ab12cd.overskill.app"));
    }

    #[tokio::test]
    async fn rows_never_leave_a_terminal_state() {
        let store = DeploymentStore::new();
        let handle = store.begin("ab12cd", Environment::Production, "ab12cd", "system", serde_json::json!({})).await;
        store.complete(&handle, "https://ab12cd.overskill.app").await.unwrap();
        let err = store.fail(&handle, serde_json::json!({"reason": "late"})).await.unwrap_err();
        assert!(matches!(err, StateStoreError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn writes_to_different_envs_do_not_contend() {
        let store = DeploymentStore::new();
        let h1 = store.begin("ab12cd", Environment::Preview, "ab12cd", "system", serde_json::json!({})).await;
        let h2 = store.begin("ab12cd", Environment::Production, "countmaster", "system", serde_json::json!({})).await;
        store.complete(&h1, "https://preview-ab12cd.overskill.app").await.unwrap();
        store.complete(&h2, "https://countmaster.overskill.app").await.unwrap();

        let status = store.status_by_env("ab12cd").await;
        assert_eq!(status.len(), 2);
    }

    #[tokio::test]
    async fn list_returns_rows_across_environments() {
        let store = DeploymentStore::new();
        store.begin("ab12cd", Environment::Preview, "ab12cd", "system", serde_json::json!({})).await;
        store.begin("ab12cd", Environment::Staging, "ab12cd", "system", serde_json::json!({})).await;
        assert_eq!(store.list("ab12cd").await.len(), 2);
    }

    #[test]
    fn export_then_import_round_trips_rows() {
        tokio_test::block_on(async {
            let store = DeploymentStore::new();
            let handle = store.begin("ab12cd", Environment::Production, "ab12cd", "system", serde_json::json!({})).await;
            store.complete(&handle, "https://ab12cd.overskill.app").await.unwrap();

            let exported = store.export_all().await;
            let restored = DeploymentStore::new();
            restored.import_rows(exported).await;

            let latest = restored.latest("ab12cd", Environment::Production).await.unwrap();
            assert_eq!(latest.status, DeploymentStatus::Deployed);
        });
    }
}
