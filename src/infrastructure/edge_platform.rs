//! Edge-platform client (spec §4.C, §6): typed wrapper over the dispatch
//! namespace API. 409/"already exists" is treated as success throughout,
//! following the idempotent-create pattern used elsewhere in this codebase's
//! ancestry for external-resource provisioning.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::EdgePlatformError;

pub struct EdgePlatformClient {
    http: reqwest::Client,
    api_base: String,
    account_id: String,
    api_token: String,
}

/// An ordered binding entry for a worker script (spec §4.E: "`metadata.
/// bindings` is an ordered list of `{type, name, …}` and must round-trip
/// exactly").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub binding_type: String,
    pub name: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScriptMetadata {
    pub main_module: String,
    pub compatibility_date: String,
    pub tags: Vec<String>,
    pub bindings: Vec<Binding>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    errors: Vec<ApiErrorEntry>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ZoneEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
pub struct Route {
    pub id: String,
    pub pattern: String,
    pub script: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRouteRequest<'a> {
    pattern: &'a str,
    script: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubdomainResponse {
    subdomain: String,
}

#[derive(Debug, Deserialize)]
struct KvNamespaceEntry {
    id: String,
    title: String,
}

#[derive(Debug, Serialize)]
struct CreateKvNamespaceRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Serialize)]
struct ToggleSubdomainRequest {
    enabled: bool,
}

impl EdgePlatformClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, account_id: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            account_id: account_id.into(),
            api_token: api_token.into(),
        }
    }

    fn account_url(&self, suffix: &str) -> String {
        format!("{}/accounts/{}{}", self.api_base, self.account_id, suffix)
    }

    /// Idempotent: 409 or an "already exist" body is treated as success
    /// (spec §4.C, §8 "namespace idempotence").
    pub async fn ensure_namespace(&self, name: &str) -> Result<(), EdgePlatformError> {
        let url = self.account_url("/workers/dispatch/namespaces");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(namespace = name, "dispatch namespace created");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 409 || body.to_lowercase().contains("already exist") {
            debug!(namespace = name, "dispatch namespace already exists, treating as success");
            return Ok(());
        }

        Err(map_status(status, body))
    }

    /// Multipart script upload into a dispatch namespace (spec §4.C, §6):
    /// `metadata` JSON part first, then an `index.js` part with content
    /// type `application/javascript+module`.
    pub async fn upload_script(
        &self,
        namespace: &str,
        name: &str,
        script_bytes: Vec<u8>,
        metadata: &ScriptMetadata,
    ) -> Result<(), EdgePlatformError> {
        let url = self.account_url(&format!("/workers/dispatch/namespaces/{namespace}/scripts/{name}"));
        self.upload_multipart(&url, script_bytes, metadata).await
    }

    /// Single shared-worker upload (spec §4.C `upload_worker`, used once for
    /// `overskill-dispatch`).
    pub async fn upload_worker(&self, name: &str, script_bytes: Vec<u8>, metadata: &ScriptMetadata) -> Result<(), EdgePlatformError> {
        let url = self.account_url(&format!("/workers/scripts/{name}"));
        self.upload_multipart(&url, script_bytes, metadata).await
    }

    async fn upload_multipart(&self, url: &str, script_bytes: Vec<u8>, metadata: &ScriptMetadata) -> Result<(), EdgePlatformError> {
        let metadata_json = serde_json::to_string(metadata).map_err(|e| EdgePlatformError::Permanent { code: 0, body: e.to_string() })?;

        // metadata part MUST be first (spec §6).
        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata_json).mime_str("application/json").unwrap(),
            )
            .part(
                "index.js",
                reqwest::multipart::Part::bytes(script_bytes)
                    .file_name("index.js")
                    .mime_str("application/javascript+module")
                    .unwrap(),
            );

        let response = self
            .http
            .put(url)
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(map_status(status, response.text().await.unwrap_or_default()))
    }

    pub async fn delete_script(&self, namespace: &str, name: &str) -> Result<(), EdgePlatformError> {
        let url = self.account_url(&format!("/workers/dispatch/namespaces/{namespace}/scripts/{name}"));
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            return Ok(());
        }
        Err(map_status(status, response.text().await.unwrap_or_default()))
    }

    pub async fn list_scripts(&self, namespace: &str) -> Result<Vec<String>, EdgePlatformError> {
        let url = self.account_url(&format!("/workers/dispatch/namespaces/{namespace}/scripts"));
        #[derive(Deserialize)]
        struct ScriptEntry {
            id: String,
        }
        let entries: Vec<ScriptEntry> = self.get_result(&url).await?;
        Ok(entries.into_iter().map(|e| e.id).collect())
    }

    /// Fetches raw script bytes, used by promotion (spec §4.I) to copy a
    /// compiled worker between namespaces without rebuilding.
    pub async fn get_script(&self, namespace: &str, name: &str) -> Result<Vec<u8>, EdgePlatformError> {
        let url = self.account_url(&format!("/workers/dispatch/namespaces/{namespace}/scripts/{name}/content"));
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(map_status(status, response.text().await.unwrap_or_default()));
        }
        Ok(response.bytes().await.map_err(|e| EdgePlatformError::Transient(e.to_string()))?.to_vec())
    }

    pub async fn list_routes(&self, zone: &str) -> Result<Vec<Route>, EdgePlatformError> {
        let url = format!("{}/zones/{}/workers/routes", self.api_base, zone);
        self.get_result(&url).await
    }

    /// Creates exactly one specific route; 409 is "already exists" (spec
    /// §4.E, §8). Wildcard patterns are never constructed by this client —
    /// callers pass a fully-specific pattern.
    pub async fn create_route(&self, zone: &str, pattern: &str, script: &str) -> Result<Route, EdgePlatformError> {
        let url = format!("{}/zones/{}/workers/routes", self.api_base, zone);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&CreateRouteRequest { pattern, script })
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;

        let status = response.status();
        let body: ApiEnvelope<Route> = response.json().await.map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        if status.is_success() && body.success {
            return body.result.ok_or_else(|| EdgePlatformError::Permanent { code: 0, body: "missing result".to_string() });
        }
        if status.as_u16() == 409 {
            return Ok(Route {
                id: String::new(),
                pattern: pattern.to_string(),
                script: Some(script.to_string()),
            });
        }
        Err(map_status(status, format_errors(&body.errors)))
    }

    pub async fn update_route(&self, zone: &str, id: &str, pattern: &str, script: &str) -> Result<(), EdgePlatformError> {
        let url = format!("{}/zones/{}/workers/routes/{}", self.api_base, zone, id);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(&CreateRouteRequest { pattern, script })
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 409 {
            return Ok(());
        }
        Err(map_status(status, response.text().await.unwrap_or_default()))
    }

    pub async fn zone_id(&self, domain: &str) -> Result<String, EdgePlatformError> {
        let url = format!("{}/zones?name={}", self.api_base, domain);
        let zones: Vec<ZoneEntry> = self.get_result(&url).await?;
        zones
            .into_iter()
            .next()
            .map(|z| z.id)
            .ok_or_else(|| EdgePlatformError::NotFound(format!("zone for domain {domain}")))
    }

    pub async fn account_subdomain(&self) -> Result<String, EdgePlatformError> {
        let url = self.account_url("/workers/subdomain");
        let body: SubdomainResponse = self.get_result(&url).await?;
        Ok(body.subdomain)
    }

    /// Idempotent get-or-create by title.
    pub async fn get_or_create_kv_namespace(&self, title: &str) -> Result<String, EdgePlatformError> {
        let list_url = self.account_url("/storage/kv/namespaces");
        let existing: Vec<KvNamespaceEntry> = self.get_result(&list_url).await.unwrap_or_default();
        if let Some(found) = existing.into_iter().find(|n| n.title == title) {
            return Ok(found.id);
        }

        let response = self
            .http
            .post(&list_url)
            .bearer_auth(&self.api_token)
            .json(&CreateKvNamespaceRequest { title })
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        let status = response.status();
        let body: ApiEnvelope<KvNamespaceEntry> = response.json().await.map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        if status.is_success() && body.success {
            return Ok(body.result.ok_or_else(|| EdgePlatformError::Permanent { code: 0, body: "missing result".to_string() })?.id);
        }
        Err(map_status(status, format_errors(&body.errors)))
    }

    pub async fn toggle_workers_dev(&self, script: &str, enabled: bool) -> Result<(), EdgePlatformError> {
        let url = self.account_url(&format!("/workers/scripts/{script}/subdomain"));
        let response = self
            .http
            .patch(&url)
            .bearer_auth(&self.api_token)
            .json(&ToggleSubdomainRequest { enabled })
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(map_status(status, response.text().await.unwrap_or_default()))
    }

    pub async fn workers_analytics(&self, start: chrono::DateTime<chrono::Utc>, end: chrono::DateTime<chrono::Utc>, sampling: f64) -> Result<serde_json::Value, EdgePlatformError> {
        let url = self.account_url(&format!(
            "/analytics/workers/data?since={}&until={}&sampling_rate={}",
            start.to_rfc3339(),
            end.to_rfc3339(),
            sampling
        ));
        self.get_result(&url).await
    }

    async fn get_result<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, EdgePlatformError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.api_token)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        let status = response.status();
        let body: ApiEnvelope<T> = response.json().await.map_err(|e| EdgePlatformError::Transient(e.to_string()))?;
        if status.is_success() && body.success {
            return body.result.ok_or_else(|| EdgePlatformError::Permanent { code: 0, body: "missing result".to_string() });
        }
        Err(map_status(status, format_errors(&body.errors)))
    }
}

fn format_errors(errors: &[ApiErrorEntry]) -> String {
    errors.iter().map(|e| format!("[{}] {}", e.code, e.message)).collect::<Vec<_>>().join(", ")
}

fn map_status(status: reqwest::StatusCode, body: String) -> EdgePlatformError {
    match status.as_u16() {
        404 => EdgePlatformError::NotFound(body),
        code if code >= 500 => EdgePlatformError::Transient(format!("status {code}: {body}")),
        code => EdgePlatformError::Permanent { code, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockResponse, MockServer};

    #[tokio::test]
    async fn ensure_namespace_treats_already_exists_body_as_success() {
        let server = MockServer::start(vec![MockResponse::json(400, r#"{"success":false,"errors":[{"code":1,"message":"namespace already exists"}]}"#)]).await;
        let client = EdgePlatformClient::new(reqwest::Client::new(), server.base_url, "acct-1", "token-1");
        client.ensure_namespace("tenant-ab12cd").await.unwrap();
    }

    #[tokio::test]
    async fn ensure_namespace_surfaces_other_errors() {
        let server = MockServer::start(vec![MockResponse::json(403, r#"{"success":false,"errors":[{"code":10000,"message":"forbidden"}]}"#)]).await;
        let client = EdgePlatformClient::new(reqwest::Client::new(), server.base_url, "acct-1", "token-1");
        let err = client.ensure_namespace("tenant-ab12cd").await.unwrap_err();
        assert!(matches!(err, EdgePlatformError::Permanent { code: 403, .. }));
    }

    #[test]
    fn binding_round_trips_extra_fields() {
        let binding = Binding {
            binding_type: "plain_text".to_string(),
            name: "APP_ID".to_string(),
            extra: serde_json::json!({ "text": "ab12cd" }).as_object().unwrap().clone(),
        };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["type"], "plain_text");
        assert_eq!(json["text"], "ab12cd");
    }
}
