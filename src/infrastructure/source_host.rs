//! Source-host client (spec §4.B, §6): typed wrapper over the GitHub-shaped
//! REST surface used for atomic multi-file commits, repo bootstrap, secret
//! sealing, and workflow-run polling.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SourceHostError;
use crate::infrastructure::credentials::CredentialProvider;
use crate::infrastructure::retry::{jittered, with_backoff, Attempt};

const CONFLICT_RETRIES: u32 = 3;

pub struct SourceHostClient {
    http: reqwest::Client,
    api_base: String,
    credentials: std::sync::Arc<CredentialProvider>,
    org: String,
    service_author_name: String,
    service_author_email: String,
}

#[derive(Debug, Clone)]
pub struct FileContent {
    pub content: Vec<u8>,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    content: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    committer: CommitAuthor,
}

#[derive(Debug, Serialize, Clone)]
struct CommitAuthor {
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: ContentsShaOnly,
}

#[derive(Debug, Deserialize)]
struct ContentsShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: TreeRef,
}

#[derive(Debug, Deserialize)]
struct TreeRef {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateBlobRequest<'a> {
    content: String,
    encoding: &'a str,
}

#[derive(Debug, Deserialize)]
struct BlobResponse {
    sha: String,
}

#[derive(Debug, Serialize)]
struct TreeEntry {
    path: String,
    mode: &'static str,
    #[serde(rename = "type")]
    entry_type: &'static str,
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateTreeRequest {
    base_tree: String,
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Serialize)]
struct CreateCommitRequest<'a> {
    message: &'a str,
    tree: String,
    parents: Vec<String>,
    author: CommitAuthor,
    committer: CommitAuthor,
}

#[derive(Debug, Serialize)]
struct UpdateRefRequest<'a> {
    sha: &'a str,
    force: bool,
}

/// Result of an atomic multi-file commit (spec §4.B `batch_commit`).
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub commit_sha: String,
    pub tree_sha: String,
}

#[derive(Debug, Deserialize)]
struct RepoPublicKey {
    key: String,
    key_id: String,
}

#[derive(Debug, Serialize)]
struct PutSecretRequest<'a> {
    encrypted_value: String,
    key_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    pub status: String,
    pub conclusion: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub head_sha: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    pub name: String,
    pub conclusion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunsListResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct JobsListResponse {
    jobs: Vec<WorkflowJob>,
}

#[derive(Debug, Serialize)]
struct CreateRepoRequest<'a> {
    name: &'a str,
    private: bool,
}

#[derive(Debug, Deserialize)]
pub struct RepoHandle {
    pub full_name: String,
    pub id: u64,
}

#[derive(Debug, Serialize)]
struct CreateTagObjectRequest<'a> {
    tag: &'a str,
    message: &'a str,
    object: &'a str,
    #[serde(rename = "type")]
    object_type: &'static str,
    tagger: CommitAuthor,
}

#[derive(Debug, Deserialize)]
struct TagObjectResponse {
    sha: String,
}

#[derive(Debug, Serialize)]
struct CreateRefRequest<'a> {
    #[serde(rename = "ref")]
    reference: String,
    sha: &'a str,
}

#[derive(Debug, Deserialize)]
struct TreeItemResponse {
    path: String,
    #[serde(rename = "type")]
    item_type: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct TreeRecursiveResponse {
    tree: Vec<TreeItemResponse>,
    truncated: bool,
}

/// One blob-backed entry discovered while walking a tag's tree (spec §4.D
/// `restore`).
#[derive(Debug, Clone)]
pub struct TreeBlob {
    pub path: String,
    pub sha: String,
}

#[derive(Debug, Deserialize)]
struct BlobContentResponse {
    content: String,
    encoding: String,
}

#[derive(Debug, Serialize)]
struct ActionsPermissionsRequest {
    enabled: bool,
}

impl SourceHostClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        credentials: std::sync::Arc<CredentialProvider>,
        org: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            credentials,
            org: org.into(),
            service_author_name: "overskill-bot".to_string(),
            service_author_email: "bot@overskill.app".to_string(),
        }
    }

    async fn auth_header(&self) -> Result<String, SourceHostError> {
        let token = self.credentials.token_for(&self.org).await?;
        Ok(format!("Bearer {}", token.token))
    }

    fn author(&self) -> CommitAuthor {
        CommitAuthor {
            name: self.service_author_name.clone(),
            email: self.service_author_email.clone(),
        }
    }

    /// `GET /repos/{owner}/{repo}/contents/{path}` — base64-decodes content.
    pub async fn get_file(&self, repo: &str, path: &str, git_ref: &str) -> Result<Option<FileContent>, SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/repos/{}/contents/{}?ref={}", self.api_base, repo, path, git_ref);
        let response = self
            .http
            .get(&url)
            .header("Authorization", &auth)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| SourceHostError::Transient(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(map_error_status(status, response.text().await.unwrap_or_default()));
        }

        let body: ContentsResponse = response
            .json()
            .await
            .map_err(|e| SourceHostError::Transient(e.to_string()))?;
        let content = base64::engine::general_purpose::STANDARD
            .decode(body.content.replace('\n', ""))
            .map_err(|e| SourceHostError::Permanent { code: 200, body: e.to_string() })?;

        Ok(Some(FileContent { content, sha: body.sha }))
    }

    /// `PUT /repos/{owner}/{repo}/contents/{path}` with SHA-conflict retry
    /// (spec §4.B): on 409, refetches the current SHA and retries up to 3
    /// times with jitter (0.5s * attempt).
    pub async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &[u8],
        message: &str,
        branch: &str,
        expected_sha: Option<&str>,
    ) -> Result<String, SourceHostError> {
        let mut sha = expected_sha.map(|s| s.to_string());

        for attempt in 1..=CONFLICT_RETRIES {
            let auth = self.auth_header().await?;
            let url = format!("{}/repos/{}/contents/{}", self.api_base, repo, path);
            let request = PutContentsRequest {
                message,
                content: base64::engine::general_purpose::STANDARD.encode(content),
                branch,
                sha: sha.as_deref(),
                committer: self.author(),
            };

            let response = self
                .http
                .put(&url)
                .header("Authorization", &auth)
                .json(&request)
                .send()
                .await
                .map_err(|e| SourceHostError::Transient(e.to_string()))?;

            let status = response.status();
            if status.is_success() {
                let body: PutContentsResponse = response
                    .json()
                    .await
                    .map_err(|e| SourceHostError::Transient(e.to_string()))?;
                return Ok(body.content.sha);
            }

            if status.as_u16() == 409 {
                warn!(path, attempt, "sha conflict on put_file, refetching and retrying");
                let current = self.get_file(repo, path, branch).await?;
                sha = current.map(|c| c.sha);
                tokio::time::sleep(jittered(Duration::from_millis(500 * attempt as u64))).await;
                continue;
            }

            return Err(map_error_status(status, response.text().await.unwrap_or_default()));
        }

        Err(SourceHostError::Conflict {
            path: path.to_string(),
            attempts: CONFLICT_RETRIES,
        })
    }

    /// Atomic multi-file commit via the low-level tree/blob/commit/ref API
    /// (spec §4.B). Any step failure aborts before the ref moves.
    pub async fn batch_commit(
        &self,
        repo: &str,
        files: &std::collections::BTreeMap<String, Vec<u8>>,
        message: &str,
        branch: &str,
    ) -> Result<CommitResult, SourceHostError> {
        let auth = self.auth_header().await?;

        // 1. read branch ref
        let ref_url = format!("{}/repos/{}/git/refs/heads/{}", self.api_base, repo, branch);
        let ref_resp = self.get_json::<RefResponse>(&ref_url, &auth).await.map_err(|e| {
            SourceHostError::PartialBootstrap {
                step: "read_ref".to_string(),
                cause: e.to_string(),
            }
        })?;
        let head_sha = ref_resp.object.sha;

        // 2. read HEAD commit
        let commit_url = format!("{}/repos/{}/git/commits/{}", self.api_base, repo, head_sha);
        let head_commit = self.get_json::<CommitResponse>(&commit_url, &auth).await.map_err(|e| {
            SourceHostError::PartialBootstrap {
                step: "read_head_commit".to_string(),
                cause: e.to_string(),
            }
        })?;

        // 3. create a blob per file
        let mut entries = Vec::with_capacity(files.len());
        for (path, content) in files {
            let blob_url = format!("{}/repos/{}/git/blobs", self.api_base, repo);
            let blob_req = CreateBlobRequest {
                content: base64::engine::general_purpose::STANDARD.encode(content),
                encoding: "base64",
            };
            let blob = self
                .post_json::<_, BlobResponse>(&blob_url, &auth, &blob_req)
                .await
                .map_err(|e| SourceHostError::PartialBootstrap {
                    step: format!("create_blob:{path}"),
                    cause: e.to_string(),
                })?;
            entries.push(TreeEntry {
                path: path.clone(),
                mode: "100644",
                entry_type: "blob",
                sha: blob.sha,
            });
        }

        // 4. create a tree with base_tree = HEAD.tree_sha
        let tree_url = format!("{}/repos/{}/git/trees", self.api_base, repo);
        let tree_req = CreateTreeRequest {
            base_tree: head_commit.tree.sha.clone(),
            tree: entries,
        };
        let tree = self
            .post_json::<_, BlobResponse>(&tree_url, &auth, &tree_req)
            .await
            .map_err(|e| SourceHostError::PartialBootstrap {
                step: "create_tree".to_string(),
                cause: e.to_string(),
            })?;

        // 5. create a commit with parent = HEAD and the new tree
        let commit_create_url = format!("{}/repos/{}/git/commits", self.api_base, repo);
        let commit_req = CreateCommitRequest {
            message,
            tree: tree.sha.clone(),
            parents: vec![head_sha],
            author: self.author(),
            committer: self.author(),
        };
        let commit = self
            .post_json::<_, BlobResponse>(&commit_create_url, &auth, &commit_req)
            .await
            .map_err(|e| SourceHostError::PartialBootstrap {
                step: "create_commit".to_string(),
                cause: e.to_string(),
            })?;

        // 6. fast-forward the ref. A conflict here is NOT retried — it
        // surfaces to the caller per spec §7 ("conflicts on ref updates in
        // batch_commit are not retried and surface as Conflict").
        let update_ref_url = format!("{}/repos/{}/git/refs/heads/{}", self.api_base, repo, branch);
        let update_req = UpdateRefRequest {
            sha: &commit.sha,
            force: false,
        };
        let response = self
            .http
            .patch(&update_ref_url)
            .header("Authorization", &auth)
            .json(&update_req)
            .send()
            .await
            .map_err(|e| SourceHostError::Transient(e.to_string()))?;

        if response.status().as_u16() == 409 {
            return Err(SourceHostError::Conflict {
                path: format!("refs/heads/{branch}"),
                attempts: 1,
            });
        }
        if !response.status().is_success() {
            return Err(map_error_status(response.status(), response.text().await.unwrap_or_default()));
        }

        Ok(CommitResult {
            commit_sha: commit.sha,
            tree_sha: tree.sha,
        })
    }

    /// `POST /orgs/{org}/repos`
    pub async fn create_repo(&self, name: &str, private: bool) -> Result<RepoHandle, SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/orgs/{}/repos", self.api_base, self.org);
        self.post_json(&url, &auth, &CreateRepoRequest { name, private }).await
    }

    /// `POST /repos/{template}/forks`
    pub async fn fork_repo(&self, template: &str, new_name: &str) -> Result<RepoHandle, SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/repos/{}/forks?name={}&organization={}", self.api_base, template, new_name, self.org);
        self.post_json(&url, &auth, &serde_json::json!({})).await
    }

    /// `PUT /repos/.../actions/secrets/{name}` — fetches the repo's public
    /// key, seals the value with a NaCl-compatible sealed box, submits the
    /// base64 ciphertext plus `key_id` (spec §4.B, §6).
    pub async fn put_secret(&self, repo: &str, name: &str, value: &str) -> Result<(), SourceHostError> {
        let auth = self.auth_header().await?;
        let key_url = format!("{}/repos/{}/actions/secrets/public-key", self.api_base, repo);
        let public_key: RepoPublicKey = self.get_json(&key_url, &auth).await?;

        let encrypted = crate::infrastructure::sealed_box::seal(&public_key.key, value.as_bytes())
            .map_err(|e| SourceHostError::Permanent { code: 0, body: e })?;

        let secret_url = format!("{}/repos/{}/actions/secrets/{}", self.api_base, repo, name);
        let request = PutSecretRequest {
            encrypted_value: encrypted,
            key_id: &public_key.key_id,
        };
        let response = self
            .http
            .put(&secret_url)
            .header("Authorization", &auth)
            .json(&request)
            .send()
            .await
            .map_err(|e| SourceHostError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(map_error_status(response.status(), response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    pub async fn list_runs(&self, repo: &str, branch: Option<&str>) -> Result<Vec<WorkflowRun>, SourceHostError> {
        let auth = self.auth_header().await?;
        let mut url = format!("{}/repos/{}/actions/runs", self.api_base, repo);
        if let Some(branch) = branch {
            url.push_str(&format!("?branch={}", branch));
        }
        let body: RunsListResponse = self.get_json(&url, &auth).await?;
        Ok(body.workflow_runs)
    }

    pub async fn get_run(&self, repo: &str, run_id: u64) -> Result<WorkflowRun, SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/repos/{}/actions/runs/{}", self.api_base, repo, run_id);
        self.get_json(&url, &auth).await
    }

    pub async fn list_jobs(&self, repo: &str, run_id: u64) -> Result<Vec<WorkflowJob>, SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/repos/{}/actions/runs/{}/jobs", self.api_base, repo, run_id);
        let body: JobsListResponse = self.get_json(&url, &auth).await?;
        Ok(body.jobs)
    }

    pub async fn get_job_logs(&self, repo: &str, job_id: u64) -> Result<Vec<u8>, SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/repos/{}/actions/jobs/{}/logs", self.api_base, repo, job_id);
        let response = self
            .http
            .get(&url)
            .header("Authorization", &auth)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| SourceHostError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(map_error_status(response.status(), response.text().await.unwrap_or_default()));
        }
        Ok(response.bytes().await.map_err(|e| SourceHostError::Transient(e.to_string()))?.to_vec())
    }

    /// Enables Actions workflows on a repo (spec §4.D: "the fork path must
    /// enable workflows on the fork before first push — private forks do
    /// not run workflows by default").
    pub async fn enable_actions(&self, repo: &str) -> Result<(), SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/repos/{}/actions/permissions", self.api_base, repo);
        let response = self
            .http
            .put(&url)
            .header("Authorization", &auth)
            .json(&ActionsPermissionsRequest { enabled: true })
            .send()
            .await
            .map_err(|e| SourceHostError::Transient(e.to_string()))?;
        if !response.status().is_success() {
            return Err(map_error_status(response.status(), response.text().await.unwrap_or_default()));
        }
        Ok(())
    }

    /// Creates an annotated tag object plus its `refs/tags/{name}` ref
    /// (spec §4.D tagging). Returns the tag object's sha.
    pub async fn create_tag(&self, repo: &str, tag_name: &str, commit_sha: &str, message: &str) -> Result<String, SourceHostError> {
        let auth = self.auth_header().await?;
        let tag_url = format!("{}/repos/{}/git/tags", self.api_base, repo);
        let tag_req = CreateTagObjectRequest {
            tag: tag_name,
            message,
            object: commit_sha,
            object_type: "commit",
            tagger: self.author(),
        };
        let tag: TagObjectResponse = self.post_json(&tag_url, &auth, &tag_req).await?;

        let ref_url = format!("{}/repos/{}/git/refs", self.api_base, repo);
        let ref_req = CreateRefRequest {
            reference: format!("refs/tags/{tag_name}"),
            sha: &tag.sha,
        };
        let _: RefResponse = self.post_json(&ref_url, &auth, &ref_req).await?;
        Ok(tag.sha)
    }

    /// Resolves an annotated tag's name to the commit sha it points at
    /// (spec §4.D `restore`, step 1). `refs/tags/{name}` points at the tag
    /// object, so this dereferences one level further to the commit.
    pub async fn resolve_tag(&self, repo: &str, tag_name: &str) -> Result<String, SourceHostError> {
        let auth = self.auth_header().await?;
        let ref_url = format!("{}/repos/{}/git/refs/tags/{}", self.api_base, repo, tag_name);
        let tag_ref: RefResponse = self.get_json(&ref_url, &auth).await?;

        let tag_url = format!("{}/repos/{}/git/tags/{}", self.api_base, repo, tag_ref.object.sha);
        #[derive(Deserialize)]
        struct AnnotatedTag {
            object: RefObject,
        }
        match self.get_json::<AnnotatedTag>(&tag_url, &auth).await {
            Ok(annotated) => Ok(annotated.object.sha),
            Err(_) => Ok(tag_ref.object.sha),
        }
    }

    /// Lists every blob-type entry in the tree rooted at `commit_sha`,
    /// excluding any path matched by `skip` (spec §4.D restore skip list).
    pub async fn list_tree_blobs(&self, repo: &str, commit_sha: &str, skip: &[&str]) -> Result<Vec<TreeBlob>, SourceHostError> {
        let auth = self.auth_header().await?;
        let commit_url = format!("{}/repos/{}/git/commits/{}", self.api_base, repo, commit_sha);
        let commit: CommitResponse = self.get_json(&commit_url, &auth).await?;

        let tree_url = format!("{}/repos/{}/git/trees/{}?recursive=1", self.api_base, repo, commit.tree.sha);
        let tree: TreeRecursiveResponse = self.get_json(&tree_url, &auth).await?;
        if tree.truncated {
            warn!(repo, "tree listing truncated by source host, restore may be incomplete");
        }

        Ok(tree
            .tree
            .into_iter()
            .filter(|e| e.item_type == "blob")
            .filter(|e| !is_skipped(&e.path, skip))
            .map(|e| TreeBlob { path: e.path, sha: e.sha })
            .collect())
    }

    /// Fetches and base64-decodes a blob's content by sha.
    pub async fn get_blob(&self, repo: &str, sha: &str) -> Result<Vec<u8>, SourceHostError> {
        let auth = self.auth_header().await?;
        let url = format!("{}/repos/{}/git/blobs/{}", self.api_base, repo, sha);
        let body: BlobContentResponse = self.get_json(&url, &auth).await?;
        if body.encoding != "base64" {
            return Err(SourceHostError::Permanent { code: 200, body: format!("unsupported blob encoding {}", body.encoding) });
        }
        base64::engine::general_purpose::STANDARD
            .decode(body.content.replace('\n', ""))
            .map_err(|e| SourceHostError::Permanent { code: 200, body: e.to_string() })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str, auth: &str) -> Result<T, SourceHostError> {
        self.with_transient_retry(|| async {
            self.http
                .get(url)
                .header("Authorization", auth)
                .header("Accept", "application/vnd.github.v3+json")
                .send()
                .await
        })
        .await
    }

    async fn post_json<B: Serialize, T: for<'de> Deserialize<'de>>(&self, url: &str, auth: &str, body: &B) -> Result<T, SourceHostError> {
        self.with_transient_retry(|| async {
            self.http
                .post(url)
                .header("Authorization", auth)
                .header("Accept", "application/vnd.github.v3+json")
                .json(body)
                .send()
                .await
        })
        .await
    }

    /// Shared 5xx/network retry wrapper (spec §4.B: "5xx and network errors
    /// => Transient, retried three times with exponential backoff; 429
    /// respects Retry-After").
    async fn with_transient_retry<T, F, Fut>(&self, mut send: F) -> Result<T, SourceHostError>
    where
        T: for<'de> Deserialize<'de>,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let delays = with_backoff_delays();
        let result = with_backoff(&delays, |attempt| {
            let send_fut = send();
            async move {
                match send_fut.await {
                    Ok(resp) if resp.status().is_success() => match resp.json::<T>().await {
                        Ok(body) => Attempt::Done(Ok(body)),
                        Err(e) => Attempt::Done(Err(SourceHostError::Transient(e.to_string()))),
                    },
                    Ok(resp) if resp.status().as_u16() == 429 => {
                        let retry_after = resp
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(1);
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        Attempt::Retry
                    }
                    Ok(resp) if resp.status().is_server_error() => {
                        debug!(status = %resp.status(), attempt, "transient source-host failure, retrying");
                        Attempt::Retry
                    }
                    Ok(resp) => {
                        let status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        Attempt::Done(Err(map_error_status(status, body)))
                    }
                    Err(e) => {
                        warn!(error = %e, attempt, "source-host request failed, retrying");
                        Attempt::Retry
                    }
                }
            }
        })
        .await;

        result.unwrap_or_else(|| Err(SourceHostError::Transient("retries exhausted".to_string())))
    }
}

/// Matches a path against the restore skip list (spec §4.D): glob-lite
/// `prefix/**` entries match any descendant, `*.ext` matches by suffix,
/// anything else matches by exact prefix.
fn is_skipped(path: &str, skip: &[&str]) -> bool {
    skip.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix("/**") {
            path == prefix || path.starts_with(&format!("{prefix}/"))
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            path.ends_with(suffix)
        } else if let Some(prefix) = pattern.strip_suffix('*') {
            path.starts_with(prefix)
        } else {
            path == *pattern || path.starts_with(&format!("{pattern}/"))
        }
    })
}

fn with_backoff_delays() -> Vec<Duration> {
    crate::infrastructure::retry::linear(Duration::from_secs(1), 3)
}

fn map_error_status(status: reqwest::StatusCode, body: String) -> SourceHostError {
    match status.as_u16() {
        404 => SourceHostError::NotFound(body),
        409 => SourceHostError::Conflict { path: String::new(), attempts: 0 },
        429 => SourceHostError::RateLimited { retry_after_secs: 1 },
        code if (400..500).contains(&code) => SourceHostError::Permanent { code, body },
        code => SourceHostError::Transient(format!("status {code}: {body}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credentials::{CredentialProvider, Token};
    use crate::test_support::{MockResponse, MockServer};

    /// A client with a pre-seeded token cache, so tests exercise the HTTP
    /// layer without needing a real RSA signing key.
    async fn client_against(base_url: &str) -> SourceHostClient {
        let credentials = std::sync::Arc::new(CredentialProvider::new(reqwest::Client::new(), base_url.to_string(), "app-1", None));
        credentials
            .seed_cache(
                "acme",
                Token {
                    token: "test-token".to_string(),
                    expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
                },
            )
            .await;
        SourceHostClient::new(reqwest::Client::new(), base_url.to_string(), credentials, "acme")
    }

    #[tokio::test]
    async fn get_file_returns_none_on_404() {
        let server = MockServer::start(vec![MockResponse::json(404, "{}")]).await;
        let client = client_against(&server.base_url).await;
        let result = client.get_file("acme/app", "src/index.ts", "main").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn get_file_decodes_base64_content_on_success() {
        let body = serde_json::json!({ "content": base64::engine::general_purpose::STANDARD.encode(b"export default {}"), "sha": "deadbeef" }).to_string();
        let server = MockServer::start(vec![MockResponse::json(200, body)]).await;
        let client = client_against(&server.base_url).await;
        let file = client.get_file("acme/app", "src/index.ts", "main").await.unwrap().unwrap();
        assert_eq!(file.content, b"export default {}");
        assert_eq!(file.sha, "deadbeef");
    }

    #[tokio::test]
    async fn list_runs_parses_workflow_runs_from_envelope() {
        let body = serde_json::json!({
            "workflow_runs": [
                { "id": 42, "status": "completed", "conclusion": "success", "created_at": "2026-01-01T00:00:00Z", "head_sha": "abc123" }
            ]
        })
        .to_string();
        let server = MockServer::start(vec![MockResponse::json(200, body)]).await;
        let client = client_against(&server.base_url).await;
        let runs = client.list_runs("acme/app", None).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, 42);
        assert_eq!(runs[0].conclusion.as_deref(), Some("success"));
    }

    #[test]
    fn map_error_status_classifies_4xx_as_permanent_except_409_429_404() {
        assert!(matches!(map_error_status(reqwest::StatusCode::FORBIDDEN, String::new()), SourceHostError::Permanent { code: 403, .. }));
        assert!(matches!(map_error_status(reqwest::StatusCode::NOT_FOUND, String::new()), SourceHostError::NotFound(_)));
        assert!(matches!(map_error_status(reqwest::StatusCode::CONFLICT, String::new()), SourceHostError::Conflict { .. }));
    }

    #[test]
    fn map_error_status_classifies_5xx_as_transient() {
        assert!(matches!(
            map_error_status(reqwest::StatusCode::BAD_GATEWAY, String::new()),
            SourceHostError::Transient(_)
        ));
    }

    #[test]
    fn is_skipped_matches_restore_skip_list() {
        let skip = [".git/**", ".github/workflows/**", "node_modules/**", "dist/**", "build/**", "*.map", ".env*"];
        assert!(is_skipped(".github/workflows/deploy.yml", &skip));
        assert!(is_skipped("node_modules/react/index.js", &skip));
        assert!(is_skipped("dist/index.js.map", &skip));
        assert!(is_skipped(".env.production", &skip));
        assert!(!is_skipped("src/App.tsx", &skip));
    }
}
