//! Build monitor (spec §4.G): polls the source host for the run produced
//! by a commit, surfaces bounded-rate progress, and drives the
//! classify-fix-recommit auto-fix loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::{App, Environment};
use crate::error::MonitorError;
use crate::infrastructure::retry;
use crate::infrastructure::source_host::SourceHostClient;
use crate::services::classifier::{self, JobLog};
use crate::services::dispatch_publisher::DispatchPublisher;
use crate::services::repository_orchestrator::RepositoryOrchestrator;
use crate::services::state_store::{DeploymentHandle, DeploymentStore};

/// One progress update (spec §4.G step 2). Sent on a `watch` channel so at
/// most one update is ever in flight; a consumer that falls behind simply
/// observes the latest value, never a backlog.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub status: String,
    pub elapsed_s: u64,
    pub estimated_total_s: u64,
    pub run_id: u64,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Success { run_id: u64, url: String, elapsed_s: u64 },
    Failure { run_id: Option<u64>, error: String, elapsed_s: u64 },
}

pub struct MonitorConfig {
    pub discovery_deadline_s: u64,
    pub check_interval_s: u64,
    pub wall_deadline_s: u64,
    pub estimated_total_s: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            discovery_deadline_s: 180,
            check_interval_s: 30,
            wall_deadline_s: 600,
            estimated_total_s: 120,
        }
    }
}

impl MonitorConfig {
    /// Widened discovery window for a repo mutated in the last 10 minutes
    /// (spec §4.G step 1).
    pub fn discovery_deadline_for(recently_mutated: bool) -> u64 {
        if recently_mutated {
            300
        } else {
            180
        }
    }
}

pub struct BuildMonitor {
    source: Arc<SourceHostClient>,
    orchestrator: Arc<RepositoryOrchestrator>,
    dispatch: Arc<DispatchPublisher>,
    state: Arc<DeploymentStore>,
    config: MonitorConfig,
    /// Zone routes are registered against; `None` skips route creation
    /// entirely (no `apps_domain` configured, spec §4.E).
    zone: Option<String>,
}

impl BuildMonitor {
    pub fn new(
        source: Arc<SourceHostClient>,
        orchestrator: Arc<RepositoryOrchestrator>,
        dispatch: Arc<DispatchPublisher>,
        state: Arc<DeploymentStore>,
        config: MonitorConfig,
        zone: Option<String>,
    ) -> Self {
        Self {
            source,
            orchestrator,
            dispatch,
            state,
            config,
            zone,
        }
    }

    /// Drives one deployment to a terminal outcome, auto-fixing and
    /// recommitting on failure up to the budget the classifier computes
    /// (spec §4.G). `app` is mutated in place as fixes are applied so the
    /// next commit publishes the patched tree.
    pub async fn monitor(
        &self,
        app: &mut App,
        env: Environment,
        handle: &DeploymentHandle,
        mut commit_sha: String,
        progress: Option<watch::Sender<ProgressEvent>>,
        cancellation: CancellationToken,
    ) -> Result<Outcome, MonitorError> {
        let repo = app
            .repository_full_name()
            .ok_or_else(|| MonitorError::SourceHost(crate::error::SourceHostError::Permanent {
                code: 0,
                body: "app has no repository".to_string(),
            }))?
            .to_string();

        let mut attempt: u32 = 0;
        let started = std::time::Instant::now();

        loop {
            if cancellation.is_cancelled() {
                return Ok(Outcome::Failure {
                    run_id: None,
                    error: "cancelled".to_string(),
                    elapsed_s: started.elapsed().as_secs(),
                });
            }

            let run_id = match self.discover_run(&repo, &commit_sha, &cancellation).await? {
                Some(run_id) => run_id,
                None => {
                    self.state
                        .fail(handle, serde_json::json!({ "reason": "run_discovery_timed_out" }))
                        .await?;
                    return Ok(Outcome::Failure {
                        run_id: None,
                        error: "no workflow run discovered for commit".to_string(),
                        elapsed_s: started.elapsed().as_secs(),
                    });
                }
            };

            match self.poll_until_complete(&repo, run_id, &progress, &cancellation).await? {
                None => {
                    return Ok(Outcome::Failure {
                        run_id: Some(run_id),
                        error: "cancelled".to_string(),
                        elapsed_s: started.elapsed().as_secs(),
                    });
                }
                Some(run) if run.conclusion.as_deref() == Some("success") => {
                    if let Some(zone) = &self.zone {
                        // Route creation failures degrade to path-style URL,
                        // never fail the deploy itself (spec §4.E, §7).
                        let _ = self.dispatch.ensure_route(zone, app, env).await;
                    }
                    let url = self.dispatch.derive_url(app, env).await?;
                    self.state.complete(handle, url.url.clone()).await?;
                    app.record_deploy(env, chrono::Utc::now());
                    return Ok(Outcome::Success {
                        run_id,
                        url: url.url,
                        elapsed_s: started.elapsed().as_secs(),
                    });
                }
                Some(_failed_run) => {
                    let jobs = self.source.list_jobs(&repo, run_id).await?;
                    let mut logs = Vec::with_capacity(jobs.len());
                    for job in jobs.iter().filter(|j| j.conclusion.as_deref() != Some("success")) {
                        let raw = self.source.get_job_logs(&repo, job.id).await?;
                        logs.push(JobLog {
                            job_name: job.name.clone(),
                            job_id: job.id,
                            logs: String::from_utf8_lossy(&raw).to_string(),
                            failed_steps: vec![job.name.clone()],
                        });
                    }

                    let errors = classifier::classify(&logs);
                    if classifier::retry_is_refused(&errors) {
                        self.fail_with_errors(handle, &errors).await?;
                        return Ok(Outcome::Failure {
                            run_id: Some(run_id),
                            error: "no auto-fixable errors detected".to_string(),
                            elapsed_s: started.elapsed().as_secs(),
                        });
                    }

                    let fixable_count = errors.iter().filter(|e| e.auto_fixable).count();
                    let budget = classifier::retry_budget(errors.len(), fixable_count);
                    if attempt >= budget {
                        self.fail_with_errors(handle, &errors).await?;
                        return Ok(Outcome::Failure {
                            run_id: Some(run_id),
                            error: "auto-fix retry budget exhausted".to_string(),
                            elapsed_s: started.elapsed().as_secs(),
                        });
                    }

                    let mut patched_any = false;
                    for error in errors.iter().filter(|e| e.auto_fixable) {
                        let Some(path) = &error.file else { continue };
                        let existing = app.file(path).cloned();
                        if let Some(patch) = classifier::propose_patch(error, existing.as_ref()) {
                            if let Ok(file) = crate::domain::AppFile::new(patch.path.clone(), patch.content, crate::domain::FileType::Text) {
                                app.upsert_file(file);
                                patched_any = true;
                            }
                        }
                    }

                    if !patched_any {
                        self.fail_with_errors(handle, &errors).await?;
                        return Ok(Outcome::Failure {
                            run_id: Some(run_id),
                            error: "classifier produced no applicable patches".to_string(),
                            elapsed_s: started.elapsed().as_secs(),
                        });
                    }

                    let fixed_kinds: Vec<_> = errors.iter().filter(|e| e.auto_fixable).map(|e| e.kind).collect();
                    let marker = format!("{}-autofix-{}", app.id, attempt + 1);
                    commit_sha = self.orchestrator.publish_fix(app, &marker, &fixed_kinds).await?;

                    let delays = classifier::retry_delays();
                    let delay = delays[(attempt as usize).min(delays.len() - 1)];
                    info!(app = %app.id, attempt, delay_s = delay.as_secs(), "auto-fix applied, recommitted, sleeping before re-poll");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }

            if started.elapsed().as_secs() >= self.config.wall_deadline_s {
                self.state.fail(handle, serde_json::json!({ "reason": "wall_deadline_exceeded" })).await?;
                return Ok(Outcome::Failure {
                    run_id: None,
                    error: "wall deadline exceeded".to_string(),
                    elapsed_s: started.elapsed().as_secs(),
                });
            }
        }
    }

    async fn fail_with_errors(&self, handle: &DeploymentHandle, errors: &[crate::domain::BuildError]) -> Result<(), MonitorError> {
        self.state
            .fail(handle, serde_json::json!({ "errors": errors }))
            .await
            .map_err(MonitorError::from)
    }

    /// Run discovery with exponential backoff (spec §4.G step 1): 10s,
    /// 15s, 22s, ... capped at 30s, up to `discovery_deadline_s`.
    async fn discover_run(&self, repo: &str, commit_sha: &str, cancellation: &CancellationToken) -> Result<Option<u64>, MonitorError> {
        let started = std::time::Instant::now();
        let delays = retry::growing(std::time::Duration::from_secs(10), 1.5, std::time::Duration::from_secs(30), 32);
        let mut attempt = 0usize;
        loop {
            if cancellation.is_cancelled() {
                return Ok(None);
            }
            let runs = self.source.list_runs(repo, None).await?;
            if let Some(run) = runs.iter().filter(|r| r.head_sha == commit_sha).max_by_key(|r| r.created_at) {
                return Ok(Some(run.id));
            }
            if started.elapsed().as_secs() >= self.config.discovery_deadline_s {
                return Ok(None);
            }
            tokio::time::sleep(delays[attempt.min(delays.len() - 1)]).await;
            attempt += 1;
        }
    }

    /// Polls every `check_interval_s` until `completed` or `wall_deadline_s`
    /// elapses, emitting progress at most once-in-flight (spec §4.G step
    /// 2). Returns `None` on cancellation.
    async fn poll_until_complete(
        &self,
        repo: &str,
        run_id: u64,
        progress: &Option<watch::Sender<ProgressEvent>>,
        cancellation: &CancellationToken,
    ) -> Result<Option<crate::infrastructure::source_host::WorkflowRun>, MonitorError> {
        let started = std::time::Instant::now();
        loop {
            if cancellation.is_cancelled() {
                return Ok(None);
            }
            let run = self.source.get_run(repo, run_id).await?;
            let elapsed_s = (chrono::Utc::now() - run.created_at).num_seconds().max(0) as u64;

            if let Some(sender) = progress {
                // `watch::Sender::send` overwrites any unconsumed value —
                // exactly the "drop newer if prior not consumed" semantics
                // spec §4.G/§5 ask for, with no custom channel needed.
                let _ = sender.send(ProgressEvent {
                    status: run.status.clone(),
                    elapsed_s,
                    estimated_total_s: self.config.estimated_total_s,
                    run_id,
                });
            }

            if run.status == "completed" {
                return Ok(Some(run));
            }
            if started.elapsed().as_secs() >= self.config.wall_deadline_s {
                warn!(repo, run_id, "wall deadline elapsed while polling run status");
                return Ok(Some(run));
            }

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(self.config.check_interval_s)) => {}
                _ = cancellation.cancelled() => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_deadline_widens_for_recent_mutation() {
        assert_eq!(MonitorConfig::discovery_deadline_for(true), 300);
        assert_eq!(MonitorConfig::discovery_deadline_for(false), 180);
    }

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.check_interval_s, 30);
        assert_eq!(config.wall_deadline_s, 600);
        assert_eq!(config.estimated_total_s, 120);
    }
}
