use thiserror::Error;

/// Closed set of deploy targets. Each maps to exactly one dispatch
/// namespace named `overskill-{runtime_env}-{environment}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Preview,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Preview => "preview",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    /// Host/path prefix used by the dispatch worker and in public URLs; the
    /// empty string for production.
    pub fn url_prefix(self) -> &'static str {
        match self {
            Environment::Preview => "preview-",
            Environment::Staging => "staging-",
            Environment::Production => "",
        }
    }

    pub fn parse_prefix(host_or_script: &str) -> (Environment, &str) {
        if let Some(rest) = host_or_script.strip_prefix("preview-") {
            (Environment::Preview, rest)
        } else if let Some(rest) = host_or_script.strip_prefix("staging-") {
            (Environment::Staging, rest)
        } else {
            (Environment::Production, host_or_script)
        }
    }
}

/// Identifies which instance of the control plane is running — distinct
/// from [`Environment`], which identifies the tenant deploy target. Used to
/// compose the dispatch namespace name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnv {
    Development,
    Staging,
    Production,
}

impl RuntimeEnv {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeEnv::Development => "development",
            RuntimeEnv::Staging => "staging",
            RuntimeEnv::Production => "production",
        }
    }
}

/// Dispatch namespace name for a given control-plane instance and tenant
/// environment: `overskill-{runtime_env}-{environment}`.
pub fn namespace_name(runtime_env: RuntimeEnv, env: Environment) -> String {
    format!("overskill-{}-{}", runtime_env.as_str(), env.as_str())
}

/// Status of a [`Deployment`] row. `NotDeployed` is a synthetic status for
/// apps/envs with no row yet and is never itself a row's persisted status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    NotDeployed,
    Deploying,
    Deployed,
    Failed,
}

#[derive(Debug, Error)]
#[error("illegal deployment transition: {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: DeploymentStatus,
    pub to: DeploymentStatus,
}

/// A per-`(app, environment)` deployment record. Many rows are
/// allowed per `(app, environment)` over time; transitions are one-way:
/// `Deploying -> Deployed` or `Deploying -> Failed`, never out of a
/// terminal state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Deployment {
    pub deployment_id: String,
    pub app_id: String,
    pub environment: Environment,
    pub status: DeploymentStatus,
    pub url: Option<String>,
    pub initiated_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub metadata: serde_json::Value,
}

impl Deployment {
    pub fn begin(
        deployment_id: impl Into<String>,
        app_id: impl Into<String>,
        environment: Environment,
        initiated_by: impl Into<String>,
        now: chrono::DateTime<chrono::Utc>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            deployment_id: deployment_id.into(),
            app_id: app_id.into(),
            environment,
            status: DeploymentStatus::Deploying,
            url: None,
            initiated_by: initiated_by.into(),
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// Applies a transition, rejecting any edge other than
    /// `Deploying -> Deployed` / `Deploying -> Failed`.
    pub fn transition(
        &mut self,
        to: DeploymentStatus,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), IllegalTransition> {
        let allowed = matches!(
            (self.status, to),
            (DeploymentStatus::Deploying, DeploymentStatus::Deployed)
                | (DeploymentStatus::Deploying, DeploymentStatus::Failed)
        );
        if !allowed {
            return Err(IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn namespace_name_composes_runtime_and_environment() {
        assert_eq!(
            namespace_name(RuntimeEnv::Production, Environment::Staging),
            "overskill-production-staging"
        );
    }

    #[test]
    fn deploying_to_deployed_is_allowed() {
        let mut d = Deployment::begin("x", "ab12cd", Environment::Production, "system", Utc::now(), serde_json::json!({}));
        d.transition(DeploymentStatus::Deployed, Utc::now()).unwrap();
        assert_eq!(d.status, DeploymentStatus::Deployed);
    }

    #[test]
    fn cannot_leave_a_terminal_state() {
        let mut d = Deployment::begin("x", "ab12cd", Environment::Production, "system", Utc::now(), serde_json::json!({}));
        d.transition(DeploymentStatus::Deployed, Utc::now()).unwrap();
        let err = d.transition(DeploymentStatus::Deploying, Utc::now()).unwrap_err();
        assert_eq!(err.from, DeploymentStatus::Deployed);
    }

    #[test]
    fn parse_prefix_strips_environment_markers() {
        assert_eq!(Environment::parse_prefix("preview-ab12cd"), (Environment::Preview, "ab12cd"));
        assert_eq!(Environment::parse_prefix("staging-ab12cd"), (Environment::Staging, "ab12cd"));
        assert_eq!(Environment::parse_prefix("ab12cd"), (Environment::Production, "ab12cd"));
    }
}
