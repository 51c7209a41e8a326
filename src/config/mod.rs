//! Boot-time configuration: every external input this system
//! needs is a named, typed field here rather than an open-ended option bag.
//! Missing required fields fail fast at boot via [`ConfigError::MissingField`].

use crate::domain::RuntimeEnv;
use crate::error::ConfigError;

/// Everything needed to construct the credential provider and the two
/// external-control-plane clients, plus the handful of policy knobs
/// (runtime env label, apps domain) the orchestration services read.
#[derive(Debug, Clone)]
pub struct Config {
    /// Source-host REST base, e.g. `https://api.github.com`.
    pub source_host_api_base: String,
    /// Org that owns every tenant repository.
    pub source_host_org: String,
    /// Template repo forked when `BootstrapMode::Fork` is selected.
    pub template_repo: String,
    /// Source-host App id, used as the JWT `iss` claim.
    pub source_host_app_id: String,
    /// RSA private key (PEM) backing JWT signing. Absent only in
    /// configurations that never call the credential provider (tests).
    pub signing_key_pem: Option<Vec<u8>>,

    /// Edge-platform REST base, e.g. `https://api.cloudflare.com/client/v4`.
    pub edge_platform_api_base: String,
    pub edge_account_id: String,
    pub edge_api_token: String,

    /// Public DNS zone apps are published under. When unset, URLs fall back
    /// to the `workers.dev` path-routed scheme.
    pub apps_domain: Option<String>,
    /// Identifies which instance of the control plane this process is
    /// — distinct from the per-deploy [`Environment`](crate::domain::Environment).
    pub runtime_env: RuntimeEnv,
}

/// One required environment variable and the field it populates.
struct RequiredVar<'a> {
    var: &'a str,
    field: &'a str,
}

impl Config {
    /// Loads configuration from the process environment, failing fast with
    /// [`ConfigError::MissingField`] on the first required value that is
    /// absent or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = [
            RequiredVar { var: "SOURCE_HOST_ORG", field: "source_host_org" },
            RequiredVar { var: "TEMPLATE_REPO", field: "template_repo" },
            RequiredVar { var: "SOURCE_HOST_APP_ID", field: "source_host_app_id" },
            RequiredVar { var: "EDGE_ACCOUNT_ID", field: "edge_account_id" },
            RequiredVar { var: "EDGE_API_TOKEN", field: "edge_api_token" },
        ];
        for r in required {
            if env_nonempty(r.var).is_none() {
                return Err(ConfigError::MissingField { field: r.field.to_string() });
            }
        }

        let signing_key_pem = match env_nonempty("SOURCE_HOST_SIGNING_KEY_PATH") {
            Some(path) => Some(std::fs::read(&path).map_err(|_| ConfigError::InvalidValue {
                field: "source_host_signing_key_path".to_string(),
                value: path,
            })?),
            None => env_nonempty("SOURCE_HOST_SIGNING_KEY_PEM").map(|s| s.into_bytes()),
        };

        let runtime_env = match env_nonempty("RUNTIME_ENV").as_deref() {
            None | Some("development") => RuntimeEnv::Development,
            Some("staging") => RuntimeEnv::Staging,
            Some("production") => RuntimeEnv::Production,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: "runtime_env".to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            source_host_api_base: env_nonempty("SOURCE_HOST_API_BASE").unwrap_or_else(|| "https://api.github.com".to_string()),
            source_host_org: env_nonempty("SOURCE_HOST_ORG").expect("checked above"),
            template_repo: env_nonempty("TEMPLATE_REPO").expect("checked above"),
            source_host_app_id: env_nonempty("SOURCE_HOST_APP_ID").expect("checked above"),
            signing_key_pem,
            edge_platform_api_base: env_nonempty("EDGE_PLATFORM_API_BASE").unwrap_or_else(|| "https://api.cloudflare.com/client/v4".to_string()),
            edge_account_id: env_nonempty("EDGE_ACCOUNT_ID").expect("checked above"),
            edge_api_token: env_nonempty("EDGE_API_TOKEN").expect("checked above"),
            apps_domain: env_nonempty("APPS_DOMAIN"),
            runtime_env,
        })
    }
}

fn env_nonempty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize the two tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "SOURCE_HOST_API_BASE",
            "SOURCE_HOST_ORG",
            "TEMPLATE_REPO",
            "SOURCE_HOST_APP_ID",
            "SOURCE_HOST_SIGNING_KEY_PATH",
            "SOURCE_HOST_SIGNING_KEY_PEM",
            "EDGE_PLATFORM_API_BASE",
            "EDGE_ACCOUNT_ID",
            "EDGE_API_TOKEN",
            "APPS_DOMAIN",
            "RUNTIME_ENV",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_field_fails_fast() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { .. }));
    }

    #[test]
    fn loads_with_defaults_when_optional_fields_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        std::env::set_var("SOURCE_HOST_ORG", "acme");
        std::env::set_var("TEMPLATE_REPO", "acme/template");
        std::env::set_var("SOURCE_HOST_APP_ID", "123");
        std::env::set_var("EDGE_ACCOUNT_ID", "acct-1");
        std::env::set_var("EDGE_API_TOKEN", "token-1");

        let config = Config::from_env().unwrap();
        assert_eq!(config.source_host_api_base, "https://api.github.com");
        assert_eq!(config.runtime_env, RuntimeEnv::Development);
        assert!(config.apps_domain.is_none());
        assert!(config.signing_key_pem.is_none());
        clear_all();
    }
}
