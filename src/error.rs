//! Centralized error types
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use thiserror::Error;

/// Top-level error type composing every subsystem's typed errors.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Source host error: {0}")]
    SourceHost(#[from] SourceHostError),

    #[error("Edge platform error: {0}")]
    EdgePlatform(#[from] EdgePlatformError),

    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),

    #[error("Build monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Promotion error: {0}")]
    Promotion(#[from] PromotionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Credential provider errors.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Signing key is not configured")]
    MissingCredential,

    #[error("No installation found for org '{org}'")]
    InstallationNotFound { org: String },
}

/// Source-host (GitHub-shaped) client errors.
#[derive(Error, Debug)]
pub enum SourceHostError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("SHA conflict on {path} after {attempts} attempts")]
    Conflict { path: String, attempts: u32 },

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure ({code}): {body}")]
    Permanent { code: u16, body: String },

    #[error("Bootstrap failed at step '{step}': {cause}")]
    PartialBootstrap { step: String, cause: String },

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
}

/// Edge-platform (dispatch namespace) client errors.
#[derive(Error, Debug)]
pub enum EdgePlatformError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Permanent failure ({code}): {body}")]
    Permanent { code: u16, body: String },
}

/// Deployment state store errors.
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error(transparent)]
    IllegalTransition(#[from] crate::domain::deployment::IllegalTransition),

    #[error("No open deployment handle for app '{app_id}' environment '{environment}'")]
    NoOpenDeployment { app_id: String, environment: String },
}

/// Build monitor / auto-fix loop errors.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("No workflow run discovered for commit {commit_sha} within {deadline_s}s")]
    RunDiscoveryTimedOut { commit_sha: String, deadline_s: u64 },

    #[error("Build failed and no auto-fixable errors were detected")]
    BuildFailedUnfixable,

    #[error("Build failed and the auto-fix retry budget was exhausted")]
    BuildFailedRetryExceeded,

    #[error("Monitor run was cancelled")]
    Cancelled,

    #[error("Source host error: {0}")]
    SourceHost(#[from] SourceHostError),

    #[error("Edge platform error: {0}")]
    EdgePlatform(#[from] EdgePlatformError),

    #[error("State store error: {0}")]
    StateStore(#[from] StateStoreError),
}

/// Promotion and status API errors.
#[derive(Error, Debug)]
pub enum PromotionError {
    #[error("invalid promotion pair: {from} -> {to} (only preview->staging and staging->production are allowed)")]
    InvalidPair { from: String, to: String },

    #[error("edge platform error: {0}")]
    EdgePlatform(#[from] EdgePlatformError),

    #[error("state store error: {0}")]
    StateStore(#[from] StateStoreError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Required configuration missing: {field}")]
    MissingField { field: String },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_error_display() {
        let err = CredentialError::MissingCredential;
        assert!(err.to_string().contains("Signing key"));
    }

    #[test]
    fn test_error_conversion() {
        let credential_err = CredentialError::MissingCredential;
        let deploy_err: DeployError = credential_err.into();
        assert!(matches!(deploy_err, DeployError::Credential(_)));
    }
}
