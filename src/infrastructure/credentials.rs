//! Credential provider (spec §4.A): mints short-lived installation tokens
//! from a long-lived signing key, caches them until expiry, single-flights
//! concurrent refreshes for the same org.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CredentialError;
use crate::infrastructure::retry::{linear, with_backoff, Attempt};

const JWT_CLOCK_SKEW_BACK: i64 = 60;
const JWT_TTL_SECS: i64 = 600;

#[derive(Debug, Clone)]
pub struct Token {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct InstallationResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Mints and caches per-org installation tokens. One instance is shared
/// process-wide (spec §5: "The credential cache is a process-wide map").
pub struct CredentialProvider {
    http: reqwest::Client,
    api_base: String,
    app_id: String,
    signing_key_pem: Option<Vec<u8>>,
    cache: Mutex<HashMap<String, Token>>,
    /// Per-org single-flight guard: a refresh in progress for org X holds
    /// this lock for the duration of the exchange so concurrent callers
    /// await the same result rather than minting twice (spec §5).
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CredentialProvider {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, app_id: impl Into<String>, signing_key_pem: Option<Vec<u8>>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            app_id: app_id.into(),
            signing_key_pem,
            cache: Mutex::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a live token for `org`, minting/refreshing it if absent or
    /// within 60s of expiry.
    pub async fn token_for(&self, org: &str) -> Result<Token, CredentialError> {
        if let Some(token) = self.cached(org).await {
            return Ok(token);
        }

        let lock = self.org_lock(org).await;
        let _guard = lock.lock().await;

        // Re-check: another waiter may have refreshed while we awaited the lock.
        if let Some(token) = self.cached(org).await {
            return Ok(token);
        }

        let token = self.mint(org).await?;
        self.cache.lock().await.insert(org.to_string(), token.clone());
        Ok(token)
    }

    async fn cached(&self, org: &str) -> Option<Token> {
        let cache = self.cache.lock().await;
        cache.get(org).and_then(|t| {
            if t.expires_at - Duration::from_secs(60) > Utc::now() {
                Some(t.clone())
            } else {
                None
            }
        })
    }

    async fn org_lock(&self, org: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(org.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn mint(&self, org: &str) -> Result<Token, CredentialError> {
        let jwt = self.sign_app_jwt()?;
        let installation_id = self.discover_installation(&jwt, org).await?;
        self.exchange_for_access_token(&jwt, installation_id).await
    }

    fn sign_app_jwt(&self) -> Result<String, CredentialError> {
        let key_pem = self
            .signing_key_pem
            .as_ref()
            .ok_or(CredentialError::MissingCredential)?;
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: self.app_id.clone(),
            iat: now - JWT_CLOCK_SKEW_BACK,
            exp: now + JWT_TTL_SECS,
        };
        let key = EncodingKey::from_rsa_pem(key_pem).map_err(|_| CredentialError::MissingCredential)?;
        encode(&Header::new(jsonwebtoken::Algorithm::RS256), &claims, &key)
            .map_err(|_| CredentialError::MissingCredential)
    }

    async fn discover_installation(&self, jwt: &str, org: &str) -> Result<u64, CredentialError> {
        let url = format!("{}/orgs/{}/installation", self.api_base, org);
        if let Some(id) = self.get_installation_direct(jwt, &url).await {
            return Ok(id);
        }

        // Fall back to listing all installations and matching by login.
        let list_url = format!("{}/app/installations", self.api_base);
        let response = self
            .http
            .get(&list_url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|_| CredentialError::InstallationNotFound { org: org.to_string() })?;

        if !response.status().is_success() {
            return Err(CredentialError::InstallationNotFound { org: org.to_string() });
        }

        #[derive(Deserialize)]
        struct InstallationListEntry {
            id: u64,
            account: Account,
        }
        #[derive(Deserialize)]
        struct Account {
            login: String,
        }

        let installations: Vec<InstallationListEntry> = response
            .json()
            .await
            .map_err(|_| CredentialError::InstallationNotFound { org: org.to_string() })?;

        installations
            .into_iter()
            .find(|i| i.account.login.eq_ignore_ascii_case(org))
            .map(|i| i.id)
            .ok_or_else(|| CredentialError::InstallationNotFound { org: org.to_string() })
    }

    async fn get_installation_direct(&self, jwt: &str, url: &str) -> Option<u64> {
        let delays = linear(Duration::from_secs(1), 3);
        with_backoff(&delays, |_attempt| async {
            match self
                .http
                .get(url)
                .bearer_auth(jwt)
                .header("Accept", "application/vnd.github.v3+json")
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    match resp.json::<InstallationResponse>().await {
                        Ok(body) => Attempt::Done(Some(body.id)),
                        Err(_) => Attempt::Done(None),
                    }
                }
                Ok(resp) if matches!(resp.status().as_u16(), 401 | 403 | 404) => Attempt::Done(None),
                Ok(resp) if resp.status().is_server_error() => {
                    debug!(status = %resp.status(), "installation lookup transient failure, retrying");
                    Attempt::Retry
                }
                Ok(_) => Attempt::Done(None),
                Err(e) => {
                    warn!(error = %e, "installation lookup request failed, retrying");
                    Attempt::Retry
                }
            }
        })
        .await
        .flatten()
    }

    async fn exchange_for_access_token(&self, jwt: &str, installation_id: u64) -> Result<Token, CredentialError> {
        let url = format!("{}/app/installations/{}/access_tokens", self.api_base, installation_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|_| CredentialError::InstallationNotFound { org: installation_id.to_string() })?;

        if !response.status().is_success() {
            return Err(CredentialError::InstallationNotFound {
                org: installation_id.to_string(),
            });
        }

        let body: AccessTokenResponse = response
            .json()
            .await
            .map_err(|_| CredentialError::InstallationNotFound { org: installation_id.to_string() })?;

        Ok(Token {
            token: body.token,
            expires_at: body.expires_at,
        })
    }
}

#[cfg(test)]
impl CredentialProvider {
    /// Seeds the token cache directly so HTTP-layer tests of dependent
    /// clients don't need a real RSA signing key.
    pub(crate) async fn seed_cache(&self, org: &str, token: Token) {
        self.cache.lock().await.insert(org.to_string(), token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_for_fails_fast_without_signing_key() {
        let provider = CredentialProvider::new(
            reqwest::Client::new(),
            "https://api.github.com",
            "app-1",
            None,
        );
        let err = provider.token_for("acme").await.unwrap_err();
        assert!(matches!(err, CredentialError::MissingCredential));
    }
}
