//! Dispatch publisher (spec §4.E): ensures namespaces and the shared
//! dispatch worker exist, uploads per-tenant scripts, wires per-app routes
//! without wildcarding, and computes public URLs.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;

use crate::domain::{App, Environment, RuntimeEnv};
use crate::error::EdgePlatformError;
use crate::infrastructure::edge_platform::{Binding, EdgePlatformClient, ScriptMetadata};

/// Binding names whose values must never be emitted to a tenant script
/// (spec §4.E). `SUPABASE_ANON_KEY` is the sole explicit allow-listed
/// exception despite containing `KEY`.
const DENYLIST_SUBSTRINGS: &[&str] = &["SECRET", "API_KEY", "PASSWORD", "TOKEN", "PRIVATE", "DATABASE_URL"];
const ALLOWED_DESPITE_DENYLIST: &[&str] = &["SUPABASE_ANON_KEY"];

pub fn is_safe_binding_name(name: &str) -> bool {
    if ALLOWED_DESPITE_DENYLIST.contains(&name) {
        return true;
    }
    !DENYLIST_SUBSTRINGS.iter().any(|d| name.contains(d))
}

/// Per-app variables mirrored both unprefixed and `VITE_`-prefixed (spec
/// §4.E).
pub struct AppVars {
    pub app_id: String,
    pub app_name: String,
    pub app_owner_id: String,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub api_base_url: String,
    pub websocket_url: String,
    pub build_timestamp: String,
    pub version: String,
    pub app_namespace: String,
    pub tenant_id: String,
    pub development_mode: bool,
}

/// Platform-wide plain-text vars shared by every tenant script (spec §4.E).
pub struct PlatformVars {
    pub api_base_url: String,
    pub environment: Environment,
    pub apps_domain: Option<String>,
    pub hmr_enabled: bool,
}

/// Composes the ordered binding list for a tenant script upload (spec
/// §4.E): (1) the KV namespace for live preview file updates, (2) safe
/// platform vars, (3) per-app vars (unprefixed + `VITE_`-prefixed). Kept as
/// a pure function so the secret-hygiene invariant (spec §8) is testable
/// without any network dependency.
pub fn bindings_for(preview_files_kv_id: &str, platform: &PlatformVars, app: &AppVars) -> Vec<Binding> {
    let mut bindings = Vec::new();

    bindings.push(Binding {
        binding_type: "kv_namespace".to_string(),
        name: "PREVIEW_FILES".to_string(),
        extra: obj(&[("namespace_id", json!(preview_files_kv_id))]),
    });

    let mut plain_text = vec![
        ("OVERSKILL_API_BASE_URL", json!(platform.api_base_url)),
        ("ENVIRONMENT", json!(platform.environment.as_str())),
        ("HMR_ENABLED", json!(platform.hmr_enabled)),
    ];
    if let Some(domain) = &platform.apps_domain {
        plain_text.push(("APP_DOMAIN", json!(domain)));
    }
    for (name, value) in plain_text {
        bindings.push(plain_text_binding(name, value));
    }

    let app_pairs: Vec<(&str, serde_json::Value)> = vec![
        ("APP_ID", json!(app.app_id)),
        ("APP_NAME", json!(app.app_name)),
        ("APP_OWNER_ID", json!(app.app_owner_id)),
        ("SUPABASE_URL", json!(app.supabase_url)),
        ("SUPABASE_ANON_KEY", json!(app.supabase_anon_key)),
        ("API_BASE_URL", json!(app.api_base_url)),
        ("WEBSOCKET_URL", json!(app.websocket_url)),
        ("BUILD_TIMESTAMP", json!(app.build_timestamp)),
        ("VERSION", json!(app.version)),
        ("APP_NAMESPACE", json!(app.app_namespace)),
        ("TENANT_ID", json!(app.tenant_id)),
        ("DEVELOPMENT_MODE", json!(app.development_mode)),
    ];

    for (name, value) in app_pairs {
        if value.is_null() {
            continue;
        }
        bindings.push(plain_text_binding(name, value.clone()));
        bindings.push(plain_text_binding(&format!("VITE_{name}"), value));
    }

    bindings.retain(|b| is_safe_binding_name(&b.name));
    bindings
}

fn plain_text_binding(name: &str, text: serde_json::Value) -> Binding {
    Binding {
        binding_type: "plain_text".to_string(),
        name: name.to_string(),
        extra: obj(&[("text", text)]),
    }
}

fn obj(entries: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Publicly derived URL for an app/environment (spec §4.E, §6).
pub struct DeployUrl {
    pub url: String,
    pub is_subdomain_style: bool,
}

pub struct DispatchPublisher {
    edge: Arc<EdgePlatformClient>,
    runtime_env: RuntimeEnv,
    apps_domain: Option<String>,
}

impl DispatchPublisher {
    pub fn new(edge: Arc<EdgePlatformClient>, runtime_env: RuntimeEnv, apps_domain: Option<String>) -> Self {
        Self {
            edge,
            runtime_env,
            apps_domain,
        }
    }

    pub fn namespace_for(&self, env: Environment) -> String {
        crate::domain::deployment::namespace_name(self.runtime_env, env)
    }

    /// Lazily and idempotently ensures the environment's namespace exists.
    pub async fn ensure_namespace(&self, env: Environment) -> Result<(), EdgePlatformError> {
        self.edge.ensure_namespace(&self.namespace_for(env)).await
    }

    /// Installs the shared `overskill-dispatch` worker once per account
    /// (spec §4.E). Safe to call repeatedly — `upload_worker` overwrites
    /// the same script name.
    pub async fn ensure_dispatch_worker(&self) -> Result<(), EdgePlatformError> {
        let bindings = [Environment::Preview, Environment::Staging, Environment::Production]
            .into_iter()
            .map(|env| Binding {
                binding_type: "dispatch_namespace".to_string(),
                name: format!("NAMESPACE_{}", env.as_str().to_uppercase()),
                extra: obj(&[("namespace", json!(self.namespace_for(env)))]),
            })
            .collect();
        let metadata = ScriptMetadata {
            main_module: "index.js".to_string(),
            compatibility_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            tags: vec!["overskill-dispatch".to_string()],
            bindings,
        };
        self.edge.upload_worker("overskill-dispatch", dispatch_worker_source().into_bytes(), &metadata).await
    }

    pub async fn upload_tenant_script(
        &self,
        app: &App,
        env: Environment,
        script_bytes: Vec<u8>,
        bindings: Vec<Binding>,
    ) -> Result<(), EdgePlatformError> {
        self.ensure_namespace(env).await?;
        let metadata = ScriptMetadata {
            main_module: "index.js".to_string(),
            compatibility_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            tags: vec![app.id.clone(), env.as_str().to_string()],
            bindings,
        };
        self.edge.upload_script(&self.namespace_for(env), &app.script_name(env), script_bytes, &metadata).await
    }

    /// Creates exactly one specific per-app route (spec §4.E). Route
    /// creation failures must not fail the deploy — callers should treat
    /// an `Err` here as "degrade to path-style URL", never propagate it as
    /// a deploy failure.
    pub async fn ensure_route(&self, zone: &str, app: &App, env: Environment) -> Result<(), EdgePlatformError> {
        let Some(domain) = &self.apps_domain else {
            return Ok(());
        };
        let script_name = app.script_name(env);
        let pattern = format!("{}{}.{}/*", env.url_prefix(), script_name, domain);
        match self.edge.create_route(zone, &pattern, "overskill-dispatch").await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(app = %app.id, environment = %env.as_str(), error = %e, "route creation failed, will fall back to path-style URL");
                Err(e)
            }
        }
    }

    /// Derives the public URL (spec §4.E, §6): subdomain style preferred
    /// when `apps_domain` is configured, else path-style fallback.
    pub async fn derive_url(&self, app: &App, env: Environment) -> Result<DeployUrl, EdgePlatformError> {
        let script_name = app.script_name(env);
        if let Some(domain) = &self.apps_domain {
            return Ok(DeployUrl {
                url: format!("https://{}{}.{}", env.url_prefix(), script_name, domain),
                is_subdomain_style: true,
            });
        }
        let subdomain = self.edge.account_subdomain().await?;
        Ok(DeployUrl {
            url: format!(
                "https://overskill-dispatch.{}.workers.dev/app/{}{}",
                subdomain,
                env.url_prefix(),
                script_name
            ),
            is_subdomain_style: false,
        })
    }
}

/// Fixed source of the shared `overskill-dispatch` worker (spec §4.E
/// "Shared dispatch worker"). Parses host or path to a `(script, env)`
/// pair, resolves the matching `NAMESPACE_{ENV}` binding, and forwards the
/// request to the tenant script, 404ing if it's absent. [`parse_request_target`]
/// below implements the same two rules in Rust so the round-trip property
/// (spec §8) can be checked without a JS runtime.
fn dispatch_worker_source() -> String {
    r#"export default {
  async fetch(request, env) {
    const url = new URL(request.url);
    let routing, scriptLabel;
    const appsDomain = env.APP_DOMAIN;
    if (appsDomain && url.hostname.endsWith("." + appsDomain)) {
      routing = "host";
      scriptLabel = url.hostname.slice(0, -("." + appsDomain).length).split(".")[0];
    } else {
      const match = url.pathname.match(/^\/app\/([^/]+)/);
      if (!match) {
        return new Response("not found", { status: 404 });
      }
      routing = "path";
      scriptLabel = match[1];
    }

    let environment = "production";
    let scriptName = scriptLabel.toLowerCase();
    if (scriptName.startsWith("preview-")) {
      environment = "preview";
      scriptName = scriptName.slice("preview-".length);
    } else if (scriptName.startsWith("staging-")) {
      environment = "staging";
      scriptName = scriptName.slice("staging-".length);
    }

    const namespace = env["NAMESPACE_" + environment.toUpperCase()];
    const worker = await namespace.get(scriptName);
    if (!worker) {
      return new Response("not found", { status: 404 });
    }

    const forwarded = new Request(request);
    forwarded.headers.set("X-OverSkill-Environment", environment);
    forwarded.headers.set("X-OverSkill-Script", scriptName);
    forwarded.headers.set("X-OverSkill-Routing", routing);
    forwarded.headers.set("X-OverSkill-Original-Host", url.hostname);
    return worker.fetch(forwarded);
  },
};
"#
    .to_string()
}

/// Mirrors [`dispatch_worker_source`]'s own host/path parsing in Rust (spec
/// §4.E steps 1-2) so the URL-derivation round-trip property (spec §8) is
/// checked against the worker's actual routing rule, not just
/// [`Environment::parse_prefix`] in isolation. Returns `None` on a host or
/// path the worker would 404 on.
pub fn parse_request_target(host: &str, path: &str, apps_domain: Option<&str>) -> Option<(String, Environment)> {
    let label = if let Some(domain) = apps_domain {
        let suffix = format!(".{domain}");
        host.strip_suffix(&suffix)?.split('.').next()?
    } else {
        let rest = path.strip_prefix("/app/")?;
        rest.split('/').next()?
    };
    if label.is_empty() {
        return None;
    }
    let lowered = label.to_lowercase();
    let (env, script) = Environment::parse_prefix(&lowered);
    Some((script.to_string(), env))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylisted_substrings_are_excluded_except_supabase_anon_key() {
        assert!(!is_safe_binding_name("CLOUDFLARE_API_TOKEN"));
        assert!(!is_safe_binding_name("APP_SECRET"));
        assert!(!is_safe_binding_name("DATABASE_URL"));
        assert!(is_safe_binding_name("SUPABASE_ANON_KEY"));
        assert!(is_safe_binding_name("APP_ID"));
    }

    #[test]
    fn bindings_for_never_emits_a_denylisted_name() {
        let platform = PlatformVars {
            api_base_url: "https://api.overskill.app".to_string(),
            environment: Environment::Production,
            apps_domain: Some("overskill.app".to_string()),
            hmr_enabled: false,
        };
        let app = AppVars {
            app_id: "ab12cd".to_string(),
            app_name: "CountMaster".to_string(),
            app_owner_id: "team-1".to_string(),
            supabase_url: Some("https://proj.supabase.co".to_string()),
            supabase_anon_key: Some("anon-key-value".to_string()),
            api_base_url: "https://api.overskill.app".to_string(),
            websocket_url: "wss://api.overskill.app".to_string(),
            build_timestamp: "2026-07-27T00:00:00Z".to_string(),
            version: "0.1.0".to_string(),
            app_namespace: "ab12cd".to_string(),
            tenant_id: "team-1".to_string(),
            development_mode: false,
        };

        let bindings = bindings_for("kv-123", &platform, &app);
        for binding in &bindings {
            for deny in DENYLIST_SUBSTRINGS {
                if binding.name != "SUPABASE_ANON_KEY" && binding.name != "VITE_SUPABASE_ANON_KEY" {
                    assert!(!binding.name.contains(deny), "leaked denylisted binding: {}", binding.name);
                }
            }
        }
        assert!(bindings.iter().any(|b| b.name == "SUPABASE_ANON_KEY"));
        assert!(bindings.iter().any(|b| b.name == "VITE_SUPABASE_ANON_KEY"));
    }

    #[test]
    fn bindings_for_places_kv_namespace_first() {
        let platform = PlatformVars {
            api_base_url: "https://api.overskill.app".to_string(),
            environment: Environment::Staging,
            apps_domain: None,
            hmr_enabled: true,
        };
        let app = AppVars {
            app_id: "ab12cd".to_string(),
            app_name: "CountMaster".to_string(),
            app_owner_id: "team-1".to_string(),
            supabase_url: None,
            supabase_anon_key: None,
            api_base_url: "https://api.overskill.app".to_string(),
            websocket_url: "wss://api.overskill.app".to_string(),
            build_timestamp: "2026-07-27T00:00:00Z".to_string(),
            version: "0.1.0".to_string(),
            app_namespace: "ab12cd".to_string(),
            tenant_id: "team-1".to_string(),
            development_mode: true,
        };
        let bindings = bindings_for("kv-123", &platform, &app);
        assert_eq!(bindings[0].name, "PREVIEW_FILES");
    }

    #[test]
    fn dispatch_worker_source_contains_the_required_routing_surface() {
        let source = dispatch_worker_source();
        assert!(source.contains("X-OverSkill-Environment"));
        assert!(source.contains("X-OverSkill-Script"));
        assert!(source.contains("X-OverSkill-Routing"));
        assert!(source.contains("X-OverSkill-Original-Host"));
        assert!(source.contains("NAMESPACE_"));
        assert!(source.contains("/app/"));
        assert!(source.contains("404"));
    }

    /// Spec §8: for every `(app, env)` with a configured `apps_domain`, the
    /// worker's own parser classifies the §4.E/§6-derived URL back to the
    /// same `(script_name, environment)`.
    #[test]
    fn subdomain_url_round_trips_through_the_worker_parser() {
        let domain = "overskill.app";
        for (env, prefix) in [
            (Environment::Production, ""),
            (Environment::Preview, "preview-"),
            (Environment::Staging, "staging-"),
        ] {
            let url = format!("https://{prefix}countmaster.{domain}");
            let host = url.strip_prefix("https://").unwrap();
            let (script, parsed_env) = parse_request_target(host, "/", Some(domain)).expect("host should parse");
            assert_eq!(script, "countmaster");
            assert_eq!(parsed_env, env);
        }
    }

    #[test]
    fn path_style_url_round_trips_through_the_worker_parser() {
        for (env, prefix) in [
            (Environment::Production, ""),
            (Environment::Preview, "preview-"),
            (Environment::Staging, "staging-"),
        ] {
            let path = format!("/app/{prefix}countmaster");
            let (script, parsed_env) = parse_request_target("overskill-dispatch.acct.workers.dev", &path, None).expect("path should parse");
            assert_eq!(script, "countmaster");
            assert_eq!(parsed_env, env);
        }
    }

    #[test]
    fn unmatched_host_and_path_returns_none() {
        assert!(parse_request_target("example.com", "/", Some("overskill.app")).is_none());
        assert!(parse_request_target("example.com", "/other", None).is_none());
    }
}
