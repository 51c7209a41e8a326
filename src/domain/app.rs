use std::collections::{BTreeMap, HashMap};

use thiserror::Error;

use super::deployment::{DeploymentStatus, Environment};

/// A file's role within a tenant's source tree. Mirrors the distinction the
/// source host itself cares about (text vs binary) without encoding any
/// build-tool specifics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Text,
    Binary,
}

/// Error returned when an `AppFile` path violates the POSIX-relative,
/// no-`..`, no-leading-slash invariant.
#[derive(Debug, Error)]
pub enum InvalidPath {
    #[error("path must be relative, got '{0}'")]
    Absolute(String),
    #[error("path must not contain '..' segments, got '{0}'")]
    ParentTraversal(String),
    #[error("path must not be empty")]
    Empty,
}

/// `(path, content, file_type)`, owned by an [`App`]. The full set of
/// `AppFile`s for an app at any instant is the authoritative source of
/// truth for the next commit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AppFile {
    path: String,
    pub content: Vec<u8>,
    pub file_type: FileType,
}

impl AppFile {
    pub fn new(
        path: impl Into<String>,
        content: impl Into<Vec<u8>>,
        file_type: FileType,
    ) -> Result<Self, InvalidPath> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self {
            path,
            content: content.into(),
            file_type,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

fn validate_path(path: &str) -> Result<(), InvalidPath> {
    if path.is_empty() {
        return Err(InvalidPath::Empty);
    }
    if path.starts_with('/') {
        return Err(InvalidPath::Absolute(path.to_string()));
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(InvalidPath::ParentTraversal(path.to_string()));
    }
    Ok(())
}

/// Error raised when attempting to mutate a field the data model declares
/// immutable once set.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("repository_full_name is already set to '{0}' and cannot be changed")]
    RepositoryAlreadySet(String),
}

/// A tenant application: the unit this control plane provisions, publishes,
/// and promotes on behalf of. Created externally; this system only ever
/// mutates the fields it owns (repository identity, deployment status,
/// per-environment last-deployed timestamps) and never deletes one.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct App {
    /// Opaque, short, URL-safe id. Always compared/hashed lowercased — it is
    /// used verbatim as the default script name for preview/staging.
    pub id: String,
    pub name: String,
    pub owning_team_id: String,
    /// Unique across live production apps when set; used as the production
    /// script name in preference to `id`.
    pub subdomain_slug: Option<String>,
    repository_full_name: Option<String>,
    repository_id: Option<u64>,
    pub status: DeploymentStatus,
    last_deployed: HashMap<Environment, chrono::DateTime<chrono::Utc>>,
    files: BTreeMap<String, AppFile>,
}

impl App {
    pub fn new(id: impl Into<String>, name: impl Into<String>, owning_team_id: impl Into<String>) -> Self {
        Self {
            id: id.into().to_lowercase(),
            name: name.into(),
            owning_team_id: owning_team_id.into(),
            subdomain_slug: None,
            repository_full_name: None,
            repository_id: None,
            status: DeploymentStatus::NotDeployed,
            last_deployed: HashMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn repository_full_name(&self) -> Option<&str> {
        self.repository_full_name.as_deref()
    }

    pub fn repository_id(&self) -> Option<u64> {
        self.repository_id
    }

    /// Sets the repository identity. Fails if it was already set — the data
    /// model declares `repository_full_name` immutable once assigned.
    pub fn set_repository(&mut self, full_name: impl Into<String>, id: u64) -> Result<(), AppError> {
        if let Some(existing) = &self.repository_full_name {
            return Err(AppError::RepositoryAlreadySet(existing.clone()));
        }
        self.repository_full_name = Some(full_name.into());
        self.repository_id = Some(id);
        Ok(())
    }

    pub fn record_deploy(&mut self, env: Environment, at: chrono::DateTime<chrono::Utc>) {
        self.last_deployed.insert(env, at);
    }

    pub fn last_deployed_at(&self, env: Environment) -> Option<chrono::DateTime<chrono::Utc>> {
        self.last_deployed.get(&env).copied()
    }

    /// The script name used to identify this app's compiled worker within a
    /// dispatch namespace. Production prefers the configured
    /// subdomain slug; preview/staging always use the lowercased id (the
    /// environment is encoded in the namespace, not the script name).
    pub fn script_name(&self, env: Environment) -> String {
        match env {
            Environment::Production => self
                .subdomain_slug
                .clone()
                .unwrap_or_else(|| self.id.clone())
                .to_lowercase(),
            Environment::Staging | Environment::Preview => self.id.clone(),
        }
    }

    /// Replaces the authoritative file set. Callers pass the complete tree;
    /// this is not a merge.
    pub fn set_files(&mut self, files: impl IntoIterator<Item = AppFile>) {
        self.files = files.into_iter().map(|f| (f.path().to_string(), f)).collect();
    }

    pub fn files(&self) -> impl Iterator<Item = &AppFile> {
        self.files.values()
    }

    pub fn file(&self, path: &str) -> Option<&AppFile> {
        self.files.get(path)
    }

    pub fn upsert_file(&mut self, file: AppFile) {
        self.files.insert(file.path().to_string(), file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_lowercased_on_construction() {
        let app = App::new("Ab12CD", "CountMaster", "team-1");
        assert_eq!(app.id, "ab12cd");
    }

    #[test]
    fn repository_full_name_is_immutable_once_set() {
        let mut app = App::new("ab12cd", "CountMaster", "team-1");
        app.set_repository("acme/ab12cd", 42).unwrap();
        let err = app.set_repository("acme/other", 99).unwrap_err();
        assert!(matches!(err, AppError::RepositoryAlreadySet(_)));
        assert_eq!(app.repository_full_name(), Some("acme/ab12cd"));
    }

    #[test]
    fn production_script_name_prefers_subdomain_slug() {
        let mut app = App::new("ab12cd", "CountMaster", "team-1");
        app.subdomain_slug = Some("CountMaster".to_string());
        assert_eq!(app.script_name(Environment::Production), "countmaster");
        assert_eq!(app.script_name(Environment::Staging), "ab12cd");
        assert_eq!(app.script_name(Environment::Preview), "ab12cd");
    }

    #[test]
    fn production_script_name_falls_back_to_lowercased_id() {
        let app = App::new("Ab12CD", "CountMaster", "team-1");
        assert_eq!(app.script_name(Environment::Production), "ab12cd");
    }

    #[test]
    fn rejects_absolute_and_traversal_paths() {
        assert!(matches!(
            AppFile::new("/etc/passwd", b"x".to_vec(), FileType::Text),
            Err(InvalidPath::Absolute(_))
        ));
        assert!(matches!(
            AppFile::new("src/../../../etc/passwd", b"x".to_vec(), FileType::Text),
            Err(InvalidPath::ParentTraversal(_))
        ));
    }
}
