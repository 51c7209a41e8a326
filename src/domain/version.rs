use thiserror::Error;

use super::deployment::Environment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Created,
    Updated,
    Deleted,
}

/// One file's change within an [`AppVersion`]'s commit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AppVersionFile {
    pub path: String,
    pub action: FileAction,
}

#[derive(Debug, Error)]
pub enum AppVersionError {
    #[error("commit_sha is already set to '{0}' and cannot be changed")]
    CommitAlreadySet(String),
}

/// A semver triple with the restore-path's optional `-restored` suffix
/// (spec §3: "monotonic version_number (semver triple with optional
/// `-restored` suffix)").
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VersionNumber {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub restored: bool,
}

impl std::fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.restored {
            write!(f, "-restored")?;
        }
        Ok(())
    }
}

impl VersionNumber {
    pub fn next_patch(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor,
            patch: self.patch + 1,
            restored: false,
        }
    }

    pub fn initial() -> Self {
        Self {
            major: 0,
            minor: 1,
            patch: 0,
            restored: false,
        }
    }
}

/// An immutable snapshot attached to an [`App`](super::App) (spec §3).
/// `commit_sha` is set once the version is pushed and is immutable from
/// that point on.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AppVersion {
    pub id: uuid::Uuid,
    pub app_id: String,
    pub version_number: VersionNumber,
    pub changelog: String,
    pub user_id: String,
    pub environment: Environment,
    commit_sha: Option<String>,
    pub tag_name: Option<String>,
    pub files: Vec<AppVersionFile>,
}

impl AppVersion {
    pub fn new(
        app_id: impl Into<String>,
        version_number: VersionNumber,
        changelog: impl Into<String>,
        user_id: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            app_id: app_id.into(),
            version_number,
            changelog: changelog.into(),
            user_id: user_id.into(),
            environment,
            commit_sha: None,
            tag_name: None,
            files: Vec::new(),
        }
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.commit_sha.as_deref()
    }

    pub fn set_commit_sha(&mut self, sha: impl Into<String>) -> Result<(), AppVersionError> {
        if let Some(existing) = &self.commit_sha {
            return Err(AppVersionError::CommitAlreadySet(existing.clone()));
        }
        self.commit_sha = Some(sha.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_sha_is_immutable_once_set() {
        let mut v = AppVersion::new("ab12cd", VersionNumber::initial(), "init", "user-1", Environment::Production);
        v.set_commit_sha("abc123").unwrap();
        let err = v.set_commit_sha("def456").unwrap_err();
        assert!(matches!(err, AppVersionError::CommitAlreadySet(_)));
    }

    #[test]
    fn version_number_formats_with_restored_suffix() {
        let mut v = VersionNumber::initial();
        v.restored = true;
        assert_eq!(v.to_string(), "0.1.0-restored");
    }
}
