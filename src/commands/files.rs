//! Loads a directory on disk into the `AppFile` set the rest of the system
//! operates on (spec §3: "the full file set at any time is the
//! authoritative source of truth for the next commit").

use std::path::Path;

use anyhow::{Context, Result};
use overskill_deploy::domain::{AppFile, FileType};

/// Directories never loaded as part of an app's source tree — build output
/// and VCS metadata the user's working copy may still contain locally.
const IGNORED_DIR_NAMES: &[&str] = &[".git", "node_modules", "dist", "build", ".overskill"];

/// Recursively reads every file under `root` into `AppFile`s with
/// POSIX-relative paths rooted at `root` itself.
pub fn load_tree(root: &Path) -> Result<Vec<AppFile>> {
    let mut files = Vec::new();
    walk(root, root, &mut files)?;
    Ok(files)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<AppFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let name = entry.file_name();
            if IGNORED_DIR_NAMES.iter().any(|ignored| name == *ignored) {
                continue;
            }
            walk(root, &path, out)?;
            continue;
        }

        let relative = path.strip_prefix(root).with_context(|| format!("{} is not under {}", path.display(), root.display()))?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        let content = std::fs::read(&path).with_context(|| format!("reading file {}", path.display()))?;
        let kind = if std::str::from_utf8(&content).is_ok() { FileType::Text } else { FileType::Binary };
        let app_file = AppFile::new(relative, content, kind).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        out.push(app_file);
    }
    Ok(())
}
