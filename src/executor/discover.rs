//! Input discovery.

use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use super::ExecutorError;
use crate::rules::RuleSet;

/// Inputs selected for a batch, in dispatch order.
#[derive(Debug, Default, Clone)]
pub struct Discovery {
    pub inputs: Vec<PathBuf>,
    /// Candidates dropped by a skip rule before dispatch.
    pub skipped: Vec<PathBuf>,
}

/// Walk `input_dir` and collect regular files the tool accepts.
///
/// With an `extension`, only files carrying it are taken; without one, any
/// executable file is. Order is sorted by path so indices are stable across
/// runs.
pub fn discover_inputs(
    input_dir: &Path,
    extension: Option<&str>,
    rules: &RuleSet,
) -> Result<Discovery, ExecutorError> {
    if !input_dir.is_dir() {
        return Err(ExecutorError::InputDirMissing(input_dir.display().to_string()));
    }

    let mut discovery = Discovery::default();
    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ExecutorError::Walk {
            path: input_dir.display().to_string(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let accepted = match extension {
            Some(ext) => path.extension().map(|e| e == ext).unwrap_or(false),
            None => is_executable(path),
        };
        if !accepted {
            continue;
        }

        if rules.should_skip(&path.display().to_string()) {
            debug!(input = %path.display(), "skipping input per rules");
            discovery.skipped.push(path.to_path_buf());
        } else {
            discovery.inputs.push(path.to_path_buf());
        }
    }
    Ok(discovery)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::write(dir.path().join("b/nested/z.bc"), "").unwrap();
        fs::write(dir.path().join("a.bc"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("b/slow.bc"), "").unwrap();
        fs::create_dir_all(dir.path().join("dir.bc")).unwrap();
        dir
    }

    #[test]
    fn test_extension_filter_and_order() {
        let dir = tree();
        let found = discover_inputs(dir.path(), Some("bc"), &RuleSet::default()).unwrap();
        let names: Vec<_> = found
            .inputs
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.bc", "b/nested/z.bc", "b/slow.bc"]);
        assert!(found.skipped.is_empty());
    }

    #[test]
    fn test_skip_rules_remove_inputs() {
        let dir = tree();
        let rules = RuleSet {
            skip: BTreeSet::from(["slow".to_string()]),
            ..RuleSet::default()
        };
        let found = discover_inputs(dir.path(), Some("bc"), &rules).unwrap();
        assert_eq!(found.inputs.len(), 2);
        assert_eq!(found.skipped, vec![dir.path().join("b/slow.bc")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_filter() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tree();
        let exe = dir.path().join("prog");
        fs::write(&exe, "").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();

        let found = discover_inputs(dir.path(), None, &RuleSet::default()).unwrap();
        assert_eq!(found.inputs, vec![exe]);
    }

    #[test]
    fn test_missing_dir() {
        let err = discover_inputs(Path::new("/nonexistent/corpus"), Some("bc"), &RuleSet::default())
            .unwrap_err();
        assert!(matches!(err, ExecutorError::InputDirMissing(_)));
    }
}
