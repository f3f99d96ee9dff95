/// Discovers script files and turns them into descriptors
///
/// - `<id>.<ext>` configures a project
/// - `<id>.settings.<ext>` configures settings
/// - `<id>.init.<ext>` configures the top-level invocation
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::Path;

use super::descriptor::ScriptDescriptor;
use crate::compiler::TargetKind;

/// Find all scripts below `dir` with the given extension, sorted by path
pub fn discover_scripts(dir: &Path, extension: &str) -> Result<Vec<ScriptDescriptor>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let pattern = dir.join("**").join(format!("*.{}", extension));
    let pattern = pattern
        .to_str()
        .ok_or_else(|| anyhow!("Scripts directory is not valid UTF-8: {}", dir.display()))?;

    let mut paths = glob::glob(pattern)
        .with_context(|| format!("Invalid script pattern: {}", pattern))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to walk scripts directory")?;
    paths.retain(|path| path.is_file());
    paths.sort();

    paths
        .iter()
        .map(|path| load_script(path, extension))
        .collect()
}

/// Read one script file into a descriptor
pub fn load_script(path: &Path, extension: &str) -> Result<ScriptDescriptor> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("Invalid script file name: {}", path.display()))?;

    let (id, kind) = script_identity(file_name, extension)
        .ok_or_else(|| anyhow!("Cannot derive a script id from {}", path.display()))?;

    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;

    Ok(ScriptDescriptor::new(&id, kind, &source).with_source_path(path))
}

/// Derive the script id and target kind from a file name
pub fn script_identity(file_name: &str, extension: &str) -> Option<(String, TargetKind)> {
    let stem = file_name.strip_suffix(&format!(".{}", extension))?;

    let (id, kind) = if let Some(id) = stem.strip_suffix(".settings") {
        (id, TargetKind::Settings)
    } else if let Some(id) = stem.strip_suffix(".init") {
        (id, TargetKind::Invocation)
    } else {
        (stem, TargetKind::Project)
    };

    if id.is_empty() {
        None
    } else {
        Some((id.to_string(), kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_script_identity() {
        assert_eq!(
            script_identity("my.plugin.pscript", "pscript"),
            Some(("my.plugin".to_string(), TargetKind::Project))
        );
        assert_eq!(
            script_identity("company.settings.pscript", "pscript"),
            Some(("company".to_string(), TargetKind::Settings))
        );
        assert_eq!(
            script_identity("audit.init.pscript", "pscript"),
            Some(("audit".to_string(), TargetKind::Invocation))
        );
        assert_eq!(script_identity(".settings.pscript", "pscript"), None);
        assert_eq!(script_identity("readme.md", "pscript"), None);
    }

    #[test]
    fn test_discover_scripts_recursively_and_sorted() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("b.pscript"), "println 'b'").unwrap();
        fs::write(temp.path().join("nested/a.settings.pscript"), "").unwrap();
        fs::write(temp.path().join("ignored.txt"), "println 'x'").unwrap();

        let scripts = discover_scripts(temp.path(), "pscript").unwrap();
        let ids: Vec<_> = scripts.iter().map(|s| s.id()).collect();

        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(scripts[1].target_kind(), TargetKind::Settings);
        assert!(scripts[0].source_path().is_some());
    }

    #[test]
    fn test_missing_dir_yields_nothing() {
        let temp = TempDir::new().unwrap();
        let scripts = discover_scripts(&temp.path().join("missing"), "pscript").unwrap();
        assert!(scripts.is_empty());
    }
}
