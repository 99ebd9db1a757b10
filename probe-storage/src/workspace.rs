use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

/// Scratch filesystem for one test: feature files are materialized here and
/// the BDD runner writes evidence here. Created when the test enters Setup,
/// destroyed (recursively) when the workspace is dropped in ShuttingDown.
pub struct TestWorkspace {
    root: TempDir,
}

impl TestWorkspace {
    pub fn create() -> std::io::Result<Self> {
        let root = tempfile::Builder::new().prefix("test-probe-").tempdir()?;
        debug!(root = %root.path().display(), "created test workspace");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Re-root one of the directive's absolute paths (`jimfsLocation`,
    /// `evidenceDir`) under this workspace. The directive speaks in terms of
    /// the original in-memory filesystem; locally everything lives below the
    /// per-test temp dir.
    pub fn resolve(&self, directive_path: &str) -> PathBuf {
        let relative = directive_path.trim_start_matches('/');
        self.root.path().join(relative)
    }
}

#[cfg(test)]
mod tests {
    use super::TestWorkspace;

    #[test]
    fn resolve_re_roots_absolute_paths() {
        let workspace = TestWorkspace::create().expect("failed to create workspace");
        let resolved = workspace.resolve("/work/features");
        assert!(resolved.starts_with(workspace.root()));
        assert!(resolved.ends_with("work/features"));
    }

    #[test]
    fn workspace_directory_is_removed_on_drop() {
        let workspace = TestWorkspace::create().expect("failed to create workspace");
        let root = workspace.root().to_path_buf();
        assert!(root.exists());
        drop(workspace);
        assert!(!root.exists());
    }
}
