//! Host sandbox: commands run under `sh -c` inside a working directory.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::CommandResult;
use crate::domain::ports::Sandbox;

/// Exit code reported when a process was killed by a signal.
const SIGNALLED_EXIT_CODE: i32 = -1;

#[derive(Debug, Clone)]
pub struct LocalSandbox {
    root: PathBuf,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` under the root, refusing absolute paths and `..`.
    fn resolve(&self, path: &str) -> DomainResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || path.is_empty() {
            return Err(DomainError::SandboxError(format!(
                "path escapes sandbox root: {path}"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn mode(&self) -> &'static str {
        "local"
    }

    async fn run_command(&self, command: &str) -> DomainResult<CommandResult> {
        debug!(root = %self.root.display(), command, "Running sandbox command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DomainError::SandboxError(format!("failed to spawn `{command}`: {e}")))?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(SIGNALLED_EXIT_CODE),
        })
    }

    async fn read_file(&self, path: &str) -> DomainResult<Option<String>> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DomainError::SandboxError(format!(
                "failed to read {path}: {e}"
            ))),
        }
    }

    async fn write_file(&self, path: &str, content: &str) -> DomainResult<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::SandboxError(format!("failed to create {path}: {e}")))?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| DomainError::SandboxError(format!("failed to write {path}: {e}")))
    }

    async fn find_files(&self, file_name: &str) -> DomainResult<Vec<String>> {
        let root = self.root.clone();
        let file_name = file_name.to_string();

        tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&root)
                .min_depth(1)
                .into_iter()
                // Hidden directories (.git, .venv, ...) are never repair targets.
                .filter_entry(|entry| !entry.file_name().to_string_lossy().starts_with('.'));

            let mut found = Vec::new();
            for entry in walker {
                // Unreadable subtrees are skipped, not fatal.
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!(error = %e, "Skipping unreadable path during file search");
                        continue;
                    }
                };
                if !entry.file_type().is_file() || entry.file_name() != file_name.as_str() {
                    continue;
                }
                if let Ok(relative) = entry.path().strip_prefix(&root) {
                    found.push(relative.to_string_lossy().replace('\\', "/"));
                }
            }

            found.sort();
            found
        })
        .await
        .map_err(|e| DomainError::SandboxError(format!("file search failed: {e}")))
    }

    async fn teardown(&self) -> DomainResult<()> {
        // The working directory belongs to the caller; nothing to remove.
        debug!(root = %self.root.display(), "Local sandbox released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_in_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let sandbox = LocalSandbox::new(dir.path());

        let ok = sandbox.run_command("cat marker.txt").await.unwrap();
        assert!(ok.succeeded());
        assert_eq!(ok.stdout, "here");

        let failed = sandbox.run_command("echo oops >&2; exit 3").await.unwrap();
        assert_eq!(failed.exit_code, 3);
        assert_eq!(failed.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_read_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());

        assert!(sandbox.read_file("src/lib.rs").await.unwrap().is_none());
        sandbox.write_file("src/lib.rs", "pub fn f() {}").await.unwrap();
        assert_eq!(
            sandbox.read_file("src/lib.rs").await.unwrap().as_deref(),
            Some("pub fn f() {}")
        );
    }

    #[tokio::test]
    async fn test_paths_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());

        assert!(matches!(
            sandbox.read_file("../secret").await,
            Err(DomainError::SandboxError(_))
        ));
        assert!(matches!(
            sandbox.write_file("/etc/passwd", "x").await,
            Err(DomainError::SandboxError(_))
        ));
    }

    #[tokio::test]
    async fn test_find_files_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());
        sandbox.write_file("crates/a/src/lib.rs", "").await.unwrap();
        sandbox.write_file("crates/b/src/lib.rs", "").await.unwrap();
        sandbox.write_file("crates/b/src/main.rs", "").await.unwrap();
        sandbox.write_file(".git/lib.rs", "").await.unwrap();

        let found = sandbox.find_files("lib.rs").await.unwrap();
        assert_eq!(found, vec!["crates/a/src/lib.rs", "crates/b/src/lib.rs"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_find_files_skips_unreadable_directories() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());
        sandbox.write_file("crates/app/src/helpers.rs", "").await.unwrap();
        sandbox.write_file("locked/inner/helpers.rs", "").await.unwrap();

        let locked = dir.path().join("locked");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();
        let result = sandbox.find_files("helpers.rs").await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Privileged users can still read the locked directory.
        let found = result.unwrap();
        assert!(found.contains(&"crates/app/src/helpers.rs".to_string()));
        assert!(found.iter().all(|path| path.ends_with("helpers.rs")));
    }
}
