//! Sandbox port - isolated command execution and file access.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::CommandResult;

/// An isolated execution environment owned by exactly one run.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Backend name (`local`, `noop`, ...).
    fn mode(&self) -> &'static str;

    /// Run a shell command to completion.
    async fn run_command(&self, command: &str) -> DomainResult<CommandResult>;

    /// Read a file. `Ok(None)` means the file does not exist.
    async fn read_file(&self, path: &str) -> DomainResult<Option<String>>;

    /// Write a file, creating parent directories as needed.
    async fn write_file(&self, path: &str, content: &str) -> DomainResult<()>;

    /// Find files whose name matches `file_name`, relative to the sandbox root.
    async fn find_files(&self, file_name: &str) -> DomainResult<Vec<String>>;

    /// Release every resource held by the sandbox.
    async fn teardown(&self) -> DomainResult<()>;
}

/// Creates one sandbox per run.
#[async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, run_id: Uuid) -> DomainResult<std::sync::Arc<dyn Sandbox>>;
}
