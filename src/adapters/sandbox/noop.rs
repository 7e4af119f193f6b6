//! Simulation sandbox: files live in memory and no command is executed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::CommandResult;
use crate::domain::ports::Sandbox;

/// Every command exits 0; commands and teardowns are recorded for inspection.
#[derive(Debug, Default)]
pub struct NoopSandbox {
    files: Mutex<BTreeMap<String, String>>,
    commands: Mutex<Vec<String>>,
    teardowns: AtomicUsize,
}

impl NoopSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file.
    #[must_use]
    pub fn with_file(self, path: impl Into<String>, content: impl Into<String>) -> Self {
        if let Ok(mut files) = self.files.lock() {
            files.insert(path.into(), content.into());
        }
        self
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().ok()?.get(path).cloned()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    pub fn teardown_count(&self) -> usize {
        self.teardowns.load(Ordering::Acquire)
    }
}

fn poisoned() -> DomainError {
    DomainError::SandboxError("noop sandbox state poisoned".to_string())
}

#[async_trait]
impl Sandbox for NoopSandbox {
    fn mode(&self) -> &'static str {
        "noop"
    }

    async fn run_command(&self, command: &str) -> DomainResult<CommandResult> {
        debug!(command, "Noop sandbox skipping command");
        self.commands
            .lock()
            .map_err(|_| poisoned())?
            .push(command.to_string());
        Ok(CommandResult::success(""))
    }

    async fn read_file(&self, path: &str) -> DomainResult<Option<String>> {
        Ok(self.files.lock().map_err(|_| poisoned())?.get(path).cloned())
    }

    async fn write_file(&self, path: &str, content: &str) -> DomainResult<()> {
        self.files
            .lock()
            .map_err(|_| poisoned())?
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn find_files(&self, file_name: &str) -> DomainResult<Vec<String>> {
        let files = self.files.lock().map_err(|_| poisoned())?;
        Ok(files
            .keys()
            .filter(|path| path.rsplit('/').next() == Some(file_name))
            .cloned()
            .collect())
    }

    async fn teardown(&self) -> DomainResult<()> {
        self.teardowns.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
