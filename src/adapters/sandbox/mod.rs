//! Sandbox adapters and their factories.

pub mod local;
pub mod noop;

pub use local::LocalSandbox;
pub use noop::NoopSandbox;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{SandboxConfig, SandboxMode};
use crate::domain::ports::{Sandbox, SandboxFactory};

/// Hands every run a [`LocalSandbox`] rooted at the same working directory.
#[derive(Debug, Clone)]
pub struct LocalSandboxFactory {
    workdir: PathBuf,
}

impl LocalSandboxFactory {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }
}

#[async_trait]
impl SandboxFactory for LocalSandboxFactory {
    async fn create(&self, run_id: Uuid) -> DomainResult<Arc<dyn Sandbox>> {
        let metadata = tokio::fs::metadata(&self.workdir).await.map_err(|e| {
            DomainError::SandboxError(format!(
                "working directory {} unavailable: {e}",
                self.workdir.display()
            ))
        })?;
        if !metadata.is_dir() {
            return Err(DomainError::SandboxError(format!(
                "{} is not a directory",
                self.workdir.display()
            )));
        }
        info!(run_id = %run_id, workdir = %self.workdir.display(), "Local sandbox created");
        Ok(Arc::new(LocalSandbox::new(self.workdir.clone())))
    }
}

/// Hands every run a fresh, empty [`NoopSandbox`].
#[derive(Debug, Clone, Default)]
pub struct NoopSandboxFactory;

#[async_trait]
impl SandboxFactory for NoopSandboxFactory {
    async fn create(&self, run_id: Uuid) -> DomainResult<Arc<dyn Sandbox>> {
        info!(run_id = %run_id, "Noop sandbox created");
        Ok(Arc::new(NoopSandbox::new()))
    }
}

/// Select the factory for the configured backend.
pub fn factory_from_config(config: &SandboxConfig) -> Arc<dyn SandboxFactory> {
    match config.mode {
        SandboxMode::Local => Arc::new(LocalSandboxFactory::new(&config.workdir)),
        SandboxMode::Noop => Arc::new(NoopSandboxFactory),
    }
}
