//! Reproduction command inference from build manifests.

use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::InferredCommand;
use crate::domain::ports::ReproductionInferrer;

/// Manifest file, the command it implies, and how sure we are.
const MANIFESTS: &[(&str, &str, f64)] = &[
    ("Cargo.toml", "cargo test", 0.9),
    ("package.json", "npm test", 0.8),
    ("pyproject.toml", "pytest", 0.75),
    ("pytest.ini", "pytest", 0.8),
    ("setup.py", "pytest", 0.6),
    ("go.mod", "go test ./...", 0.9),
    ("pom.xml", "mvn test", 0.85),
    ("build.gradle", "gradle test", 0.8),
    ("build.gradle.kts", "gradle test", 0.8),
    ("Makefile", "make test", 0.5),
];

/// Picks the first well-known manifest present at the repository root.
#[derive(Debug, Clone, Default)]
pub struct ManifestReproductionInferrer;

impl ManifestReproductionInferrer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReproductionInferrer for ManifestReproductionInferrer {
    async fn infer(&self, repository_path: &Path) -> DomainResult<Option<InferredCommand>> {
        for (manifest, command, confidence) in MANIFESTS {
            if tokio::fs::try_exists(repository_path.join(manifest))
                .await
                .unwrap_or(false)
            {
                debug!(manifest, command, "Inferred reproduction command");
                return Ok(Some(InferredCommand {
                    command: (*command).to_string(),
                    confidence: *confidence,
                    reasoning: format!("found {manifest} at the repository root"),
                }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_infers_from_cargo_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "[package]").unwrap();
        std::fs::write(dir.path().join("Makefile"), "test:").unwrap();

        let inferred = ManifestReproductionInferrer::new()
            .infer(dir.path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inferred.command, "cargo test");
        assert!(inferred.reasoning.contains("Cargo.toml"));
    }

    #[tokio::test]
    async fn test_python_and_go_projects() {
        let py = tempfile::tempdir().unwrap();
        std::fs::write(py.path().join("pyproject.toml"), "").unwrap();
        let go = tempfile::tempdir().unwrap();
        std::fs::write(go.path().join("go.mod"), "module x").unwrap();

        let inferrer = ManifestReproductionInferrer::new();
        assert_eq!(inferrer.infer(py.path()).await.unwrap().unwrap().command, "pytest");
        assert_eq!(
            inferrer.infer(go.path()).await.unwrap().unwrap().command,
            "go test ./..."
        );
    }

    #[tokio::test]
    async fn test_empty_directory_infers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ManifestReproductionInferrer::new()
            .infer(dir.path())
            .await
            .unwrap()
            .is_none());
    }
}
