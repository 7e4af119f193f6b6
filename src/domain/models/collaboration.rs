//! Data exchanged with external collaborators
//!
//! Diagnosis, planning, decomposition and patch providers and the execution
//! sandbox are outside this crate. These are the values that cross the ports.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ErrorDag;

/// Broad classification of a failure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Import,
    Type,
    Lint,
    Test,
    Build,
    Runtime,
    Dependency,
    Environment,
    #[default]
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Syntax => "syntax",
            Self::Import => "import",
            Self::Type => "type",
            Self::Lint => "lint",
            Self::Test => "test",
            Self::Build => "build",
            Self::Runtime => "runtime",
            Self::Dependency => "dependency",
            Self::Environment => "environment",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Input to the diagnosis provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRequest {
    pub run_id: Uuid,
    pub iteration: u32,
    /// Raw failure output from CI
    pub error_log: String,
    /// Problem being diagnosed: the root failure or the current sub-problem
    pub problem: String,
    /// Files the current sub-problem is known to touch
    pub affected_files: Vec<String>,
    /// Feedback from previous failed attempts, oldest first
    pub feedback: Vec<String>,
}

/// Output of the diagnosis provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub summary: String,
    /// File the fix should be applied to
    pub file_path: Option<String>,
    pub fix_action: String,
    /// Shell command that reproduces the failure
    pub reproduction_command: Option<String>,
    /// Confidence of the diagnosis, 0.0 - 1.0
    pub confidence: f64,
    #[serde(default)]
    pub category: ErrorCategory,
    /// Confidence of the category classification, 0.0 - 1.0
    #[serde(default = "default_classification_confidence")]
    pub classification_confidence: f64,
}

const fn default_classification_confidence() -> f64 {
    1.0
}

impl Diagnosis {
    /// Create a diagnosis with full confidence and unknown category.
    pub fn new(summary: impl Into<String>, fix_action: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            file_path: None,
            fix_action: fix_action.into(),
            reproduction_command: None,
            confidence: 1.0,
            category: ErrorCategory::Unknown,
            classification_confidence: 1.0,
        }
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_reproduction_command(mut self, command: impl Into<String>) -> Self {
        self.reproduction_command = Some(command.into());
        self
    }

    pub fn with_category(mut self, category: ErrorCategory, confidence: f64) -> Self {
        self.category = category;
        self.classification_confidence = confidence;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Output of the planning provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<String>,
    pub approved: bool,
}

impl Plan {
    pub fn approved(tasks: Vec<String>) -> Self {
        Self {
            tasks,
            approved: true,
        }
    }
}

/// Output of the decomposition provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decomposition {
    /// Split the problem into the given sub-problems
    Decompose(ErrorDag),
    /// The problem should be handled as a single unit
    Atomic,
}

/// Input to the patch provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixRequest {
    pub run_id: Uuid,
    pub diagnosis: Diagnosis,
    pub plan: Option<Plan>,
    pub file_path: String,
    pub current_content: String,
    pub feedback: Vec<String>,
}

/// Input to the fix judge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub run_id: Uuid,
    pub diagnosis: Diagnosis,
    pub file_path: String,
    pub original_content: String,
    pub patched_content: String,
    pub verification: CommandResult,
}

/// Verdict of the fix judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgement {
    pub passed: bool,
    pub score: f64,
    pub reasoning: String,
}

/// Result of running a shell command in the sandbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined, stderr last.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// A reproduction command proposed by the inference collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferredCommand {
    pub command: String,
    pub confidence: f64,
    pub reasoning: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serde_snake_case() {
        let json = serde_json::to_string(&ErrorCategory::Dependency).unwrap();
        assert_eq!(json, "\"dependency\"");
        assert_eq!(ErrorCategory::Environment.to_string(), "environment");
    }

    #[test]
    fn test_combined_output() {
        let out = CommandResult {
            stdout: "running 3 tests".into(),
            stderr: "error[E0308]".into(),
            exit_code: 101,
        };
        assert_eq!(out.combined_output(), "running 3 tests\nerror[E0308]");
        assert!(!out.succeeded());
        assert_eq!(CommandResult::failure(1, "boom").combined_output(), "boom");
    }
}
