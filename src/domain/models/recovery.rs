//! Recovery strategy models.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ReliabilityLayer;

/// What a recovery strategy gets to look at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub layer: ReliabilityLayer,
    pub run_id: Uuid,
    pub iteration: u32,
    /// Latest complexity sample
    pub complexity: f64,
    pub reproduction_command: Option<String>,
    pub repository_path: Option<PathBuf>,
    /// Name of the sandbox backend currently in use
    pub sandbox_mode: String,
    /// Summary of the current diagnosis or trigger reason
    pub problem_summary: String,
    pub feedback_count: usize,
}

impl RecoveryContext {
    pub fn new(layer: ReliabilityLayer, run_id: Uuid) -> Self {
        Self {
            layer,
            run_id,
            iteration: 0,
            complexity: 0.0,
            reproduction_command: None,
            repository_path: None,
            sandbox_mode: String::from("local"),
            problem_summary: String::new(),
            feedback_count: 0,
        }
    }
}

/// Result of a single strategy attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub success: bool,
    pub reasoning: String,
    pub confidence: f64,
    /// Structured guidance for the next iteration or for a human operator
    pub guidance: Option<serde_json::Value>,
    /// Set by strategies that recover a missing reproduction command
    pub reproduction_command: Option<String>,
}

impl StrategyAttempt {
    pub fn succeeded(reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            success: true,
            reasoning: reasoning.into(),
            confidence,
            guidance: None,
            reproduction_command: None,
        }
    }

    pub fn failed(reasoning: impl Into<String>) -> Self {
        Self {
            success: false,
            reasoning: reasoning.into(),
            confidence: 0.0,
            guidance: None,
            reproduction_command: None,
        }
    }

    pub fn with_guidance(mut self, guidance: serde_json::Value) -> Self {
        self.guidance = Some(guidance);
        self
    }
}

/// Final result of a recovery pass over a layer's strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub layer: ReliabilityLayer,
    /// Strategy that produced this result
    pub strategy: String,
    pub success: bool,
    pub reasoning: String,
    pub confidence: f64,
    pub guidance: Option<serde_json::Value>,
    pub reproduction_command: Option<String>,
    /// Every strategy attempted, in order
    pub attempted: Vec<String>,
}
