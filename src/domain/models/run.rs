//! Repair run domain models
//!
//! A [`RunState`] is one repair session for a single detected failure. It is
//! owned and mutated exclusively by the phase coordinator; everything else
//! receives snapshots.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Diagnosis, ErrorDag};

/// Phase of a repair run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Analysis,
    Planning,
    Decomposition,
    Execution,
    Verification,
    Finished,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analysis => "analysis",
            Self::Planning => "planning",
            Self::Decomposition => "decomposition",
            Self::Execution => "execution",
            Self::Verification => "verification",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "analysis" => Ok(Self::Analysis),
            "planning" => Ok(Self::Planning),
            "decomposition" => Ok(Self::Decomposition),
            "execution" => Ok(Self::Execution),
            "verification" => Ok(Self::Verification),
            "finished" => Ok(Self::Finished),
            other => Err(format!("Unknown run phase: {other}")),
        }
    }
}

/// Status of a repair run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Working,
    Success,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    /// Terminal statuses end the run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Working)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "working" => Ok(Self::Working),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("Unknown run status: {other}")),
        }
    }
}

/// Initial context for a repair run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairRequest {
    /// Human-readable run name (CI job, PR title, ...)
    pub name: Option<String>,
    /// Raw failure output that triggered the run
    pub error_log: String,
    /// Repository checkout, when one is available to the inference collaborator
    pub repository_path: Option<PathBuf>,
    /// Overrides the configured iteration cap
    pub max_iterations: Option<u32>,
}

impl RepairRequest {
    pub fn new(error_log: impl Into<String>) -> Self {
        Self {
            error_log: error_log.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_repository(mut self, path: impl Into<PathBuf>) -> Self {
        self.repository_path = Some(path.into());
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

/// One repair session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub id: Uuid,
    pub name: Option<String>,
    pub phase: RunPhase,
    /// Incremented each time the run (re-)enters analysis
    pub iteration: u32,
    pub max_iterations: u32,
    pub status: RunStatus,
    /// Descriptions of prior failed attempts, oldest first
    pub feedback: Vec<String>,
    /// Complexity samples, one per analysis; append-only
    pub complexity_history: Vec<f64>,
    /// Sub-problem ids solved so far
    pub solved_nodes: Vec<String>,
    /// Paths currently claimed for edits
    pub file_reservations: BTreeSet<String>,
    pub diagnosis: Option<Diagnosis>,
    /// Active decomposition, if the problem was split
    pub dag: Option<ErrorDag>,
    /// Sub-problem currently being worked on
    pub current_node: Option<String>,
    /// Human-readable status message; always set on terminal states
    pub message: Option<String>,
    /// Structured guidance for a human operator after loop/recovery triggers
    pub guidance: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Create a fresh run in the `idle` phase.
    pub fn new(name: Option<String>, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            phase: RunPhase::Idle,
            iteration: 0,
            max_iterations,
            status: RunStatus::Working,
            feedback: Vec::new(),
            complexity_history: Vec::new(),
            solved_nodes: Vec::new(),
            file_reservations: BTreeSet::new(),
            diagnosis: None,
            dag: None,
            current_node: None,
            message: None,
            guidance: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Latest complexity sample, if any.
    pub fn latest_complexity(&self) -> Option<f64> {
        self.complexity_history.last().copied()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Partial state change reported to observers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStateDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<RunPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunStateDelta {
    pub fn phase(phase: RunPhase) -> Self {
        Self {
            phase: Some(phase),
            ..Default::default()
        }
    }
}

/// Severity of an observer log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_idle_and_working() {
        let run = RunState::new(Some("ci #42".into()), 10);
        assert_eq!(run.phase, RunPhase::Idle);
        assert_eq!(run.status, RunStatus::Working);
        assert_eq!(run.iteration, 0);
        assert!(!run.is_terminal());
        assert!(run.latest_complexity().is_none());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [RunStatus::Working, RunStatus::Success, RunStatus::Failed, RunStatus::Stopped] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<RunStatus>().is_err());
        assert!(RunStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_delta_serializes_only_present_fields() {
        let delta = RunStateDelta::phase(RunPhase::Planning);
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json, serde_json::json!({ "phase": "planning" }));
    }
}
