//! Reliability telemetry models
//!
//! Every check of a protective threshold produces a [`ReliabilityEvent`]. Events
//! are updated exactly once when a recovery attempt completes and are only ever
//! deleted by the age-based retention sweep.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named protective threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReliabilityLayer {
    /// The diagnosis reached execution without a reproduction command
    #[serde(rename = "phase2-reproduction")]
    Phase2Reproduction,
    /// Complexity kept diverging or the agent repeated a prior state
    #[serde(rename = "phase3-loop-detection")]
    Phase3LoopDetection,
}

impl ReliabilityLayer {
    pub const ALL: [ReliabilityLayer; 2] = [Self::Phase2Reproduction, Self::Phase3LoopDetection];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phase2Reproduction => "phase2-reproduction",
            Self::Phase3LoopDetection => "phase3-loop-detection",
        }
    }
}

impl fmt::Display for ReliabilityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReliabilityLayer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phase2-reproduction" => Ok(Self::Phase2Reproduction),
            "phase3-loop-detection" => Ok(Self::Phase3LoopDetection),
            other => Err(format!(
                "Unknown reliability layer: {other} (expected phase2-reproduction or phase3-loop-detection)"
            )),
        }
    }
}

/// Outcome of a triggered event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryOutcome {
    #[default]
    Pending,
    Recovered,
    Failed,
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Recovered => "recovered",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RecoveryOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "recovered" => Ok(Self::Recovered),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown recovery outcome: {other}")),
        }
    }
}

/// Durable record of one threshold check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityEvent {
    pub id: Uuid,
    pub layer: ReliabilityLayer,
    pub triggered: bool,
    /// Threshold value in effect when the check ran
    pub threshold: i64,
    pub context: serde_json::Value,
    pub outcome: RecoveryOutcome,
    pub recovery_attempted: bool,
    pub recovery_strategy: Option<String>,
    pub recovery_success: Option<bool>,
    pub agent_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ReliabilityEvent {
    /// Apply a completed recovery attempt.
    pub fn apply_recovery(&mut self, strategy: impl Into<String>, success: bool) {
        self.recovery_attempted = true;
        self.recovery_strategy = Some(strategy.into());
        self.recovery_success = Some(success);
        self.outcome = if success {
            RecoveryOutcome::Recovered
        } else {
            RecoveryOutcome::Failed
        };
    }
}

/// Data for recording a new event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReliabilityEvent {
    pub layer: ReliabilityLayer,
    pub triggered: bool,
    pub threshold: i64,
    pub context: serde_json::Value,
    pub agent_run_id: Option<Uuid>,
}

impl NewReliabilityEvent {
    /// Materialize into a pending event with a fresh id.
    pub fn into_event(self) -> ReliabilityEvent {
        ReliabilityEvent {
            id: Uuid::new_v4(),
            layer: self.layer,
            triggered: self.triggered,
            threshold: self.threshold,
            context: self.context,
            outcome: RecoveryOutcome::Pending,
            recovery_attempted: false,
            recovery_strategy: None,
            recovery_success: None,
            agent_run_id: self.agent_run_id,
            created_at: Utc::now(),
        }
    }
}

/// Query filter for reliability events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub layer: Option<ReliabilityLayer>,
    pub since: Option<DateTime<Utc>>,
    pub agent_run_id: Option<Uuid>,
}

impl EventFilter {
    pub fn layer(layer: ReliabilityLayer) -> Self {
        Self {
            layer: Some(layer),
            ..Default::default()
        }
    }

    pub fn since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }
}

/// Recommendation produced by threshold analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAnalysis {
    pub layer: ReliabilityLayer,
    pub current_threshold: i64,
    pub recommended_threshold: i64,
    /// 0.0 when there is not enough data
    pub confidence: f64,
    pub reasoning: String,
    pub data_points: usize,
    pub trigger_rate: f64,
    pub recovery_success_rate: f64,
}

/// Historical success of one recovery strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub strategy: String,
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
}

/// Per-layer aggregate for the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    pub layer: ReliabilityLayer,
    pub total_events: u64,
    pub triggered: u64,
    pub trigger_rate: f64,
    pub recovery_attempts: u64,
    pub recovered: u64,
    pub recovery_success_rate: f64,
    pub top_strategies: Vec<StrategyStats>,
}

/// Both layers plus overall totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub layers: Vec<LayerSummary>,
    pub total_events: u64,
    pub total_triggered: u64,
    pub total_recovered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_wire_names() {
        assert_eq!(
            serde_json::to_string(&ReliabilityLayer::Phase2Reproduction).unwrap(),
            "\"phase2-reproduction\""
        );
        assert_eq!(
            "phase3-loop-detection".parse::<ReliabilityLayer>().unwrap(),
            ReliabilityLayer::Phase3LoopDetection
        );
        assert!("phase4".parse::<ReliabilityLayer>().is_err());
    }

    #[test]
    fn test_apply_recovery_sets_outcome() {
        let mut event = NewReliabilityEvent {
            layer: ReliabilityLayer::Phase3LoopDetection,
            triggered: true,
            threshold: 2,
            context: serde_json::json!({}),
            agent_run_id: None,
        }
        .into_event();
        assert_eq!(event.outcome, RecoveryOutcome::Pending);

        event.apply_recovery("switch-mode", true);
        assert!(event.recovery_attempted);
        assert_eq!(event.recovery_strategy.as_deref(), Some("switch-mode"));
        assert_eq!(event.recovery_success, Some(true));
        assert_eq!(event.outcome, RecoveryOutcome::Recovered);

        event.apply_recovery("request-human", false);
        assert_eq!(event.outcome, RecoveryOutcome::Failed);
    }
}
