//! Complexity & convergence engine.
//!
//! Scores how hard the current sub-problem is and classifies the trend of the
//! score over a bounded trailing window. The coordinator uses the result to
//! decide between continuing, decomposing, and routing into loop recovery.

use serde::{Deserialize, Serialize};

use crate::domain::models::{ConvergenceConfig, ErrorCategory, RunState};

/// Direction of the complexity history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTrend {
    /// Fewer than two samples
    Unknown,
    Decreasing,
    /// Flat, or no net direction
    Stable,
    Increasing,
}

/// Classification of the trailing complexity window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    pub trend: ComplexityTrend,
    pub is_stable: bool,
    pub is_converging: bool,
    pub is_diverging: bool,
    pub increases: usize,
    pub decreases: usize,
    pub stable_pairs: usize,
}

impl ConvergenceReport {
    fn unknown() -> Self {
        Self {
            trend: ComplexityTrend::Unknown,
            is_stable: false,
            is_converging: false,
            is_diverging: false,
            increases: 0,
            decreases: 0,
            stable_pairs: 0,
        }
    }
}

/// The cost drivers that make up a complexity score
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexityInputs {
    pub category: ErrorCategory,
    pub reserved_files: usize,
    pub feedback_count: usize,
    pub diagnosis_confidence: f64,
    pub classification_confidence: f64,
    pub iteration: u32,
}

impl ComplexityInputs {
    /// Collect inputs from a run. Without a diagnosis the category is unknown
    /// and both confidences count as zero.
    pub fn from_run(run: &RunState) -> Self {
        let (category, diagnosis_confidence, classification_confidence) = run
            .diagnosis
            .as_ref()
            .map(|d| (d.category, d.confidence, d.classification_confidence))
            .unwrap_or((ErrorCategory::Unknown, 0.0, 0.0));

        Self {
            category,
            reserved_files: run.file_reservations.len(),
            feedback_count: run.feedback.len(),
            diagnosis_confidence,
            classification_confidence,
            iteration: run.iteration,
        }
    }
}

/// Base weight of an error category.
///
/// Environment and dependency problems are expensive and rarely fixed by a
/// single edit; syntax, import and type errors are usually local.
pub fn category_weight(category: ErrorCategory) -> f64 {
    match category {
        ErrorCategory::Syntax | ErrorCategory::Lint => 1.0,
        ErrorCategory::Import => 1.5,
        ErrorCategory::Type => 2.0,
        ErrorCategory::Test => 3.0,
        ErrorCategory::Runtime => 3.5,
        ErrorCategory::Build => 4.0,
        ErrorCategory::Unknown => 5.0,
        ErrorCategory::Dependency => 6.0,
        ErrorCategory::Environment => 7.0,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Complexity scoring and trend classification.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceEngine {
    config: ConvergenceConfig,
}

impl ConvergenceEngine {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// Score the current state of a run.
    pub fn estimate(&self, run: &RunState) -> f64 {
        self.estimate_inputs(&ComplexityInputs::from_run(run))
    }

    /// Additive score, rounded to one decimal:
    /// category weight, `+2` per reserved file, `+1.5` per feedback entry,
    /// `+5 * (1 - diagnosis confidence)`, `+3 * (1 - classification confidence)`,
    /// `+0.5 * iteration`.
    pub fn estimate_inputs(&self, inputs: &ComplexityInputs) -> f64 {
        let diagnosis_confidence = inputs.diagnosis_confidence.clamp(0.0, 1.0);
        let classification_confidence = inputs.classification_confidence.clamp(0.0, 1.0);

        let score = category_weight(inputs.category)
            + 2.0 * inputs.reserved_files as f64
            + 1.5 * inputs.feedback_count as f64
            + 5.0 * (1.0 - diagnosis_confidence)
            + 3.0 * (1.0 - classification_confidence)
            + 0.5 * f64::from(inputs.iteration);

        round_one_decimal(score)
    }

    /// Classify the trailing window of `history`.
    pub fn convergence(&self, history: &[f64]) -> ConvergenceReport {
        if history.len() < 2 {
            return ConvergenceReport::unknown();
        }

        let window_size = self.config.window_size.max(2);
        let window = &history[history.len().saturating_sub(window_size)..];

        let mut increases = 0;
        let mut decreases = 0;
        let mut stable_pairs = 0;
        for pair in window.windows(2) {
            let delta = pair[1] - pair[0];
            if delta.abs() < self.config.stability_epsilon {
                stable_pairs += 1;
            } else if delta > 0.0 {
                increases += 1;
            } else {
                decreases += 1;
            }
        }

        let is_stable = stable_pairs >= window_size - 1;
        let is_converging = decreases > increases;
        let is_diverging = increases > decreases && !is_stable;

        let trend = if is_stable {
            ComplexityTrend::Stable
        } else if is_converging {
            ComplexityTrend::Decreasing
        } else if increases > decreases {
            ComplexityTrend::Increasing
        } else {
            ComplexityTrend::Stable
        };

        ConvergenceReport {
            trend,
            is_stable,
            is_converging,
            is_diverging,
            increases,
            decreases,
            stable_pairs,
        }
    }

    /// A problem is atomic only when its score is low *and* the score has
    /// stopped moving.
    pub fn is_atomic(&self, score: f64, history: &[f64]) -> bool {
        score < self.config.atomic_threshold && self.convergence(history).is_stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Diagnosis;

    fn engine() -> ConvergenceEngine {
        ConvergenceEngine::default()
    }

    fn inputs(category: ErrorCategory) -> ComplexityInputs {
        ComplexityInputs {
            category,
            reserved_files: 0,
            feedback_count: 0,
            diagnosis_confidence: 1.0,
            classification_confidence: 1.0,
            iteration: 0,
        }
    }

    #[test]
    fn test_estimate_sums_every_term() {
        let score = engine().estimate_inputs(&ComplexityInputs {
            category: ErrorCategory::Dependency,
            reserved_files: 2,
            feedback_count: 3,
            diagnosis_confidence: 0.8,
            classification_confidence: 0.5,
            iteration: 4,
        });
        // 6 + 4 + 4.5 + 1.0 + 1.5 + 2.0
        assert!((score - 19.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_estimate_rounds_to_one_decimal() {
        let score = engine().estimate_inputs(&ComplexityInputs {
            diagnosis_confidence: 0.77,
            ..inputs(ErrorCategory::Syntax)
        });
        // 1 + 5 * 0.23 = 2.15 -> 2.2 (allowing for float representation)
        assert!((score - 2.2).abs() < 0.051);
        assert!((score * 10.0 - (score * 10.0).round()).abs() < 1e-9);
    }

    #[test]
    fn test_cheap_categories_weigh_less() {
        let e = engine();
        let syntax = e.estimate_inputs(&inputs(ErrorCategory::Syntax));
        let import = e.estimate_inputs(&inputs(ErrorCategory::Import));
        let env = e.estimate_inputs(&inputs(ErrorCategory::Environment));
        let unknown = e.estimate_inputs(&inputs(ErrorCategory::Unknown));
        assert!(syntax < env);
        assert!(import < unknown);
    }

    #[test]
    fn test_estimate_from_run_without_diagnosis() {
        let run = RunState::new(None, 10);
        // unknown (5) + 5 + 3
        assert!((engine().estimate(&run) - 13.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_estimate_from_run_with_diagnosis() {
        let mut run = RunState::new(None, 10);
        run.iteration = 2;
        run.feedback.push("attempt 1 failed".into());
        run.file_reservations.insert("src/lib.rs".into());
        run.diagnosis = Some(Diagnosis::new("missing import", "add use").with_category(ErrorCategory::Import, 1.0));
        // 1.5 + 2 + 1.5 + 0 + 0 + 1
        assert!((engine().estimate(&run) - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_convergence_needs_two_samples() {
        for history in [vec![], vec![4.0]] {
            let report = engine().convergence(&history);
            assert_eq!(report.trend, ComplexityTrend::Unknown);
            assert!(!report.is_stable);
            assert!(!report.is_converging);
            assert!(!report.is_diverging);
        }
    }

    #[test]
    fn test_diverging_history_uses_trailing_window() {
        let report = engine().convergence(&[10.0, 12.0, 14.0, 16.0, 18.0, 20.0]);
        assert_eq!(report.increases, 2);
        assert_eq!(report.decreases, 0);
        assert!(report.is_diverging);
        assert_eq!(report.trend, ComplexityTrend::Increasing);
    }

    #[test]
    fn test_converging_history() {
        let report = engine().convergence(&[20.0, 30.0, 12.0, 9.0]);
        assert!(report.is_converging);
        assert!(!report.is_diverging);
        assert_eq!(report.trend, ComplexityTrend::Decreasing);
    }

    #[test]
    fn test_small_deltas_are_stable() {
        let report = engine().convergence(&[7.0, 7.2, 7.1]);
        assert!(report.is_stable);
        assert_eq!(report.stable_pairs, 2);
        assert_eq!(report.trend, ComplexityTrend::Stable);
    }

    #[test]
    fn test_two_samples_cannot_be_stable_with_window_three() {
        let report = engine().convergence(&[4.0, 4.1]);
        assert!(!report.is_stable);
        assert_eq!(report.trend, ComplexityTrend::Stable);
    }

    #[test]
    fn test_mixed_window_is_neither() {
        let report = engine().convergence(&[10.0, 12.0, 10.0]);
        assert!(!report.is_converging);
        assert!(!report.is_diverging);
        assert!(!report.is_stable);
    }

    #[test]
    fn test_is_atomic_requires_low_score_and_stability() {
        let e = engine();
        let stable = [3.0, 3.1, 3.0];
        assert!(e.is_atomic(3.0, &stable));
        assert!(!e.is_atomic(5.0, &stable));
        assert!(!e.is_atomic(2.0, &[9.0, 6.0, 3.0]));
        assert!(!e.is_atomic(2.0, &[]));
    }

    #[test]
    fn test_custom_epsilon() {
        let e = ConvergenceEngine::new(ConvergenceConfig {
            stability_epsilon: 3.0,
            ..ConvergenceConfig::default()
        });
        assert!(e.convergence(&[10.0, 12.0, 14.0]).is_stable);
    }
}
