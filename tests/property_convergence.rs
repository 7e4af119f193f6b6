use proptest::prelude::*;
use remedy::domain::models::ErrorCategory;
use remedy::services::convergence_engine::category_weight;
use remedy::services::{ComplexityInputs, ComplexityTrend, ConvergenceEngine};

fn category() -> impl Strategy<Value = ErrorCategory> {
    prop_oneof![
        Just(ErrorCategory::Syntax),
        Just(ErrorCategory::Lint),
        Just(ErrorCategory::Import),
        Just(ErrorCategory::Type),
        Just(ErrorCategory::Test),
        Just(ErrorCategory::Runtime),
        Just(ErrorCategory::Build),
        Just(ErrorCategory::Unknown),
        Just(ErrorCategory::Dependency),
        Just(ErrorCategory::Environment),
    ]
}

fn history(max_len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(0.0f64..50.0, 0..max_len)
}

proptest! {
    /// Property: fewer than two samples never classify
    #[test]
    fn prop_short_history_is_unknown(sample in prop::option::of(0.0f64..50.0)) {
        let history: Vec<f64> = sample.into_iter().collect();
        let report = ConvergenceEngine::default().convergence(&history);
        prop_assert_eq!(report.trend, ComplexityTrend::Unknown);
        prop_assert!(!report.is_stable && !report.is_converging && !report.is_diverging);
    }

    /// Property: the flags are mutually consistent for any history
    #[test]
    fn prop_flags_are_exclusive(history in history(12)) {
        let report = ConvergenceEngine::default().convergence(&history);
        prop_assert!(!(report.is_stable && report.is_diverging));
        prop_assert!(!(report.is_converging && report.is_diverging));
        if report.is_diverging {
            prop_assert_eq!(report.trend, ComplexityTrend::Increasing);
        }
        // only the trailing window of three samples is classified
        prop_assert!(report.increases + report.decreases + report.stable_pairs <= 2);
    }

    /// Property: a score at or above the atomic threshold is never atomic
    #[test]
    fn prop_high_score_is_never_atomic(score in 5.0f64..100.0, history in history(8)) {
        prop_assert!(!ConvergenceEngine::default().is_atomic(score, &history));
    }

    /// Property: the score is at least the category weight and grows with iterations
    #[test]
    fn prop_estimate_is_monotonic_in_iteration(
        category in category(),
        reserved_files in 0usize..5,
        feedback_count in 0usize..10,
        diagnosis_confidence in 0.0f64..=1.0,
        classification_confidence in 0.0f64..=1.0,
        iteration in 0u32..50,
    ) {
        let engine = ConvergenceEngine::default();
        let inputs = ComplexityInputs {
            category,
            reserved_files,
            feedback_count,
            diagnosis_confidence,
            classification_confidence,
            iteration,
        };
        let score = engine.estimate_inputs(&inputs);
        let later = engine.estimate_inputs(&ComplexityInputs { iteration: iteration + 1, ..inputs });

        prop_assert!(score >= category_weight(category) - 0.05);
        prop_assert!(later > score);
    }
}
