//! Recovery strategy orchestrator.
//!
//! When a protective threshold fires, the coordinator hands a
//! [`RecoveryContext`] to [`RecoveryOrchestrator::attempt_recovery`], which
//! walks the layer's strategies in order until one succeeds. `request-human`
//! is always the last candidate and never succeeds, so a pass over the
//! registry always ends in either a recovery or an explicit escalation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    RecoveryConfig, RecoveryContext, RecoveryResult, ReliabilityLayer, StrategyAttempt,
    StrategyStats,
};
use crate::domain::ports::ReproductionInferrer;
use crate::services::reliability_telemetry::ReliabilityTelemetry;

pub const INFER_COMMAND: &str = "infer-command";
pub const REQUEST_HUMAN: &str = "request-human";
pub const REDUCE_SCOPE: &str = "reduce-scope";
pub const SWITCH_MODE: &str = "switch-mode";
pub const REGENERATE: &str = "regenerate";

/// Execution backends `switch-mode` can suggest, in order of preference
const EXECUTION_BACKENDS: [&str; 3] = ["container", "microvm", "local"];

// ---------------------------------------------------------------------------
// Strategy trait
// ---------------------------------------------------------------------------

/// A named remediation for a protective threshold.
///
/// Strategies hold no per-run state; their outcomes are recorded as
/// reliability events by the orchestrator.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the strategy can be tried at all in this context.
    fn can_attempt(&self, context: &RecoveryContext) -> bool;

    async fn attempt(&self, context: &RecoveryContext) -> DomainResult<StrategyAttempt>;
}

// ---------------------------------------------------------------------------
// phase2-reproduction strategies
// ---------------------------------------------------------------------------

/// Infer a reproduction command from the repository layout.
pub struct InferCommandStrategy {
    inferrer: Arc<dyn ReproductionInferrer>,
}

impl InferCommandStrategy {
    pub fn new(inferrer: Arc<dyn ReproductionInferrer>) -> Self {
        Self { inferrer }
    }
}

#[async_trait]
impl RecoveryStrategy for InferCommandStrategy {
    fn name(&self) -> &'static str {
        INFER_COMMAND
    }

    fn can_attempt(&self, context: &RecoveryContext) -> bool {
        context.reproduction_command.is_none() && context.repository_path.is_some()
    }

    async fn attempt(&self, context: &RecoveryContext) -> DomainResult<StrategyAttempt> {
        let Some(path) = context.repository_path.as_deref() else {
            return Ok(StrategyAttempt::failed("No repository path to inspect"));
        };

        match self.inferrer.infer(path).await? {
            Some(inferred) => {
                let mut attempt = StrategyAttempt::succeeded(
                    format!("Inferred `{}`: {}", inferred.command, inferred.reasoning),
                    inferred.confidence,
                )
                .with_guidance(json!({
                    "action": INFER_COMMAND,
                    "reproduction_command": inferred.command,
                }));
                attempt.reproduction_command = Some(inferred.command);
                Ok(attempt)
            }
            None => Ok(StrategyAttempt::failed(format!(
                "No known build manifest found in {}",
                path.display()
            ))),
        }
    }
}

/// Hand the run to a human operator. Always available, never succeeds.
#[derive(Debug, Clone, Default)]
pub struct RequestHumanStrategy;

#[async_trait]
impl RecoveryStrategy for RequestHumanStrategy {
    fn name(&self) -> &'static str {
        REQUEST_HUMAN
    }

    fn can_attempt(&self, _context: &RecoveryContext) -> bool {
        true
    }

    async fn attempt(&self, context: &RecoveryContext) -> DomainResult<StrategyAttempt> {
        let suggestion = match context.layer {
            ReliabilityLayer::Phase2Reproduction => {
                "Provide a shell command that reproduces the failure"
            }
            ReliabilityLayer::Phase3LoopDetection => {
                "Review the attempted fixes and narrow the problem manually"
            }
        };
        Ok(StrategyAttempt::failed("Escalated to a human operator").with_guidance(json!({
            "action": REQUEST_HUMAN,
            "problem": context.problem_summary,
            "iteration": context.iteration,
            "suggestion": suggestion,
        })))
    }
}

// ---------------------------------------------------------------------------
// phase3-loop-detection strategies
// ---------------------------------------------------------------------------

/// Narrow the fix to a smaller slice of the problem.
#[derive(Debug, Clone)]
pub struct ReduceScopeStrategy {
    complexity_threshold: f64,
}

impl ReduceScopeStrategy {
    pub fn new(complexity_threshold: f64) -> Self {
        Self {
            complexity_threshold,
        }
    }
}

#[async_trait]
impl RecoveryStrategy for ReduceScopeStrategy {
    fn name(&self) -> &'static str {
        REDUCE_SCOPE
    }

    fn can_attempt(&self, context: &RecoveryContext) -> bool {
        context.complexity > self.complexity_threshold
    }

    async fn attempt(&self, context: &RecoveryContext) -> DomainResult<StrategyAttempt> {
        Ok(StrategyAttempt::succeeded(
            format!(
                "Complexity {:.1} exceeds {:.1}; fix one file at a time",
                context.complexity, self.complexity_threshold
            ),
            0.6,
        )
        .with_guidance(json!({
            "action": REDUCE_SCOPE,
            "suggestion": "Address only the first reported error and leave the rest for later iterations",
        })))
    }
}

/// Suggest a different execution backend.
#[derive(Debug, Clone, Default)]
pub struct SwitchModeStrategy;

impl SwitchModeStrategy {
    fn alternate_backend(current: &str) -> &'static str {
        EXECUTION_BACKENDS
            .iter()
            .copied()
            .find(|backend| *backend != current)
            .unwrap_or("container")
    }
}

#[async_trait]
impl RecoveryStrategy for SwitchModeStrategy {
    fn name(&self) -> &'static str {
        SWITCH_MODE
    }

    fn can_attempt(&self, _context: &RecoveryContext) -> bool {
        true
    }

    async fn attempt(&self, context: &RecoveryContext) -> DomainResult<StrategyAttempt> {
        let alternate = Self::alternate_backend(&context.sandbox_mode);
        Ok(StrategyAttempt::succeeded(
            format!(
                "Switch execution backend from {} to {alternate}",
                context.sandbox_mode
            ),
            0.5,
        )
        .with_guidance(json!({
            "action": SWITCH_MODE,
            "current_backend": context.sandbox_mode,
            "suggested_backend": alternate,
        })))
    }
}

/// Throw away the current approach and start over.
#[derive(Debug, Clone)]
pub struct RegenerateStrategy {
    max_iteration: u32,
}

impl RegenerateStrategy {
    pub fn new(max_iteration: u32) -> Self {
        Self { max_iteration }
    }
}

#[async_trait]
impl RecoveryStrategy for RegenerateStrategy {
    fn name(&self) -> &'static str {
        REGENERATE
    }

    fn can_attempt(&self, context: &RecoveryContext) -> bool {
        context.iteration < self.max_iteration
    }

    async fn attempt(&self, context: &RecoveryContext) -> DomainResult<StrategyAttempt> {
        Ok(StrategyAttempt::succeeded(
            format!(
                "Discard {} failed attempts and regenerate from a fresh diagnosis",
                context.feedback_count
            ),
            0.4,
        )
        .with_guidance(json!({
            "action": REGENERATE,
            "suggestion": "Ignore previous fixes and approach the error from a different angle",
        })))
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Per-layer strategy registry plus the recovery loop.
pub struct RecoveryOrchestrator {
    telemetry: Arc<ReliabilityTelemetry>,
    config: RecoveryConfig,
    reproduction: Vec<Arc<dyn RecoveryStrategy>>,
    loop_detection: Vec<Arc<dyn RecoveryStrategy>>,
}

impl RecoveryOrchestrator {
    /// Build the standard registry for both layers.
    pub fn new(
        telemetry: Arc<ReliabilityTelemetry>,
        inferrer: Arc<dyn ReproductionInferrer>,
        config: RecoveryConfig,
    ) -> Self {
        let request_human: Arc<dyn RecoveryStrategy> = Arc::new(RequestHumanStrategy);
        let reproduction: Vec<Arc<dyn RecoveryStrategy>> = vec![
            Arc::new(InferCommandStrategy::new(inferrer)),
            request_human.clone(),
        ];
        let loop_detection: Vec<Arc<dyn RecoveryStrategy>> = vec![
            Arc::new(ReduceScopeStrategy::new(
                config.reduce_scope_complexity_threshold,
            )),
            Arc::new(SwitchModeStrategy),
            Arc::new(RegenerateStrategy::new(config.regenerate_max_iteration)),
            request_human,
        ];

        Self {
            telemetry,
            config,
            reproduction,
            loop_detection,
        }
    }

    /// Registered strategies for a layer, in guard order.
    pub fn strategies(&self, layer: ReliabilityLayer) -> &[Arc<dyn RecoveryStrategy>] {
        match layer {
            ReliabilityLayer::Phase2Reproduction => &self.reproduction,
            ReliabilityLayer::Phase3LoopDetection => &self.loop_detection,
        }
    }

    /// Candidate order for this pass. With `prefer_proven_strategies`, strategies
    /// with a recorded success move ahead in success-rate order; `request-human`
    /// stays last either way.
    fn candidates(
        &self,
        layer: ReliabilityLayer,
        history: &[StrategyStats],
    ) -> Vec<Arc<dyn RecoveryStrategy>> {
        let mut candidates: Vec<Arc<dyn RecoveryStrategy>> = self.strategies(layer).to_vec();

        if self.config.prefer_proven_strategies {
            let rank = |name: &str| {
                history
                    .iter()
                    .position(|s| s.strategy == name && s.successes > 0)
                    .unwrap_or(usize::MAX)
            };
            // stable: unranked strategies keep registry order
            candidates.sort_by_key(|s| rank(s.name()));
        }

        candidates.sort_by_key(|s| s.name() == REQUEST_HUMAN);
        candidates
    }

    /// Try strategies until one succeeds.
    ///
    /// Returns the winning result, or the last attempted one when every
    /// candidate failed, or `None` when no strategy could even be attempted.
    /// The triggering event is updated once with the final strategy and outcome.
    pub async fn attempt_recovery(
        &self,
        context: &RecoveryContext,
        event_id: Option<Uuid>,
    ) -> Option<RecoveryResult> {
        let layer = context.layer;
        let history = match self
            .telemetry
            .get_top_strategies(layer, self.config.history_limit)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(layer = %layer, error = %e, "Strategy history unavailable");
                Vec::new()
            }
        };

        let mut attempted: Vec<String> = Vec::new();
        let mut last: Option<(&'static str, StrategyAttempt)> = None;

        for strategy in self.candidates(layer, &history) {
            let name = strategy.name();
            if !strategy.can_attempt(context) {
                tracing::debug!(layer = %layer, strategy = name, "Strategy guard not met");
                continue;
            }

            attempted.push(name.to_string());
            let attempt = match strategy.attempt(context).await {
                Ok(attempt) => attempt,
                Err(e) => StrategyAttempt::failed(format!("{name} errored: {e}")),
            };

            tracing::info!(
                run_id = %context.run_id,
                layer = %layer,
                strategy = name,
                success = attempt.success,
                reasoning = %attempt.reasoning,
                "Recovery strategy attempted"
            );

            let success = attempt.success;
            last = Some((name, attempt));
            if success {
                break;
            }
        }

        let (strategy, attempt) = last?;
        if let Some(id) = event_id {
            self.telemetry
                .update_recovery_outcome(id, strategy, attempt.success);
        }

        Some(RecoveryResult {
            layer,
            strategy: strategy.to_string(),
            success: attempt.success,
            reasoning: attempt.reasoning,
            confidence: attempt.confidence,
            guidance: attempt.guidance,
            reproduction_command: attempt.reproduction_command,
            attempted,
        })
    }
}
