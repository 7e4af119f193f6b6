//! Reliability telemetry and metrics.
//!
//! Every check of a protective threshold is recorded as a
//! [`ReliabilityEvent`]. Writes go through a bounded queue drained by one
//! worker task so a slow or broken store never blocks the repair loop; reads
//! (rates, threshold analysis, dashboards) hit the repository directly.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    DashboardSummary, EventFilter, LayerSummary, NewReliabilityEvent, ReliabilityEvent,
    ReliabilityLayer, StrategyStats, TelemetryConfig, ThresholdAnalysis,
};
use crate::domain::ports::ReliabilityRepository;

/// Threshold in effect for the reproduction-command check
pub const REPRODUCTION_THRESHOLD: i64 = 1;

enum TelemetryCommand {
    Record(Box<ReliabilityEvent>),
    UpdateOutcome {
        id: Uuid,
        strategy: String,
        success: bool,
    },
    Flush(oneshot::Sender<()>),
}

/// Trigger and recovery rates over a set of events
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Rates {
    total: u64,
    triggered: u64,
    attempts: u64,
    recovered: u64,
}

impl Rates {
    fn from_events(events: &[ReliabilityEvent]) -> Self {
        events.iter().fold(Self::default(), |mut acc, event| {
            acc.total += 1;
            if event.triggered {
                acc.triggered += 1;
            }
            if event.recovery_attempted {
                acc.attempts += 1;
                if event.recovery_success == Some(true) {
                    acc.recovered += 1;
                }
            }
            acc
        })
    }

    fn trigger_rate(&self) -> f64 {
        ratio(self.triggered, self.total)
    }

    fn recovery_success_rate(&self) -> f64 {
        ratio(self.recovered, self.attempts)
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// `ceil` that ignores float noise such as `2.0000000000000004`.
fn ceil_steps(value: f64) -> i64 {
    (value - 1e-9).ceil() as i64
}

/// Records reliability events and derives metrics from them.
pub struct ReliabilityTelemetry {
    repository: Arc<dyn ReliabilityRepository>,
    sender: mpsc::Sender<TelemetryCommand>,
    config: TelemetryConfig,
}

impl ReliabilityTelemetry {
    /// Start the write worker. Must be called inside a tokio runtime.
    pub fn spawn(repository: Arc<dyn ReliabilityRepository>, config: TelemetryConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(Self::run_worker(repository.clone(), receiver));
        Self {
            repository,
            sender,
            config,
        }
    }

    /// Drain the queue until every sender is gone.
    async fn run_worker(
        repository: Arc<dyn ReliabilityRepository>,
        mut receiver: mpsc::Receiver<TelemetryCommand>,
    ) {
        while let Some(command) = receiver.recv().await {
            match command {
                TelemetryCommand::Record(event) => {
                    if let Err(e) = repository.insert(&event).await {
                        tracing::warn!(
                            event_id = %event.id,
                            layer = %event.layer,
                            error = %e,
                            "Failed to persist reliability event"
                        );
                    }
                }
                TelemetryCommand::UpdateOutcome {
                    id,
                    strategy,
                    success,
                } => {
                    if let Err(e) = repository.update_recovery(id, &strategy, success).await {
                        tracing::warn!(
                            event_id = %id,
                            strategy = %strategy,
                            error = %e,
                            "Failed to record recovery outcome"
                        );
                    }
                }
                TelemetryCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!("Reliability telemetry worker stopped");
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    fn enqueue(&self, command: TelemetryCommand) {
        match self.sender.try_send(command) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Reliability telemetry queue full, dropping write");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Reliability telemetry worker is gone, dropping write");
            }
        }
    }

    /// Queue an event for persistence and return its id.
    ///
    /// Never fails: persistence problems are logged by the worker.
    pub fn record_event(&self, data: NewReliabilityEvent) -> Uuid {
        let event = data.into_event();
        let id = event.id;
        tracing::debug!(
            event_id = %id,
            layer = %event.layer,
            triggered = event.triggered,
            threshold = event.threshold,
            "Recording reliability event"
        );
        self.enqueue(TelemetryCommand::Record(Box::new(event)));
        id
    }

    /// The diagnosis reached execution without a reproduction command.
    pub fn record_reproduction_required(&self, context: Value, agent_run_id: Option<Uuid>) -> Uuid {
        self.record_event(NewReliabilityEvent {
            layer: ReliabilityLayer::Phase2Reproduction,
            triggered: true,
            threshold: REPRODUCTION_THRESHOLD,
            context,
            agent_run_id,
        })
    }

    /// The diagnosis reached execution with a reproduction command.
    pub fn record_reproduction_present(&self, context: Value, agent_run_id: Option<Uuid>) -> Uuid {
        self.record_event(NewReliabilityEvent {
            layer: ReliabilityLayer::Phase2Reproduction,
            triggered: false,
            threshold: REPRODUCTION_THRESHOLD,
            context,
            agent_run_id,
        })
    }

    /// The divergence check ran and stayed under `threshold`.
    pub fn record_loop_check_passed(
        &self,
        context: Value,
        threshold: i64,
        agent_run_id: Option<Uuid>,
    ) -> Uuid {
        self.record_event(NewReliabilityEvent {
            layer: ReliabilityLayer::Phase3LoopDetection,
            triggered: false,
            threshold,
            context,
            agent_run_id,
        })
    }

    /// Complexity diverged for `threshold` consecutive samples, or a state repeated.
    pub fn record_strategy_loop_detected(
        &self,
        context: Value,
        threshold: i64,
        agent_run_id: Option<Uuid>,
    ) -> Uuid {
        self.record_event(NewReliabilityEvent {
            layer: ReliabilityLayer::Phase3LoopDetection,
            triggered: true,
            threshold,
            context,
            agent_run_id,
        })
    }

    /// Queue the final outcome of a recovery attempt.
    pub fn update_recovery_outcome(&self, event_id: Uuid, strategy: &str, success: bool) {
        self.enqueue(TelemetryCommand::UpdateOutcome {
            id: event_id,
            strategy: strategy.to_string(),
            success,
        });
    }

    /// Wait until every write queued before this call has been processed.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(TelemetryCommand::Flush(done)).await.is_err() {
            return;
        }
        let _ = wait.await;
    }

    async fn events(
        &self,
        layer: ReliabilityLayer,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<Vec<ReliabilityEvent>> {
        self.repository
            .list(&EventFilter::layer(layer).since(since))
            .await
    }

    /// `triggered / total`, 0 without events.
    pub async fn get_trigger_rate(
        &self,
        layer: ReliabilityLayer,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<f64> {
        Ok(Rates::from_events(&self.events(layer, since).await?).trigger_rate())
    }

    /// `recovered / attempted`, 0 without attempts.
    pub async fn get_recovery_success_rate(
        &self,
        layer: ReliabilityLayer,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<f64> {
        Ok(Rates::from_events(&self.events(layer, since).await?).recovery_success_rate())
    }

    /// Recommend a threshold from the analysis window's trigger and recovery rates.
    pub async fn analyze_threshold(
        &self,
        layer: ReliabilityLayer,
        current: i64,
        min: i64,
        max: i64,
        min_data_points: usize,
    ) -> DomainResult<ThresholdAnalysis> {
        let since = Utc::now() - Duration::days(i64::from(self.config.analysis_window_days));
        let events = self.events(layer, Some(since)).await?;
        let rates = Rates::from_events(&events);
        let t = rates.trigger_rate();
        let r = rates.recovery_success_rate();

        let mut analysis = ThresholdAnalysis {
            layer,
            current_threshold: current,
            recommended_threshold: current,
            confidence: 0.0,
            reasoning: String::new(),
            data_points: events.len(),
            trigger_rate: t,
            recovery_success_rate: r,
        };

        if events.len() < min_data_points {
            analysis.reasoning = format!(
                "Insufficient data: {} events, need at least {min_data_points}",
                events.len()
            );
            return Ok(analysis);
        }

        let (recommended, confidence, reasoning) = if t == 0.0 {
            (
                min.max(current - 1),
                0.5,
                "Threshold has not triggered recently; it can be tightened".to_string(),
            )
        } else if t < 0.1 {
            (
                current - 1,
                0.6,
                format!("Trigger rate {:.0}% is low; threshold is too conservative", t * 100.0),
            )
        } else if t >= 0.3 && r >= 0.7 {
            (
                current + ceil_steps((t - 0.3) * 10.0),
                0.7,
                format!(
                    "Trigger rate {:.0}% with {:.0}% recovery; threshold may be too sensitive",
                    t * 100.0,
                    r * 100.0
                ),
            )
        } else if t >= 0.3 && r < 0.3 {
            (
                current - ceil_steps((1.0 - r) * 2.0),
                0.8,
                format!(
                    "Trigger rate {:.0}% with only {:.0}% recovery; threshold may be too aggressive",
                    t * 100.0,
                    r * 100.0
                ),
            )
        } else {
            (
                current,
                0.9,
                "Trigger and recovery rates are within the expected range".to_string(),
            )
        };

        analysis.recommended_threshold = recommended.clamp(min, max.max(min));
        analysis.confidence = confidence;
        analysis.reasoning = reasoning;

        tracing::info!(
            layer = %layer,
            current,
            recommended = analysis.recommended_threshold,
            confidence,
            trigger_rate = t,
            recovery_success_rate = r,
            "Threshold analysis complete"
        );

        Ok(analysis)
    }

    /// Strategies ranked by success rate, then attempts, then name.
    pub async fn get_top_strategies(
        &self,
        layer: ReliabilityLayer,
        limit: usize,
    ) -> DomainResult<Vec<StrategyStats>> {
        Ok(top_strategies(&self.events(layer, None).await?, limit))
    }

    /// Per-layer aggregates plus overall totals.
    pub async fn get_dashboard_summary(&self) -> DomainResult<DashboardSummary> {
        let mut layers = Vec::with_capacity(ReliabilityLayer::ALL.len());
        for layer in ReliabilityLayer::ALL {
            let events = self.events(layer, None).await?;
            let rates = Rates::from_events(&events);
            layers.push(LayerSummary {
                layer,
                total_events: rates.total,
                triggered: rates.triggered,
                trigger_rate: rates.trigger_rate(),
                recovery_attempts: rates.attempts,
                recovered: rates.recovered,
                recovery_success_rate: rates.recovery_success_rate(),
                top_strategies: top_strategies(&events, 3),
            });
        }

        Ok(DashboardSummary {
            total_events: layers.iter().map(|l| l.total_events).sum(),
            total_triggered: layers.iter().map(|l| l.triggered).sum(),
            total_recovered: layers.iter().map(|l| l.recovered).sum(),
            layers,
        })
    }

    /// Retention sweep: delete events older than `days`.
    pub async fn delete_old_events(&self, days: u32) -> DomainResult<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let deleted = self.repository.delete_before(cutoff).await?;
        tracing::info!(days, deleted, "Pruned reliability events");
        Ok(deleted)
    }

    /// Retention sweep using the configured retention period.
    pub async fn prune(&self) -> DomainResult<u64> {
        self.delete_old_events(self.config.retention_days).await
    }
}

fn top_strategies(events: &[ReliabilityEvent], limit: usize) -> Vec<StrategyStats> {
    let mut grouped: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for event in events.iter().filter(|e| e.recovery_attempted) {
        if let Some(strategy) = event.recovery_strategy.as_deref() {
            let entry = grouped.entry(strategy).or_default();
            entry.0 += 1;
            if event.recovery_success == Some(true) {
                entry.1 += 1;
            }
        }
    }

    let mut stats: Vec<StrategyStats> = grouped
        .into_iter()
        .map(|(strategy, (attempts, successes))| StrategyStats {
            strategy: strategy.to_string(),
            attempts,
            successes,
            success_rate: ratio(successes, attempts),
        })
        .collect();

    stats.sort_by(|a, b| {
        b.success_rate
            .total_cmp(&a.success_rate)
            .then_with(|| b.attempts.cmp(&a.attempts))
            .then_with(|| a.strategy.cmp(&b.strategy))
    });
    stats.truncate(limit);
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteReliabilityRepository};
    use crate::domain::errors::DomainError;
    use async_trait::async_trait;

    async fn telemetry() -> ReliabilityTelemetry {
        let pool = create_migrated_test_pool().await.unwrap();
        ReliabilityTelemetry::spawn(
            Arc::new(SqliteReliabilityRepository::new(pool)),
            TelemetryConfig::default(),
        )
    }

    fn event(layer: ReliabilityLayer, triggered: bool) -> NewReliabilityEvent {
        NewReliabilityEvent {
            layer,
            triggered,
            threshold: 15,
            context: serde_json::json!({}),
            agent_run_id: None,
        }
    }

    struct BrokenRepository;

    #[async_trait]
    impl ReliabilityRepository for BrokenRepository {
        async fn insert(&self, _event: &ReliabilityEvent) -> DomainResult<()> {
            Err(DomainError::DatabaseError("disk full".into()))
        }
        async fn get(&self, _id: Uuid) -> DomainResult<Option<ReliabilityEvent>> {
            Err(DomainError::DatabaseError("disk full".into()))
        }
        async fn update_recovery(&self, _id: Uuid, _s: &str, _ok: bool) -> DomainResult<()> {
            Err(DomainError::DatabaseError("disk full".into()))
        }
        async fn list(&self, _filter: &EventFilter) -> DomainResult<Vec<ReliabilityEvent>> {
            Err(DomainError::DatabaseError("disk full".into()))
        }
        async fn delete_before(&self, _cutoff: DateTime<Utc>) -> DomainResult<u64> {
            Err(DomainError::DatabaseError("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_record_never_fails_on_broken_store() {
        let telemetry =
            ReliabilityTelemetry::spawn(Arc::new(BrokenRepository), TelemetryConfig::default());
        let id = telemetry.record_reproduction_required(serde_json::json!({}), None);
        telemetry.update_recovery_outcome(id, "infer-command", true);
        telemetry.flush().await;
        assert!(telemetry
            .get_trigger_rate(ReliabilityLayer::Phase2Reproduction, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_blocking() {
        let telemetry = ReliabilityTelemetry::spawn(
            Arc::new(BrokenRepository),
            TelemetryConfig {
                queue_capacity: 1,
                ..TelemetryConfig::default()
            },
        );
        for _ in 0..50 {
            telemetry.record_event(event(ReliabilityLayer::Phase3LoopDetection, true));
        }
        telemetry.flush().await;
    }

    #[tokio::test]
    async fn test_convenience_constructors() {
        let telemetry = telemetry().await;
        let run_id = Uuid::new_v4();
        let id = telemetry.record_reproduction_required(serde_json::json!({"k": "v"}), Some(run_id));
        let loop_id = telemetry.record_strategy_loop_detected(serde_json::json!({}), 2, None);
        let present_id = telemetry.record_reproduction_present(serde_json::json!({}), Some(run_id));
        let passed_id = telemetry.record_loop_check_passed(serde_json::json!({}), 2, None);
        telemetry.flush().await;

        let stored = telemetry.repository.get(id).await.unwrap().unwrap();
        assert_eq!(stored.layer, ReliabilityLayer::Phase2Reproduction);
        assert!(stored.triggered);
        assert_eq!(stored.threshold, 1);
        assert_eq!(stored.agent_run_id, Some(run_id));

        let stored = telemetry.repository.get(loop_id).await.unwrap().unwrap();
        assert_eq!(stored.layer, ReliabilityLayer::Phase3LoopDetection);
        assert_eq!(stored.threshold, 2);

        let stored = telemetry.repository.get(present_id).await.unwrap().unwrap();
        assert_eq!(stored.layer, ReliabilityLayer::Phase2Reproduction);
        assert!(!stored.triggered);
        assert_eq!(stored.threshold, 1);

        let stored = telemetry.repository.get(passed_id).await.unwrap().unwrap();
        assert_eq!(stored.layer, ReliabilityLayer::Phase3LoopDetection);
        assert!(!stored.triggered);
        assert_eq!(stored.threshold, 2);
    }

    #[tokio::test]
    async fn test_rates() {
        let telemetry = telemetry().await;
        let layer = ReliabilityLayer::Phase3LoopDetection;
        assert_eq!(telemetry.get_trigger_rate(layer, None).await.unwrap(), 0.0);
        assert_eq!(telemetry.get_recovery_success_rate(layer, None).await.unwrap(), 0.0);

        let a = telemetry.record_event(event(layer, true));
        let b = telemetry.record_event(event(layer, true));
        telemetry.record_event(event(layer, false));
        telemetry.record_event(event(layer, false));
        telemetry.update_recovery_outcome(a, "switch-mode", true);
        telemetry.update_recovery_outcome(b, "request-human", false);
        telemetry.flush().await;

        assert!((telemetry.get_trigger_rate(layer, None).await.unwrap() - 0.5).abs() < 1e-9);
        assert!((telemetry.get_recovery_success_rate(layer, None).await.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(
            telemetry
                .get_trigger_rate(ReliabilityLayer::Phase2Reproduction, None)
                .await
                .unwrap(),
            0.0
        );
    }

    #[tokio::test]
    async fn test_analyze_threshold_insufficient_data() {
        let telemetry = telemetry().await;
        let layer = ReliabilityLayer::Phase3LoopDetection;
        for _ in 0..3 {
            telemetry.record_event(event(layer, true));
        }
        telemetry.flush().await;

        let analysis = telemetry.analyze_threshold(layer, 15, 10, 25, 5).await.unwrap();
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.recommended_threshold, 15);
        assert_eq!(analysis.data_points, 3);
    }

    #[tokio::test]
    async fn test_analyze_threshold_sensitive() {
        let telemetry = telemetry().await;
        let layer = ReliabilityLayer::Phase3LoopDetection;
        // t = 0.5, r = 1.0 -> +ceil(2.0)
        for i in 0..10 {
            let id = telemetry.record_event(event(layer, i % 2 == 0));
            if i % 2 == 0 {
                telemetry.update_recovery_outcome(id, "switch-mode", true);
            }
        }
        telemetry.flush().await;

        let analysis = telemetry.analyze_threshold(layer, 15, 10, 25, 5).await.unwrap();
        assert_eq!(analysis.recommended_threshold, 17);
        assert!((analysis.confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analyze_threshold_aggressive_is_clamped() {
        let telemetry = telemetry().await;
        let layer = ReliabilityLayer::Phase3LoopDetection;
        // every event triggers and every recovery fails: r = 0 -> -2
        for _ in 0..6 {
            let id = telemetry.record_event(event(layer, true));
            telemetry.update_recovery_outcome(id, "request-human", false);
        }
        telemetry.flush().await;

        let analysis = telemetry.analyze_threshold(layer, 11, 10, 25, 5).await.unwrap();
        assert_eq!(analysis.recommended_threshold, 10);
        assert!((analysis.confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_analyze_threshold_balanced() {
        let telemetry = telemetry().await;
        let layer = ReliabilityLayer::Phase2Reproduction;
        // t = 0.2: neither conservative nor sensitive
        for i in 0..10 {
            telemetry.record_event(event(layer, i < 2));
        }
        telemetry.flush().await;

        let analysis = telemetry.analyze_threshold(layer, 3, 1, 5, 5).await.unwrap();
        assert_eq!(analysis.recommended_threshold, 3);
        assert!((analysis.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_top_strategies_ranking() {
        let telemetry = telemetry().await;
        let layer = ReliabilityLayer::Phase3LoopDetection;
        let outcomes = [
            ("switch-mode", true),
            ("switch-mode", true),
            ("reduce-scope", true),
            ("regenerate", false),
            ("switch-mode", false),
        ];
        for (strategy, success) in outcomes {
            let id = telemetry.record_event(event(layer, true));
            telemetry.update_recovery_outcome(id, strategy, success);
        }
        telemetry.flush().await;

        let top = telemetry.get_top_strategies(layer, 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].strategy, "reduce-scope");
        assert_eq!(top[1].strategy, "switch-mode");
        assert_eq!(top[1].attempts, 3);
        assert_eq!(top[1].successes, 2);
    }

    #[tokio::test]
    async fn test_dashboard_summary_totals() {
        let telemetry = telemetry().await;
        let id = telemetry.record_reproduction_required(serde_json::json!({}), None);
        telemetry.update_recovery_outcome(id, "infer-command", true);
        telemetry.record_event(event(ReliabilityLayer::Phase3LoopDetection, false));
        telemetry.record_strategy_loop_detected(serde_json::json!({}), 2, None);
        telemetry.flush().await;

        let summary = telemetry.get_dashboard_summary().await.unwrap();
        assert_eq!(summary.layers.len(), 2);
        assert_eq!(summary.total_events, 3);
        assert_eq!(summary.total_triggered, 2);
        assert_eq!(summary.total_recovered, 1);
        assert_eq!(summary.layers[0].top_strategies[0].strategy, "infer-command");
    }

    #[test]
    fn test_ceil_steps_absorbs_float_noise() {
        assert_eq!(ceil_steps((0.5 - 0.3) * 10.0), 2);
        assert_eq!(ceil_steps(0.0), 0);
        assert_eq!(ceil_steps(1.2), 2);
    }
}
