//! Observer port - progress reporting for UIs and telemetry consumers.

use uuid::Uuid;

use crate::domain::models::{LogLevel, RunStateDelta};

/// Receives every coordinator state change and log line.
///
/// Both calls are fire-and-forget: the coordinator never inspects a result and
/// implementations must not block.
pub trait RunObserver: Send + Sync {
    fn on_state_change(&self, run_id: Uuid, delta: &RunStateDelta);

    fn on_log(&self, level: LogLevel, message: &str, run_id: Option<Uuid>, run_name: Option<&str>);
}

/// Observer that forwards everything to `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl RunObserver for TracingObserver {
    fn on_state_change(&self, run_id: Uuid, delta: &RunStateDelta) {
        tracing::debug!(
            run_id = %run_id,
            phase = ?delta.phase,
            status = ?delta.status,
            iteration = ?delta.iteration,
            "run state changed"
        );
    }

    fn on_log(&self, level: LogLevel, message: &str, run_id: Option<Uuid>, run_name: Option<&str>) {
        let run_id = run_id.map(|id| id.to_string()).unwrap_or_default();
        let run_name = run_name.unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(run_id = %run_id, run_name, "{message}"),
            LogLevel::Info => tracing::info!(run_id = %run_id, run_name, "{message}"),
            LogLevel::Warn => tracing::warn!(run_id = %run_id, run_name, "{message}"),
            LogLevel::Error => tracing::error!(run_id = %run_id, run_name, "{message}"),
        }
    }
}
