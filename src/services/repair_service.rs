//! Repair run service.
//!
//! Owns the set of live runs. Each run gets its own sandbox, session and
//! tokio task; callers follow progress through `watch` snapshots and stop
//! runs through a cancellation flag the coordinator checks between phases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RepairRequest, RunState};
use crate::domain::ports::SandboxFactory;
use crate::services::phase_coordinator::{PhaseCoordinator, RepairSession};

struct ActiveRun {
    snapshots: watch::Receiver<RunState>,
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<RunState>,
}

/// Starts, observes and stops repair runs.
pub struct RepairService {
    coordinator: Arc<PhaseCoordinator>,
    sandboxes: Arc<dyn SandboxFactory>,
    runs: Arc<RwLock<HashMap<Uuid, ActiveRun>>>,
}

impl RepairService {
    pub fn new(coordinator: Arc<PhaseCoordinator>, sandboxes: Arc<dyn SandboxFactory>) -> Self {
        Self {
            coordinator,
            sandboxes,
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a sandbox, persist the initial state and start driving the run.
    pub async fn start_run(&self, request: RepairRequest) -> DomainResult<Uuid> {
        if request.error_log.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "error log must not be empty".to_string(),
            ));
        }

        let state = self.coordinator.new_run_state(&request);
        let run_id = state.id;
        let sandbox = self.sandboxes.create(run_id).await?;

        let session = RepairSession::new(state.clone(), request, sandbox);
        let cancel = session.cancel_handle();
        let (tx, rx) = watch::channel(state);

        // Held until the entry is inserted, so the task's own removal
        // cannot run first.
        let mut runs = self.runs.write().await;

        let coordinator = self.coordinator.clone();
        let registry = self.runs.clone();
        let handle = tokio::spawn(async move {
            let state = coordinator.drive(session, Some(tx)).await;
            // The final state is persisted; later lookups go to the repository.
            registry.write().await.remove(&run_id);
            debug!(run_id = %run_id, "Finished run released");
            state
        });

        runs.insert(
            run_id,
            ActiveRun {
                snapshots: rx,
                cancel,
                handle,
            },
        );
        drop(runs);
        info!(run_id = %run_id, "Repair run scheduled");
        Ok(run_id)
    }

    /// Latest snapshot of a live run, or the persisted state of a past one.
    pub async fn get_run_state(&self, run_id: Uuid) -> DomainResult<RunState> {
        if let Some(run) = self.runs.read().await.get(&run_id) {
            return Ok(run.snapshots.borrow().clone());
        }
        self.coordinator
            .ports()
            .runs
            .get(run_id)
            .await?
            .ok_or(DomainError::RunNotFound(run_id))
    }

    /// Request cancellation; the run stops at its next phase boundary.
    pub async fn stop_run(&self, run_id: Uuid) -> DomainResult<()> {
        let runs = self.runs.read().await;
        let run = runs.get(&run_id).ok_or(DomainError::RunNotFound(run_id))?;
        run.cancel.store(true, Ordering::Release);
        info!(run_id = %run_id, "Stop requested");
        Ok(())
    }

    /// Wait for the run to reach a terminal state and return it.
    pub async fn wait_for_run(&self, run_id: Uuid) -> DomainResult<RunState> {
        let removed = self.runs.write().await.remove(&run_id);
        let Some(run) = removed else {
            return self.get_run_state(run_id).await;
        };

        match run.handle.await {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "Repair task ended abnormally");
                let last = run.snapshots.borrow().clone();
                if last.is_terminal() {
                    Ok(last)
                } else {
                    Err(DomainError::ExecutionFailed(format!(
                        "run {run_id} aborted: {e}"
                    )))
                }
            }
        }
    }

    /// Subscribe to snapshots of a live run.
    pub async fn subscribe(&self, run_id: Uuid) -> DomainResult<watch::Receiver<RunState>> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .map(|run| run.snapshots.clone())
            .ok_or(DomainError::RunNotFound(run_id))
    }

    /// Runs still held in memory. Finished runs release themselves.
    pub async fn tracked_runs(&self) -> usize {
        self.runs.read().await.len()
    }

    /// Ids of runs that have not reached a terminal state.
    pub async fn active_runs(&self) -> Vec<Uuid> {
        self.runs
            .read()
            .await
            .iter()
            .filter(|(_, run)| !run.snapshots.borrow().is_terminal())
            .map(|(id, _)| *id)
            .collect()
    }
}
