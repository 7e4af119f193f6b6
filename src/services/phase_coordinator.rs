//! Phase coordinator.
//!
//! A deterministic state machine that drives one repair run through
//! `idle -> analysis -> planning -> (decomposition) -> execution ->
//! verification` and back to analysis until the fix is verified, the
//! iteration cap is exceeded, a recovery layer is exhausted, or the run is
//! stopped. Collaborators are only ever reached through ports, every call
//! into them is bounded by a timeout, and any collaborator failure is turned
//! into feedback for the next iteration rather than an error of the run.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CoordinatorConfig, Decomposition, Diagnosis, DiagnosisRequest, FixRequest, JudgeRequest,
    LogLevel, LoopStateSnapshot, Plan, RecoveryContext, RecoveryResult, ReliabilityLayer,
    RepairRequest, RunPhase, RunState, RunStateDelta, RunStatus,
};
use crate::domain::ports::{
    DecompositionProvider, DiagnosisProvider, PatchProvider, PlanningProvider, RunObserver,
    RunRepository, Sandbox,
};
use crate::services::convergence_engine::ConvergenceEngine;
use crate::services::dag_executor::DagExecutor;
use crate::services::loop_detector::{
    content_checksum, error_fingerprint, LoopDetector, PASSED_FINGERPRINT,
};
use crate::services::recovery_orchestrator::RecoveryOrchestrator;
use crate::services::reliability_telemetry::ReliabilityTelemetry;

/// Repeated loop state counts as a trigger on its first recurrence
const REPEATED_STATE_THRESHOLD: i64 = 1;

// ============================================================================
// Ports and per-run session
// ============================================================================

/// External collaborators of the coordinator.
#[derive(Clone)]
pub struct RepairPorts {
    pub diagnosis: Arc<dyn DiagnosisProvider>,
    pub planner: Arc<dyn PlanningProvider>,
    pub decomposer: Arc<dyn DecompositionProvider>,
    pub patcher: Arc<dyn PatchProvider>,
    pub runs: Arc<dyn RunRepository>,
    pub observer: Arc<dyn RunObserver>,
}

/// Exclusive ownership of a run's sandbox.
///
/// [`SandboxLease::release`] tears the sandbox down once. If the lease is
/// dropped while still holding the sandbox (a panicking phase, an aborted
/// task) teardown is spawned onto the runtime instead.
pub struct SandboxLease {
    sandbox: Option<Arc<dyn Sandbox>>,
    mode: &'static str,
}

impl SandboxLease {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        let mode = sandbox.mode();
        Self {
            sandbox: Some(sandbox),
            mode,
        }
    }

    pub fn mode(&self) -> &'static str {
        self.mode
    }

    fn get(&self) -> DomainResult<&Arc<dyn Sandbox>> {
        self.sandbox
            .as_ref()
            .ok_or_else(|| DomainError::SandboxError("sandbox already released".to_string()))
    }

    pub fn is_released(&self) -> bool {
        self.sandbox.is_none()
    }

    /// Tear the sandbox down. Subsequent calls do nothing.
    pub async fn release(&mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            if let Err(e) = sandbox.teardown().await {
                warn!(mode = self.mode, error = %e, "Sandbox teardown failed");
            }
        }
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if let Some(sandbox) = self.sandbox.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = sandbox.teardown().await {
                        warn!(error = %e, "Sandbox teardown on drop failed");
                    }
                });
            } else {
                warn!(mode = self.mode, "Sandbox dropped outside a runtime; teardown skipped");
            }
        }
    }
}

/// The edit waiting for verification
#[derive(Debug, Clone)]
struct PendingPatch {
    file_path: String,
    original: String,
    patched: String,
}

/// Everything one run owns while the coordinator drives it.
pub struct RepairSession {
    pub state: RunState,
    request: RepairRequest,
    sandbox: SandboxLease,
    loop_detector: LoopDetector,
    plan: Option<Plan>,
    pending: Option<PendingPatch>,
    consecutive_divergence: u32,
    decomposition_attempted: bool,
    cancel: Arc<AtomicBool>,
}

impl RepairSession {
    pub fn new(state: RunState, request: RepairRequest, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            state,
            request,
            sandbox: SandboxLease::new(sandbox),
            loop_detector: LoopDetector::new(),
            plan: None,
            pending: None,
            consecutive_divergence: 0,
            decomposition_attempted: false,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag observed at the next phase boundary.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn sandbox_released(&self) -> bool {
        self.sandbox.is_released()
    }
}

/// Pick the candidate sharing the most trailing path components with
/// `target`; ties go to the shorter path.
pub fn closest_candidate(target: &str, candidates: &[String]) -> Option<String> {
    let target_parts: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();
    candidates
        .iter()
        .map(|candidate| {
            let shared = candidate
                .split('/')
                .filter(|p| !p.is_empty())
                .rev()
                .zip(target_parts.iter().rev())
                .take_while(|(a, b)| a == *b)
                .count();
            (shared, candidate)
        })
        .filter(|(shared, _)| *shared > 0)
        .max_by(|(sa, a), (sb, b)| sa.cmp(sb).then_with(|| b.len().cmp(&a.len())))
        .map(|(_, candidate)| candidate.clone())
}

// ============================================================================
// Coordinator
// ============================================================================

/// Drives repair sessions. One coordinator is shared by every run of a process.
pub struct PhaseCoordinator {
    ports: RepairPorts,
    telemetry: Arc<ReliabilityTelemetry>,
    recovery: Arc<RecoveryOrchestrator>,
    convergence: ConvergenceEngine,
    dag_executor: DagExecutor,
    config: CoordinatorConfig,
}

impl PhaseCoordinator {
    pub fn new(
        ports: RepairPorts,
        telemetry: Arc<ReliabilityTelemetry>,
        recovery: Arc<RecoveryOrchestrator>,
        convergence: ConvergenceEngine,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            dag_executor: DagExecutor::new(config.max_dag_nodes),
            ports,
            telemetry,
            recovery,
            convergence,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn ports(&self) -> &RepairPorts {
        &self.ports
    }

    /// Initial state for a request, honouring its iteration override.
    pub fn new_run_state(&self, request: &RepairRequest) -> RunState {
        RunState::new(
            request.name.clone(),
            request.max_iterations.unwrap_or(self.config.max_iterations),
        )
    }

    /// Advance until the run is terminal, persisting and publishing a snapshot
    /// after every step. The sandbox is released exactly once on the way out.
    pub async fn drive(
        &self,
        mut session: RepairSession,
        snapshots: Option<watch::Sender<RunState>>,
    ) -> RunState {
        info!(run_id = %session.state.id, "Repair run started");
        self.checkpoint(&session.state, snapshots.as_ref()).await;

        while !session.state.is_terminal() {
            self.advance(&mut session).await;
            self.checkpoint(&session.state, snapshots.as_ref()).await;
        }

        session.sandbox.release().await;
        info!(
            run_id = %session.state.id,
            status = %session.state.status,
            iterations = session.state.iteration,
            "Repair run finished"
        );
        session.state
    }

    async fn checkpoint(&self, state: &RunState, snapshots: Option<&watch::Sender<RunState>>) {
        if let Err(e) = self.ports.runs.save(state).await {
            warn!(run_id = %state.id, error = %e, "Failed to persist run state");
        }
        if let Some(tx) = snapshots {
            tx.send_replace(state.clone());
        }
    }

    /// Execute the current phase once.
    pub async fn advance(&self, session: &mut RepairSession) {
        if session.state.is_terminal() {
            return;
        }
        if session.is_cancelled() {
            self.finish(session, RunStatus::Stopped, "Stopped by request".to_string(), None);
            return;
        }

        match session.state.phase {
            RunPhase::Idle => self.enter_analysis(session),
            RunPhase::Analysis => self.run_analysis(session).await,
            RunPhase::Planning => self.run_planning(session).await,
            RunPhase::Decomposition => self.run_decomposition(session).await,
            RunPhase::Execution => self.run_execution(session).await,
            RunPhase::Verification => self.run_verification(session).await,
            RunPhase::Finished => {}
        }
        session.state.touch();
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn enter_analysis(&self, session: &mut RepairSession) {
        let state = &mut session.state;
        state.iteration += 1;
        if state.iteration > state.max_iterations {
            let message = format!("Maximum iterations ({}) exceeded", state.max_iterations);
            self.finish(session, RunStatus::Failed, message, None);
            return;
        }

        self.set_phase(session, RunPhase::Analysis);
        self.log(
            &session.state,
            LogLevel::Info,
            &format!(
                "Iteration {}/{}",
                session.state.iteration, session.state.max_iterations
            ),
        );
    }

    fn set_phase(&self, session: &mut RepairSession, phase: RunPhase) {
        session.state.phase = phase;
        let delta = RunStateDelta {
            phase: Some(phase),
            iteration: Some(session.state.iteration),
            current_node: session.state.current_node.clone(),
            ..Default::default()
        };
        self.ports.observer.on_state_change(session.state.id, &delta);
    }

    /// Record why the iteration failed and start the next one.
    fn fail_iteration(&self, session: &mut RepairSession, feedback: String) {
        self.log(&session.state, LogLevel::Warn, &feedback);
        session.state.feedback.push(feedback);
        session.pending = None;
        self.enter_analysis(session);
    }

    fn finish(
        &self,
        session: &mut RepairSession,
        status: RunStatus,
        message: String,
        guidance: Option<Value>,
    ) {
        let state = &mut session.state;
        state.status = status;
        state.phase = RunPhase::Finished;
        state.message = Some(message.clone());
        if guidance.is_some() {
            state.guidance = guidance;
        }
        state.file_reservations.clear();
        session.pending = None;

        let level = match status {
            RunStatus::Success => LogLevel::Info,
            RunStatus::Stopped => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        self.log(&session.state, level, &message);
        self.ports.observer.on_state_change(
            session.state.id,
            &RunStateDelta {
                phase: Some(RunPhase::Finished),
                status: Some(status),
                iteration: Some(session.state.iteration),
                message: Some(message),
                ..Default::default()
            },
        );
    }

    fn log(&self, state: &RunState, level: LogLevel, message: &str) {
        self.ports
            .observer
            .on_log(level, message, Some(state.id), state.name.as_deref());
    }

    async fn call<T, F>(&self, operation: &str, future: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        let seconds = self.config.phase_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(seconds), future).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Timeout {
                operation: operation.to_string(),
                seconds,
            }),
        }
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn run_analysis(&self, session: &mut RepairSession) {
        let node = session
            .state
            .current_node
            .as_deref()
            .and_then(|id| session.state.dag.as_ref().and_then(|dag| dag.node(id)));

        let request = DiagnosisRequest {
            run_id: session.state.id,
            iteration: session.state.iteration,
            error_log: session.request.error_log.clone(),
            problem: node.map(|n| n.problem.clone()).unwrap_or_default(),
            affected_files: node.map(|n| n.affected_files.clone()).unwrap_or_default(),
            feedback: session.state.feedback.clone(),
        };

        let diagnosis = match self
            .call("diagnosis", self.ports.diagnosis.diagnose(&request))
            .await
        {
            Ok(diagnosis) => diagnosis,
            Err(e) => {
                let feedback = format!(
                    "Iteration {}: diagnosis failed: {e}",
                    session.state.iteration
                );
                self.fail_iteration(session, feedback);
                return;
            }
        };

        debug!(
            run_id = %session.state.id,
            summary = %diagnosis.summary,
            category = %diagnosis.category,
            confidence = diagnosis.confidence,
            "Diagnosis received"
        );
        session.state.diagnosis = Some(diagnosis);

        let complexity = self.convergence.estimate(&session.state);
        session.state.complexity_history.push(complexity);
        let report = self.convergence.convergence(&session.state.complexity_history);
        self.ports.observer.on_state_change(
            session.state.id,
            &RunStateDelta {
                complexity: Some(complexity),
                ..Default::default()
            },
        );

        if report.is_diverging {
            session.consecutive_divergence += 1;
        } else {
            session.consecutive_divergence = 0;
        }

        if session.consecutive_divergence >= self.config.divergence_limit {
            let reason = format!(
                "complexity diverged for {} consecutive samples (latest {complexity:.1})",
                session.consecutive_divergence
            );
            let threshold = i64::from(self.config.divergence_limit);
            if !self.handle_strategy_loop(session, reason, threshold).await {
                return;
            }
        } else {
            self.telemetry.record_loop_check_passed(
                json!({
                    "iteration": session.state.iteration,
                    "consecutive_divergence": session.consecutive_divergence,
                    "complexity": complexity,
                }),
                i64::from(self.config.divergence_limit),
                Some(session.state.id),
            );
        }

        self.set_phase(session, RunPhase::Planning);
    }

    async fn run_planning(&self, session: &mut RepairSession) {
        let Some(diagnosis) = session.state.diagnosis.clone() else {
            self.fail_iteration(session, "No diagnosis available for planning".to_string());
            return;
        };

        let plan = match self.call("planning", self.ports.planner.plan(&diagnosis)).await {
            Ok(plan) => plan,
            Err(e) => {
                let feedback = format!("Iteration {}: planning failed: {e}", session.state.iteration);
                self.fail_iteration(session, feedback);
                return;
            }
        };

        if !plan.approved {
            let feedback = format!("Iteration {}: plan was not approved", session.state.iteration);
            self.fail_iteration(session, feedback);
            return;
        }
        session.plan = Some(plan);

        let score = session.state.latest_complexity().unwrap_or_default();
        let atomic = self
            .convergence
            .is_atomic(score, &session.state.complexity_history);

        if !atomic
            && self.config.enable_decomposition
            && session.state.dag.is_none()
            && !session.decomposition_attempted
        {
            self.set_phase(session, RunPhase::Decomposition);
        } else {
            self.gate_execution(session).await;
        }
    }

    async fn run_decomposition(&self, session: &mut RepairSession) {
        session.decomposition_attempted = true;
        let Some(diagnosis) = session.state.diagnosis.clone() else {
            self.gate_execution(session).await;
            return;
        };

        let dag = match self
            .call("decomposition", self.ports.decomposer.decompose(&diagnosis))
            .await
        {
            Ok(Decomposition::Decompose(dag)) => dag,
            Ok(Decomposition::Atomic) => {
                debug!(run_id = %session.state.id, "Decomposer judged the problem atomic");
                self.gate_execution(session).await;
                return;
            }
            Err(e) => {
                self.log(
                    &session.state,
                    LogLevel::Warn,
                    &format!("Decomposition failed, continuing undecomposed: {e}"),
                );
                self.gate_execution(session).await;
                return;
            }
        };

        if let Err(e) = self.dag_executor.validate(&dag) {
            self.log(
                &session.state,
                LogLevel::Warn,
                &format!("Decomposition rejected, continuing undecomposed: {e}"),
            );
            self.gate_execution(session).await;
            return;
        }

        let first = self
            .dag_executor
            .next_node(&dag, &session.state.solved_nodes)
            .map(|node| node.id.clone());
        self.log(
            &session.state,
            LogLevel::Info,
            &format!("Split into {} sub-problems", dag.len()),
        );
        session.state.current_node = first;
        session.state.dag = Some(dag);
        self.enter_analysis(session);
    }

    /// The execution gate: a diagnosis without a reproduction command routes
    /// into `phase2-reproduction` recovery before any edit is attempted.
    async fn gate_execution(&self, session: &mut RepairSession) {
        let has_command = session
            .state
            .diagnosis
            .as_ref()
            .and_then(|d| d.reproduction_command.as_deref())
            .is_some_and(|c| !c.trim().is_empty());

        if has_command {
            self.telemetry.record_reproduction_present(
                json!({
                    "iteration": session.state.iteration,
                    "repository_path": session.request.repository_path,
                }),
                Some(session.state.id),
            );
            self.set_phase(session, RunPhase::Execution);
            return;
        }

        let summary = session
            .state
            .diagnosis
            .as_ref()
            .map(|d| d.summary.clone())
            .unwrap_or_default();
        let event_id = self.telemetry.record_reproduction_required(
            json!({
                "iteration": session.state.iteration,
                "diagnosis": summary,
                "repository_path": session.request.repository_path,
            }),
            Some(session.state.id),
        );

        let context = self.recovery_context(
            session,
            ReliabilityLayer::Phase2Reproduction,
            summary,
        );
        let result = self.recover(&context, event_id).await;

        match result.as_ref().filter(|r| r.success).and_then(|r| r.reproduction_command.clone()) {
            Some(command) => {
                self.log(
                    &session.state,
                    LogLevel::Info,
                    &format!("Using inferred reproduction command `{command}`"),
                );
                if let Some(diagnosis) = session.state.diagnosis.as_mut() {
                    diagnosis.reproduction_command = Some(command);
                }
                self.set_phase(session, RunPhase::Execution);
            }
            None => {
                let reason = result
                    .as_ref()
                    .map(|r| r.reasoning.clone())
                    .unwrap_or_else(|| "no recovery strategy could be attempted".to_string());
                let guidance = terminal_guidance(
                    ReliabilityLayer::Phase2Reproduction,
                    "the diagnosis has no reproduction command",
                    result.as_ref(),
                );
                self.finish(
                    session,
                    RunStatus::Failed,
                    format!("Reproduction command required: {reason}"),
                    Some(guidance),
                );
            }
        }
    }

    async fn run_execution(&self, session: &mut RepairSession) {
        let Some(diagnosis) = session.state.diagnosis.clone() else {
            self.fail_iteration(session, "No diagnosis available for execution".to_string());
            return;
        };

        let target = session
            .state
            .current_node
            .as_deref()
            .and_then(|id| session.state.dag.as_ref().and_then(|dag| dag.node(id)))
            .and_then(|node| node.affected_files.first().cloned())
            .or_else(|| diagnosis.file_path.clone());

        let Some(target) = target else {
            let feedback = format!(
                "Iteration {}: diagnosis did not name a file to fix",
                session.state.iteration
            );
            self.fail_iteration(session, feedback);
            return;
        };

        let (file_path, original) = match self.resolve_target(session, &target).await {
            Ok(resolved) => resolved,
            Err(feedback) => {
                self.fail_iteration(session, feedback);
                return;
            }
        };
        session.state.file_reservations.insert(file_path.clone());

        let request = FixRequest {
            run_id: session.state.id,
            diagnosis,
            plan: session.plan.clone(),
            file_path: file_path.clone(),
            current_content: original.clone(),
            feedback: session.state.feedback.clone(),
        };
        let patched = match self
            .call("fix generation", self.ports.patcher.generate_fix(&request))
            .await
        {
            Ok(patched) => patched,
            Err(e) => {
                let feedback = format!(
                    "Iteration {}: fix generation failed: {e}",
                    session.state.iteration
                );
                self.fail_iteration(session, feedback);
                return;
            }
        };

        let write = match session.sandbox.get() {
            Ok(sandbox) => {
                self.call("sandbox write", sandbox.write_file(&file_path, &patched))
                    .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = write {
            let feedback = format!(
                "Iteration {}: writing {file_path} failed: {e}",
                session.state.iteration
            );
            self.fail_iteration(session, feedback);
            return;
        }

        session.pending = Some(PendingPatch {
            file_path,
            original,
            patched,
        });
        self.set_phase(session, RunPhase::Verification);
    }

    /// Read the target file, switching to a name search once the same missing
    /// path has been referenced repeatedly. Errors are feedback strings.
    async fn resolve_target(
        &self,
        session: &mut RepairSession,
        target: &str,
    ) -> Result<(String, String), String> {
        let iteration = session.state.iteration;
        let sandbox = session.sandbox.get().map_err(|e| e.to_string())?.clone();

        match self.call("sandbox read", sandbox.read_file(target)).await {
            Ok(Some(content)) => {
                session.loop_detector.clear_hallucinations();
                return Ok((target.to_string(), content));
            }
            Ok(None) => {}
            Err(e) => return Err(format!("Iteration {iteration}: reading {target} failed: {e}")),
        }

        session.loop_detector.record_hallucination(target);
        if !session.loop_detector.should_trigger_strategy_shift(target) {
            return Err(format!("Iteration {iteration}: {target} does not exist"));
        }

        let file_name = Path::new(target)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(target)
            .to_string();
        let candidates = self
            .call("sandbox search", sandbox.find_files(&file_name))
            .await
            .unwrap_or_default();

        let not_found = || {
            format!(
                "Iteration {iteration}: {target} does not exist and no file named {file_name} was found; \
                 search the repository instead of guessing paths"
            )
        };
        let Some(resolved) = closest_candidate(target, &candidates) else {
            return Err(not_found());
        };

        match self.call("sandbox read", sandbox.read_file(&resolved)).await {
            Ok(Some(content)) => {
                self.log(
                    &session.state,
                    LogLevel::Info,
                    &format!("Resolved missing {target} to {resolved}"),
                );
                session.loop_detector.clear_hallucinations();
                Ok((resolved, content))
            }
            _ => Err(not_found()),
        }
    }

    async fn run_verification(&self, session: &mut RepairSession) {
        let iteration = session.state.iteration;
        let Some(pending) = session.pending.take() else {
            self.fail_iteration(session, format!("Iteration {iteration}: nothing to verify"));
            return;
        };
        let Some(diagnosis) = session.state.diagnosis.clone() else {
            self.fail_iteration(session, format!("Iteration {iteration}: diagnosis missing"));
            return;
        };
        let command = diagnosis.reproduction_command.clone().unwrap_or_default();

        let verification = match session.sandbox.get() {
            Ok(sandbox) => self.call("verification", sandbox.run_command(&command)).await,
            Err(e) => Err(e),
        };
        let verification = match verification {
            Ok(result) => result,
            Err(e) => {
                self.fail_iteration(
                    session,
                    format!("Iteration {iteration}: verification command failed: {e}"),
                );
                return;
            }
        };

        let request = JudgeRequest {
            run_id: session.state.id,
            diagnosis,
            file_path: pending.file_path.clone(),
            original_content: pending.original.clone(),
            patched_content: pending.patched.clone(),
            verification: verification.clone(),
        };
        let judgement = match self.call("judge", self.ports.patcher.judge_fix(&request)).await {
            Ok(judgement) => judgement,
            Err(e) => {
                self.fail_iteration(session, format!("Iteration {iteration}: judging failed: {e}"));
                return;
            }
        };

        let passed = verification.succeeded() && judgement.passed;
        let fingerprint = if passed {
            PASSED_FINGERPRINT.to_string()
        } else {
            error_fingerprint(&verification.combined_output())
        };
        let snapshot = LoopStateSnapshot::new(
            iteration,
            [pending.file_path.clone()],
            content_checksum(&pending.patched),
            fingerprint,
        );
        let detection = session.loop_detector.observe(&snapshot);

        if passed {
            self.on_verified(session).await;
            return;
        }

        let feedback = format!(
            "Iteration {iteration}: fix for {} failed verification (exit {}): {}",
            pending.file_path, verification.exit_code, judgement.reasoning
        );

        if let Some(first) = detection.duplicate_of_iteration.filter(|_| detection.detected) {
            let reason = format!("iteration {iteration} repeated the state of iteration {first}");
            if !self
                .handle_strategy_loop(session, reason, REPEATED_STATE_THRESHOLD)
                .await
            {
                return;
            }
        }

        self.fail_iteration(session, feedback);
    }

    async fn on_verified(&self, session: &mut RepairSession) {
        session.state.file_reservations.clear();

        if session.state.dag.is_none() {
            self.finish(session, RunStatus::Success, "Fix verified".to_string(), None);
            return;
        }

        if let Some(node) = session.state.current_node.clone() {
            self.dag_executor.mark_solved(&mut session.state, &node);
        }

        let Some(dag) = session.state.dag.as_ref() else {
            return;
        };
        let progress = self.dag_executor.progress(dag, &session.state.solved_nodes);
        let next = self
            .dag_executor
            .next_node(dag, &session.state.solved_nodes)
            .map(|node| node.id.clone());
        let complete = self.dag_executor.is_complete(dag, &session.state.solved_nodes);

        self.log(
            &session.state,
            LogLevel::Info,
            &format!(
                "Sub-problem solved ({}/{}, {}%)",
                progress.solved, progress.total, progress.percentage
            ),
        );

        if complete {
            let message = format!("All {} sub-problems verified", progress.total);
            self.finish(session, RunStatus::Success, message, None);
            return;
        }

        match next {
            Some(id) => {
                session.state.current_node = Some(id);
                session.state.diagnosis = None;
                session.plan = None;
                self.enter_analysis(session);
            }
            None => self.finish(
                session,
                RunStatus::Failed,
                format!(
                    "{} remaining sub-problems are blocked by unsolved dependencies",
                    progress.remaining
                ),
                None,
            ),
        }
    }

    // ========================================================================
    // Recovery
    // ========================================================================

    fn recovery_context(
        &self,
        session: &RepairSession,
        layer: ReliabilityLayer,
        problem_summary: String,
    ) -> RecoveryContext {
        let mut context = RecoveryContext::new(layer, session.state.id);
        context.iteration = session.state.iteration;
        context.complexity = session.state.latest_complexity().unwrap_or_default();
        context.reproduction_command = session
            .state
            .diagnosis
            .as_ref()
            .and_then(|d: &Diagnosis| d.reproduction_command.clone());
        context.repository_path = session.request.repository_path.clone();
        context.sandbox_mode = session.sandbox.mode().to_string();
        context.problem_summary = problem_summary;
        context.feedback_count = session.state.feedback.len();
        context
    }

    async fn recover(&self, context: &RecoveryContext, event_id: Uuid) -> Option<RecoveryResult> {
        let seconds = self.config.phase_timeout_secs;
        match tokio::time::timeout(
            Duration::from_secs(seconds),
            self.recovery.attempt_recovery(context, Some(event_id)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    run_id = %context.run_id,
                    layer = %context.layer,
                    seconds,
                    "Recovery timed out"
                );
                None
            }
        }
    }

    /// Route a loop trigger into `phase3-loop-detection` recovery. Returns
    /// `true` when a strategy recovered; otherwise the run has been failed.
    async fn handle_strategy_loop(
        &self,
        session: &mut RepairSession,
        reason: String,
        threshold: i64,
    ) -> bool {
        self.log(
            &session.state,
            LogLevel::Warn,
            &format!("Strategy loop detected: {reason}"),
        );
        let event_id = self.telemetry.record_strategy_loop_detected(
            json!({
                "iteration": session.state.iteration,
                "reason": reason,
                "complexity_history": session.state.complexity_history,
            }),
            threshold,
            Some(session.state.id),
        );

        let context = self.recovery_context(
            session,
            ReliabilityLayer::Phase3LoopDetection,
            reason.clone(),
        );
        let result = self.recover(&context, event_id).await;

        match result {
            Some(result) if result.success => {
                session
                    .state
                    .feedback
                    .push(format!("Loop recovery ({}): {}", result.strategy, result.reasoning));
                session.state.guidance = result.guidance;
                session.consecutive_divergence = 0;
                true
            }
            other => {
                let guidance =
                    terminal_guidance(ReliabilityLayer::Phase3LoopDetection, &reason, other.as_ref());
                self.finish(
                    session,
                    RunStatus::Failed,
                    format!("Strategy loop detected: {reason}"),
                    Some(guidance),
                );
                false
            }
        }
    }
}

/// `{ layer, reason, attempted_strategies, suggestion }` for a failed run.
fn terminal_guidance(layer: ReliabilityLayer, reason: &str, result: Option<&RecoveryResult>) -> Value {
    let attempted = result.map(|r| r.attempted.clone()).unwrap_or_default();
    let suggestion = result
        .and_then(|r| r.guidance.as_ref())
        .and_then(|g| g.get("suggestion"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| match layer {
            ReliabilityLayer::Phase2Reproduction => {
                "Provide a shell command that reproduces the failure".to_string()
            }
            ReliabilityLayer::Phase3LoopDetection => {
                "Review the attempted fixes and narrow the problem manually".to_string()
            }
        });

    json!({
        "layer": layer.as_str(),
        "reason": reason,
        "attempted_strategies": attempted,
        "suggestion": suggestion,
    })
}
