//! Scripted collaborators for tests and dry runs.
//!
//! Every double records what it was asked so tests can assert on the
//! conversation, and none of them touch the network or the filesystem.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Decomposition, Diagnosis, DiagnosisRequest, ErrorDag, FixRequest, InferredCommand,
    JudgeRequest, Judgement, LogLevel, Plan, RunState, RunStateDelta, RunStatus,
};
use crate::domain::ports::{
    DecompositionProvider, DiagnosisProvider, PatchProvider, PlanningProvider, ReproductionInferrer,
    RunObserver, RunRepository,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pop the next scripted entry, repeating the last one forever.
fn next_scripted<T: Clone>(script: &Mutex<Vec<T>>, cursor: &Mutex<usize>) -> Option<T> {
    let script = lock(script);
    let mut cursor = lock(cursor);
    let entry = script.get(*cursor).or_else(|| script.last()).cloned();
    *cursor += 1;
    entry
}

// ----------------------------------------------------------------------------
// Diagnosis
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum DiagnosisScript {
    Respond(Diagnosis),
    Fail(String),
    Hang,
}

/// Returns scripted diagnoses in order, repeating the last one.
#[derive(Debug)]
pub struct ScriptedDiagnosisProvider {
    script: Mutex<Vec<DiagnosisScript>>,
    cursor: Mutex<usize>,
    by_problem: HashMap<String, Diagnosis>,
    requests: Mutex<Vec<DiagnosisRequest>>,
}

impl ScriptedDiagnosisProvider {
    fn from_script(script: Vec<DiagnosisScript>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: Mutex::new(0),
            by_problem: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(diagnosis: Diagnosis) -> Self {
        Self::from_script(vec![DiagnosisScript::Respond(diagnosis)])
    }

    pub fn sequence(diagnoses: Vec<Diagnosis>) -> Self {
        Self::from_script(diagnoses.into_iter().map(DiagnosisScript::Respond).collect())
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::from_script(vec![DiagnosisScript::Fail(message.into())])
    }

    /// Never answers; exercises the phase timeout.
    pub fn hanging() -> Self {
        Self::from_script(vec![DiagnosisScript::Hang])
    }

    /// Answer requests about a specific sub-problem with a dedicated diagnosis.
    #[must_use]
    pub fn with_problem(mut self, problem: impl Into<String>, diagnosis: Diagnosis) -> Self {
        self.by_problem.insert(problem.into(), diagnosis);
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<DiagnosisRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl DiagnosisProvider for ScriptedDiagnosisProvider {
    async fn diagnose(&self, request: &DiagnosisRequest) -> DomainResult<Diagnosis> {
        lock(&self.requests).push(request.clone());

        if let Some(diagnosis) = self.by_problem.get(&request.problem) {
            return Ok(diagnosis.clone());
        }

        match next_scripted(&self.script, &self.cursor) {
            Some(DiagnosisScript::Respond(diagnosis)) => Ok(diagnosis),
            Some(DiagnosisScript::Fail(message)) => {
                Err(DomainError::collaborator("diagnosis", message))
            }
            Some(DiagnosisScript::Hang) => std::future::pending().await,
            None => Err(DomainError::collaborator("diagnosis", "no scripted response")),
        }
    }
}

// ----------------------------------------------------------------------------
// Planning and decomposition
// ----------------------------------------------------------------------------

/// Approves or rejects every plan.
#[derive(Debug)]
pub struct MockPlanner {
    approve: bool,
}

impl MockPlanner {
    pub fn approving() -> Self {
        Self { approve: true }
    }

    pub fn rejecting() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl PlanningProvider for MockPlanner {
    async fn plan(&self, diagnosis: &Diagnosis) -> DomainResult<Plan> {
        Ok(Plan {
            tasks: vec![diagnosis.fix_action.clone()],
            approved: self.approve,
        })
    }
}

#[derive(Debug, Clone)]
enum DecomposerScript {
    Atomic,
    Split(ErrorDag),
    Fail(String),
}

/// Returns the same decomposition every time.
#[derive(Debug)]
pub struct MockDecomposer {
    script: DecomposerScript,
    calls: Mutex<usize>,
}

impl MockDecomposer {
    fn with(script: DecomposerScript) -> Self {
        Self {
            script,
            calls: Mutex::new(0),
        }
    }

    pub fn atomic() -> Self {
        Self::with(DecomposerScript::Atomic)
    }

    pub fn returning(dag: ErrorDag) -> Self {
        Self::with(DecomposerScript::Split(dag))
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::with(DecomposerScript::Fail(message.into()))
    }

    pub fn calls(&self) -> usize {
        *lock(&self.calls)
    }
}

#[async_trait]
impl DecompositionProvider for MockDecomposer {
    async fn decompose(&self, _diagnosis: &Diagnosis) -> DomainResult<Decomposition> {
        *lock(&self.calls) += 1;
        match &self.script {
            DecomposerScript::Atomic => Ok(Decomposition::Atomic),
            DecomposerScript::Split(dag) => Ok(Decomposition::Decompose(dag.clone())),
            DecomposerScript::Fail(message) => {
                Err(DomainError::collaborator("decomposition", message.clone()))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Patches
// ----------------------------------------------------------------------------

/// Writes fixed content and hands out scripted verdicts, repeating the last.
#[derive(Debug)]
pub struct MockPatchProvider {
    content: String,
    /// Append the request number, so every attempt writes new content
    numbered: bool,
    generation_error: Option<String>,
    verdicts: Mutex<Vec<bool>>,
    cursor: Mutex<usize>,
    fix_requests: Mutex<Vec<FixRequest>>,
}

impl MockPatchProvider {
    pub fn with_verdicts(content: impl Into<String>, verdicts: Vec<bool>) -> Self {
        Self {
            content: content.into(),
            numbered: false,
            generation_error: None,
            verdicts: Mutex::new(verdicts),
            cursor: Mutex::new(0),
            fix_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn passing(content: impl Into<String>) -> Self {
        Self::with_verdicts(content, vec![true])
    }

    pub fn failing_verdicts(content: impl Into<String>) -> Self {
        Self::with_verdicts(content, vec![false])
    }

    /// Every fix is new (`"{prefix} 1"`, `"{prefix} 2"`, ...) and every verdict fails.
    pub fn fresh_attempts(prefix: impl Into<String>) -> Self {
        Self {
            numbered: true,
            ..Self::failing_verdicts(prefix)
        }
    }

    /// Fix generation itself errors.
    pub fn broken(message: impl Into<String>) -> Self {
        Self {
            generation_error: Some(message.into()),
            ..Self::passing("")
        }
    }

    pub fn fix_requests(&self) -> Vec<FixRequest> {
        lock(&self.fix_requests).clone()
    }
}

#[async_trait]
impl PatchProvider for MockPatchProvider {
    async fn generate_fix(&self, request: &FixRequest) -> DomainResult<String> {
        let attempt = {
            let mut requests = lock(&self.fix_requests);
            requests.push(request.clone());
            requests.len()
        };
        match &self.generation_error {
            Some(message) => Err(DomainError::collaborator("patch", message.clone())),
            None if self.numbered => Ok(format!("{} {attempt}", self.content)),
            None => Ok(self.content.clone()),
        }
    }

    async fn judge_fix(&self, request: &JudgeRequest) -> DomainResult<Judgement> {
        let passed = next_scripted(&self.verdicts, &self.cursor).unwrap_or(true);
        Ok(Judgement {
            passed,
            score: if passed { 1.0 } else { 0.0 },
            reasoning: if passed {
                format!("{} fixed", request.file_path)
            } else {
                format!("{} still broken", request.file_path)
            },
        })
    }
}

// ----------------------------------------------------------------------------
// Inference
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum InferrerScript {
    Nothing,
    Command(String),
    Fail,
}

/// Answers every inference request the same way.
#[derive(Debug)]
pub struct StaticInferrer {
    script: InferrerScript,
}

impl StaticInferrer {
    pub fn none() -> Self {
        Self {
            script: InferrerScript::Nothing,
        }
    }

    pub fn returning(command: impl Into<String>) -> Self {
        Self {
            script: InferrerScript::Command(command.into()),
        }
    }

    pub fn failing() -> Self {
        Self {
            script: InferrerScript::Fail,
        }
    }
}

#[async_trait]
impl ReproductionInferrer for StaticInferrer {
    async fn infer(&self, _repository_path: &Path) -> DomainResult<Option<InferredCommand>> {
        match &self.script {
            InferrerScript::Nothing => Ok(None),
            InferrerScript::Command(command) => Ok(Some(InferredCommand {
                command: command.clone(),
                confidence: 0.9,
                reasoning: "scripted".to_string(),
            })),
            InferrerScript::Fail => Err(DomainError::collaborator("inference", "scripted failure")),
        }
    }
}

// ----------------------------------------------------------------------------
// Observation and persistence
// ----------------------------------------------------------------------------

/// Keeps every delta and log line.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    deltas: Mutex<Vec<(Uuid, RunStateDelta)>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
}

impl RecordingObserver {
    pub fn deltas(&self) -> Vec<(Uuid, RunStateDelta)> {
        lock(&self.deltas).clone()
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        lock(&self.logs).clone()
    }
}

impl RunObserver for RecordingObserver {
    fn on_state_change(&self, run_id: Uuid, delta: &RunStateDelta) {
        lock(&self.deltas).push((run_id, delta.clone()));
    }

    fn on_log(&self, level: LogLevel, message: &str, _run_id: Option<Uuid>, _run_name: Option<&str>) {
        lock(&self.logs).push((level, message.to_string()));
    }
}

/// Run repository backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<HashMap<Uuid, RunState>>,
}

impl InMemoryRunRepository {
    pub fn len(&self) -> usize {
        lock(&self.runs).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.runs).is_empty()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &RunState) -> DomainResult<()> {
        lock(&self.runs).insert(run.id, run.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<RunState>> {
        Ok(lock(&self.runs).get(&id).cloned())
    }

    async fn list_by_status(&self, status: RunStatus) -> DomainResult<Vec<RunState>> {
        let mut runs: Vec<RunState> = lock(&self.runs)
            .values()
            .filter(|run| run.status == status)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(problem: &str) -> DiagnosisRequest {
        DiagnosisRequest {
            run_id: Uuid::new_v4(),
            iteration: 1,
            error_log: "boom".to_string(),
            problem: problem.to_string(),
            affected_files: Vec::new(),
            feedback: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_sequence_repeats_last_entry() {
        let provider = ScriptedDiagnosisProvider::sequence(vec![
            Diagnosis::new("first", "a"),
            Diagnosis::new("second", "b"),
        ]);
        let mut summaries = Vec::new();
        for _ in 0..3 {
            summaries.push(provider.diagnose(&request("")).await.unwrap().summary);
        }
        assert_eq!(summaries, vec!["first", "second", "second"]);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_problem_specific_diagnosis() {
        let provider = ScriptedDiagnosisProvider::always(Diagnosis::new("default", "x"))
            .with_problem("B", Diagnosis::new("node b", "y"));
        assert_eq!(provider.diagnose(&request("B")).await.unwrap().summary, "node b");
        assert_eq!(provider.diagnose(&request("C")).await.unwrap().summary, "default");
    }

    #[tokio::test]
    async fn test_verdict_script() {
        let patcher = MockPatchProvider::with_verdicts("x", vec![false, true]);
        let judge = JudgeRequest {
            run_id: Uuid::new_v4(),
            diagnosis: Diagnosis::new("s", "f"),
            file_path: "a.rs".to_string(),
            original_content: String::new(),
            patched_content: "x".to_string(),
            verification: crate::domain::models::CommandResult::success(""),
        };
        assert!(!patcher.judge_fix(&judge).await.unwrap().passed);
        assert!(patcher.judge_fix(&judge).await.unwrap().passed);
        assert!(patcher.judge_fix(&judge).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_fresh_attempts_never_repeat_content() {
        let patcher = MockPatchProvider::fresh_attempts("attempt");
        let request = FixRequest {
            run_id: Uuid::new_v4(),
            diagnosis: Diagnosis::new("s", "f"),
            plan: None,
            file_path: "a.rs".to_string(),
            current_content: String::new(),
            feedback: Vec::new(),
        };
        assert_eq!(patcher.generate_fix(&request).await.unwrap(), "attempt 1");
        assert_eq!(patcher.generate_fix(&request).await.unwrap(), "attempt 2");
        assert_eq!(patcher.fix_requests().len(), 2);
    }
}
