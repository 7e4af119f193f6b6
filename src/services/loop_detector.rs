//! Loop detection.
//!
//! Hashes each iteration's `(changed files, content checksum, error
//! fingerprint)` and reports when an identical state comes back. Separately
//! tracks repeated references to files that do not exist, so the coordinator
//! can switch from "read the file" to "search for the file".

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::domain::models::{LoopDetection, LoopStateSnapshot};

/// Fingerprint recorded for a verification that passed
pub const PASSED_FINGERPRINT: &str = "passed";

/// Consecutive references to the same missing path before a strategy shift
pub const HALLUCINATION_SHIFT_THRESHOLD: u32 = 2;

/// Trailing lines of output that make up an error fingerprint
const FINGERPRINT_TAIL_LINES: usize = 40;

static DIGIT_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static WHITESPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// SHA-256 hex digest of file content.
pub fn content_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Stable fingerprint of verification output.
///
/// Digit runs collapse to `#` so line numbers, timings and addresses do not
/// make two identical failures look different. Whitespace is squeezed, case
/// is folded, and only the last 40 non-empty lines are kept.
pub fn error_fingerprint(output: &str) -> String {
    let lines: Vec<String> = output
        .lines()
        .map(normalize_line)
        .filter(|line| !line.is_empty())
        .collect();
    let tail = &lines[lines.len().saturating_sub(FINGERPRINT_TAIL_LINES)..];
    hex::encode(Sha256::digest(tail.join("\n").as_bytes()))
}

fn normalize_line(line: &str) -> String {
    let digits = DIGIT_RUNS.replace_all(line.trim(), "#");
    WHITESPACE_RUNS.replace_all(&digits, " ").to_lowercase()
}

/// Repeated-state and hallucinated-path detector for a single run.
#[derive(Debug, Default)]
pub struct LoopDetector {
    /// State hash to the first iteration that produced it
    seen: HashMap<String, u32>,
    /// Every snapshot recorded, in observation order
    history: Vec<LoopStateSnapshot>,
    hallucinated_path: Option<String>,
    hallucination_count: u32,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_hash(snapshot: &LoopStateSnapshot) -> String {
        let mut files: Vec<&str> = snapshot.changed_files.iter().map(String::as_str).collect();
        files.sort_unstable();
        files.dedup();

        let mut hasher = Sha256::new();
        for file in files {
            hasher.update(file.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([0xffu8]);
        hasher.update(snapshot.content_checksum.as_bytes());
        hasher.update([0u8]);
        hasher.update(snapshot.error_fingerprint.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Record a snapshot. The first iteration to produce a state keeps
    /// ownership of it.
    pub fn add_state(&mut self, snapshot: &LoopStateSnapshot) {
        self.seen
            .entry(Self::state_hash(snapshot))
            .or_insert(snapshot.iteration);
        self.history.push(snapshot.clone());
    }

    /// Whether `snapshot` hashes to a state that has already been recorded.
    pub fn detect_loop(&self, snapshot: &LoopStateSnapshot) -> LoopDetection {
        match self.seen.get(&Self::state_hash(snapshot)) {
            Some(&first) => LoopDetection {
                detected: true,
                duplicate_of_iteration: Some(first),
            },
            None => LoopDetection::none(),
        }
    }

    /// Check, then record.
    pub fn observe(&mut self, snapshot: &LoopStateSnapshot) -> LoopDetection {
        let detection = self.detect_loop(snapshot);
        self.add_state(snapshot);
        detection
    }

    /// Distinct states seen so far.
    pub fn states_recorded(&self) -> usize {
        self.seen.len()
    }

    pub fn history(&self) -> &[LoopStateSnapshot] {
        &self.history
    }

    /// Count a reference to a path that does not exist. A different path
    /// restarts the streak. Returns the updated count.
    pub fn record_hallucination(&mut self, path: &str) -> u32 {
        if self.hallucinated_path.as_deref() == Some(path) {
            self.hallucination_count += 1;
        } else {
            self.hallucinated_path = Some(path.to_string());
            self.hallucination_count = 1;
        }
        tracing::debug!(path, count = self.hallucination_count, "Missing file referenced");
        self.hallucination_count
    }

    /// Current streak for `path`; zero if the streak belongs to another path.
    pub fn hallucination_count(&self, path: &str) -> u32 {
        if self.hallucinated_path.as_deref() == Some(path) {
            self.hallucination_count
        } else {
            0
        }
    }

    /// Whether the coordinator should stop trying to read `path` and search
    /// for it instead.
    pub fn should_trigger_strategy_shift(&self, path: &str) -> bool {
        self.hallucination_count(path) >= HALLUCINATION_SHIFT_THRESHOLD
    }

    /// Reset the streak after a file was found.
    pub fn clear_hallucinations(&mut self) {
        self.hallucinated_path = None;
        self.hallucination_count = 0;
    }
}
