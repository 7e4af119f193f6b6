//! Per-iteration loop fingerprints.

use serde::{Deserialize, Serialize};

/// Fingerprint of one iteration's edit/verify outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopStateSnapshot {
    pub iteration: u32,
    /// Changed file paths, kept sorted
    pub changed_files: Vec<String>,
    /// Checksum of the written content
    pub content_checksum: String,
    /// Fingerprint of the verification failure, or `"passed"`
    pub error_fingerprint: String,
}

impl LoopStateSnapshot {
    /// Create a snapshot; the file list is sorted and deduplicated.
    pub fn new(
        iteration: u32,
        changed_files: impl IntoIterator<Item = String>,
        content_checksum: impl Into<String>,
        error_fingerprint: impl Into<String>,
    ) -> Self {
        let mut changed_files: Vec<String> = changed_files.into_iter().collect();
        changed_files.sort();
        changed_files.dedup();
        Self {
            iteration,
            changed_files,
            content_checksum: content_checksum.into(),
            error_fingerprint: error_fingerprint.into(),
        }
    }
}

/// Outcome of a loop check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopDetection {
    pub detected: bool,
    /// First iteration that produced the same state
    pub duplicate_of_iteration: Option<u32>,
}

impl LoopDetection {
    pub fn none() -> Self {
        Self {
            detected: false,
            duplicate_of_iteration: None,
        }
    }
}
