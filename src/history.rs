//! Attempt history for retry sessions

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

pub const PROMPT_CAP: usize = 3000;
pub const ARTIFACT_CAP: usize = 5000;
pub const TEST_OUTPUT_CAP: usize = 3000;
pub const ERROR_CAP: usize = 2000;

/// One retry iteration, immutable once recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based, strictly increasing per node
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub prompt_used: String,
    pub artifact_produced: Option<String>,
    pub test_output: Option<String>,
    pub test_succeeded: bool,
    pub error_excerpt: String,
    pub failure: Option<FailureKind>,
}

impl AttemptRecord {
    /// `PASSED` or `FAILED`
    pub fn status_tag(&self) -> &'static str {
        if self.test_succeeded {
            "PASSED"
        } else {
            "FAILED"
        }
    }

    /// One-line summary used in retry prompts
    pub fn summary_line(&self) -> String {
        let reason = match (&self.failure, self.error_excerpt.lines().next()) {
            (_, Some(line)) if !line.trim().is_empty() => line.trim().to_string(),
            (Some(kind), _) => kind.label().to_string(),
            _ => String::new(),
        };
        if reason.is_empty() {
            format!("#{}: {}", self.attempt_number, self.status_tag())
        } else {
            format!("#{}: {} ({})", self.attempt_number, self.status_tag(), truncate(&reason, 160))
        }
    }
}

/// Attempt contents before numbering and truncation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptDraft {
    pub prompt: String,
    pub artifact: Option<String>,
    pub test_output: Option<String>,
    pub test_succeeded: bool,
    pub error_excerpt: String,
    pub failure: Option<FailureKind>,
}

impl AttemptDraft {
    /// Attempt that failed before validation could run
    pub fn failed(
        prompt: impl Into<String>,
        failure: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            failure: Some(failure),
            error_excerpt: error.into(),
            ..Default::default()
        }
    }
}

/// Bounded log of attempts for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLog {
    records: VecDeque<AttemptRecord>,
    total: u32,
    capacity: usize,
}

impl AttemptLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            total: 0,
            capacity: capacity.max(1),
        }
    }

    /// Number, truncate and append a draft
    pub fn record(&mut self, draft: AttemptDraft) -> AttemptRecord {
        let attempt_number = self.total + 1;

        let record = AttemptRecord {
            attempt_number,
            timestamp: Utc::now(),
            prompt_used: truncate(&draft.prompt, PROMPT_CAP),
            artifact_produced: draft.artifact.map(|a| truncate(&a, ARTIFACT_CAP)),
            test_output: draft.test_output.map(|t| truncate(&t, TEST_OUTPUT_CAP)),
            test_succeeded: draft.test_succeeded,
            error_excerpt: truncate(&draft.error_excerpt, ERROR_CAP),
            failure: draft.failure,
        };

        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record.clone());
        self.total = attempt_number;
        record
    }

    /// Retained records, oldest first
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.iter().cloned().collect()
    }

    /// The last `n` records, oldest first
    pub fn recent(&self, n: usize) -> Vec<AttemptRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.back()
    }

    /// Attempts ever recorded, including evicted ones
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for AttemptLog {
    fn default() -> Self {
        Self::new(50)
    }
}

/// Keep at most `max_chars` characters
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(ok: bool) -> AttemptDraft {
        AttemptDraft {
            prompt: "do it".into(),
            test_succeeded: ok,
            ..Default::default()
        }
    }

    #[test]
    fn test_numbers_increase() {
        let mut log = AttemptLog::new(10);
        let numbers: Vec<u32> = (0..4).map(|i| log.record(draft(i == 3)).attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(log.total(), 4);
        assert!(log.last().unwrap().test_succeeded);
    }

    #[test]
    fn test_eviction_keeps_numbering() {
        let mut log = AttemptLog::new(2);
        for _ in 0..5 {
            log.record(draft(false));
        }
        let kept: Vec<u32> = log.records().iter().map(|r| r.attempt_number).collect();
        assert_eq!(kept, vec![4, 5]);
        assert_eq!(log.total(), 5);
        assert_eq!(log.record(draft(false)).attempt_number, 6);
    }

    #[test]
    fn test_recent_window() {
        let mut log = AttemptLog::new(10);
        for _ in 0..7 {
            log.record(draft(false));
        }
        let recent: Vec<u32> = log.recent(5).iter().map(|r| r.attempt_number).collect();
        assert_eq!(recent, vec![3, 4, 5, 6, 7]);
        assert_eq!(log.recent(50).len(), 7);
    }

    #[test]
    fn test_fields_are_capped() {
        let mut log = AttemptLog::new(10);
        let record = log.record(AttemptDraft {
            prompt: "p".repeat(PROMPT_CAP + 10),
            artifact: Some("a".repeat(ARTIFACT_CAP * 2)),
            test_output: Some("t".repeat(TEST_OUTPUT_CAP + 1)),
            error_excerpt: "é".repeat(ERROR_CAP + 5),
            ..Default::default()
        });

        assert_eq!(record.prompt_used.chars().count(), PROMPT_CAP);
        assert_eq!(record.artifact_produced.unwrap().chars().count(), ARTIFACT_CAP);
        assert_eq!(record.test_output.unwrap().chars().count(), TEST_OUTPUT_CAP);
        assert_eq!(record.error_excerpt.chars().count(), ERROR_CAP);
    }

    #[test]
    fn test_summary_line() {
        let mut log = AttemptLog::new(10);
        let record = log.record(AttemptDraft::failed(
            "p",
            FailureKind::MissingArtifact,
            "",
        ));
        assert_eq!(record.summary_line(), "#1: FAILED (missing artifact)");

        let record = log.record(AttemptDraft::failed(
            "p",
            FailureKind::WorkerInvocation,
            "model unavailable\nstack...",
        ));
        assert_eq!(record.summary_line(), "#2: FAILED (model unavailable)");
    }
}
