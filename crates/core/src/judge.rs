//! Judging job types and the per-job status state machine

use crate::types::SubmissionId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Status of a judging job as reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeStatus {
    Pending,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    Failed,
}

impl JudgeStatus {
    /// Check if the job is still being judged
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Check if the job reached a verdict
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Ordering used to reject stale updates: pending < running < any verdict
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            _ => 2,
        }
    }

    /// Human-readable label shown next to a result
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::TimeLimitExceeded => "Time Limit Exceeded",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
            Self::RuntimeError => "Runtime Error",
            Self::CompilationError => "Compilation Error",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for JudgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a job is an ephemeral run against sample cases or a graded submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Run,
    Submit,
}

/// Outcome of a single test case
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub index: usize,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub status: Option<JudgeStatus>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
    #[serde(default)]
    pub actual_output: Option<String>,
    #[serde(default)]
    pub runtime_ms: Option<u64>,
    #[serde(default)]
    pub memory_kb: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TestCaseResult {
    /// Drop every string that would reveal the case's data
    #[must_use]
    pub fn redacted(self) -> Self {
        Self {
            input: None,
            expected_output: None,
            actual_output: None,
            ..self
        }
    }
}

/// Status payload delivered by a push event or a poll response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionUpdate {
    #[serde(alias = "id")]
    pub submission_id: SubmissionId,
    pub status: JudgeStatus,
    #[serde(default)]
    pub passed: Option<u32>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default, alias = "testResults")]
    pub results: Vec<TestCaseResult>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SubmissionUpdate {
    pub fn new(submission_id: impl Into<SubmissionId>, status: JudgeStatus) -> Self {
        Self {
            submission_id: submission_id.into(),
            status,
            passed: None,
            total: None,
            results: Vec::new(),
            message: None,
        }
    }

    #[must_use]
    pub const fn with_counts(mut self, passed: u32, total: u32) -> Self {
        self.passed = Some(passed);
        self.total = Some(total);
        self
    }

    #[must_use]
    pub fn with_results(mut self, results: Vec<TestCaseResult>) -> Self {
        self.results = results;
        self
    }
}

/// Locally-known public/hidden flags per test case index
///
/// Cases without a flag are treated as hidden.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseVisibility(HashMap<usize, bool>);

impl CaseVisibility {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every case in `0..count` is public
    pub fn all_public(count: usize) -> Self {
        Self((0..count).map(|i| (i, true)).collect())
    }

    pub fn set(&mut self, index: usize, is_public: bool) {
        self.0.insert(index, is_public);
    }

    pub fn is_public(&self, index: usize) -> bool {
        self.0.get(&index).copied().unwrap_or(false)
    }
}

impl FromIterator<(usize, bool)> for CaseVisibility {
    fn from_iter<I: IntoIterator<Item = (usize, bool)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Last known state of one judging job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionState {
    pub id: SubmissionId,
    pub kind: JobKind,
    pub status: JudgeStatus,
    pub passed: u32,
    pub total: u32,
    pub message: Option<String>,
    results: BTreeMap<usize, TestCaseResult>,
}

impl SubmissionState {
    pub fn new(id: SubmissionId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            status: JudgeStatus::Pending,
            passed: 0,
            total: 0,
            message: None,
            results: BTreeMap::new(),
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an update, returning whether it changed anything
    ///
    /// Updates for another job, updates that would move the status backwards
    /// and any update after a verdict are ignored.
    pub fn apply(&mut self, update: &SubmissionUpdate) -> bool {
        if update.submission_id != self.id
            || self.status.is_terminal()
            || update.status.rank() < self.status.rank()
        {
            return false;
        }

        self.status = update.status;
        if let Some(passed) = update.passed {
            self.passed = passed;
        }
        if let Some(total) = update.total {
            self.total = total;
        }
        if update.message.is_some() {
            self.message.clone_from(&update.message);
        }
        for result in &update.results {
            self.results.insert(result.index, result.clone());
        }
        true
    }

    /// Per-case results safe to show to the user, ordered by case index
    pub fn visible_results(&self, visibility: &CaseVisibility) -> Vec<TestCaseResult> {
        self.results
            .values()
            .map(|result| {
                if visibility.is_public(result.index) {
                    result.clone()
                } else {
                    result.clone().redacted()
                }
            })
            .collect()
    }

    /// Short summary such as `Wrong Answer (1/3)`
    pub fn summary(&self) -> String {
        if self.total > 0 {
            format!("{} ({}/{})", self.status, self.passed, self.total)
        } else {
            self.status.to_string()
        }
    }
}
