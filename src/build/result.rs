//! Build result types.
//!
//! Contains types for representing the outcome of build operations.

use crate::error::BuildError;
use crate::graph::RunStats;
use serde::{Serialize, Serializer};
use std::time::Duration;

/// Serialize a duration as whole milliseconds.
pub(crate) fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}

/// Status of a single build target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// All tasks ran
    Success,
    /// The `if`/`unless` condition excluded the target
    Skipped,
    /// A task failed
    Failed(String),
    /// Never started because a prerequisite failed
    NotRun,
}

impl BuildStatus {
    /// Check if the status indicates success.
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Success | BuildStatus::Skipped)
    }

    /// Check if the status indicates failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, BuildStatus::Failed(_))
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::Skipped => write!(f, "skipped"),
            BuildStatus::Failed(err) => write!(f, "failed: {}", err),
            BuildStatus::NotRun => write!(f, "not run"),
        }
    }
}

/// Result of building a single target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetResult {
    /// Target that was built
    pub target: String,
    /// Build status
    pub status: BuildStatus,
    /// Time spent in the target's tasks
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    /// Expanded `echo` messages, in task order
    pub messages: Vec<String>,
}

impl TargetResult {
    /// Create a successful result.
    pub fn success(target: String, messages: Vec<String>, duration: Duration) -> Self {
        Self { target, status: BuildStatus::Success, duration, messages }
    }

    /// Create a skipped result.
    pub fn skipped(target: String, duration: Duration) -> Self {
        Self { target, status: BuildStatus::Skipped, duration, messages: vec![] }
    }

    /// Create a failed result.
    pub fn failed(target: String, error: String, messages: Vec<String>, duration: Duration) -> Self {
        Self { target, status: BuildStatus::Failed(error), duration, messages }
    }

    /// Create a result for a target that never started.
    pub fn not_run(target: String) -> Self {
        Self { target, status: BuildStatus::NotRun, duration: Duration::ZERO, messages: vec![] }
    }

    /// Check if this result is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Result of a complete build run.
#[derive(Debug, Default, Serialize)]
pub struct BuildResult {
    /// Results for each target, dependencies first
    pub targets: Vec<TargetResult>,
    /// Scheduler statistics
    pub stats: RunStats,
    /// Total build duration
    #[serde(rename = "total_duration_ms", serialize_with = "serialize_millis")]
    pub total_duration: Duration,
    /// Headline failure with its location, for reporting
    pub error: Option<String>,
    /// Aggregate failure of the run
    #[serde(skip)]
    pub failure: Option<BuildError>,
}

impl BuildResult {
    /// Create a new empty build result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target result.
    pub fn add_result(&mut self, result: TargetResult) {
        self.targets.push(result);
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.total_duration = duration;
        self
    }

    /// Record the run's aggregate failure.
    pub fn set_failure(&mut self, failure: BuildError) {
        self.error = Some(failure.describe());
        self.failure = Some(failure);
    }

    /// Look up the result of a target.
    pub fn target(&self, name: &str) -> Option<&TargetResult> {
        self.targets.iter().find(|r| r.target == name)
    }

    /// Get the number of successful targets.
    pub fn success_count(&self) -> usize {
        self.count(|s| matches!(s, BuildStatus::Success))
    }

    /// Get the number of skipped targets.
    pub fn skipped_count(&self) -> usize {
        self.count(|s| matches!(s, BuildStatus::Skipped))
    }

    /// Get the number of failed targets.
    pub fn failed_count(&self) -> usize {
        self.count(BuildStatus::is_failure)
    }

    /// Get the number of targets that never started.
    pub fn not_run_count(&self) -> usize {
        self.count(|s| matches!(s, BuildStatus::NotRun))
    }

    fn count(&self, predicate: impl Fn(&BuildStatus) -> bool) -> usize {
        self.targets.iter().filter(|r| predicate(&r.status)).count()
    }

    /// Check if the overall build succeeded.
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.failed_count() == 0
    }

    /// Get all echoed messages in target order.
    pub fn all_messages(&self) -> Vec<&String> {
        self.targets.iter().flat_map(|r| r.messages.iter()).collect()
    }

    /// Get failed target results.
    pub fn failures(&self) -> Vec<&TargetResult> {
        self.targets.iter().filter(|r| r.status.is_failure()).collect()
    }

    /// Convert into an error if the build failed.
    pub fn into_result(mut self) -> Result<Self, BuildError> {
        match self.failure.take() {
            Some(failure) => Err(failure),
            None => Ok(self),
        }
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();

        let success = self.success_count();
        let skipped = self.skipped_count();
        let failed = self.failed_count();
        let not_run = self.not_run_count();
        let total = self.targets.len();

        if !self.is_success() {
            lines.push(format!(
                "BUILD FAILED: {} succeeded, {} skipped, {} failed, {} not run ({} total)",
                success, skipped, failed, not_run, total
            ));
            for target in self.failures() {
                lines.push(format!("  - {}: {}", target.target, target.status));
            }
        } else {
            lines.push(format!(
                "BUILD SUCCESSFUL: {} built, {} skipped ({} total) in {:?}",
                success, skipped, total, self.total_duration
            ));
        }

        lines.join("\n")
    }
}
