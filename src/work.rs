use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// One discovered source file and the output it maps to.
///
/// Created once during discovery and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
}

impl WorkItem {
    pub fn new(source_path: PathBuf, target_path: PathBuf) -> Self {
        Self {
            source_path,
            target_path,
        }
    }
}

/// Terminal status of one work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Output already present and trusted
    Skipped,
    Converted,
    /// Output already present and probed valid
    ResumedSkip,
    /// Output was corrupt, removed and converted again
    ResumedReconvert,
    Failed,
    DryRunPlanned,
}

impl ItemStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Converted | Self::ResumedReconvert)
    }

    pub fn is_skip(self) -> bool {
        matches!(self, Self::Skipped | Self::ResumedSkip)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Converted => "converted",
            Self::ResumedSkip => "resumed-skip",
            Self::ResumedReconvert => "resumed-reconvert",
            Self::Failed => "failed",
            Self::DryRunPlanned => "dry-run-planned",
        }
    }
}

/// Heuristic post-encode finding. Logged, never fails the item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityWarning {
    SizeRatio {
        ratio: f64,
        input_bytes: u64,
        output_bytes: u64,
    },
    DurationMismatch {
        input_secs: f64,
        output_secs: f64,
    },
}

impl std::fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SizeRatio {
                ratio,
                input_bytes,
                output_bytes,
            } => write!(
                f,
                "output size {output_bytes} is {:.1}% of input size {input_bytes}",
                ratio * 100.0
            ),
            Self::DurationMismatch {
                input_secs,
                output_secs,
            } => write!(f, "duration {output_secs:.2}s differs from source {input_secs:.2}s"),
        }
    }
}

/// Result of processing one work item. Produced exactly once per item.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item: WorkItem,
    pub status: ItemStatus,
    /// Cause of failure; `None` unless `status` is `Failed`
    pub reason: Option<String>,
    pub warnings: Vec<QualityWarning>,
    pub elapsed: Duration,
    /// Aborted mid-conversion by cancellation
    pub interrupted: bool,
}

impl ItemOutcome {
    pub fn new(item: WorkItem, status: ItemStatus, elapsed: Duration) -> Self {
        Self {
            item,
            status,
            reason: None,
            warnings: Vec::new(),
            elapsed,
            interrupted: false,
        }
    }

    pub fn failed(item: WorkItem, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            item,
            status: ItemStatus::Failed,
            reason: Some(reason.into()),
            warnings: Vec::new(),
            elapsed,
            interrupted: false,
        }
    }

    /// Failed because the run was cancelled while this item was in flight
    pub fn interrupted(item: WorkItem, elapsed: Duration) -> Self {
        Self {
            interrupted: true,
            ..Self::failed(item, "interrupted", elapsed)
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<QualityWarning>) -> Self {
        self.warnings = warnings;
        self
    }
}
