//! Shared completion counter, periodic progress reporting and the run summary.

use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::work::{ItemOutcome, ItemStatus, QualityWarning};

/// Process-wide completion counter shared by workers and the reporter.
///
/// `completed` only ever increases, once per item, and never exceeds `total`.
#[derive(Debug)]
pub struct ProgressState {
    completed: AtomicUsize,
    total: usize,
}

impl ProgressState {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// Record one finished item and return the new completed count.
    pub fn record_completion(&self) -> usize {
        let now = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(now <= self.total, "completed {now} exceeds total {}", self.total);
        now
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_finished(&self) -> bool {
        self.completed() == self.total
    }

    pub fn snapshot(&self, elapsed: Duration) -> ProgressSnapshot {
        ProgressSnapshot::compute(self.completed(), self.total, elapsed)
    }
}

/// Point-in-time view of progress with rate and ETA
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Items per second
    pub rate: f64,
    /// `None` until at least one item has completed
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    pub fn compute(completed: usize, total: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { completed as f64 / secs } else { 0.0 };
        let eta = if completed == 0 || rate <= 0.0 {
            None
        } else {
            let remaining = total.saturating_sub(completed) as f64;
            Some(Duration::from_secs_f64(remaining / rate))
        };

        Self {
            completed,
            total,
            elapsed,
            rate,
            eta,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 * 100.0 / self.total as f64
        }
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let eta = match self.eta {
            Some(eta) => HumanDuration(eta).to_string(),
            None => "unknown".to_string(),
        };
        write!(
            f,
            "{}/{} ({:.1}%) at {:.2} files/s, elapsed {}, ETA {}",
            self.completed,
            self.total,
            self.percent(),
            self.rate,
            HumanDuration(self.elapsed),
            eta
        )
    }
}

/// Per-file record in the run summary
///
/// `path` and `target` are lossy for names that are not valid UTF-8; the exact
/// bytes are then carried in `path_bytes` / `target_bytes`.
#[derive(Serialize, Debug, Clone)]
pub struct FileStats {
    /// Source path relative to the source root
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_bytes: Option<Vec<u8>>,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_bytes: Option<Vec<u8>>,
    pub status: ItemStatus,
    pub processing_time_ms: u64,
    /// Error message if processing failed
    pub error: Option<String>,
    pub warnings: Vec<QualityWarning>,
}

/// Final report of a run. Derived from the collected outcomes.
#[derive(Serialize, Debug, Clone)]
pub struct RunSummary {
    /// Unix seconds at which the run started
    pub run_start: u64,
    pub total_discovered: usize,
    pub files_converted: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_planned: usize,
    /// Items never dispatched because the run was interrupted
    pub files_not_processed: usize,
    pub quality_warnings: usize,
    pub elapsed_ms: u64,
    pub interrupted: bool,
    pub file_stats: Vec<FileStats>,
}

impl RunSummary {
    pub fn from_outcomes(
        source_root: &Path,
        total_discovered: usize,
        outcomes: &[ItemOutcome],
        elapsed: Duration,
        run_start: SystemTime,
        interrupted: bool,
    ) -> Self {
        let count = |pred: fn(ItemStatus) -> bool| outcomes.iter().filter(|o| pred(o.status)).count();

        let file_stats = outcomes
            .iter()
            .map(|o| {
                let relative = o.item.source_path.strip_prefix(source_root).unwrap_or(&o.item.source_path);
                let (path, path_bytes) = json_path(relative);
                let (target, target_bytes) = json_path(&o.item.target_path);
                FileStats {
                    path,
                    path_bytes,
                    target,
                    target_bytes,
                    status: o.status,
                    processing_time_ms: o.elapsed.as_millis() as u64,
                    error: o.reason.clone(),
                    warnings: o.warnings.clone(),
                }
            })
            .collect();

        Self {
            run_start: run_start.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0),
            total_discovered,
            files_converted: count(ItemStatus::is_success),
            files_skipped: count(ItemStatus::is_skip),
            files_failed: count(|s| s == ItemStatus::Failed),
            files_planned: count(|s| s == ItemStatus::DryRunPlanned),
            files_not_processed: total_discovered.saturating_sub(outcomes.len()),
            quality_warnings: outcomes.iter().map(|o| o.warnings.len()).sum(),
            elapsed_ms: elapsed.as_millis() as u64,
            interrupted,
            file_stats,
        }
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms)
    }

    /// Human-readable summary lines for the console
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Discovered: {} files\n", self.total_discovered));
        if self.files_planned > 0 {
            out.push_str(&format!("  Planned (dry run): {} files\n", self.files_planned));
        }
        out.push_str(&format!("  Converted: {} files\n", self.files_converted));
        out.push_str(&format!("  Skipped (existing output): {} files\n", self.files_skipped));
        out.push_str(&format!("  Failed: {} files\n", self.files_failed));
        if self.files_not_processed > 0 {
            out.push_str(&format!("  Not processed (interrupted): {} files\n", self.files_not_processed));
        }
        if self.quality_warnings > 0 {
            out.push_str(&format!("  Quality warnings: {}\n", self.quality_warnings));
        }
        out.push_str(&format!("Elapsed: {}", HumanDuration(self.elapsed())));
        out
    }

    /// Write the summary as pretty JSON
    pub async fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Path as JSON text, plus its raw bytes when the text would be lossy.
fn json_path(path: &Path) -> (String, Option<Vec<u8>>) {
    match path.to_str() {
        Some(text) => (text.to_string(), None),
        None => (
            path.to_string_lossy().into_owned(),
            Some(path.as_os_str().as_encoded_bytes().to_vec()),
        ),
    }
}

/// What the reporter collected over a run
#[derive(Debug, Default)]
pub struct AggregateReport {
    pub outcomes: Vec<ItemOutcome>,
    /// Periodic snapshots in emission order
    pub snapshots: Vec<ProgressSnapshot>,
}

/// Consumes outcome events and emits periodic snapshots while enabled.
pub struct ProgressAggregator {
    progress: Arc<ProgressState>,
    interval: Duration,
    enabled: bool,
    cancel: CancellationToken,
    bar: ProgressBar,
}

impl ProgressAggregator {
    pub fn new(progress: Arc<ProgressState>, interval: Duration, enabled: bool, cancel: CancellationToken) -> Self {
        let bar = if enabled && std::io::stderr().is_terminal() {
            let bar = ProgressBar::with_draw_target(Some(progress.total() as u64), ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}] ETA {eta}") {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };
        Self::with_bar(progress, interval, enabled, cancel, bar)
    }

    /// Like [`ProgressAggregator::new`] but drawing to a caller-supplied bar.
    pub fn with_bar(
        progress: Arc<ProgressState>,
        interval: Duration,
        enabled: bool,
        cancel: CancellationToken,
        bar: ProgressBar,
    ) -> Self {
        Self {
            progress,
            interval,
            enabled,
            cancel,
            bar,
        }
    }

    pub fn spawn(self, events: mpsc::UnboundedReceiver<ItemOutcome>) -> JoinHandle<AggregateReport> {
        tokio::spawn(self.run(events))
    }

    /// Runs until the event channel closes, i.e. every worker has exited.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<ItemOutcome>) -> AggregateReport {
        let start = Instant::now();
        let mut report = AggregateReport::default();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(outcome) => {
                        // Log lines share stderr with the bar; keep them from tearing it.
                        self.bar.suspend(|| log_outcome(&outcome));
                        self.bar.set_position(self.progress.completed() as u64);
                        report.outcomes.push(outcome);
                    }
                    None => break,
                },
                _ = ticker.tick(), if self.enabled && !self.cancel.is_cancelled() => {
                    let snapshot = self.progress.snapshot(start.elapsed());
                    self.bar.suspend(|| info!("Progress: {}", snapshot));
                    report.snapshots.push(snapshot);
                }
            }
        }

        self.bar.finish_and_clear();
        report
    }
}

fn log_outcome(outcome: &ItemOutcome) {
    let source = outcome.item.source_path.display();
    match outcome.status {
        ItemStatus::Failed => warn!(
            %source,
            reason = outcome.reason.as_deref().unwrap_or("unknown"),
            "Conversion failed"
        ),
        status => info!(%source, status = status.label(), elapsed_ms = outcome.elapsed.as_millis() as u64, "Item done"),
    }
}
