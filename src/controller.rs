//! Top-level orchestration of a conversion run.
//!
//! The controller walks a small state machine:
//!
//! ```text
//! Initializing -> Discovering -> Scheduled -> Draining -> Completed
//!       |              |             |            |
//!       +--------------+-------------+------------+----> Cancelled | FatalError
//! ```
//!
//! Each terminal state maps to a distinct process exit status.

use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::codec::CodecEngine;
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::discovery::collect_work_items;
use crate::error::RunError;
use crate::incremental::{ItemClassifier, OutputTreeClassifier};
use crate::parallel_processing::{process_items_parallel, WorkQueue};
use crate::progress::{AggregateReport, ProgressAggregator, RunSummary};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FATAL: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Discovering,
    Scheduled,
    Draining,
    Completed,
    Cancelled,
    FatalError,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::FatalError)
    }
}

/// How a run that did not hit a fatal error ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every discovered item produced an outcome (failures included)
    Completed(RunSummary),
    /// Interrupted; completed outputs are kept for a later resume
    Cancelled(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Completed(summary) | Self::Cancelled(summary) => summary,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Completed(_) => EXIT_SUCCESS,
            Self::Cancelled(_) => EXIT_INTERRUPTED,
        }
    }
}

/// Map a finished run to the process exit status.
pub fn exit_code(result: &Result<RunOutcome, RunError>) -> u8 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(_) => EXIT_FATAL,
    }
}

pub struct RunController {
    config: Arc<RunConfig>,
    engine: Arc<dyn CodecEngine>,
    classifier: Arc<dyn ItemClassifier>,
    cancel: CancellationToken,
    state: RunState,
    history: Vec<RunState>,
}

impl RunController {
    pub fn new(config: RunConfig, engine: Arc<dyn CodecEngine>, cancel: CancellationToken) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            classifier: Arc::new(OutputTreeClassifier),
            cancel,
            state: RunState::Initializing,
            history: vec![RunState::Initializing],
        }
    }

    /// Substitute the skip/resume strategy.
    pub fn with_classifier(mut self, classifier: Arc<dyn ItemClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state visited so far, in order
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    fn transition(&mut self, next: RunState) {
        if self.state == next {
            return;
        }
        info!(from = ?self.state, to = ?next, "Run state transition");
        self.state = next;
        self.history.push(next);
    }

    fn fail(&mut self, err: RunError) -> Result<RunOutcome, RunError> {
        error!("{}", err);
        self.transition(RunState::FatalError);
        Err(err)
    }

    fn cancelled_before_scheduling(&mut self, started: Instant, run_start: SystemTime) -> Result<RunOutcome, RunError> {
        warn!("Run interrupted before any work was scheduled");
        self.transition(RunState::Cancelled);
        let summary = RunSummary::from_outcomes(&self.config.source_root, 0, &[], started.elapsed(), run_start, true);
        Ok(RunOutcome::Cancelled(summary))
    }

    /// Execute the run to a terminal state.
    pub async fn run(&mut self) -> Result<RunOutcome, RunError> {
        let started = Instant::now();
        let run_start = SystemTime::now();

        if let Err(e) = self.preflight().await {
            return self.fail(e);
        }
        if self.cancel.is_cancelled() {
            return self.cancelled_before_scheduling(started, run_start);
        }

        self.transition(RunState::Discovering);
        let cancel = self.cancel.clone();
        let config = Arc::clone(&self.config);
        let discovered = tokio::select! {
            plan = collect_work_items(&config) => Some(plan),
            _ = cancel.cancelled() => None,
        };
        let plan = match discovered {
            Some(Ok(plan)) => plan,
            Some(Err(e)) => return self.fail(e.into()),
            None => return self.cancelled_before_scheduling(started, run_start),
        };
        if !plan.collisions.is_empty() {
            warn!("{} sources excluded due to target path collisions", plan.collisions.len());
        }
        let total = plan.len();
        info!("Discovered {} items to process", total);

        let ctx = RunContext::new(Arc::clone(&self.config), total, self.cancel.clone());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let aggregator = ProgressAggregator::new(
            Arc::clone(&ctx.progress),
            self.config.progress_interval,
            self.config.verbose,
            self.cancel.clone(),
        )
        .spawn(events_rx);

        let queue = Arc::new(WorkQueue::new(plan.items));
        let pool = {
            let ctx = ctx.clone();
            let engine = Arc::clone(&self.engine);
            let classifier = Arc::clone(&self.classifier);
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { process_items_parallel(&ctx, engine, classifier, queue, events_tx).await })
        };
        self.transition(RunState::Scheduled);

        let drained = tokio::select! {
            _ = queue.wait_drained() => true,
            _ = cancel.cancelled() => false,
        };
        if drained {
            self.transition(RunState::Draining);
        }

        if let Err(e) = pool.await {
            error!("Worker pool terminated abnormally: {}", e);
        }
        let report = match aggregator.await {
            Ok(report) => report,
            Err(e) => {
                error!("Progress reporter terminated abnormally: {}", e);
                AggregateReport::default()
            }
        };

        // A cancel that lands after every item has an outcome does not interrupt the run.
        let cut_short = report.outcomes.len() < total || report.outcomes.iter().any(|o| o.interrupted);
        let interrupted = self.cancel.is_cancelled() && cut_short;
        let summary = RunSummary::from_outcomes(
            &self.config.source_root,
            total,
            &report.outcomes,
            started.elapsed(),
            run_start,
            interrupted,
        );

        if interrupted {
            self.transition(RunState::Cancelled);
            warn!(
                completed = ctx.progress.completed(),
                total, "Run interrupted; finished outputs are kept for resume"
            );
            Ok(RunOutcome::Cancelled(summary))
        } else {
            self.transition(RunState::Completed);
            info!(
                converted = summary.files_converted,
                skipped = summary.files_skipped,
                failed = summary.files_failed,
                planned = summary.files_planned,
                "Run completed"
            );
            Ok(RunOutcome::Completed(summary))
        }
    }

    /// Validate configuration, directories and the codec engine.
    async fn preflight(&self) -> Result<(), RunError> {
        self.config.validate()?;

        let source = &self.config.source_root;
        let metadata = tokio::fs::metadata(source)
            .await
            .map_err(|e| RunError::preflight(format!("source directory {} is not accessible: {e}", source.display())))?;
        if !metadata.is_dir() {
            return Err(RunError::preflight(format!("source {} is not a directory", source.display())));
        }
        std::fs::read_dir(source)
            .map_err(|e| RunError::preflight(format!("source directory {} is not readable: {e}", source.display())))?;

        let target = &self.config.target_root;
        if self.config.dry_run {
            if target.exists() && !target.is_dir() {
                return Err(RunError::preflight(format!("target {} is not a directory", target.display())));
            }
            info!("Dry run: skipping codec engine check and target creation");
            return Ok(());
        }

        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| RunError::preflight(format!("cannot create target directory {}: {e}", target.display())))?;

        self.engine.check_available().await.map_err(|e| {
            RunError::preflight(format!("codec engine '{}' unavailable: {e}", self.engine.name()))
        })?;

        Ok(())
    }
}
