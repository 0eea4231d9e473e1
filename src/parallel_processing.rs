// Bounded worker pool: N workers pull items from a shared queue and pipe each
// through classification and conversion, emitting one outcome per item.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::codec::CodecEngine;
use crate::context::RunContext;
use crate::converter::{convert_item, remove_output, ConvertOptions};
use crate::error::ConversionError;
use crate::incremental::{Action, ItemClassifier, OutputTreeClassifier};
use crate::work::{ItemOutcome, ItemStatus, QualityWarning, WorkItem};

/// Shared queue of undispatched items.
///
/// Each item is handed to exactly one worker. Once the last item has been
/// taken, [`WorkQueue::wait_drained`] resolves.
#[derive(Debug)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    drained: Notify,
}

impl WorkQueue {
    pub fn new(items: Vec<WorkItem>) -> Self {
        let drained = Notify::new();
        if items.is_empty() {
            drained.notify_one();
        }
        Self {
            items: Mutex::new(items.into()),
            drained,
        }
    }

    pub fn pop(&self) -> Option<WorkItem> {
        let mut items = self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let item = items.pop_front();
        if item.is_some() && items.is_empty() {
            self.drained.notify_one();
        }
        item
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once every item has been dispatched
    pub async fn wait_drained(&self) {
        self.drained.notified().await;
    }
}

/// Run the worker pool until the queue is empty or the run is cancelled.
///
/// Returns the number of items that produced an outcome. The event sender is
/// dropped when the last worker exits, which closes the channel for the
/// progress reporter.
pub async fn process_items_parallel(
    ctx: &RunContext,
    engine: Arc<dyn CodecEngine>,
    classifier: Arc<dyn ItemClassifier>,
    queue: Arc<WorkQueue>,
    events: mpsc::UnboundedSender<ItemOutcome>,
) -> usize {
    let workers = ctx.config.parallelism.min(queue.len()).max(1);
    info!("Starting {} workers for {} items", workers, queue.len());

    let mut pool = JoinSet::new();
    for worker_id in 0..workers {
        pool.spawn(worker_loop(
            worker_id,
            ctx.clone(),
            Arc::clone(&engine),
            Arc::clone(&classifier),
            Arc::clone(&queue),
            events.clone(),
        ));
    }
    drop(events);

    let mut processed = 0;
    while let Some(joined) = pool.join_next().await {
        match joined {
            Ok(count) => processed += count,
            Err(e) => error!("Worker task failed: {}", e),
        }
    }
    processed
}

/// Convenience wrapper: run the pool over `items` and collect all outcomes.
pub async fn process_items(ctx: &RunContext, engine: Arc<dyn CodecEngine>, items: Vec<WorkItem>) -> Vec<ItemOutcome> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let queue = Arc::new(WorkQueue::new(items));
    process_items_parallel(ctx, engine, Arc::new(OutputTreeClassifier), queue, tx).await;

    let mut outcomes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }
    outcomes
}

async fn worker_loop(
    worker_id: usize,
    ctx: RunContext,
    engine: Arc<dyn CodecEngine>,
    classifier: Arc<dyn ItemClassifier>,
    queue: Arc<WorkQueue>,
    events: mpsc::UnboundedSender<ItemOutcome>,
) -> usize {
    let mut processed = 0;
    loop {
        if ctx.is_cancelled() {
            debug!(worker_id, "Cancellation observed, not dispatching further items");
            break;
        }
        let Some(item) = queue.pop() else {
            break;
        };

        let outcome = process_item(&ctx, engine.as_ref(), classifier.as_ref(), item).await;
        ctx.progress.record_completion();
        processed += 1;

        if events.send(outcome).is_err() {
            debug!(worker_id, "Outcome receiver dropped");
            break;
        }
    }
    debug!(worker_id, processed, "Worker exiting");
    processed
}

/// Classify one item and act on it. Never fails: errors become a `Failed` outcome.
pub async fn process_item(
    ctx: &RunContext,
    engine: &dyn CodecEngine,
    classifier: &dyn ItemClassifier,
    item: WorkItem,
) -> ItemOutcome {
    let start = Instant::now();
    let config = &ctx.config;
    let options = ConvertOptions {
        bitrate: &config.bitrate,
        quality_check: config.quality_check,
    };

    let action = classifier.classify(&item, config, engine).await;
    let result: Result<(ItemStatus, Vec<QualityWarning>), ConversionError> = match action {
        Action::DryRunOnly => {
            info!("Would convert {} -> {}", item.source_path.display(), item.target_path.display());
            Ok((ItemStatus::DryRunPlanned, Vec::new()))
        }
        Action::SkipExists => {
            let status = if config.resume {
                ItemStatus::ResumedSkip
            } else {
                ItemStatus::Skipped
            };
            Ok((status, Vec::new()))
        }
        Action::Convert => convert_item(engine, &item, options, &ctx.cancel)
            .await
            .map(|warnings| (ItemStatus::Converted, warnings)),
        Action::ReconvertCorrupt { reason } => {
            info!(target_file = %item.target_path.display(), %reason, "Replacing corrupt output");
            match remove_output(&item.target_path).await {
                Ok(()) => convert_item(engine, &item, options, &ctx.cancel)
                    .await
                    .map(|warnings| (ItemStatus::ResumedReconvert, warnings)),
                Err(e) => Err(e),
            }
        }
    };

    match result {
        Ok((status, warnings)) => ItemOutcome::new(item, status, start.elapsed()).with_warnings(warnings),
        Err(e) if e.is_cancelled() => ItemOutcome::interrupted(item, start.elapsed()),
        Err(e) => ItemOutcome::failed(item, failure_reason(&e), start.elapsed()),
    }
}

fn failure_reason(e: &ConversionError) -> String {
    match e {
        ConversionError::EncodeFailed {
            stderr: Some(stderr), ..
        } => format!("{e}: {stderr}"),
        _ => e.to_string(),
    }
}
