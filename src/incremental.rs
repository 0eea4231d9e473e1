// Skip/resume decisions for a single work item.
// The output tree itself is the checkpoint: no manifest is kept.

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use crate::codec::{CodecEngine, ProbeVerdict};
use crate::config::RunConfig;
use crate::work::WorkItem;

/// What a worker should do with one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// No output yet
    Convert,
    /// Output present and trusted (or probed valid under resume)
    SkipExists,
    /// Output present but corrupt; remove it and convert again
    ReconvertCorrupt { reason: String },
    /// Planning only
    DryRunOnly,
}

/// Decides the action for an item from whatever persisted state the strategy uses.
#[async_trait]
pub trait ItemClassifier: Send + Sync {
    async fn classify(&self, item: &WorkItem, config: &RunConfig, engine: &dyn CodecEngine) -> Action;
}

/// Classifier backed by output presence plus an optional validity probe.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputTreeClassifier;

#[async_trait]
impl ItemClassifier for OutputTreeClassifier {
    async fn classify(&self, item: &WorkItem, config: &RunConfig, engine: &dyn CodecEngine) -> Action {
        classify(item, config, engine).await
    }
}

/// Check if the output for `item` is already on disk
pub async fn target_exists(item: &WorkItem) -> bool {
    fs::try_exists(&item.target_path).await.unwrap_or(false)
}

/// Classify one item.
///
/// Without resume an existing output always wins and is never re-validated.
/// With resume it is probed; a probe that cannot reach a verdict counts as
/// corrupt.
pub async fn classify(item: &WorkItem, config: &RunConfig, engine: &dyn CodecEngine) -> Action {
    if config.dry_run {
        return Action::DryRunOnly;
    }

    if !target_exists(item).await {
        return Action::Convert;
    }

    if !config.resume {
        debug!("Output exists, skipping: {}", item.target_path.display());
        return Action::SkipExists;
    }

    match engine.probe(&item.target_path).await {
        Ok(ProbeVerdict::Valid) => Action::SkipExists,
        Ok(ProbeVerdict::Invalid { reason }) => {
            debug!(target_file = %item.target_path.display(), %reason, "Existing output is corrupt");
            Action::ReconvertCorrupt { reason }
        }
        Err(e) => {
            warn!(target_file = %item.target_path.display(), "Probe failed, treating output as corrupt: {}", e);
            Action::ReconvertCorrupt { reason: e.to_string() }
        }
    }
}
