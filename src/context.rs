use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::progress::ProgressState;

/// Everything a component needs to know about the current run.
///
/// Cheap to clone; every clone shares the same counter and cancellation token.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Arc<RunConfig>,
    pub progress: Arc<ProgressState>,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(config: Arc<RunConfig>, total: usize, cancel: CancellationToken) -> Self {
        Self {
            config,
            progress: Arc::new(ProgressState::new(total)),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
