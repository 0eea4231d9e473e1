pub mod codec;
pub mod config;
pub mod context;
pub mod controller;
pub mod converter;
pub mod discovery;
pub mod error;
pub mod incremental;
pub mod parallel_processing;
pub mod path_mapper;
pub mod progress;
pub mod work;

// Re-export main types for convenient access
pub use codec::{CodecEngine, FfmpegConfig, FfmpegEngine, ProbeVerdict};
pub use config::RunConfig;
pub use context::RunContext;
pub use controller::{RunController, RunOutcome, RunState};
pub use error::{ConversionError, DiscoveryError, RunError};
pub use work::{ItemOutcome, ItemStatus, QualityWarning, WorkItem};

// Re-export the pieces the worker pool is built from
pub use incremental::{classify, Action, ItemClassifier, OutputTreeClassifier};
pub use parallel_processing::{process_item, process_items, process_items_parallel, WorkQueue};
pub use progress::{ProgressSnapshot, ProgressState, RunSummary};
