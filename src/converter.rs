// Single-item conversion: directory setup, encode, cleanup, timestamps, quality check.

use filetime::FileTime;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::CodecEngine;
use crate::error::ConversionError;
use crate::work::{QualityWarning, WorkItem};

/// Output/input size ratio bounds outside which a warning is raised.
pub const MIN_SIZE_RATIO: f64 = 0.05;
pub const MAX_SIZE_RATIO: f64 = 0.50;

/// Allowed difference between source and output durations.
pub const DURATION_TOLERANCE: Duration = Duration::from_secs(1);

/// Settings the adapter needs from the run configuration
#[derive(Debug, Clone, Copy)]
pub struct ConvertOptions<'a> {
    pub bitrate: &'a str,
    pub quality_check: bool,
}

/// Convert one item, leaving either a complete output or no output at all.
///
/// On success the source's modification time is copied onto the output and
/// any quality findings are returned. On failure (including cancellation)
/// whatever the engine wrote at the target path is removed before returning.
pub async fn convert_item(
    engine: &dyn CodecEngine,
    item: &WorkItem,
    options: ConvertOptions<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<QualityWarning>, ConversionError> {
    ensure_parent_dir(&item.target_path).await?;

    // Encode is polled first: a finished output wins over a cancel that lands in the same poll.
    let encoded = tokio::select! {
        biased;
        result = engine.encode(&item.source_path, &item.target_path, options.bitrate) => result,
        _ = cancel.cancelled() => Err(ConversionError::Cancelled),
    };

    if let Err(e) = encoded {
        remove_partial_output(&item.target_path).await;
        return Err(e);
    }

    // A missing output after a clean exit is still a failed encode.
    if fs::metadata(&item.target_path).await.is_err() {
        return Err(ConversionError::encode_failed("engine reported success but wrote no output", None));
    }

    if let Err(e) = preserve_timestamps(&item.source_path, &item.target_path).await {
        remove_partial_output(&item.target_path).await;
        return Err(e);
    }

    if options.quality_check {
        let warnings = check_quality(engine, &item.source_path, &item.target_path).await;
        for warning in &warnings {
            warn!(target_file = %item.target_path.display(), "Quality check: {}", warning);
        }
        return Ok(warnings);
    }

    Ok(Vec::new())
}

/// Create every missing ancestor of `target`. Safe to race with other workers.
pub async fn ensure_parent_dir(target: &Path) -> Result<(), ConversionError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| ConversionError::OutputDirectoryFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}

/// Remove a stale or partial output; absence is not an error.
pub async fn remove_output(target: &Path) -> Result<(), ConversionError> {
    match fs::remove_file(target).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ConversionError::StaleOutput {
            path: target.to_path_buf(),
            source,
        }),
    }
}

async fn remove_partial_output(target: &Path) {
    match remove_output(target).await {
        Ok(()) => debug!("Cleaned up partial output {}", target.display()),
        Err(e) => warn!("Could not remove partial output: {}", e),
    }
}

/// Copy access and modification times from `source` onto `target`.
pub async fn preserve_timestamps(source: &Path, target: &Path) -> Result<(), ConversionError> {
    let metadata = fs::metadata(source).await?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    let atime = FileTime::from_last_access_time(&metadata);

    let target_buf = target.to_path_buf();
    let result = tokio::task::spawn_blocking(move || filetime::set_file_times(&target_buf, atime, mtime))
        .await
        .map_err(std::io::Error::other)?;

    result.map_err(|source| ConversionError::Timestamp {
        path: target.to_path_buf(),
        source,
    })
}

/// Size-ratio and duration sanity checks. Never fails; findings are returned.
pub async fn check_quality(engine: &dyn CodecEngine, source: &Path, target: &Path) -> Vec<QualityWarning> {
    let mut warnings = Vec::new();

    if let (Ok(input), Ok(output)) = (fs::metadata(source).await, fs::metadata(target).await) {
        if let Some(warning) = size_ratio_warning(input.len(), output.len()) {
            warnings.push(warning);
        }
    }

    if let (Some(input), Some(output)) = (engine.duration(source).await, engine.duration(target).await) {
        if let Some(warning) = duration_warning(input, output) {
            warnings.push(warning);
        }
    }

    warnings
}

fn size_ratio_warning(input_bytes: u64, output_bytes: u64) -> Option<QualityWarning> {
    if input_bytes == 0 {
        return None;
    }
    let ratio = output_bytes as f64 / input_bytes as f64;
    if (MIN_SIZE_RATIO..=MAX_SIZE_RATIO).contains(&ratio) {
        None
    } else {
        Some(QualityWarning::SizeRatio {
            ratio,
            input_bytes,
            output_bytes,
        })
    }
}

fn duration_warning(input: Duration, output: Duration) -> Option<QualityWarning> {
    let delta = if input > output { input - output } else { output - input };
    (delta > DURATION_TOLERANCE).then(|| QualityWarning::DurationMismatch {
        input_secs: input.as_secs_f64(),
        output_secs: output.as_secs_f64(),
    })
}
