use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RunError;

/// Extension given to every output file.
pub const OUTPUT_EXTENSION: &str = "mp3";

/// Input extensions picked up when no explicit list is given.
pub const DEFAULT_INPUT_FORMATS: &[&str] = &["flac", "wav", "aiff", "aif", "ape", "wv", "m4a", "ogg"];

pub const DEFAULT_BITRATE: &str = "320k";

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Immutable settings for one conversion run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_root: PathBuf,
    pub target_root: PathBuf,
    /// Encoder bitrate string, e.g. "320k"
    pub bitrate: String,
    /// Maximum number of items in flight
    pub parallelism: usize,
    /// Append-mode log destination; has no effect on behavior
    pub log_path: Option<PathBuf>,
    /// Plan only: no encodes, no writes under the target root
    pub dry_run: bool,
    /// Re-check existing outputs instead of trusting them
    pub resume: bool,
    /// Emit periodic progress snapshots
    pub verbose: bool,
    /// Run post-encode size/duration sanity checks
    pub quality_check: bool,
    /// Lowercased input extensions without leading dot
    pub input_formats: Vec<String>,
    /// Optional JSON summary destination
    pub stats_out: Option<PathBuf>,
    pub progress_interval: Duration,
}

impl RunConfig {
    pub fn new(source_root: impl Into<PathBuf>, target_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            target_root: target_root.into(),
            bitrate: DEFAULT_BITRATE.to_string(),
            parallelism: num_cpus::get().max(1),
            log_path: None,
            dry_run: false,
            resume: false,
            verbose: false,
            quality_check: false,
            input_formats: DEFAULT_INPUT_FORMATS.iter().map(|s| s.to_string()).collect(),
            stats_out: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Check option values before any work begins.
    pub fn validate(&self) -> Result<(), RunError> {
        validate_bitrate(&self.bitrate)?;

        if self.parallelism == 0 {
            return Err(RunError::config("--jobs must be at least 1"));
        }
        if self.input_formats.is_empty() {
            return Err(RunError::config("at least one input format is required"));
        }
        if self.input_formats.iter().any(|f| f == OUTPUT_EXTENSION) {
            return Err(RunError::config(format!(
                "input formats must not include the output format '{OUTPUT_EXTENSION}'"
            )));
        }
        if self.progress_interval.is_zero() {
            return Err(RunError::config("progress interval must be non-zero"));
        }
        Ok(())
    }

    /// Whether `ext` (without dot, any case) is an eligible input extension
    pub fn accepts_extension(&self, ext: &str) -> bool {
        self.input_formats.iter().any(|f| f.eq_ignore_ascii_case(ext))
    }
}

/// Normalize a user-supplied extension list: lowercase, strip dots, drop blanks
/// and repeats (first occurrence wins).
pub fn normalize_formats<I, S>(formats: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    formats
        .into_iter()
        .map(|f| f.as_ref().trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|f| !f.is_empty() && seen.insert(f.clone()))
        .collect()
}

/// Accepts "<digits>" or "<digits>k" (case-insensitive), digits non-zero.
fn validate_bitrate(bitrate: &str) -> Result<(), RunError> {
    let digits = bitrate
        .strip_suffix('k')
        .or_else(|| bitrate.strip_suffix('K'))
        .unwrap_or(bitrate);

    match digits.parse::<u32>() {
        Ok(n) if n > 0 && digits.chars().all(|c| c.is_ascii_digit()) => Ok(()),
        _ => Err(RunError::config(format!("invalid bitrate '{bitrate}', expected e.g. 256k"))),
    }
}
