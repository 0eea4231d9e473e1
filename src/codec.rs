//! Typed interface to the external codec engine and its ffmpeg implementation.
//!
//! All parsing of tool output is confined to this module; the rest of the
//! crate only sees [`CodecEngine`].

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::ConversionError;

/// Verdict of a full-decode validity probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Valid,
    Invalid { reason: String },
}

impl ProbeVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// An external engine that can transcode and inspect audio files.
#[async_trait]
pub trait CodecEngine: Send + Sync {
    /// Returns the name of this engine implementation.
    fn name(&self) -> &str;

    /// Transcode `input` into `output` at `bitrate`.
    ///
    /// May leave a partial file at `output` on failure; the caller cleans up.
    async fn encode(&self, input: &Path, output: &Path, bitrate: &str) -> Result<(), ConversionError>;

    /// Decode `path` end to end and report whether it is intact.
    async fn probe(&self, path: &Path) -> Result<ProbeVerdict, ConversionError>;

    /// Playback duration, if the engine can determine it.
    async fn duration(&self, path: &Path) -> Option<Duration>;

    /// Verifies the engine is installed and runnable.
    async fn check_available(&self) -> Result<(), ConversionError>;
}

/// Paths to the ffmpeg tools
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

/// ffmpeg/ffprobe-backed engine producing MP3 via libmp3lame.
pub struct FfmpegEngine {
    config: FfmpegConfig,
}

impl FfmpegEngine {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FfmpegConfig::default())
    }

    /// Builds ffmpeg arguments for a single-threaded MP3 encode that keeps tags.
    ///
    /// Paths are passed through as `OsString` so non-UTF-8 names reach ffmpeg byte for byte.
    fn build_encode_args(input: &Path, output: &Path, bitrate: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-nostdin", "-hide_banner", "-y", "-loglevel", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_os_string());
        args.extend(
            [
                "-map_metadata",
                "0",
                "-id3v2_version",
                "3",
                "-vn",
                "-codec:a",
                "libmp3lame",
                "-b:a",
                bitrate,
                "-threads",
                "1",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_os_string());
        args
    }

    fn build_probe_args(path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-nostdin", "-hide_banner", "-v", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(path.as_os_str().to_os_string());
        args.extend(["-f", "null", "-"].into_iter().map(OsString::from));
        args
    }

    fn spawn_error(&self, tool: &Path, e: std::io::Error) -> ConversionError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConversionError::EngineNotFound {
                path: tool.to_path_buf(),
            }
        } else {
            ConversionError::Io(e)
        }
    }

    async fn run_version(&self, tool: &Path) -> Result<(), ConversionError> {
        let status = Command::new(tool)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| self.spawn_error(tool, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(ConversionError::EngineNotFound {
                path: tool.to_path_buf(),
            })
        }
    }
}

/// Parses ffprobe's bare `format=duration` output, e.g. "215.373000".
fn parse_duration_output(output: &str) -> Option<Duration> {
    let secs = output.trim().lines().next()?.trim().parse::<f64>().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[async_trait]
impl CodecEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn encode(&self, input: &Path, output: &Path, bitrate: &str) -> Result<(), ConversionError> {
        let args = Self::build_encode_args(input, output, bitrate);
        debug!(?args, "Running ffmpeg encode");

        let result = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(&self.config.ffmpeg_path, e))?;

        if result.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
        Err(ConversionError::encode_failed(
            format!("ffmpeg exited with code {:?}", result.status.code()),
            (!stderr.is_empty()).then_some(stderr),
        ))
    }

    async fn probe(&self, path: &Path) -> Result<ProbeVerdict, ConversionError> {
        let result = Command::new(&self.config.ffmpeg_path)
            .args(Self::build_probe_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(&self.config.ffmpeg_path, e))?;

        let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
        if !result.status.success() {
            return Ok(ProbeVerdict::Invalid {
                reason: format!("decoder exited with code {:?}: {stderr}", result.status.code()),
            });
        }
        if !stderr.is_empty() {
            return Ok(ProbeVerdict::Invalid { reason: stderr });
        }
        Ok(ProbeVerdict::Valid)
    }

    async fn duration(&self, path: &Path) -> Option<Duration> {
        let result = Command::new(&self.config.ffprobe_path)
            .args(["-v", "error", "-show_entries", "format=duration", "-of"])
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .ok()?;

        if !result.status.success() {
            return None;
        }
        parse_duration_output(&String::from_utf8_lossy(&result.stdout))
    }

    async fn check_available(&self) -> Result<(), ConversionError> {
        self.run_version(&self.config.ffmpeg_path).await?;
        self.run_version(&self.config.ffprobe_path).await
    }
}
