// Integration test utilities and common code
// WHY: Centralized utilities avoid duplication across integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use mp3batch::{CodecEngine, ConversionError, ProbeVerdict, RunConfig};

/// Header and trailer of a fake "mp3" written by [`FakeCodec`].
pub const FAKE_HEADER: &[u8] = b"FAKEMP3\n";
pub const FAKE_TRAILER: &[u8] = b"\nEND";

/// Source content prefix that makes [`FakeCodec`] fail mid-encode.
pub const CORRUPT_MARKER: &[u8] = b"CORRUPT";

/// Highest bitrate (in k) the fake encoder accepts.
pub const MAX_FAKE_BITRATE: u32 = 320;

/// In-process stand-in for the external codec engine.
///
/// Output is header + first quarter of the source + trailer. Failing encodes
/// write a partial file first so cleanup can be observed.
#[derive(Default)]
pub struct FakeCodec {
    pub encodes: AtomicUsize,
    pub probes: AtomicUsize,
    pub encoded_sources: Mutex<Vec<PathBuf>>,
    pub delay: Option<Duration>,
}

impl FakeCodec {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn encode_count(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }

    pub fn is_valid_output(data: &[u8]) -> bool {
        data.starts_with(FAKE_HEADER) && data.ends_with(FAKE_TRAILER)
    }
}

fn bitrate_kbps(bitrate: &str) -> Option<u32> {
    bitrate.trim_end_matches(['k', 'K']).parse().ok()
}

#[async_trait]
impl CodecEngine for FakeCodec {
    fn name(&self) -> &str {
        "fake"
    }

    async fn encode(&self, input: &Path, output: &Path, bitrate: &str) -> Result<(), ConversionError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        self.encoded_sources.lock().unwrap().push(input.to_path_buf());

        let data = tokio::fs::read(input).await?;
        tokio::fs::write(output, FAKE_HEADER).await?;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if data.starts_with(CORRUPT_MARKER) {
            return Err(ConversionError::encode_failed("decoder error", Some("Invalid data found".into())));
        }
        if bitrate_kbps(bitrate).map_or(true, |kbps| kbps > MAX_FAKE_BITRATE) {
            return Err(ConversionError::encode_failed("invalid bitrate", None));
        }

        let mut out = FAKE_HEADER.to_vec();
        out.extend_from_slice(&data[..data.len() / 4]);
        out.extend_from_slice(FAKE_TRAILER);
        tokio::fs::write(output, out).await?;
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<ProbeVerdict, ConversionError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let data = tokio::fs::read(path).await?;
        if Self::is_valid_output(&data) {
            Ok(ProbeVerdict::Valid)
        } else {
            Ok(ProbeVerdict::Invalid {
                reason: "truncated stream".to_string(),
            })
        }
    }

    async fn duration(&self, _path: &Path) -> Option<Duration> {
        None
    }

    async fn check_available(&self) -> Result<(), ConversionError> {
        Ok(())
    }
}

/// Test fixture helper for creating a source tree and a target root
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub source_root: PathBuf,
    pub target_root: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with temporary directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let source_root = temp_dir.path().join("library");
        let target_root = temp_dir.path().join("mp3");
        fs::create_dir_all(&source_root).expect("Failed to create source root");

        Self {
            temp_dir,
            source_root,
            target_root,
        }
    }

    /// Create a source audio file with given content and a fixed old mtime
    pub fn create_source_file<P: AsRef<Path>>(&self, relative_path: P, content: &[u8]) -> PathBuf {
        let file_path = self.source_root.join(relative_path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&file_path, content).expect("Failed to write test file");
        filetime::set_file_mtime(&file_path, FileTime::from_unix_time(1_500_000_000, 0))
            .expect("Failed to set mtime");
        file_path
    }

    /// Source content large enough to give a sane size ratio
    pub fn audio_bytes(seed: u8) -> Vec<u8> {
        (0..4096u32).map(|i| (i as u8).wrapping_mul(seed)).collect()
    }

    pub fn target_for<P: AsRef<Path>>(&self, relative_source: P) -> PathBuf {
        let mut target = self.target_root.join(relative_source);
        target.set_extension("mp3");
        target
    }

    pub fn config(&self) -> RunConfig {
        let mut config = RunConfig::new(&self.source_root, &self.target_root);
        config.parallelism = 2;
        config
    }

    /// All regular files currently under the target root, sorted
    pub fn target_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&self.target_root)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    /// Snapshot of (path, bytes, mtime) for every target file
    pub fn target_tree_state(&self) -> Vec<(PathBuf, Vec<u8>, FileTime)> {
        self.target_files()
            .into_iter()
            .map(|path| {
                let data = fs::read(&path).expect("read target");
                let meta = fs::metadata(&path).expect("stat target");
                (path, data, FileTime::from_last_modification_time(&meta))
            })
            .collect()
    }
}

pub fn mtime(path: &Path) -> FileTime {
    FileTime::from_last_modification_time(&fs::metadata(path).expect("stat"))
}
