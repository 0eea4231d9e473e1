// Integration tests for the full conversion pipeline
// WHY: Exercises discovery, classification, the worker pool and the controller together

use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use mp3batch::controller::{exit_code, EXIT_INTERRUPTED, EXIT_SUCCESS};
use mp3batch::{
    process_items, Action, CodecEngine, ItemClassifier, ItemStatus, RunConfig, RunContext, RunController, RunOutcome,
    WorkItem,
};

mod integration;
use integration::{mtime, FakeCodec, TestFixture, CORRUPT_MARKER, FAKE_HEADER};

async fn run(config: RunConfig, codec: Arc<FakeCodec>) -> RunOutcome {
    let mut controller = RunController::new(config, codec, CancellationToken::new());
    controller.run().await.expect("run should not be fatal")
}

fn three_file_fixture() -> TestFixture {
    let fixture = TestFixture::new();
    fixture.create_source_file("a.flac", &TestFixture::audio_bytes(3));
    fixture.create_source_file("x/b.wav", &TestFixture::audio_bytes(5));
    fixture.create_source_file("._c.flac", b"resource fork");
    fixture
}

/// Dry run plans both eligible files and writes nothing
#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let fixture = three_file_fixture();
    let codec = FakeCodec::new();
    let mut config = fixture.config();
    config.dry_run = true;

    let outcome = run(config, codec.clone()).await;

    assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
    let summary = outcome.summary();
    assert_eq!(summary.total_discovered, 2);
    assert_eq!(summary.files_planned, 2);
    assert_eq!(summary.files_converted, 0);
    assert_eq!(codec.encode_count(), 0);
    assert!(!fixture.target_root.exists(), "dry run must not create the target root");
}

/// Real run mirrors the tree, preserves mtimes and ignores "._" files
#[tokio::test]
async fn test_convert_mirrors_tree_and_preserves_mtime() {
    let fixture = three_file_fixture();
    let codec = FakeCodec::new();

    let outcome = run(fixture.config(), codec.clone()).await;
    assert_eq!(outcome.summary().files_converted, 2);
    assert_eq!(outcome.summary().files_failed, 0);

    let a = fixture.target_for("a.flac");
    let b = fixture.target_for("x/b.wav");
    assert_eq!(fixture.target_files(), vec![a.clone(), b.clone()]);
    assert!(FakeCodec::is_valid_output(&fs::read(&a).unwrap()));
    assert_eq!(mtime(&a), mtime(&fixture.source_root.join("a.flac")));
    assert_eq!(mtime(&b), mtime(&fixture.source_root.join("x/b.wav")));
    assert!(!fixture.target_for("._c.flac").exists());
}

/// A second run over a complete target tree changes nothing
#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fixture = three_file_fixture();
    let codec = FakeCodec::new();

    run(fixture.config(), codec.clone()).await;
    let before = fixture.target_tree_state();
    assert_eq!(codec.encode_count(), 2);

    let outcome = run(fixture.config(), codec.clone()).await;

    assert_eq!(outcome.summary().files_skipped, 2);
    assert_eq!(outcome.summary().files_converted, 0);
    assert_eq!(codec.encode_count(), 2, "no engine invocations on rerun");
    assert_eq!(fixture.target_tree_state(), before);
    assert!(outcome
        .summary()
        .file_stats
        .iter()
        .all(|s| s.status == ItemStatus::Skipped));
}

/// Without resume a truncated output is trusted and left alone
#[tokio::test]
async fn test_existing_output_trusted_without_resume() {
    let fixture = three_file_fixture();
    let truncated = fixture.target_for("a.flac");
    fs::create_dir_all(truncated.parent().unwrap()).unwrap();
    fs::write(&truncated, FAKE_HEADER).unwrap();
    let codec = FakeCodec::new();

    let outcome = run(fixture.config(), codec.clone()).await;

    assert_eq!(outcome.summary().files_skipped, 1);
    assert_eq!(outcome.summary().files_converted, 1);
    assert_eq!(fs::read(&truncated).unwrap(), FAKE_HEADER);
    assert_eq!(codec.probes.load(std::sync::atomic::Ordering::SeqCst), 0);
}

/// Resume probes existing outputs and replaces only the corrupt one
#[tokio::test]
async fn test_resume_replaces_corrupt_output() {
    let fixture = three_file_fixture();
    let codec = FakeCodec::new();
    run(fixture.config(), codec.clone()).await;

    let truncated = fixture.target_for("a.flac");
    fs::write(&truncated, FAKE_HEADER).unwrap();
    let untouched = fixture.target_for("x/b.wav");
    let untouched_before = fs::read(&untouched).unwrap();

    let mut config = fixture.config();
    config.resume = true;
    let outcome = run(config, codec.clone()).await;

    let stats = &outcome.summary().file_stats;
    let status_of = |name: &str| stats.iter().find(|s| s.path == name).map(|s| s.status);
    assert_eq!(status_of("a.flac"), Some(ItemStatus::ResumedReconvert));
    assert_eq!(
        status_of(&std::path::Path::new("x").join("b.wav").display().to_string()),
        Some(ItemStatus::ResumedSkip)
    );
    assert_eq!(codec.encode_count(), 3);
    assert!(FakeCodec::is_valid_output(&fs::read(&truncated).unwrap()));
    assert_eq!(fs::read(&untouched).unwrap(), untouched_before);
}

/// One undecodable source fails alone; the rest convert and the run exits 0
#[tokio::test]
async fn test_failure_is_isolated_and_leaves_no_partial_output() {
    let fixture = TestFixture::new();
    for i in 0..5u8 {
        fixture.create_source_file(format!("album/{i}.flac"), &TestFixture::audio_bytes(i + 1));
    }
    let mut bad = CORRUPT_MARKER.to_vec();
    bad.extend_from_slice(&TestFixture::audio_bytes(9));
    fixture.create_source_file("album/broken.flac", &bad);
    let codec = FakeCodec::new();

    let mut controller = RunController::new(fixture.config(), codec.clone(), CancellationToken::new());
    let result = controller.run().await;
    assert_eq!(exit_code(&result), EXIT_SUCCESS);

    let summary = result.unwrap().summary().clone();
    assert_eq!(summary.files_converted, 5);
    assert_eq!(summary.files_failed, 1);
    let failure = summary
        .file_stats
        .iter()
        .find(|s| s.status == ItemStatus::Failed)
        .expect("failed entry");
    assert!(failure.error.as_deref().unwrap_or("").contains("Invalid data found"));
    assert!(!fixture.target_for("album/broken.flac").exists(), "partial output removed");
    assert_eq!(fixture.target_files().len(), 5);
}

/// An encoder-rejected bitrate fails every item but is not fatal
#[tokio::test]
async fn test_rejected_bitrate_fails_every_item() {
    let fixture = three_file_fixture();
    let codec = FakeCodec::new();
    let mut config = fixture.config();
    config.bitrate = "999k".to_string();

    let outcome = run(config, codec).await;

    assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
    assert_eq!(outcome.summary().files_failed, 2);
    assert!(fixture.target_files().is_empty());
}

/// Interrupting mid-run keeps only complete outputs; a resume run finishes the job
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interrupt_then_resume() {
    let fixture = TestFixture::new();
    for i in 0..6u8 {
        fixture.create_source_file(format!("{i}.flac"), &TestFixture::audio_bytes(i + 1));
    }

    let cancel = CancellationToken::new();
    let slow = FakeCodec::with_delay(Duration::from_millis(300));
    let mut controller = RunController::new(fixture.config(), slow, cancel.clone());
    let trigger = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        })
    };
    let result = controller.run().await;
    trigger.await.unwrap();

    assert_eq!(exit_code(&result), EXIT_INTERRUPTED);
    let summary = result.unwrap().summary().clone();
    assert!(summary.interrupted);
    assert!(summary.files_not_processed >= 1);
    for file in fixture.target_files() {
        assert!(FakeCodec::is_valid_output(&fs::read(&file).unwrap()), "partial output left at {}", file.display());
    }
    assert!(summary
        .file_stats
        .iter()
        .filter(|s| s.status == ItemStatus::Failed)
        .all(|s| s.error.as_deref() == Some("interrupted")));

    let mut config = fixture.config();
    config.resume = true;
    let outcome = run(config, FakeCodec::new()).await;
    assert_eq!(outcome.exit_code(), EXIT_SUCCESS);
    assert_eq!(outcome.summary().files_converted + outcome.summary().files_skipped, 6);
    assert_eq!(fixture.target_files().len(), 6);
}

/// Progress counter reaches exactly the number of items
#[tokio::test]
async fn test_progress_counts_every_item_once() {
    let fixture = TestFixture::new();
    let items: Vec<WorkItem> = (0..7u8)
        .map(|i| {
            let source = fixture.create_source_file(format!("{i}.wav"), &TestFixture::audio_bytes(i + 1));
            WorkItem::new(source, fixture.target_for(format!("{i}.wav")))
        })
        .collect();
    let mut config = fixture.config();
    config.parallelism = 3;
    let ctx = RunContext::new(Arc::new(config), items.len(), CancellationToken::new());

    let outcomes = process_items(&ctx, FakeCodec::new(), items).await;

    assert_eq!(outcomes.len(), 7);
    assert_eq!(ctx.progress.completed(), 7);
    assert!(ctx.progress.is_finished());
}

/// Always converts, ignoring any existing output
struct ForceConvert;

#[async_trait]
impl ItemClassifier for ForceConvert {
    async fn classify(&self, _item: &WorkItem, _config: &RunConfig, _engine: &dyn CodecEngine) -> Action {
        Action::Convert
    }
}

/// The skip strategy is replaceable without touching the pipeline
#[tokio::test]
async fn test_custom_classifier_is_used() {
    let fixture = three_file_fixture();
    let codec = FakeCodec::new();
    run(fixture.config(), codec.clone()).await;

    let mut controller = RunController::new(fixture.config(), codec.clone(), CancellationToken::new())
        .with_classifier(Arc::new(ForceConvert));
    let outcome = controller.run().await.unwrap();

    assert_eq!(outcome.summary().files_converted, 2);
    assert_eq!(codec.encode_count(), 4);
}

/// Target collisions keep the first source and exclude the rest
#[tokio::test]
async fn test_collision_keeps_first_source() {
    let fixture = TestFixture::new();
    fixture.create_source_file("song.flac", &TestFixture::audio_bytes(2));
    fixture.create_source_file("song.wav", &TestFixture::audio_bytes(4));
    let codec = FakeCodec::new();

    let outcome = run(fixture.config(), codec.clone()).await;

    assert_eq!(outcome.summary().total_discovered, 1);
    assert_eq!(outcome.summary().files_converted, 1);
    let encoded = codec.encoded_sources.lock().unwrap().clone();
    assert_eq!(encoded, vec![fixture.source_root.join("song.flac")]);
}

#[cfg(target_os = "linux")]
fn non_utf8_names() -> Vec<PathBuf> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    vec![PathBuf::from(OsStr::from_bytes(b"latin1 caf\xe9/d\xe9j\xe0 vu.flac"))]
}

#[cfg(not(target_os = "linux"))]
fn non_utf8_names() -> Vec<PathBuf> {
    Vec::new()
}

/// Unicode, spaces, punctuation and raw-byte names go through discovery, mapping and encode unchanged
#[tokio::test]
async fn test_unusual_names_convert_end_to_end() {
    let fixture = TestFixture::new();
    let mut names = vec![
        PathBuf::from("Björk/Homogenic (1997)/01 - Hunter.flac"),
        PathBuf::from("日本語/曲 #1.wav"),
        PathBuf::from("Artist's Name/it's a [test] & more.flac"),
    ];
    names.extend(non_utf8_names());
    for (i, name) in names.iter().enumerate() {
        fixture.create_source_file(name, &TestFixture::audio_bytes(i as u8 + 1));
    }
    let codec = FakeCodec::new();

    let outcome = run(fixture.config(), codec.clone()).await;

    assert_eq!(outcome.summary().total_discovered, names.len());
    assert_eq!(outcome.summary().files_converted, names.len());
    for name in &names {
        let target = fixture.target_for(name);
        assert!(FakeCodec::is_valid_output(&fs::read(&target).unwrap()), "missing {}", target.display());
        assert_eq!(mtime(&target), mtime(&fixture.source_root.join(name)));
    }
    assert_eq!(fixture.target_files().len(), names.len());

    let mut encoded = codec.encoded_sources.lock().unwrap().clone();
    encoded.sort();
    let mut expected: Vec<PathBuf> = names.iter().map(|n| fixture.source_root.join(n)).collect();
    expected.sort();
    assert_eq!(encoded, expected);
}
