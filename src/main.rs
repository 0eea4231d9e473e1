use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use mp3batch::config::{normalize_formats, DEFAULT_BITRATE};
use mp3batch::controller::{exit_code, EXIT_FATAL, EXIT_SUCCESS};
use mp3batch::{FfmpegEngine, RunConfig, RunController, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "convert")]
#[command(about = "Convert a music library to MP3, mirroring the directory tree")]
#[command(version)]
struct Args {
    /// Directory tree of source audio files
    source_dir: PathBuf,

    /// Directory that receives the mirrored MP3 tree
    target_dir: PathBuf,

    /// Output bitrate, e.g. "256k"
    #[arg(short, long, value_name = "RATE", default_value = DEFAULT_BITRATE)]
    bitrate: String,

    /// Worker count (default: host core count)
    #[arg(short, long, value_name = "NUM")]
    jobs: Option<usize>,

    /// Append a timestamped log to FILE
    #[arg(short, long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Write the log file as JSON lines
    #[arg(long, requires = "log")]
    log_json: bool,

    /// Plan only; write nothing under the target directory
    #[arg(short, long)]
    dry_run: bool,

    /// Validate existing outputs instead of skipping them unconditionally
    #[arg(short, long)]
    resume: bool,

    /// Print periodic progress snapshots
    #[arg(short, long)]
    verbose: bool,

    /// Check output size and duration after each encode
    #[arg(short, long)]
    quality_check: bool,

    /// Comma-separated input extensions (default: flac,wav,aiff,aif,ape,wv,m4a,ogg)
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    formats: Vec<String>,

    /// Write a JSON run summary to FILE
    #[arg(long, value_name = "FILE")]
    stats_out: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> RunConfig {
        let mut config = RunConfig::new(self.source_dir, self.target_dir);
        config.bitrate = self.bitrate;
        if let Some(jobs) = self.jobs {
            config.parallelism = jobs;
        }
        config.log_path = self.log;
        config.dry_run = self.dry_run;
        config.resume = self.resume;
        config.verbose = self.verbose;
        config.quality_check = self.quality_check;
        if !self.formats.is_empty() {
            config.input_formats = normalize_formats(&self.formats);
        }
        config.stats_out = self.stats_out;
        config
    }
}

/// Console logging on stderr plus an optional append-mode log file.
fn init_logging(verbose: bool, log_path: Option<&Path>, log_json: bool) -> Result<()> {
    let default_level = if verbose { "info" } else { "warn" };
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let file_layer = match log_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            let layer = if log_json { layer.json().boxed() } else { layer.boxed() };
            Some(layer.with_filter(LevelFilter::INFO))
        }
        None => None,
    };

    tracing_subscriber::registry().with(console).with(file_layer).try_init()?;
    Ok(())
}

/// Cancel the run on Ctrl-C (and SIGTERM on unix).
fn install_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        warn!("Interrupt received; stopping dispatch and cleaning up in-flight items");
        cancel.cancel();
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::from(EXIT_SUCCESS),
                _ => ExitCode::from(EXIT_FATAL),
            };
        }
    };

    if let Err(e) = init_logging(args.verbose, args.log.as_deref(), args.log_json) {
        eprintln!("Error: {e:#}");
        return ExitCode::from(EXIT_FATAL);
    }
    info!(?args, "Parsed CLI arguments");

    let config = args.into_config();
    let stats_out = config.stats_out.clone();
    let dry_run = config.dry_run;

    let cancel = CancellationToken::new();
    install_signal_handler(cancel.clone());

    println!("convert v{}", env!("CARGO_PKG_VERSION"));
    let mut controller = RunController::new(config, Arc::new(FfmpegEngine::with_defaults()), cancel);
    let result = controller.run().await;

    match &result {
        Ok(outcome) => {
            if dry_run {
                println!("Dry run: no files were written");
            }
            println!("{}", outcome.summary().render());
            if let RunOutcome::Cancelled(_) = outcome {
                eprintln!("Interrupted; re-run with --resume to continue");
            }
            if let Some(path) = stats_out {
                if let Err(e) = outcome.summary().write_json(&path).await {
                    warn!("Failed to write stats to {}: {:#}", path.display(), e);
                }
            }
        }
        Err(e) => eprintln!("Error: {e}"),
    }

    ExitCode::from(exit_code(&result))
}
