use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use blockdedup::show::{eta, progress_line, write_report};
use blockdedup::{CompressionAlgorithm, Config, Counters, FingerprintAlgorithm, IndexBackend, Scanner};
use clap::Parser;
use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Estimate how much space block-level dedup and compression would save.
#[derive(Debug, Parser)]
#[command(name = "blockdedup", version, about)]
struct Args {
    /// Directory tree to analyze.
    #[arg(value_name = "PATH", default_value = ".")]
    root: PathBuf,

    /// Block size in bytes.
    #[arg(short = 'b', long, value_name = "BYTES", default_value_t = blockdedup::config::DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Number of worker threads.
    #[arg(short = 'j', long, value_name = "THREADS")]
    jobs: Option<usize>,

    /// Fingerprint index backend: memory, journal or journal:<dir>.
    #[arg(long, default_value = "memory")]
    index: IndexBackend,

    /// Fingerprint algorithm: xxh3-64, xxh3-128, blake3, sha256.
    #[arg(long, default_value = "blake3")]
    hash: FingerprintAlgorithm,

    /// Second fingerprint algorithm to cross-check for collisions.
    #[arg(long, value_name = "HASH")]
    audit_hash: Option<FingerprintAlgorithm>,

    /// Block compression: none, lz4, zstd or zstd:<level>.
    #[arg(long, default_value = "lz4")]
    compression: CompressionAlgorithm,

    /// Skip the compress-then-dedup accounting and its index.
    #[arg(long)]
    no_compressed_identity: bool,

    /// Process each read chunk on one thread instead of fanning blocks out.
    #[arg(long)]
    no_block_split: bool,

    /// Seconds between progress updates.
    #[arg(long, value_name = "SECS", default_value_t = 1)]
    poll_interval: u64,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.root);
        config.block_size = self.block_size;
        if let Some(jobs) = self.jobs {
            config.parallelism = jobs;
        }
        config.index = self.index;
        config.hash = self.hash;
        config.audit_hash = self.audit_hash;
        config.compression = self.compression;
        config.track_compressed_identity = !self.no_compressed_identity;
        config.split_blocks = !self.no_block_split;
        config
    }
}

struct ProgressReporter {
    stop: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl ProgressReporter {
    fn start(counters: Arc<Counters>, started: Instant, interval: Duration) -> Result<Self> {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        bar.set_style(
            ProgressStyle::with_template("{bar:30} {percent:>3}% {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let (stop, ticks) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("blockdedup-progress".to_string())
            .spawn(move || loop {
                let snapshot = counters.snapshot();
                let elapsed = started.elapsed();
                bar.set_length(snapshot.queued_bytes);
                bar.set_position(snapshot.input_bytes);
                let mut message = progress_line(&snapshot, elapsed);
                if let Some(left) = eta(&snapshot, elapsed) {
                    message.push_str(&format!(", ETA {}", HumanDuration(left)));
                }
                bar.set_message(message);

                match ticks.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        bar.finish_and_clear();
                        break;
                    }
                }
            })
            .context("failed to start progress thread")?;

        Ok(Self { stop, handle })
    }

    fn finish(self) {
        let _ = self.stop.send(());
        let _ = self.handle.join();
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let poll_interval = Duration::from_secs(args.poll_interval.max(1));
    let show_progress = !args.no_progress;
    let config = args.into_config();

    let mut scanner = Scanner::new(config.clone())
        .with_context(|| format!("cannot scan {}", config.root.display()))?;

    let cancel = scanner.cancel_handle();
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            std::process::exit(130);
        }
        eprintln!("Interrupted, finishing files in flight (Ctrl-C again to abort)");
        cancel.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    eprintln!(
        "Running with {} threads, {}-byte blocks",
        config.parallelism, config.block_size
    );

    let started = Instant::now();
    let progress = if show_progress {
        Some(ProgressReporter::start(scanner.counters(), started, poll_interval)?)
    } else {
        None
    };

    let totals = scanner.run();
    if let Some(progress) = progress {
        progress.finish();
    }

    let mut stderr = io::stderr().lock();
    write_report(&mut stderr, &totals, scanner.config(), started.elapsed())
        .context("failed to write report")?;
    Ok(())
}
