//! Scan driver: owns the worker pool and the state every task shares.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{info, warn};

use crate::buffer::BufferPool;
use crate::codec::{BlockCodec, CodecScratch};
use crate::config::Config;
use crate::counters::{Counters, CountersSnapshot};
use crate::error::Result;
use crate::index::IndexSet;
use crate::walk;

/// Blocks of one read chunk are split into at most this many jobs per worker.
pub const FANOUT_PER_WORKER: usize = 4;

/// Requests a graceful stop: no new entries are scheduled, in-flight files drain.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear the flag, returning whether it was set.
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

/// Everything a walk or file task borrows for the duration of a run.
pub(crate) struct ScanContext {
    pub(crate) config: Config,
    pub(crate) codec: BlockCodec,
    pub(crate) indices: IndexSet,
    pub(crate) counters: Arc<Counters>,
    pub(crate) read_buffers: BufferPool<Vec<u8>>,
    pub(crate) scratch: BufferPool<CodecScratch>,
    pub(crate) cancel: CancelHandle,
}

impl ScanContext {
    pub(crate) fn new(config: Config, indices: IndexSet) -> Self {
        let codec = BlockCodec::from_config(&config);
        let chunk_size = config.read_chunk_size();
        let block_size = config.block_size;

        Self {
            read_buffers: BufferPool::new(config.parallelism, move || vec![0u8; chunk_size]),
            scratch: BufferPool::new(config.parallelism, move || codec.scratch(block_size)),
            codec,
            indices,
            counters: Arc::new(Counters::new()),
            cancel: CancelHandle::default(),
            config,
        }
    }
}

/// Estimates dedup and compression savings for one directory tree.
pub struct Scanner {
    ctx: ScanContext,
    pool: ThreadPool,
}

impl Scanner {
    /// Validate `config`, open its indices and start the worker pool.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let indices = IndexSet::open(&config)?;
        Self::with_indices(config, indices)
    }

    /// Like [`Scanner::new`] but with caller-supplied index backends.
    pub fn with_indices(config: Config, indices: IndexSet) -> Result<Self> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.parallelism)
            .thread_name(|index| format!("blockdedup-{index}"))
            .build()?;

        Ok(Self {
            ctx: ScanContext::new(config, indices),
            pool,
        })
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    /// Live counters, safe to read while [`Scanner::run`] is in progress.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.ctx.counters)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.ctx.cancel.clone()
    }

    /// Walk the configured root to completion and return this run's counters.
    ///
    /// Counters start from zero on every call while the indices persist, so a
    /// second run over the same tree finds every block already seen. A cancel
    /// request ends only the run in progress (or the next one, if issued before
    /// it starts).
    pub fn run(&mut self) -> CountersSnapshot {
        self.ctx.counters.reset();
        let config = &self.ctx.config;
        info!(
            root = %config.root.display(),
            block_size = config.block_size,
            threads = config.parallelism,
            hash = %config.hash,
            compression = %config.compression,
            index = %config.index,
            "starting scan"
        );

        let root: &Path = &config.root;
        self.pool.install(|| walk::walk_dir(&self.ctx, root));
        self.ctx.indices.flush();
        if self.ctx.cancel.take() {
            warn!("scan cancelled, totals cover only the files already scheduled");
        }

        let snapshot = self.ctx.counters.snapshot();
        info!(
            files = snapshot.processed_files,
            faulted = snapshot.faulted_files,
            input_bytes = snapshot.input_bytes,
            dedup_bytes = snapshot.dedup_bytes,
            "scan finished"
        );
        snapshot
    }
}
