//! Shared accumulators for a run.
//!
//! Every task adds to these with relaxed atomics; nothing reads them to make a
//! decision. Readers take a [`CountersSnapshot`] at any time, which may be slightly
//! stale but never goes backwards.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::codec::BlockDigest;
use crate::index::{Collision, Novelty};

#[derive(Debug, Default)]
pub struct Counters {
    queued_files: AtomicU64,
    queued_bytes: AtomicU64,
    queued_dirs: AtomicU64,
    processed_files: AtomicU64,
    processed_dirs: AtomicU64,
    faulted_files: AtomicU64,
    failed_dirs: AtomicU64,
    blocks: AtomicU64,
    input_bytes: AtomicU64,
    compressed_bytes: AtomicU64,
    dedup_bytes: AtomicU64,
    dedup_compressed_bytes: AtomicU64,
    compressed_dedup_bytes: AtomicU64,
    collisions_primary: AtomicU64,
    collisions_audit: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_queued(&self, size: u64) {
        self.queued_files.fetch_add(1, Ordering::Relaxed);
        self.queued_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn dir_queued(&self) {
        self.queued_dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_processed(&self) {
        self.processed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_faulted(&self) {
        self.faulted_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dir_processed(&self) {
        self.processed_dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dir_failed(&self) {
        self.failed_dirs.fetch_add(1, Ordering::Relaxed);
    }

    /// Account one block under every axis.
    pub fn block(&self, digest: &BlockDigest, novelty: &Novelty) {
        let raw = digest.raw_len as u64;
        let compressed = digest.compressed_len as u64;

        self.blocks.fetch_add(1, Ordering::Relaxed);
        self.input_bytes.fetch_add(raw, Ordering::Relaxed);
        self.compressed_bytes.fetch_add(compressed, Ordering::Relaxed);
        if novelty.raw {
            self.dedup_bytes.fetch_add(raw, Ordering::Relaxed);
            self.dedup_compressed_bytes.fetch_add(compressed, Ordering::Relaxed);
        }
        if novelty.compressed {
            self.compressed_dedup_bytes.fetch_add(compressed, Ordering::Relaxed);
        }
        match novelty.collision {
            Some(Collision::Primary) => {
                self.collisions_primary.fetch_add(1, Ordering::Relaxed);
            }
            Some(Collision::Audit) => {
                self.collisions_audit.fetch_add(1, Ordering::Relaxed);
            }
            None => {}
        }
    }

    /// Zero every accumulator. Only called between runs, while no task is live.
    pub(crate) fn reset(&self) {
        for counter in [
            &self.queued_files,
            &self.queued_bytes,
            &self.queued_dirs,
            &self.processed_files,
            &self.processed_dirs,
            &self.faulted_files,
            &self.failed_dirs,
            &self.blocks,
            &self.input_bytes,
            &self.compressed_bytes,
            &self.dedup_bytes,
            &self.dedup_compressed_bytes,
            &self.compressed_dedup_bytes,
            &self.collisions_primary,
            &self.collisions_audit,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            queued_files: self.queued_files.load(Ordering::Relaxed),
            queued_bytes: self.queued_bytes.load(Ordering::Relaxed),
            queued_dirs: self.queued_dirs.load(Ordering::Relaxed),
            processed_files: self.processed_files.load(Ordering::Relaxed),
            processed_dirs: self.processed_dirs.load(Ordering::Relaxed),
            faulted_files: self.faulted_files.load(Ordering::Relaxed),
            failed_dirs: self.failed_dirs.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            input_bytes: self.input_bytes.load(Ordering::Relaxed),
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
            dedup_bytes: self.dedup_bytes.load(Ordering::Relaxed),
            dedup_compressed_bytes: self.dedup_compressed_bytes.load(Ordering::Relaxed),
            compressed_dedup_bytes: self.compressed_dedup_bytes.load(Ordering::Relaxed),
            collisions_primary: self.collisions_primary.load(Ordering::Relaxed),
            collisions_audit: self.collisions_audit.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub queued_files: u64,
    pub queued_bytes: u64,
    pub queued_dirs: u64,
    pub processed_files: u64,
    pub processed_dirs: u64,
    pub faulted_files: u64,
    pub failed_dirs: u64,
    pub blocks: u64,
    /// Raw bytes read
    pub input_bytes: u64,
    /// Block-compressed size of everything read
    pub compressed_bytes: u64,
    /// Raw bytes of first-seen blocks
    pub dedup_bytes: u64,
    /// Compressed bytes of first-seen blocks
    pub dedup_compressed_bytes: u64,
    /// Compressed bytes of first-seen compressed blocks
    pub compressed_dedup_bytes: u64,
    pub collisions_primary: u64,
    pub collisions_audit: u64,
}

fn ratio(input: u64, output: u64) -> f64 {
    if output == 0 {
        1.0
    } else {
        input as f64 / output as f64
    }
}

impl CountersSnapshot {
    pub fn compress_ratio(&self) -> f64 {
        ratio(self.input_bytes, self.compressed_bytes)
    }

    pub fn dedup_ratio(&self) -> f64 {
        ratio(self.input_bytes, self.dedup_bytes)
    }

    pub fn dedup_compress_ratio(&self) -> f64 {
        ratio(self.input_bytes, self.dedup_compressed_bytes)
    }

    pub fn compress_dedup_ratio(&self) -> f64 {
        ratio(self.input_bytes, self.compressed_dedup_bytes)
    }

    /// Fraction of queued bytes read so far, in `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.queued_bytes == 0 {
            return 1.0;
        }
        (self.input_bytes as f64 / self.queued_bytes as f64).min(1.0)
    }
}
