//! Error types for the block deduplication estimator

use std::io;
use std::path::PathBuf;

use crate::config::FingerprintAlgorithm;

pub type Result<T> = std::result::Result<T, Error>;

/// Startup configuration problems. Always fatal, raised before any scanning.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid block size {0}: must be between 1 and {max} bytes", max = crate::config::MAX_BLOCK_SIZE)]
    InvalidBlockSize(usize),
    #[error("parallelism must be at least 1")]
    InvalidParallelism,
    #[error("unknown index backend: {0}")]
    UnknownBackend(String),
    #[error("unknown fingerprint algorithm: {0}")]
    UnknownHash(String),
    #[error("unknown compression: {0}")]
    UnknownCompression(String),
    #[error("invalid zstd level {0}: must be between -7 and 22")]
    InvalidZstdLevel(i32),
    #[error("audit hash must differ from the primary hash ({0})")]
    DuplicateAuditHash(FingerprintAlgorithm),
    #[error("root {0} is not a readable directory")]
    InvalidRoot(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("index I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("corrupted index {path} at offset {offset}")]
    Corrupted {
        path: PathBuf,
        offset: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("compression failed: {0}")]
    CompressionFailed(String),
}

/// Reasons a single file stops being processed. Never fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A short read was followed by more data, so the file changed under us
    #[error("truncated read at offset {offset}: got {read} bytes, more data followed")]
    Truncated {
        offset: u64,
        read: usize,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Top-level error returned while building a scanner.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open fingerprint index: {0}")]
    Index(#[from] IndexError),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
