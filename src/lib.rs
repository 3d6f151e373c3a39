//! Estimate block-level deduplication and compression savings for a directory tree.
//!
//! Every regular file is split into fixed-size blocks; each block is compressed,
//! fingerprinted and tested against a shared index, and the results are tallied
//! under four schemes: raw, compressed, deduplicated, and deduplicated then
//! compressed. Nothing under the scanned tree is ever written.
//!
//! ```no_run
//! use blockdedup::{Config, Scanner};
//!
//! let mut scanner = Scanner::new(Config::new("/srv/data"))?;
//! let totals = scanner.run();
//! println!("dedup ratio {:.2}", totals.dedup_ratio());
//! # Ok::<(), blockdedup::Error>(())
//! ```

pub mod buffer;
pub mod codec;
pub mod config;
pub mod counters;
pub mod error;
mod file;
pub mod index;
pub mod scanner;
pub mod show;
mod walk;

pub use codec::{BlockCodec, BlockDigest, Fingerprint};
pub use config::{CompressionAlgorithm, Config, FingerprintAlgorithm, IndexBackend};
pub use counters::{Counters, CountersSnapshot};
pub use error::{ConfigError, Error, FileError, IndexError, Result};
pub use index::{FingerprintIndex, IndexSet, JournalIndex, MemoryIndex};
pub use scanner::{CancelHandle, Scanner};

#[cfg(feature = "python")]
mod python {
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    use crate::{Config, Error, Scanner};

    fn to_py_err(err: Error) -> PyErr {
        match err {
            Error::Config(e) => PyValueError::new_err(e.to_string()),
            other => PyRuntimeError::new_err(other.to_string()),
        }
    }

    /// Scan `path` and return (input, compressed, dedup, dedup+compressed) byte totals.
    #[pyfunction]
    #[pyo3(signature = (path, block_size=4096, threads=None, compression="lz4", hash="blake3"))]
    fn estimate(
        py: Python<'_>,
        path: String,
        block_size: usize,
        threads: Option<usize>,
        compression: &str,
        hash: &str,
    ) -> PyResult<(u64, u64, u64, u64)> {
        let mut config = Config::new(path);
        config.block_size = block_size;
        if let Some(threads) = threads {
            config.parallelism = threads;
        }
        config.compression = compression
            .parse()
            .map_err(|e: crate::ConfigError| PyValueError::new_err(e.to_string()))?;
        config.hash = hash
            .parse()
            .map_err(|e: crate::ConfigError| PyValueError::new_err(e.to_string()))?;

        let mut scanner = Scanner::new(config).map_err(to_py_err)?;
        let totals = py.allow_threads(move || scanner.run());
        Ok((
            totals.input_bytes,
            totals.compressed_bytes,
            totals.dedup_bytes,
            totals.dedup_compressed_bytes,
        ))
    }

    #[pymodule]
    fn blockdedup(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(estimate, m)?)?;
        Ok(())
    }
}
