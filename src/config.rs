//! Run configuration, parsed and validated once at startup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;
pub const DEFAULT_INDEX_DIR: &str = "dedup-index";
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Upper bound for one read syscall; chunks are the largest block multiple below it.
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FingerprintAlgorithm {
    Xxh3_64,
    Xxh3_128,
    #[default]
    Blake3,
    Sha256,
}

impl FingerprintAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            FingerprintAlgorithm::Xxh3_64 => "xxh3-64",
            FingerprintAlgorithm::Xxh3_128 => "xxh3-128",
            FingerprintAlgorithm::Blake3 => "blake3",
            FingerprintAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for FingerprintAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FingerprintAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xxh3-64" | "xxh3" => Ok(FingerprintAlgorithm::Xxh3_64),
            "xxh3-128" => Ok(FingerprintAlgorithm::Xxh3_128),
            "blake3" => Ok(FingerprintAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(FingerprintAlgorithm::Sha256),
            other => Err(ConfigError::UnknownHash(other.to_string())),
        }
    }
}

/// Block compressor used for the compressed accounting axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// Compression accounting disabled; compressed length equals raw length
    None,
    #[default]
    Lz4,
    Zstd { level: i32 },
}

impl CompressionAlgorithm {
    pub fn is_enabled(self) -> bool {
        !matches!(self, CompressionAlgorithm::None)
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => f.write_str("none"),
            CompressionAlgorithm::Lz4 => f.write_str("lz4"),
            CompressionAlgorithm::Zstd { level } => write!(f, "zstd:{level}"),
        }
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        let (name, arg) = match lower.split_once(':') {
            Some((name, arg)) => (name, Some(arg)),
            None => (lower.as_str(), None),
        };
        match (name, arg) {
            ("none" | "uncompressed", None) => Ok(CompressionAlgorithm::None),
            ("lz4", None) => Ok(CompressionAlgorithm::Lz4),
            ("zstd", None) => Ok(CompressionAlgorithm::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            ("zstd", Some(level)) => level
                .parse()
                .map(|level| CompressionAlgorithm::Zstd { level })
                .map_err(|_| ConfigError::UnknownCompression(s.to_string())),
            _ => Err(ConfigError::UnknownCompression(s.to_string())),
        }
    }
}

/// Where fingerprints are remembered during a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IndexBackend {
    #[default]
    Memory,
    /// In-memory set mirrored to an append-only journal under `dir`
    Journal { dir: PathBuf },
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexBackend::Memory => f.write_str("memory"),
            IndexBackend::Journal { dir } => write!(f, "journal:{}", dir.display()),
        }
    }
}

impl FromStr for IndexBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, location) = match s.split_once(':') {
            Some((name, location)) => (name, Some(location)),
            None => (s, None),
        };
        match (name.to_lowercase().as_str(), location) {
            ("memory" | "inmemory", None) => Ok(IndexBackend::Memory),
            ("journal", None) => Ok(IndexBackend::Journal {
                dir: PathBuf::from(DEFAULT_INDEX_DIR),
            }),
            ("journal", Some(dir)) if !dir.is_empty() => Ok(IndexBackend::Journal {
                dir: PathBuf::from(dir),
            }),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

/// Immutable settings for one scan. Built once, shared by reference with every task.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub block_size: usize,
    pub parallelism: usize,
    pub index: IndexBackend,
    pub hash: FingerprintAlgorithm,
    /// Second digest family for collision auditing; `None` disables the audit.
    pub audit_hash: Option<FingerprintAlgorithm>,
    pub compression: CompressionAlgorithm,
    /// Keep a second index keyed by the digest of the compressed bytes.
    pub track_compressed_identity: bool,
    /// Fan block work within a read chunk out to the pool.
    pub split_blocks: bool,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            block_size: DEFAULT_BLOCK_SIZE,
            parallelism: num_cpus::get().max(1),
            index: IndexBackend::default(),
            hash: FingerprintAlgorithm::default(),
            audit_hash: None,
            compression: CompressionAlgorithm::default(),
            track_compressed_identity: true,
            split_blocks: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::InvalidBlockSize(self.block_size));
        }
        if self.parallelism == 0 {
            return Err(ConfigError::InvalidParallelism);
        }
        if let CompressionAlgorithm::Zstd { level } = self.compression {
            if !(-7..=22).contains(&level) {
                return Err(ConfigError::InvalidZstdLevel(level));
            }
        }
        if self.audit_hash == Some(self.hash) {
            return Err(ConfigError::DuplicateAuditHash(self.hash));
        }
        if !is_directory(&self.root) {
            return Err(ConfigError::InvalidRoot(self.root.clone()));
        }
        Ok(())
    }

    /// Bytes requested per read: whole blocks, at most [`READ_BUFFER_SIZE`] unless a
    /// single block is larger.
    pub fn read_chunk_size(&self) -> usize {
        (READ_BUFFER_SIZE / self.block_size).max(1) * self.block_size
    }

    /// Whether the compressed-identity index is maintained for this run.
    pub fn compressed_identity_enabled(&self) -> bool {
        self.track_compressed_identity && self.compression.is_enabled()
    }
}

fn is_directory(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hash_names() {
        assert_eq!("blake3".parse::<FingerprintAlgorithm>().unwrap(), FingerprintAlgorithm::Blake3);
        assert_eq!("SHA-256".parse::<FingerprintAlgorithm>().unwrap(), FingerprintAlgorithm::Sha256);
        assert_eq!("xxh3".parse::<FingerprintAlgorithm>().unwrap(), FingerprintAlgorithm::Xxh3_64);
        assert!(matches!(
            "md5".parse::<FingerprintAlgorithm>(),
            Err(ConfigError::UnknownHash(_))
        ));
    }

    #[test]
    fn parses_compression_names() {
        assert_eq!("lz4".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::Lz4);
        assert_eq!("none".parse::<CompressionAlgorithm>().unwrap(), CompressionAlgorithm::None);
        assert_eq!(
            "zstd".parse::<CompressionAlgorithm>().unwrap(),
            CompressionAlgorithm::Zstd { level: DEFAULT_ZSTD_LEVEL }
        );
        assert_eq!(
            "zstd:9".parse::<CompressionAlgorithm>().unwrap(),
            CompressionAlgorithm::Zstd { level: 9 }
        );
        assert!("zstd:x".parse::<CompressionAlgorithm>().is_err());
        assert!("gzip".parse::<CompressionAlgorithm>().is_err());
    }

    #[test]
    fn parses_index_backends() {
        assert_eq!("memory".parse::<IndexBackend>().unwrap(), IndexBackend::Memory);
        assert_eq!(
            "journal".parse::<IndexBackend>().unwrap(),
            IndexBackend::Journal { dir: PathBuf::from(DEFAULT_INDEX_DIR) }
        );
        assert_eq!(
            "journal:/tmp/idx".parse::<IndexBackend>().unwrap(),
            IndexBackend::Journal { dir: PathBuf::from("/tmp/idx") }
        );
        assert!(matches!(
            "berkeley".parse::<IndexBackend>(),
            Err(ConfigError::UnknownBackend(_))
        ));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for algo in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Zstd { level: 7 },
        ] {
            assert_eq!(algo.to_string().parse::<CompressionAlgorithm>().unwrap(), algo);
        }
    }

    #[test]
    fn read_chunk_is_block_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        config.block_size = 4096;
        assert_eq!(config.read_chunk_size(), READ_BUFFER_SIZE);
        config.block_size = 3000;
        assert_eq!(config.read_chunk_size() % 3000, 0);
        assert!(config.read_chunk_size() <= READ_BUFFER_SIZE);
        config.block_size = 4 * READ_BUFFER_SIZE;
        assert_eq!(config.read_chunk_size(), 4 * READ_BUFFER_SIZE);
    }

    #[test]
    fn validate_rejects_bad_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::new(dir.path());
        assert!(config.validate().is_ok());

        config.block_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBlockSize(0))));
        config.block_size = DEFAULT_BLOCK_SIZE;

        config.parallelism = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidParallelism)));
        config.parallelism = 2;

        config.audit_hash = Some(config.hash);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateAuditHash(_))));
        config.audit_hash = Some(FingerprintAlgorithm::Xxh3_64);

        config.compression = CompressionAlgorithm::Zstd { level: 40 };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidZstdLevel(40))));
        config.compression = CompressionAlgorithm::Lz4;

        config.root = dir.path().join("missing");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRoot(_))));
    }

    #[test]
    fn compressed_identity_needs_compression() {
        let mut config = Config::new(".");
        assert!(config.compressed_identity_enabled());
        config.compression = CompressionAlgorithm::None;
        assert!(!config.compressed_identity_enabled());
    }
}
