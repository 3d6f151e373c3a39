//! Per-block compression and fingerprinting.
//!
//! A block goes in, a [`BlockDigest`] comes out: its raw and compressed lengths plus
//! the digests the indices need. Compressed bytes live only in the caller's
//! [`CodecScratch`] and are dropped once measured and (optionally) fingerprinted.

use std::fmt;

use sha2::{Digest, Sha256};
use xxhash_rust::xxh3::{xxh3_128, xxh3_64};

use crate::config::{CompressionAlgorithm, FingerprintAlgorithm};
use crate::error::CodecError;

pub const MAX_DIGEST_LEN: usize = 32;

/// Fixed-capacity digest identifying a block's content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    len: u8,
    bytes: [u8; MAX_DIGEST_LEN],
}

impl Fingerprint {
    /// Wrap raw digest bytes. Panics if longer than [`MAX_DIGEST_LEN`].
    pub fn from_slice(digest: &[u8]) -> Self {
        assert!(digest.len() <= MAX_DIGEST_LEN, "digest too long: {}", digest.len());
        let mut bytes = [0u8; MAX_DIGEST_LEN];
        bytes[..digest.len()].copy_from_slice(digest);
        Self {
            len: digest.len() as u8,
            bytes,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn to_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FingerprintAlgorithm {
    pub fn digest_len(self) -> usize {
        match self {
            FingerprintAlgorithm::Xxh3_64 => 8,
            FingerprintAlgorithm::Xxh3_128 => 16,
            FingerprintAlgorithm::Blake3 | FingerprintAlgorithm::Sha256 => 32,
        }
    }

    pub fn fingerprint(self, data: &[u8]) -> Fingerprint {
        match self {
            FingerprintAlgorithm::Xxh3_64 => Fingerprint::from_slice(&xxh3_64(data).to_be_bytes()),
            FingerprintAlgorithm::Xxh3_128 => {
                Fingerprint::from_slice(&xxh3_128(data).to_be_bytes())
            }
            FingerprintAlgorithm::Blake3 => Fingerprint::from_slice(blake3::hash(data).as_bytes()),
            FingerprintAlgorithm::Sha256 => Fingerprint::from_slice(&Sha256::digest(data)),
        }
    }
}

/// Worst-case compressed size of a `len`-byte block.
pub fn max_compressed_len(algo: CompressionAlgorithm, len: usize) -> usize {
    match algo {
        CompressionAlgorithm::None => 0,
        CompressionAlgorithm::Lz4 => lz4_flex::block::get_maximum_output_size(len),
        CompressionAlgorithm::Zstd { .. } => zstd::zstd_safe::compress_bound(len),
    }
}

/// Reusable per-worker compression state.
pub struct CodecScratch {
    compressed: Vec<u8>,
    zstd: Option<zstd::bulk::Compressor<'static>>,
}

impl CodecScratch {
    pub fn new(algo: CompressionAlgorithm, block_size: usize) -> Self {
        Self {
            compressed: vec![0u8; max_compressed_len(algo, block_size)],
            zstd: None,
        }
    }
}

/// What one block contributes to the indices and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDigest {
    pub raw_len: usize,
    pub compressed_len: usize,
    /// Primary digest of the raw bytes
    pub fingerprint: Fingerprint,
    /// Second-family digest of the raw bytes, when auditing
    pub audit: Option<Fingerprint>,
    /// Primary digest of the compressed bytes, when tracking compressed identity
    pub compressed: Option<Fingerprint>,
}

/// Pure block -> digest function configured once per run.
#[derive(Debug, Clone, Copy)]
pub struct BlockCodec {
    compression: CompressionAlgorithm,
    hash: FingerprintAlgorithm,
    audit_hash: Option<FingerprintAlgorithm>,
    track_compressed: bool,
}

impl BlockCodec {
    pub fn new(
        compression: CompressionAlgorithm,
        hash: FingerprintAlgorithm,
        audit_hash: Option<FingerprintAlgorithm>,
        track_compressed: bool,
    ) -> Self {
        Self {
            compression,
            hash,
            audit_hash,
            track_compressed: track_compressed && compression.is_enabled(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.compression,
            config.hash,
            config.audit_hash,
            config.track_compressed_identity,
        )
    }

    pub fn compression(&self) -> CompressionAlgorithm {
        self.compression
    }

    pub fn scratch(&self, block_size: usize) -> CodecScratch {
        CodecScratch::new(self.compression, block_size)
    }

    pub fn encode(&self, block: &[u8], scratch: &mut CodecScratch) -> Result<BlockDigest, CodecError> {
        let compressed_len = self.compress(block, scratch)?;
        let compressed = if self.track_compressed {
            Some(self.hash.fingerprint(&scratch.compressed[..compressed_len]))
        } else {
            None
        };

        Ok(BlockDigest {
            raw_len: block.len(),
            compressed_len,
            fingerprint: self.hash.fingerprint(block),
            audit: self.audit_hash.map(|algo| algo.fingerprint(block)),
            compressed,
        })
    }

    /// Compress into the scratch buffer and return the compressed length.
    fn compress(&self, block: &[u8], scratch: &mut CodecScratch) -> Result<usize, CodecError> {
        let needed = max_compressed_len(self.compression, block.len());
        if scratch.compressed.len() < needed {
            scratch.compressed.resize(needed, 0);
        }

        match self.compression {
            CompressionAlgorithm::None => Ok(block.len()),
            CompressionAlgorithm::Lz4 => {
                lz4_flex::block::compress_into(block, &mut scratch.compressed)
                    .map_err(|e| CodecError::CompressionFailed(e.to_string()))
            }
            CompressionAlgorithm::Zstd { level } => {
                if scratch.zstd.is_none() {
                    let compressor = zstd::bulk::Compressor::new(level)
                        .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
                    scratch.zstd = Some(compressor);
                }
                match scratch.zstd.as_mut() {
                    Some(compressor) => compressor
                        .compress_to_buffer(block, &mut scratch.compressed[..])
                        .map_err(|e| CodecError::CompressionFailed(e.to_string())),
                    None => Err(CodecError::CompressionFailed(
                        "zstd compressor unavailable".to_string(),
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn codec(compression: CompressionAlgorithm) -> BlockCodec {
        BlockCodec::new(compression, FingerprintAlgorithm::Blake3, None, true)
    }

    fn pattern(len: usize, seed: u32) -> Vec<u8> {
        (0..len as u32)
            .map(|i| (i.wrapping_mul(2654435761).wrapping_add(seed) >> 13) as u8)
            .collect()
    }

    #[test]
    fn digest_lengths_match_family() {
        for algo in [
            FingerprintAlgorithm::Xxh3_64,
            FingerprintAlgorithm::Xxh3_128,
            FingerprintAlgorithm::Blake3,
            FingerprintAlgorithm::Sha256,
        ] {
            assert_eq!(algo.fingerprint(b"block").as_bytes().len(), algo.digest_len());
        }
    }

    #[test]
    fn different_families_disagree() {
        let a = FingerprintAlgorithm::Blake3.fingerprint(b"same bytes");
        let b = FingerprintAlgorithm::Sha256.fingerprint(b"same bytes");
        assert_ne!(a, b);
    }

    #[test]
    fn uncompressed_length_equals_raw() {
        let codec = codec(CompressionAlgorithm::None);
        let mut scratch = codec.scratch(4096);
        let digest = codec.encode(&pattern(4096, 1), &mut scratch).unwrap();
        assert_eq!(digest.compressed_len, 4096);
        assert_eq!(digest.raw_len, 4096);
        assert!(digest.compressed.is_none());
    }

    #[test]
    fn zeros_compress_well() {
        for algo in [CompressionAlgorithm::Lz4, CompressionAlgorithm::Zstd { level: 3 }] {
            let codec = codec(algo);
            let mut scratch = codec.scratch(4096);
            let digest = codec.encode(&[0u8; 4096], &mut scratch).unwrap();
            assert!(digest.compressed_len < 4096 / 4, "{algo}: {}", digest.compressed_len);
            assert!(digest.compressed.is_some());
        }
    }

    #[test]
    fn lz4_length_matches_block_api() {
        let data = pattern(4096, 7);
        let codec = codec(CompressionAlgorithm::Lz4);
        let mut scratch = codec.scratch(4096);
        let digest = codec.encode(&data, &mut scratch).unwrap();
        assert_eq!(digest.compressed_len, lz4_flex::block::compress(&data).len());
    }

    #[test]
    fn scratch_grows_for_oversized_blocks() {
        let codec = codec(CompressionAlgorithm::Lz4);
        let mut scratch = codec.scratch(16);
        let digest = codec.encode(&pattern(8192, 3), &mut scratch).unwrap();
        assert_eq!(digest.raw_len, 8192);
    }

    #[test]
    fn audit_digest_present_when_enabled() {
        let codec = BlockCodec::new(
            CompressionAlgorithm::Lz4,
            FingerprintAlgorithm::Sha256,
            Some(FingerprintAlgorithm::Xxh3_64),
            false,
        );
        let mut scratch = codec.scratch(64);
        let digest = codec.encode(b"some block", &mut scratch).unwrap();
        assert_eq!(digest.audit, Some(FingerprintAlgorithm::Xxh3_64.fingerprint(b"some block")));
        assert!(digest.compressed.is_none());
    }

    #[test]
    fn short_block_is_encoded_as_is() {
        let codec = codec(CompressionAlgorithm::Lz4);
        let mut scratch = codec.scratch(4096);
        let digest = codec.encode(&pattern(1808, 9), &mut scratch).unwrap();
        assert_eq!(digest.raw_len, 1808);
    }

    proptest! {
        #[test]
        fn prop_encode_is_deterministic(data in prop::collection::vec(0u8..=255, 1..8192)) {
            let codec = codec(CompressionAlgorithm::Lz4);
            let mut first = codec.scratch(4096);
            let mut second = codec.scratch(4096);
            prop_assert_eq!(
                codec.encode(&data, &mut first).unwrap(),
                codec.encode(&data, &mut second).unwrap()
            );
        }
    }
}
