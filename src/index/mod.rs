//! Fingerprint indices: "have we seen this block before?"
//!
//! [`FingerprintIndex`] is the only capability the scan depends on. [`IndexSet`]
//! bundles the indices one run needs (raw identity, compressed identity, audit
//! family) and turns a [`BlockDigest`] into a [`Novelty`] verdict.

mod journal;
mod memory;

pub use journal::JournalIndex;
pub use memory::MemoryIndex;

use parking_lot::Mutex;
use tracing::warn;

use crate::codec::{BlockDigest, Fingerprint};
use crate::config::{Config, IndexBackend};
use crate::error::IndexError;

pub const RAW_INDEX_NAME: &str = "hashes-uncompressed";
pub const COMPRESSED_INDEX_NAME: &str = "hashes-compressed";
pub const AUDIT_INDEX_NAME: &str = "hashes-audit";

/// A grow-only set of fingerprints.
///
/// `add` must return `Ok(true)` for exactly one caller per fingerprint, however many
/// threads insert it concurrently. Backends must accept concurrent calls as soon as
/// they are constructed.
pub trait FingerprintIndex: Send + Sync {
    fn add(&self, fingerprint: &Fingerprint) -> Result<bool, IndexError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist buffered state. No-op for volatile backends.
    fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }
}

/// Build the backend named by `backend`, using `name` as its storage identifier.
pub fn open_index(backend: &IndexBackend, name: &str) -> Result<Box<dyn FingerprintIndex>, IndexError> {
    match backend {
        IndexBackend::Memory => Ok(Box::new(MemoryIndex::new())),
        IndexBackend::Journal { dir } => Ok(Box::new(JournalIndex::open(dir, name)?)),
    }
}

/// Which digest family collided in the audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collision {
    Primary,
    Audit,
}

/// Verdict for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Novelty {
    /// First occurrence of these raw bytes
    pub raw: bool,
    /// First occurrence of these compressed bytes
    pub compressed: bool,
    pub collision: Option<Collision>,
}

struct AuditPair {
    index: Box<dyn FingerprintIndex>,
    // Both inserts of a pair happen under this guard, so racing tasks with the
    // same bytes cannot interleave into a false disagreement.
    guard: Mutex<()>,
}

/// All indices used by one run.
pub struct IndexSet {
    raw: Box<dyn FingerprintIndex>,
    compressed: Option<Box<dyn FingerprintIndex>>,
    audit: Option<AuditPair>,
}

impl IndexSet {
    pub fn new(raw: Box<dyn FingerprintIndex>) -> Self {
        Self {
            raw,
            compressed: None,
            audit: None,
        }
    }

    pub fn with_compressed(mut self, index: Box<dyn FingerprintIndex>) -> Self {
        self.compressed = Some(index);
        self
    }

    pub fn with_audit(mut self, index: Box<dyn FingerprintIndex>) -> Self {
        self.audit = Some(AuditPair {
            index,
            guard: Mutex::new(()),
        });
        self
    }

    /// Open every index the configuration asks for.
    pub fn open(config: &Config) -> Result<Self, IndexError> {
        let mut set = Self::new(open_index(&config.index, RAW_INDEX_NAME)?);
        if config.compressed_identity_enabled() {
            set = set.with_compressed(open_index(&config.index, COMPRESSED_INDEX_NAME)?);
        }
        if config.audit_hash.is_some() {
            set = set.with_audit(open_index(&config.index, AUDIT_INDEX_NAME)?);
        }
        Ok(set)
    }

    pub fn raw(&self) -> &dyn FingerprintIndex {
        self.raw.as_ref()
    }

    /// Insert a block's digests and report which accounting axes see it as new.
    pub fn record(&self, digest: &BlockDigest) -> Novelty {
        let (raw, collision) = match (&self.audit, &digest.audit) {
            (Some(pair), Some(audit)) => self.record_audited(pair, &digest.fingerprint, audit),
            _ => (insert(self.raw.as_ref(), &digest.fingerprint), None),
        };

        let compressed = match (&self.compressed, &digest.compressed) {
            (Some(index), Some(fingerprint)) => insert(index.as_ref(), fingerprint),
            _ => raw,
        };

        Novelty {
            raw,
            compressed,
            collision,
        }
    }

    fn record_audited(
        &self,
        pair: &AuditPair,
        primary: &Fingerprint,
        audit: &Fingerprint,
    ) -> (bool, Option<Collision>) {
        let (unique_primary, unique_audit) = {
            let _guard = pair.guard.lock();
            (
                insert(self.raw.as_ref(), primary),
                insert(pair.index.as_ref(), audit),
            )
        };

        // Equal bytes always give equal digests, so the family claiming "seen" while
        // the other claims "new" is the one that matched unrelated content.
        let collision = match (unique_primary, unique_audit) {
            (true, false) => Some(Collision::Audit),
            (false, true) => Some(Collision::Primary),
            _ => None,
        };
        if let Some(family) = collision {
            warn!(?family, primary = %primary, audit = %audit, "fingerprint collision detected");
        }
        (unique_primary || unique_audit, collision)
    }

    pub fn flush(&self) {
        let indices = std::iter::once(&self.raw)
            .chain(self.compressed.as_ref())
            .chain(self.audit.as_ref().map(|pair| &pair.index));
        for index in indices {
            if let Err(e) = index.flush() {
                warn!(error = %e, "failed to flush fingerprint index");
            }
        }
    }
}

/// Backend failures degrade to "already present" so savings are never overstated.
fn insert(index: &dyn FingerprintIndex, fingerprint: &Fingerprint) -> bool {
    match index.add(fingerprint) {
        Ok(unique) => unique,
        Err(e) => {
            warn!(error = %e, fingerprint = %fingerprint, "fingerprint index insert failed");
            false
        }
    }
}
