use dashmap::DashSet;

use super::FingerprintIndex;
use crate::codec::Fingerprint;
use crate::error::IndexError;

/// Reference backend: a sharded concurrent set, bounded only by memory.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    seen: DashSet<Fingerprint>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FingerprintIndex for MemoryIndex {
    fn add(&self, fingerprint: &Fingerprint) -> Result<bool, IndexError> {
        // The shard lock makes check-and-insert a single step.
        Ok(self.seen.insert(*fingerprint))
    }

    fn len(&self) -> usize {
        self.seen.len()
    }
}
