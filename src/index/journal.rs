use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use dashmap::DashSet;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::FingerprintIndex;
use crate::codec::{Fingerprint, MAX_DIGEST_LEN};
use crate::error::IndexError;

/// In-memory set mirrored to an append-only file of `[len: u8][digest]` records.
///
/// The set insert decides novelty; only the winning caller appends, so the file
/// holds each fingerprint once.
#[derive(Debug)]
pub struct JournalIndex {
    seen: DashSet<Fingerprint>,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JournalIndex {
    /// Open `<dir>/<name>.idx`, replaying any records already in it.
    pub fn open(dir: &Path, name: &str) -> Result<Self, IndexError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.idx"));

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let seen = DashSet::new();
        let valid_len = replay(&file, &path, &seen)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                offset = valid_len,
                "dropping torn record at end of fingerprint journal"
            );
            file.set_len(valid_len)?;
        }
        if !seen.is_empty() {
            warn!(
                path = %path.display(),
                entries = seen.len(),
                "fingerprint journal already exists; previously seen blocks will count as duplicates"
            );
        }
        info!(path = %path.display(), "using journal fingerprint index");

        Ok(Self {
            seen,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load records into `seen` and return the length of the well-formed prefix.
fn replay(file: &File, path: &Path, seen: &DashSet<Fingerprint>) -> Result<u64, IndexError> {
    let mut reader = BufReader::new(file.try_clone()?);
    let mut offset = 0u64;
    let mut digest = [0u8; MAX_DIGEST_LEN];

    loop {
        let mut len = [0u8; 1];
        match reader.read_exact(&mut len) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(offset),
            Err(e) => return Err(e.into()),
        }
        let len = len[0] as usize;
        if len == 0 || len > MAX_DIGEST_LEN {
            return Err(IndexError::Corrupted {
                path: path.to_path_buf(),
                offset,
            });
        }
        match reader.read_exact(&mut digest[..len]) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(offset),
            Err(e) => return Err(e.into()),
        }
        seen.insert(Fingerprint::from_slice(&digest[..len]));
        offset += 1 + len as u64;
    }
}

impl FingerprintIndex for JournalIndex {
    fn add(&self, fingerprint: &Fingerprint) -> Result<bool, IndexError> {
        if !self.seen.insert(*fingerprint) {
            return Ok(false);
        }
        let bytes = fingerprint.as_bytes();
        let mut writer = self.writer.lock();
        writer.write_all(&[bytes.len() as u8])?;
        writer.write_all(bytes)?;
        Ok(true)
    }

    fn len(&self) -> usize {
        self.seen.len()
    }

    fn flush(&self) -> Result<(), IndexError> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

impl Drop for JournalIndex {
    fn drop(&mut self) {
        if let Err(e) = self.writer.get_mut().flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush fingerprint journal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerprintAlgorithm;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = FingerprintAlgorithm::Blake3.fingerprint(b"a");
        let b = FingerprintAlgorithm::Xxh3_64.fingerprint(b"b");
        {
            let index = JournalIndex::open(dir.path(), "hashes").unwrap();
            assert!(index.add(&a).unwrap());
            assert!(index.add(&b).unwrap());
            assert!(!index.add(&a).unwrap());
            index.flush().unwrap();
        }

        let index = JournalIndex::open(dir.path(), "hashes").unwrap();
        assert_eq!(index.len(), 2);
        assert!(!index.add(&a).unwrap());
        assert!(!index.add(&b).unwrap());
        assert_eq!(fs::metadata(index.path()).unwrap().len(), (1 + 32) + (1 + 8));
    }

    #[test]
    fn torn_tail_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let a = FingerprintAlgorithm::Sha256.fingerprint(b"a");
        {
            let index = JournalIndex::open(dir.path(), "hashes").unwrap();
            index.add(&a).unwrap();
        }
        let path = dir.path().join("hashes.idx");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[32, 1, 2, 3]).unwrap();
        drop(file);

        let index = JournalIndex::open(dir.path(), "hashes").unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), 33);

        let c = FingerprintAlgorithm::Sha256.fingerprint(b"c");
        assert!(index.add(&c).unwrap());
        index.flush().unwrap();
        drop(index);

        let index = JournalIndex::open(dir.path(), "hashes").unwrap();
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn bad_record_length_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hashes.idx"), [0u8, 1, 2]).unwrap();
        assert!(matches!(
            JournalIndex::open(dir.path(), "hashes"),
            Err(IndexError::Corrupted { offset: 0, .. })
        ));
    }
}
