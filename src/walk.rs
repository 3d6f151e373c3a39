//! Directory walk task.
//!
//! Lists one directory, forks a file task per regular file and a walk task per
//! subdirectory into a rayon scope, and returns only once the whole subtree is
//! done. Symlinks are never followed.

use std::fs::{self, DirEntry};
use std::io;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::file;
use crate::scanner::ScanContext;

/// What to do with one directory entry, decided from its own (unfollowed) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File { size: u64 },
    Directory,
    Symlink,
    /// Sockets, FIFOs, devices
    Special,
}

impl EntryKind {
    fn classify(entry: &DirEntry) -> io::Result<Self> {
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            Ok(EntryKind::Symlink)
        } else if file_type.is_dir() {
            Ok(EntryKind::Directory)
        } else if file_type.is_file() {
            let size = entry.metadata()?.len();
            Ok(EntryKind::File { size })
        } else {
            Ok(EntryKind::Special)
        }
    }
}

pub(crate) fn walk_dir(ctx: &ScanContext, dir: &Path) {
    match fs::read_dir(dir) {
        Ok(entries) => walk_entries(ctx, dir, entries),
        Err(e) => {
            ctx.counters.dir_failed();
            warn!(path = %dir.display(), error = %e, "cannot read directory");
        }
    }
}

/// Schedule every entry of `dir`, then join. A listing error stops enumeration
/// and the directory counts as failed instead of processed.
fn walk_entries<I>(ctx: &ScanContext, dir: &Path, entries: I)
where
    I: Iterator<Item = io::Result<DirEntry>> + Send,
{
    let mut failed = false;

    rayon::scope(|scope| {
        for entry in entries {
            if ctx.cancel.is_cancelled() {
                debug!(path = %dir.display(), "scan cancelled, not scheduling further entries");
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "directory enumeration failed");
                    failed = true;
                    break;
                }
            };

            let path = entry.path();
            match EntryKind::classify(&entry) {
                Ok(EntryKind::File { size }) => {
                    ctx.counters.file_queued(size);
                    scope.spawn(move |_| file::process_file(ctx, &path));
                }
                Ok(EntryKind::Directory) => {
                    ctx.counters.dir_queued();
                    scope.spawn(move |_| walk_dir(ctx, &path));
                }
                Ok(kind) => {
                    trace!(path = %path.display(), ?kind, "skipping entry");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot stat entry");
                }
            }
        }
    });

    if failed {
        ctx.counters.dir_failed();
    } else {
        ctx.counters.dir_processed();
        debug!(path = %dir.display(), "directory processed");
    }
}
