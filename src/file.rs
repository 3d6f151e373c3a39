//! File processing task.
//!
//! Streams one file in block-aligned chunks (up to a megabyte) and pushes every
//! block through compress, fingerprint, index and count. A short chunk is only
//! legal at end of file; if more data shows up after it, the file changed while
//! being read and is abandoned. Counters already credited stay credited.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::codec::CodecScratch;
use crate::error::FileError;
use crate::scanner::{ScanContext, FANOUT_PER_WORKER};

pub(crate) fn process_file(ctx: &ScanContext, path: &Path) {
    let result = File::open(path)
        .map_err(FileError::from)
        .and_then(|file| scan_stream(ctx, file));

    match result {
        Ok(bytes) => {
            ctx.counters.file_processed();
            debug!(path = %path.display(), bytes, "file processed");
        }
        Err(e) => {
            ctx.counters.file_faulted();
            warn!(path = %path.display(), error = %e, "file processing aborted");
        }
    }
}

/// Run every block of `reader` through the pipeline; returns the bytes consumed.
pub(crate) fn scan_stream<R: Read>(ctx: &ScanContext, mut reader: R) -> Result<u64, FileError> {
    let mut buffer = ctx.read_buffers.checkout();
    let mut offset = 0u64;

    loop {
        let filled = fill(&mut reader, buffer.as_mut_slice())?;
        if filled == 0 {
            break;
        }

        let short = filled < buffer.len();
        if short && !at_eof(&mut reader)? {
            return Err(FileError::Truncated {
                offset,
                read: filled,
            });
        }

        process_chunk(ctx, &buffer[..filled])?;
        offset += filled as u64;

        if short {
            break;
        }
    }

    Ok(offset)
}

fn process_chunk(ctx: &ScanContext, chunk: &[u8]) -> Result<(), FileError> {
    let block_size = ctx.config.block_size;
    let blocks = chunk.len().div_ceil(block_size);

    if ctx.config.split_blocks && ctx.config.parallelism > 1 && blocks > 1 {
        let min_len = blocks.div_ceil(ctx.config.parallelism * FANOUT_PER_WORKER);
        chunk
            .par_chunks(block_size)
            .with_min_len(min_len)
            .try_for_each_init(
                || ctx.scratch.checkout(),
                |scratch, block| process_block(ctx, block, scratch),
            )
    } else {
        let mut scratch = ctx.scratch.checkout();
        chunk
            .chunks(block_size)
            .try_for_each(|block| process_block(ctx, block, &mut scratch))
    }
}

fn process_block(ctx: &ScanContext, block: &[u8], scratch: &mut CodecScratch) -> Result<(), FileError> {
    let digest = ctx.codec.encode(block, scratch)?;
    let novelty = ctx.indices.record(&digest);
    ctx.counters.block(&digest, &novelty);
    Ok(())
}

/// Read until `buf` is full or the reader reports end of stream.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn at_eof<R: Read>(reader: &mut R) -> io::Result<bool> {
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(n) => return Ok(n == 0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
