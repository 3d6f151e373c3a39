//! Human-readable rendering of a counters snapshot.

use std::io::{self, Write};
use std::time::Duration;

use indicatif::{HumanBytes, HumanDuration};

use crate::config::Config;
use crate::counters::CountersSnapshot;

/// One-line progress summary, used as the progress bar message.
pub fn progress_line(snapshot: &CountersSnapshot, elapsed: Duration) -> String {
    format!(
        "{}/{} files, {} at {}/s, dedup {:.3}x, compress {:.3}x",
        snapshot.processed_files + snapshot.faulted_files,
        snapshot.queued_files,
        HumanBytes(snapshot.input_bytes),
        HumanBytes(throughput(snapshot.input_bytes, elapsed)),
        snapshot.dedup_ratio(),
        snapshot.compress_ratio(),
    )
}

/// Estimated time left, extrapolated from the byte rate so far.
pub fn eta(snapshot: &CountersSnapshot, elapsed: Duration) -> Option<Duration> {
    if snapshot.input_bytes == 0 {
        return None;
    }
    let remaining = snapshot.queued_bytes.saturating_sub(snapshot.input_bytes);
    let per_byte = elapsed.as_secs_f64() / snapshot.input_bytes as f64;
    Duration::try_from_secs_f64(per_byte * remaining as f64).ok()
}

fn throughput(bytes: u64, elapsed: Duration) -> u64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0
    } else {
        (bytes as f64 / secs) as u64
    }
}

/// Write the full report: one line per accounting scheme plus run tallies.
pub fn write_report<W: Write>(
    out: &mut W,
    snapshot: &CountersSnapshot,
    config: &Config,
    elapsed: Duration,
) -> io::Result<()> {
    let s = snapshot;
    writeln!(
        out,
        "{}, using {}-byte blocks, {} fingerprints, {} compression",
        config.root.display(),
        config.block_size,
        config.hash,
        config.compression,
    )?;
    writeln!(
        out,
        "processed {} files ({} faulted) in {} directories ({} unreadable), {} in {} ({}/s)",
        s.processed_files,
        s.faulted_files,
        s.processed_dirs,
        s.failed_dirs,
        HumanBytes(s.input_bytes),
        HumanDuration(elapsed),
        HumanBytes(throughput(s.input_bytes, elapsed)),
    )?;
    writeln!(
        out,
        "COMPRESS:       {:6.3}x, {} --(block-compress)--> {}",
        s.compress_ratio(),
        HumanBytes(s.input_bytes),
        HumanBytes(s.compressed_bytes),
    )?;
    if config.compressed_identity_enabled() {
        writeln!(
            out,
            "COMPRESS+DEDUP: {:6.3}x, {} --(block-compress)--> {} --(dedup)--> {}",
            s.compress_dedup_ratio(),
            HumanBytes(s.input_bytes),
            HumanBytes(s.compressed_bytes),
            HumanBytes(s.compressed_dedup_bytes),
        )?;
    }
    writeln!(
        out,
        "DEDUP:          {:6.3}x, {} --(dedup)--> {}",
        s.dedup_ratio(),
        HumanBytes(s.input_bytes),
        HumanBytes(s.dedup_bytes),
    )?;
    writeln!(
        out,
        "DEDUP+COMPRESS: {:6.3}x, {} --(dedup)--> {} --(block-compress)--> {}",
        s.dedup_compress_ratio(),
        HumanBytes(s.input_bytes),
        HumanBytes(s.dedup_bytes),
        HumanBytes(s.dedup_compressed_bytes),
    )?;
    if let Some(audit) = config.audit_hash {
        writeln!(
            out,
            "collisions: {} on {}, {} on {}",
            s.collisions_primary, config.hash, s.collisions_audit, audit,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FingerprintAlgorithm;

    fn snapshot() -> CountersSnapshot {
        CountersSnapshot {
            queued_files: 4,
            queued_bytes: 8 << 20,
            processed_files: 2,
            input_bytes: 4 << 20,
            compressed_bytes: 2 << 20,
            dedup_bytes: 1 << 20,
            dedup_compressed_bytes: 1 << 19,
            compressed_dedup_bytes: 1 << 19,
            ..Default::default()
        }
    }

    #[test]
    fn report_lists_every_axis() {
        let mut config = Config::new("/data");
        config.audit_hash = Some(FingerprintAlgorithm::Xxh3_64);
        let mut out = Vec::new();
        write_report(&mut out, &snapshot(), &config, Duration::from_secs(2)).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("COMPRESS:        2.000x"));
        assert!(text.contains("COMPRESS+DEDUP:  8.000x"));
        assert!(text.contains("DEDUP:           4.000x"));
        assert!(text.contains("DEDUP+COMPRESS:  8.000x"));
        assert!(text.contains("collisions: 0 on blake3, 0 on xxh3-64"));
    }

    #[test]
    fn report_omits_disabled_sections() {
        let mut config = Config::new("/data");
        config.compression = crate::config::CompressionAlgorithm::None;
        let mut out = Vec::new();
        write_report(&mut out, &snapshot(), &config, Duration::from_secs(1)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("COMPRESS+DEDUP"));
        assert!(!text.contains("collisions"));
    }

    #[test]
    fn eta_extrapolates_linearly() {
        assert_eq!(eta(&snapshot(), Duration::from_secs(10)), Some(Duration::from_secs(10)));
        assert_eq!(eta(&CountersSnapshot::default(), Duration::from_secs(1)), None);
    }

    #[test]
    fn eta_out_of_range_is_none() {
        let snap = CountersSnapshot {
            queued_bytes: u64::MAX,
            input_bytes: 1,
            ..Default::default()
        };
        assert_eq!(eta(&snap, Duration::from_secs(1000)), None);
    }

    #[test]
    fn progress_line_counts_files() {
        let line = progress_line(&snapshot(), Duration::from_secs(4));
        assert!(line.starts_with("2/4 files"), "{line}");
    }
}
