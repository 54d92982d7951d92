//src/filter.rs

use std::collections::BTreeMap;
use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Instant;

use ahash::AHashSet;
use log::{debug, info, warn};

use crate::error::{IoContext, Result};
use crate::partition::PartitionIndex;
use crate::reader::{create_text, open_text};
use crate::types::{FilterSummary, JoinRecord};

/// Copy every line of `path` whose taxid is in `wanted` to `out`.
/// Selection is by exact taxid, never by range.
fn scan_file<W: Write>(
    path: &Path,
    wanted: &AHashSet<u32>,
    out: &mut W,
    out_path: &Path,
    summary: &mut FilterSummary,
) -> Result<()> {
    for line in open_text(path)?.lines() {
        let line = line.with_path(path)?;
        summary.lines_scanned += 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match JoinRecord::parse_line(trimmed) {
            Some(rec) if wanted.contains(&rec.taxid) => {
                writeln!(out, "{}", rec).with_path(out_path)?;
                summary.records_written += 1;
            }
            Some(_) => {}
            None => {
                summary.malformed_lines += 1;
                debug!("Skipping malformed line in {}: {:?}", path.display(), trimmed);
            }
        }
    }
    Ok(())
}

fn report(kind: &str, summary: &FilterSummary, output: &Path) {
    info!(
        "{}: {} records for {} taxids written to {} ({} lines scanned in {} files, {:.2}s)",
        kind,
        summary.records_written,
        summary.taxids,
        output.display(),
        summary.lines_scanned,
        summary.partitions_scanned,
        summary.elapsed.as_secs_f64()
    );
    if summary.malformed_lines > 0 {
        warn!("Skipped {} malformed lines", summary.malformed_lines);
    }
}

/// Select the records of the given taxids from a partition directory.
///
/// Taxids are grouped by owning partition and each partition is scanned once.
/// Taxids no partition covers are logged and skipped.
pub fn final_filter<Q: AsRef<Path>>(
    taxids: &[u32],
    index: &PartitionIndex,
    output: Q,
) -> Result<FilterSummary> {
    let output = output.as_ref();
    let start = Instant::now();

    let mut sorted = taxids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut summary = FilterSummary {
        taxids: sorted.len(),
        ..FilterSummary::default()
    };

    // BTreeMap keeps partitions (and so the output) in ascending taxid order.
    let mut groups: BTreeMap<u64, (&Path, AHashSet<u32>)> = BTreeMap::new();
    for &taxid in &sorted {
        match index.locate(taxid) {
            Some((range, path)) => {
                groups
                    .entry(range.start)
                    .or_insert_with(|| (path, AHashSet::new()))
                    .1
                    .insert(taxid);
            }
            None => {
                summary.uncovered_taxids += 1;
                debug!("No partition covers taxid {}", taxid);
            }
        }
    }
    if summary.uncovered_taxids > 0 {
        info!(
            "{} taxids have no covering partition (no protein records)",
            summary.uncovered_taxids
        );
    }

    let mut out = create_text(output)?;
    for (path, wanted) in groups.values() {
        scan_file(path, wanted, &mut out, output, &mut summary)?;
        summary.partitions_scanned += 1;
    }
    out.flush().with_path(output)?;

    summary.elapsed = start.elapsed();
    report("Final filter", &summary, output);
    Ok(summary)
}

/// Select the records of the given taxids with one sequential scan of an
/// unpartitioned `(accession, taxid)` file.
pub fn direct_filter<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    taxids: &[u32],
    output: Q,
) -> Result<FilterSummary> {
    let input = input.as_ref();
    let output = output.as_ref();
    let start = Instant::now();

    let wanted: AHashSet<u32> = taxids.iter().copied().collect();
    let mut summary = FilterSummary {
        taxids: wanted.len(),
        ..FilterSummary::default()
    };

    let mut out = create_text(output)?;
    scan_file(input, &wanted, &mut out, output, &mut summary)?;
    summary.partitions_scanned = 1;
    out.flush().with_path(output)?;

    summary.elapsed = start.elapsed();
    report("Direct filter", &summary, output);
    Ok(summary)
}
