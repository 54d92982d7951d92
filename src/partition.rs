//src/partition.rs

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use log::{debug, info, warn};

use crate::chunking::LineChunks;
use crate::config::PartitionConfig;
use crate::error::{FilterError, IoContext, Result};
use crate::types::{JoinRecord, PartitionSummary, TaxidRange};

/// Range-named partition files in one directory, keyed by range start.
#[derive(Debug, Clone, Default)]
pub struct PartitionIndex {
    ranges: BTreeMap<u64, (TaxidRange, PathBuf)>,
}

impl PartitionIndex {
    /// Scan `dir` for `"{start}-{end}.txt"` files. Other files are ignored.
    /// Overlapping or mixed-width ranges are rejected.
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut index = PartitionIndex::default();
        for entry in std::fs::read_dir(dir).with_path(dir)? {
            let entry = entry.with_path(dir)?;
            let name = entry.file_name();
            let Some(range) = name.to_str().and_then(TaxidRange::from_file_name) else {
                continue;
            };
            index.insert(range, entry.path())?;
        }
        index.check_uniform_width()?;
        debug!("Loaded {} partitions from {}", index.len(), dir.display());
        Ok(index)
    }

    /// Index exactly `ranges` under `dir`, ignoring whatever else the
    /// directory holds.
    pub fn from_ranges<P: AsRef<Path>>(dir: P, ranges: &[TaxidRange]) -> Result<Self> {
        let dir = dir.as_ref();
        let mut index = PartitionIndex::default();
        for range in ranges {
            index.insert(*range, dir.join(range.file_name()))?;
        }
        index.check_uniform_width()?;
        Ok(index)
    }

    fn insert(&mut self, range: TaxidRange, path: PathBuf) -> Result<()> {
        // Stored ranges are disjoint, so only the last one starting at or
        // before `range.end` can reach into it.
        let clash = self
            .ranges
            .range(..=range.end)
            .next_back()
            .filter(|(_, (r, _))| r.end >= range.start);
        if let Some((_, (existing, _))) = clash {
            return Err(FilterError::InvalidPartitionLayout(format!(
                "range {} overlaps {}",
                range, existing
            )));
        }
        self.ranges.insert(range.start, (range, path));
        Ok(())
    }

    fn check_uniform_width(&self) -> Result<()> {
        let mut widths = self.ranges.values().map(|(r, _)| r.width());
        if let Some(first) = widths.next() {
            if let Some(other) = widths.find(|w| *w != first) {
                return Err(FilterError::InvalidPartitionLayout(format!(
                    "mixed range widths {} and {}",
                    first, other
                )));
            }
        }
        Ok(())
    }

    /// The partition whose range covers `taxid`, if any.
    pub fn locate(&self, taxid: u32) -> Option<(&TaxidRange, &Path)> {
        self.ranges
            .range(..=taxid as u64)
            .next_back()
            .map(|(_, (r, p))| (r, p.as_path()))
            .filter(|(r, _)| r.contains(taxid))
    }

    pub fn ranges(&self) -> impl Iterator<Item = &TaxidRange> {
        self.ranges.values().map(|(r, _)| r)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Arena of per-range output sinks with a cap on concurrently open handles.
///
/// A range is truncated the first time it is opened in a run and appended to
/// if it is reopened after eviction. Every sink is flushed on `finish`, and on
/// drop for error paths.
struct SinkArena {
    dir: PathBuf,
    range_size: u64,
    max_open: usize,
    open: AHashMap<u64, BufWriter<File>>,
    open_order: VecDeque<u64>,
    created: AHashSet<u64>,
}

impl SinkArena {
    fn new(dir: &Path, range_size: u64, max_open: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            range_size,
            max_open,
            open: AHashMap::new(),
            open_order: VecDeque::new(),
            created: AHashSet::new(),
        }
    }

    fn path_for(&self, start: u64) -> PathBuf {
        let range = TaxidRange { start, end: start + self.range_size - 1 };
        self.dir.join(range.file_name())
    }

    fn sink(&mut self, range: TaxidRange) -> Result<&mut BufWriter<File>> {
        if !self.open.contains_key(&range.start) && self.open.len() >= self.max_open {
            self.evict_oldest()?;
        }
        match self.open.entry(range.start) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let path = self.dir.join(range.file_name());
                let file = if self.created.insert(range.start) {
                    File::create(&path)
                } else {
                    OpenOptions::new().append(true).open(&path)
                }
                .with_path(&path)?;
                self.open_order.push_back(range.start);
                Ok(slot.insert(BufWriter::new(file)))
            }
        }
    }

    fn evict_oldest(&mut self) -> Result<()> {
        while let Some(start) = self.open_order.pop_front() {
            if let Some(mut w) = self.open.remove(&start) {
                w.flush().with_path(self.path_for(start))?;
                return Ok(());
            }
        }
        Ok(())
    }

    fn write_record(&mut self, rec: &JoinRecord) -> Result<()> {
        let range = TaxidRange::for_taxid(rec.taxid, self.range_size);
        let sink = self.sink(range)?;
        writeln!(sink, "{}", rec).map_err(|e| FilterError::io(self.path_for(range.start), e))
    }

    /// Flush and close every sink; reports the first failure but closes all.
    fn finish(mut self) -> Result<Vec<TaxidRange>> {
        let mut first_err = None;
        let open = std::mem::take(&mut self.open);
        for (start, mut w) in open {
            if let Err(e) = w.flush() {
                if first_err.is_none() {
                    first_err = Some(FilterError::io(self.path_for(start), e));
                }
            }
        }
        self.open_order.clear();
        if let Some(e) = first_err {
            return Err(e);
        }
        let mut ranges: Vec<TaxidRange> = self
            .created
            .iter()
            .map(|&start| TaxidRange { start, end: start + self.range_size - 1 })
            .collect();
        ranges.sort();
        Ok(ranges)
    }
}

impl Drop for SinkArena {
    fn drop(&mut self) {
        for (start, mut w) in self.open.drain() {
            if let Err(e) = w.flush() {
                warn!("Failed to flush partition starting at {}: {}", start, e);
            }
        }
    }
}

/// Delete range-named files left in `dir` by an earlier run.
fn clear_stale_partitions(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let is_range = entry
            .file_name()
            .to_str()
            .and_then(TaxidRange::from_file_name)
            .is_some();
        if is_range && entry.path().is_file() {
            std::fs::remove_file(entry.path()).with_path(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Bucket `(accession, taxid)` lines from `input` into one file per taxid range
/// under `out_dir`. Range files already in `out_dir` are replaced. Malformed
/// lines are skipped; an empty input yields no files.
pub fn partition_records<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    out_dir: Q,
    config: &PartitionConfig,
) -> Result<PartitionSummary> {
    config.validate()?;
    let input = input.as_ref();
    let out_dir = out_dir.as_ref();
    let start = Instant::now();

    std::fs::create_dir_all(out_dir).with_path(out_dir)?;
    let stale = clear_stale_partitions(out_dir)?;
    if stale > 0 {
        info!("Removed {} partition files from a previous run in {}", stale, out_dir.display());
    }
    let mut arena = SinkArena::new(out_dir, config.range_size, config.max_open_files);
    let mut records = 0u64;
    let mut skipped = 0u64;

    for chunk in LineChunks::open(input, config.chunk_lines)? {
        let chunk = chunk?;
        for line in &chunk.lines {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match JoinRecord::parse_line(trimmed) {
                Some(rec) => {
                    arena.write_record(&rec)?;
                    records += 1;
                }
                None => {
                    skipped += 1;
                    debug!("Skipping malformed line (expected accession<TAB>taxid): {:?}", trimmed);
                }
            }
        }
    }

    let partitions = arena.finish()?;
    let summary = PartitionSummary {
        records,
        skipped_lines: skipped,
        partitions,
        elapsed: start.elapsed(),
    };
    info!(
        "Partitioned {} records into {} ranges of width {} under {} in {:.2}s",
        summary.records,
        summary.partitions.len(),
        config.range_size,
        out_dir.display(),
        summary.elapsed.as_secs_f64()
    );
    if skipped > 0 {
        warn!("Skipped {} malformed lines while partitioning", skipped);
    }
    Ok(summary)
}
