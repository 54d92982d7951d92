//src/types.rs

use ahash::AHashSet;
use std::fmt;
use std::time::Duration;

/// Version-stripped accessions of interest. Built once, read-only afterwards.
pub type AccessionSet = AHashSet<String>;

/// Accessions confirmed present in the mapping file.
pub type FoundSet = AHashSet<String>;

/// Root of the taxonomy; by convention its own parent.
pub const ROOT_TAXID: u32 = 1;

/// One `(accession, taxid)` pair as written by the join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinRecord {
    pub accession: String,
    pub taxid: u32,
}

impl JoinRecord {
    /// Parse an `accession<TAB>taxid` line. Returns `None` for anything else.
    pub fn parse_line(line: &str) -> Option<JoinRecord> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut fields = line.split('\t');
        let accession = fields.next()?;
        let taxid = fields.next()?;
        if fields.next().is_some() || accession.is_empty() {
            return None;
        }
        let taxid = taxid.trim().parse().ok()?;
        Some(JoinRecord {
            accession: accession.to_string(),
            taxid,
        })
    }
}

impl fmt::Display for JoinRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.accession, self.taxid)
    }
}

/// A `{taxid, parent_taxid}` row from the node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomyNode {
    pub taxid: u32,
    pub parent_taxid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameClass {
    ScientificName,
    Other(String),
}

impl NameClass {
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "scientific name" => NameClass::ScientificName,
            other => NameClass::Other(other.to_string()),
        }
    }
}

/// A `{taxid, name, name_class}` row from the name table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRecord {
    pub taxid: u32,
    pub name: String,
    pub name_class: NameClass,
}

/// Half-open taxid range `[start, start + width)`, stored with an inclusive end
/// because that is how partition files are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaxidRange {
    pub start: u64,
    pub end: u64,
}

impl TaxidRange {
    /// The unique range of width `range_size` that owns `taxid`.
    pub fn for_taxid(taxid: u32, range_size: u64) -> Self {
        let start = (taxid as u64 / range_size) * range_size;
        TaxidRange {
            start,
            end: start + range_size - 1,
        }
    }

    pub fn contains(&self, taxid: u32) -> bool {
        let t = taxid as u64;
        self.start <= t && t <= self.end
    }

    pub fn width(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.txt", self.start, self.end)
    }

    /// Parse a `"{start}-{end}.txt"` file name.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".txt")?;
        let (start, end) = stem.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = end.parse().ok()?;
        if end < start {
            return None;
        }
        Some(TaxidRange { start, end })
    }
}

impl fmt::Display for TaxidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Counts reported by the join stage.
#[derive(Debug, Clone, Default)]
pub struct JoinSummary {
    pub chunk_lines: usize,
    pub chunks: u64,
    pub lines_read: u64,
    pub records_written: u64,
    pub malformed_lines: u64,
    pub found: FoundSet,
    /// `AccessionSet - FoundSet`, sorted.
    pub missing: Vec<String>,
    pub elapsed: Duration,
}

/// Counts reported by the partitioner.
#[derive(Debug, Clone, Default)]
pub struct PartitionSummary {
    pub records: u64,
    pub skipped_lines: u64,
    pub partitions: Vec<TaxidRange>,
    pub elapsed: Duration,
}

/// Counts reported by the lineage resolver.
#[derive(Debug, Clone, Default)]
pub struct LineageSummary {
    pub nodes: usize,
    pub matched: usize,
    pub missing_names: u64,
    pub truncated_walks: u64,
}

/// Counts reported by the final or direct filter.
#[derive(Debug, Clone, Default)]
pub struct FilterSummary {
    pub taxids: usize,
    pub uncovered_taxids: usize,
    pub partitions_scanned: usize,
    pub lines_scanned: u64,
    pub records_written: u64,
    pub malformed_lines: u64,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_join_line() {
        assert_eq!(
            JoinRecord::parse_line("P1\t10\n"),
            Some(JoinRecord { accession: "P1".into(), taxid: 10 })
        );
        assert_eq!(JoinRecord::parse_line("X\tY"), None);
        assert_eq!(JoinRecord::parse_line("P1"), None);
        assert_eq!(JoinRecord::parse_line("P1\t10\textra"), None);
    }

    #[test]
    fn ranges_cover_every_taxid_once() {
        for size in [1u64, 7, 100, 100_000] {
            for taxid in [0u32, 1, 5, 99, 100, 105, 250, 99_999, 100_000, u32::MAX] {
                let r = TaxidRange::for_taxid(taxid, size);
                assert_eq!(r.start % size, 0);
                assert!(r.contains(taxid));
                assert_eq!(r.width(), size);
                // Neighbouring ranges must not claim it.
                if r.start >= size {
                    assert!(!TaxidRange::for_taxid((r.start - 1) as u32, size).contains(taxid));
                }
            }
        }
    }

    #[test]
    fn range_file_names() {
        let r = TaxidRange::for_taxid(105, 100);
        assert_eq!(r.file_name(), "100-199.txt");
        assert_eq!(TaxidRange::from_file_name("100-199.txt"), Some(r));
        assert_eq!(TaxidRange::from_file_name("notes.txt"), None);
        assert_eq!(TaxidRange::from_file_name("200-100.txt"), None);
    }
}
