//src/accessions.rs

use std::io::{BufRead, Write};
use std::path::Path;
use std::time::Instant;

use log::{debug, info};

use crate::error::{FilterError, IoContext, Result};
use crate::fasta::FastaIds;
use crate::reader::{create_text, open_text};
use crate::types::AccessionSet;

/// Strip a trailing version suffix: everything from the first `.` on.
pub fn strip_version(accession: &str) -> &str {
    match accession.find('.') {
        Some(idx) => &accession[..idx],
        None => accession,
    }
}

/// Pull the accession out of a `db|ACCESSION|name` style identifier.
/// Identifiers with fewer than three `|` fields yield nothing.
pub fn accession_from_id(id: &str) -> Option<&str> {
    let mut fields = id.split('|');
    let _db = fields.next()?;
    let accession = fields.next()?;
    fields.next()?;
    let accession = strip_version(accession.trim());
    if accession.is_empty() {
        None
    } else {
        Some(accession)
    }
}

/// Build the accession set from record identifiers. Identifiers of the wrong
/// shape are skipped.
pub fn extract_accessions<I, S>(ids: I) -> AccessionSet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut set = AccessionSet::default();
    let mut skipped = 0u64;
    for id in ids {
        match accession_from_id(id.as_ref()) {
            Some(acc) => {
                set.insert(acc.to_string());
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!("Skipped {} identifiers without an accession field", skipped);
    }
    set
}

/// Read a FASTA file and return the distinct accessions of its records.
pub fn extract_accessions_from_fasta<P: AsRef<Path>>(fasta_path: P) -> Result<AccessionSet> {
    let fasta_path = fasta_path.as_ref();
    let start = Instant::now();

    let ids = FastaIds::open(fasta_path)?.collect::<Result<Vec<String>>>()?;
    let set = extract_accessions(&ids);

    if set.is_empty() {
        return Err(FilterError::EmptyAccessionSet {
            path: fasta_path.to_path_buf(),
        });
    }
    info!(
        "Read {} accessions from {} records of {} in {:.2}s",
        set.len(),
        ids.len(),
        fasta_path.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(set)
}

/// Persist the accession set, one per line, sorted so reruns diff cleanly.
pub fn write_accession_file<P: AsRef<Path>>(set: &AccessionSet, path: P) -> Result<()> {
    let path = path.as_ref();
    let mut sorted: Vec<&String> = set.iter().collect();
    sorted.sort_unstable();

    let mut out = create_text(path)?;
    for acc in sorted {
        writeln!(out, "{}", acc).with_path(path)?;
    }
    out.flush().with_path(path)?;
    Ok(())
}

/// Load a previously written accession side file.
pub fn read_accession_file<P: AsRef<Path>>(path: P) -> Result<AccessionSet> {
    let path = path.as_ref();
    let mut set = AccessionSet::default();
    for line in open_text(path)?.lines() {
        let line = line.with_path(path)?;
        let acc = strip_version(line.trim());
        if !acc.is_empty() {
            set.insert(acc.to_string());
        }
    }
    if set.is_empty() {
        return Err(FilterError::EmptyAccessionSet {
            path: path.to_path_buf(),
        });
    }
    Ok(set)
}

/// Stage 1 with checkpointing: reuse `side_file` when asked and it exists,
/// otherwise extract from the FASTA and write the side file.
pub fn load_or_extract<P: AsRef<Path>, Q: AsRef<Path>>(
    fasta_path: P,
    side_file: Q,
    reuse: bool,
) -> Result<AccessionSet> {
    let side_file = side_file.as_ref();
    if reuse && side_file.exists() {
        let set = read_accession_file(side_file)?;
        info!("Reusing {} accessions from {}", set.len(), side_file.display());
        return Ok(set);
    }
    let set = extract_accessions_from_fasta(fasta_path)?;
    write_accession_file(&set, side_file)?;
    info!("Saved accessions to {}", side_file.display());
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_stripped() {
        assert_eq!(strip_version("P12345.2"), "P12345");
        assert_eq!(strip_version("P12345"), "P12345");
        assert_eq!(strip_version("WP_000001.1.9"), "WP_000001");
    }

    #[test]
    fn only_three_field_ids_contribute() {
        let set = extract_accessions(vec![
            "sp|P12345.2|ABC_HUMAN",
            "tr|Q11111|Q_VIRUS",
            "sp|P12345|ABC_HUMAN",
            "lonely_id",
            "two|fields",
            "sp||EMPTY",
        ]);
        let mut got: Vec<_> = set.into_iter().collect();
        got.sort();
        assert_eq!(got, vec!["P12345".to_string(), "Q11111".to_string()]);
    }

    #[test]
    fn fasta_extraction_and_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("in.fasta");
        std::fs::write(&fasta, ">sp|P1|A\nMK\n>sp|P2.3|B\nMK\n>weird\nMK\n").unwrap();
        let side = dir.path().join("ids.txt");

        let set = load_or_extract(&fasta, &side, true).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(std::fs::read_to_string(&side).unwrap(), "P1\nP2\n");

        // Checkpoint wins over the (now different) FASTA when reuse is on.
        std::fs::write(&fasta, ">sp|P9|Z\nMK\n").unwrap();
        let reused = load_or_extract(&fasta, &side, true).unwrap();
        assert!(reused.contains("P1") && reused.contains("P2"));

        let fresh = load_or_extract(&fasta, &side, false).unwrap();
        assert_eq!(fresh.len(), 1);
        assert!(fresh.contains("P9"));
    }

    #[test]
    fn repeated_fasta_accessions_collapse() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("dup.fasta");
        std::fs::write(
            &fasta,
            ">sp|P1.1|A\nMK\n>sp|P1.2|A2\nMK\n>tr|P1|A3\nMK\n>sp|P2|B\nMK\n>bare\nMK\n",
        )
        .unwrap();
        let set = extract_accessions_from_fasta(&fasta).unwrap();
        let mut got: Vec<_> = set.into_iter().collect();
        got.sort();
        assert_eq!(got, vec!["P1".to_string(), "P2".to_string()]);
    }

    #[test]
    fn missing_or_empty_fasta_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.fasta");
        assert!(matches!(
            extract_accessions_from_fasta(&missing),
            Err(FilterError::Io { .. })
        ));

        let empty = dir.path().join("empty.fasta");
        std::fs::write(&empty, ">no_pipes\nMK\n").unwrap();
        assert!(matches!(
            extract_accessions_from_fasta(&empty),
            Err(FilterError::EmptyAccessionSet { .. })
        ));
    }
}
