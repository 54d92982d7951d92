//src/join.rs

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};

use crate::accessions::strip_version;
use crate::chunking::{determine_chunk_lines, Chunk, LineChunks};
use crate::config::JoinConfig;
use crate::error::{FilterError, IoContext, Result};
use crate::reader::{create_text, file_size, is_gz};
use crate::types::{AccessionSet, FoundSet, JoinRecord, JoinSummary};

/// How many missing accessions are spelled out in the log.
const MISSING_LOG_LIMIT: usize = 20;

/// Result of filtering one chunk on a worker.
#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub index: u64,
    pub lines: u64,
    pub bytes: u64,
    pub malformed: u64,
    pub matches: Vec<JoinRecord>,
}

/// Parse `accession<TAB>taxid`, stripping the accession's version suffix.
/// `None` means the line is malformed.
fn parse_mapping_line(line: &str) -> Option<(&str, u32)> {
    let mut fields = line.split('\t');
    let accession = fields.next()?;
    let taxid = fields.next()?;
    if fields.next().is_some() {
        return None;
    }
    let taxid = taxid.trim().parse().ok()?;
    Some((strip_version(accession.trim()), taxid))
}

/// Filter one chunk against the accession set. Pure: touches no shared state.
pub fn filter_chunk(chunk: &Chunk, accessions: &AccessionSet) -> ChunkOutcome {
    let mut outcome = ChunkOutcome {
        index: chunk.index,
        lines: chunk.lines.len() as u64,
        bytes: chunk.bytes,
        ..ChunkOutcome::default()
    };

    for raw in &chunk.lines {
        let line = raw.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            continue;
        }
        match parse_mapping_line(line) {
            Some((accession, taxid)) => {
                if accessions.contains(accession) {
                    outcome.matches.push(JoinRecord {
                        accession: accession.to_string(),
                        taxid,
                    });
                }
            }
            None => {
                outcome.malformed += 1;
                debug!("Skipping malformed mapping line: {:?}", line);
            }
        }
    }
    outcome
}

#[derive(Debug, Default)]
struct Aggregate {
    chunks: u64,
    lines: u64,
    records: u64,
    malformed: u64,
    found: FoundSet,
}

/// Single owner of the output file and the found set. Runs until every
/// worker has dropped its sender.
fn aggregate<W: Write>(
    results: Receiver<ChunkOutcome>,
    mut out: W,
    out_path: &Path,
    progress: ProgressBar,
) -> Result<Aggregate> {
    let mut agg = Aggregate::default();

    for outcome in results.iter() {
        for rec in &outcome.matches {
            writeln!(out, "{}", rec).with_path(out_path)?;
        }
        agg.chunks += 1;
        agg.lines += outcome.lines;
        agg.malformed += outcome.malformed;
        agg.records += outcome.matches.len() as u64;
        debug!(
            "Chunk {}: {} lines, {} matches",
            outcome.index,
            outcome.lines,
            outcome.matches.len()
        );
        for rec in outcome.matches {
            agg.found.insert(rec.accession);
        }
        progress.inc(outcome.bytes);
    }

    out.flush().with_path(out_path)?;
    progress.finish_and_clear();
    Ok(agg)
}

fn progress_bar(mapping_path: &Path, show: bool) -> Result<ProgressBar> {
    if !show {
        return Ok(ProgressBar::hidden());
    }
    if is_gz(mapping_path) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {bytes} joined")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        return Ok(pb);
    }
    let pb = ProgressBar::new(file_size(mapping_path)?);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    Ok(pb)
}

/// Stream `mapping_path` in memory-bounded chunks, filter each chunk on a
/// worker pool against `accessions`, and write matching `(accession, taxid)`
/// lines to `output_path`.
///
/// Output order is unspecified. Malformed lines are counted and skipped;
/// accessions never seen in the mapping file are reported in
/// [`JoinSummary::missing`] and do not fail the join.
pub fn join_mapping<P: AsRef<Path>, Q: AsRef<Path>>(
    accessions: &AccessionSet,
    mapping_path: P,
    output_path: Q,
    config: &JoinConfig,
) -> Result<JoinSummary> {
    config.validate()?;
    let mapping_path = mapping_path.as_ref();
    let output_path = output_path.as_ref();
    let start = Instant::now();

    let chunk_lines = match config.chunk_lines {
        Some(n) => n,
        None => determine_chunk_lines(mapping_path, config.memory_budget_bytes, config.sample_lines)?,
    };
    info!(
        "Joining {} against {} accessions: {} lines per chunk, {} workers",
        mapping_path.display(),
        accessions.len(),
        chunk_lines,
        config.workers
    );

    let chunks = LineChunks::open(mapping_path, chunk_lines)?.with_line_limit(config.max_lines);
    let writer = create_text(output_path)?;
    let progress = progress_bar(mapping_path, config.show_progress)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .thread_name(|i| format!("join-worker-{i}"))
        .build()
        .map_err(|e| FilterError::Worker(e.to_string()))?;

    // Bounded so the reader never runs more than one chunk per worker ahead.
    let (chunk_tx, chunk_rx) = bounded::<Chunk>(config.workers);
    let (result_tx, result_rx) = unbounded::<ChunkOutcome>();

    let (dispatched, agg) = std::thread::scope(|threads| {
        let aggregator =
            threads.spawn(move || aggregate(result_rx, writer, output_path, progress));

        let dispatched = pool.in_place_scope(move |s| -> Result<u64> {
            for _ in 0..config.workers {
                let rx = chunk_rx.clone();
                let tx = result_tx.clone();
                s.spawn(move |_| {
                    for chunk in rx.iter() {
                        if tx.send(filter_chunk(&chunk, accessions)).is_err() {
                            // aggregator bailed out; its error is reported below
                            break;
                        }
                    }
                });
            }
            drop(chunk_rx);
            drop(result_tx);

            let mut dispatched = 0u64;
            for chunk in chunks {
                if chunk_tx.send(chunk?).is_err() {
                    break;
                }
                dispatched += 1;
            }
            Ok(dispatched)
        });

        let agg = aggregator
            .join()
            .map_err(|_| FilterError::Worker("join aggregator panicked".into()))?;
        Ok::<_, FilterError>((dispatched, agg))
    })?;

    // A read failure outranks whatever the aggregator saw.
    let dispatched = dispatched?;
    let agg = agg?;
    if dispatched != agg.chunks {
        return Err(FilterError::Worker(format!(
            "dispatched {} chunks but only {} were aggregated",
            dispatched, agg.chunks
        )));
    }

    let mut missing: Vec<String> = accessions
        .iter()
        .filter(|acc| !agg.found.contains(*acc))
        .cloned()
        .collect();
    missing.sort_unstable();

    let summary = JoinSummary {
        chunk_lines,
        chunks: agg.chunks,
        lines_read: agg.lines,
        records_written: agg.records,
        malformed_lines: agg.malformed,
        found: agg.found,
        missing,
        elapsed: start.elapsed(),
    };
    report_join(&summary, output_path);
    Ok(summary)
}

fn report_join(summary: &JoinSummary, output_path: &Path) {
    info!(
        "Wrote {} records ({} accessions found) from {} lines in {} chunks to {} in {:.2}s",
        summary.records_written,
        summary.found.len(),
        summary.lines_read,
        summary.chunks,
        output_path.display(),
        summary.elapsed.as_secs_f64()
    );
    if summary.malformed_lines > 0 {
        warn!("Skipped {} malformed mapping lines", summary.malformed_lines);
    }
    if summary.missing.is_empty() {
        info!("All accessions were found in the mapping file");
    } else {
        let shown: Vec<&str> = summary
            .missing
            .iter()
            .take(MISSING_LOG_LIMIT)
            .map(String::as_str)
            .collect();
        warn!(
            "{} accessions not found in the mapping file: {}{}",
            summary.missing.len(),
            shown.join(", "),
            if summary.missing.len() > MISSING_LOG_LIMIT { ", ..." } else { "" }
        );
    }
}

/// Run the whole join once per worker count and report wall times.
pub fn benchmark_join<P: AsRef<Path>, Q: AsRef<Path>>(
    accessions: &AccessionSet,
    mapping_path: P,
    output_path: Q,
    config: &JoinConfig,
    worker_counts: &[usize],
) -> Result<Vec<(usize, Duration)>> {
    let mut timings = Vec::with_capacity(worker_counts.len());
    for &workers in worker_counts {
        let cfg = JoinConfig {
            workers,
            show_progress: false,
            ..config.clone()
        };
        let summary = join_mapping(accessions, mapping_path.as_ref(), output_path.as_ref(), &cfg)?;
        info!("Benchmark: {} workers => {:.2}s", workers, summary.elapsed.as_secs_f64());
        timings.push((workers, summary.elapsed));
    }
    Ok(timings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(items: &[&str]) -> AccessionSet {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn read_records(path: &Path) -> BTreeSet<JoinRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| JoinRecord::parse_line(l).expect("join output must be well formed"))
            .collect()
    }

    fn cfg(workers: usize, chunk_lines: Option<usize>) -> JoinConfig {
        JoinConfig {
            workers,
            chunk_lines,
            ..JoinConfig::default()
        }
    }

    #[test]
    fn filter_chunk_counts_malformed_lines() {
        let lines: Vec<String> = ["P1.2\t10\n", "P2\t20\n", "X\tY\n", "\n", "P3\t30\n", "a\tb\tc\n"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let bytes = lines.iter().map(|l| l.len() as u64).sum();
        let chunk = Chunk { index: 4, lines, bytes };
        let outcome = filter_chunk(&chunk, &set(&["P1", "P2"]));
        assert_eq!(outcome.index, 4);
        assert_eq!(outcome.lines, 6);
        assert_eq!(outcome.bytes, 31);
        assert_eq!(outcome.malformed, 2);
        assert_eq!(
            outcome.matches,
            vec![
                JoinRecord { accession: "P1".into(), taxid: 10 },
                JoinRecord { accession: "P2".into(), taxid: 20 },
            ]
        );
    }

    #[test]
    fn scenario_join_with_one_malformed_line() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("prot.accession2taxid");
        std::fs::write(&mapping, "P1.2\t10\nP2\t20\nX\tY\n").unwrap();
        let out = dir.path().join("joined.tsv");

        let summary = join_mapping(&set(&["P1", "P2"]), &mapping, &out, &cfg(2, None)).unwrap();

        let expected: BTreeSet<JoinRecord> = [
            JoinRecord { accession: "P1".into(), taxid: 10 },
            JoinRecord { accession: "P2".into(), taxid: 20 },
        ]
        .into_iter()
        .collect();
        assert_eq!(read_records(&out), expected);
        assert_eq!(summary.malformed_lines, 1);
        assert_eq!(summary.found, set(&["P1", "P2"]));
        assert!(summary.missing.is_empty());
    }

    #[test]
    fn join_is_sound_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("map.tsv");
        let mut data = String::new();
        for i in 0..500 {
            data.push_str(&format!("ACC{}.1\t{}\n", i, i * 3));
        }
        std::fs::write(&mapping, data).unwrap();
        let out = dir.path().join("joined.tsv");

        let wanted = set(&["ACC1", "ACC250", "ACC499", "GONE1", "GONE2"]);
        let summary = join_mapping(&wanted, &mapping, &out, &cfg(4, Some(7))).unwrap();

        let records = read_records(&out);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| wanted.contains(&r.accession)));
        assert!(summary.found.iter().all(|a| wanted.contains(a)));
        assert_eq!(summary.missing, vec!["GONE1".to_string(), "GONE2".to_string()]);
        assert_eq!(summary.lines_read, 500);
        assert_eq!(summary.chunks, 72);
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("map.tsv");
        let mut data = String::new();
        for i in 0..97 {
            data.push_str(&format!("A{}\t{}\n", i % 31, i));
        }
        data.push_str("broken line\n");
        std::fs::write(&mapping, data).unwrap();
        let wanted: AccessionSet = (0..31).step_by(2).map(|i| format!("A{}", i)).collect();

        let whole = dir.path().join("whole.tsv");
        join_mapping(&wanted, &mapping, &whole, &cfg(1, Some(10_000))).unwrap();
        let reference = read_records(&whole);
        assert!(!reference.is_empty());

        for chunk in [1usize, 2, 5, 13, 98] {
            for workers in [1usize, 3] {
                let out = dir.path().join(format!("c{}_{}.tsv", chunk, workers));
                let summary = join_mapping(&wanted, &mapping, &out, &cfg(workers, Some(chunk))).unwrap();
                assert_eq!(read_records(&out), reference, "chunk={} workers={}", chunk, workers);
                assert_eq!(summary.malformed_lines, 1);
            }
        }
    }

    #[test]
    fn line_limit_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("map.tsv");
        std::fs::write(&mapping, "P1\t1\nP2\t2\nP3\t3\nP4\t4\n").unwrap();
        let out = dir.path().join("joined.tsv");
        let config = JoinConfig {
            max_lines: Some(2),
            ..cfg(2, Some(1))
        };
        let summary = join_mapping(&set(&["P1", "P2", "P3", "P4"]), &mapping, &out, &config).unwrap();
        assert_eq!(summary.lines_read, 2);
        assert_eq!(summary.missing, vec!["P3".to_string(), "P4".to_string()]);
    }

    #[test]
    fn missing_or_empty_mapping_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("joined.tsv");
        let missing = dir.path().join("nope.tsv");
        assert!(matches!(
            join_mapping(&set(&["P1"]), &missing, &out, &cfg(1, None)),
            Err(FilterError::Io { .. })
        ));

        let empty = dir.path().join("empty.tsv");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(
            join_mapping(&set(&["P1"]), &empty, &out, &cfg(1, None)),
            Err(FilterError::EmptyInput { .. })
        ));
    }

    #[test]
    fn benchmark_runs_each_worker_count() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("map.tsv");
        std::fs::write(&mapping, "P1\t1\nP2\t2\n").unwrap();
        let out = dir.path().join("joined.tsv");
        let timings =
            benchmark_join(&set(&["P1"]), &mapping, &out, &cfg(1, Some(1)), &[1, 2]).unwrap();
        assert_eq!(timings.iter().map(|(w, _)| *w).collect::<Vec<_>>(), vec![1, 2]);
    }
}
