//src/chunking.rs

use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::config::MAX_CHUNK_LINES;
use crate::error::{FilterError, Result};
use crate::reader::{file_size, open_text};

/// Line length assumed when the sample yields nothing usable.
const FALLBACK_LINE_BYTES: f64 = 100.0;

/// Mean byte length (newline included) of the first `sample_lines` lines.
pub fn estimate_mean_line_bytes<P: AsRef<Path>>(path: P, sample_lines: usize) -> Result<f64> {
    let path = path.as_ref();
    let mut reader = open_text(path)?;
    let mut line = String::new();
    let mut total = 0u64;
    let mut sampled = 0usize;

    while sampled < sample_lines {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .map_err(|e| FilterError::io(path, e))?;
        if n == 0 {
            break;
        }
        total += n as u64;
        sampled += 1;
    }

    if sampled == 0 || total == 0 {
        warn!("Could not sample line sizes from {}; assuming {} bytes", path.display(), FALLBACK_LINE_BYTES);
        return Ok(FALLBACK_LINE_BYTES);
    }
    Ok(total as f64 / sampled as f64)
}

/// `budget / mean`, clamped to `[1, file_size]` and to the hard cap.
pub fn derive_chunk_lines(budget_bytes: u64, mean_line_bytes: f64, file_size: u64) -> usize {
    let mean = if mean_line_bytes.is_finite() && mean_line_bytes > 0.0 {
        mean_line_bytes
    } else {
        FALLBACK_LINE_BYTES
    };
    let raw = (budget_bytes as f64 / mean).floor();
    let raw = if raw.is_finite() { raw as u64 } else { MAX_CHUNK_LINES };
    let upper = file_size.max(1).min(MAX_CHUNK_LINES);
    raw.clamp(1, upper) as usize
}

/// Lines per chunk so that one chunk's buffer approximates `budget_bytes`.
/// An empty file is fatal: there is nothing to size against.
pub fn determine_chunk_lines<P: AsRef<Path>>(
    path: P,
    budget_bytes: u64,
    sample_lines: usize,
) -> Result<usize> {
    let path = path.as_ref();
    let size = file_size(path)?;
    if size == 0 {
        return Err(FilterError::EmptyInput {
            path: path.to_path_buf(),
        });
    }
    let mean = estimate_mean_line_bytes(path, sample_lines)?;
    let lines = derive_chunk_lines(budget_bytes, mean, size);
    debug!(
        "{}: {} bytes, ~{:.1} bytes/line => {} lines per chunk",
        path.display(),
        size,
        mean,
        lines
    );
    Ok(lines)
}

/// A bounded slice of an input file's lines.
#[derive(Debug, Default)]
pub struct Chunk {
    pub index: u64,
    pub lines: Vec<String>,
    /// Raw bytes consumed from the reader for these lines.
    pub bytes: u64,
}

/// Reads a file sequentially in chunks of at most `chunk_lines` lines.
/// The final chunk may be short; an empty source yields no chunks.
pub struct LineChunks {
    reader: Box<dyn BufRead + Send>,
    path: PathBuf,
    chunk_lines: usize,
    remaining: Option<u64>,
    next_index: u64,
    done: bool,
}

impl LineChunks {
    pub fn open<P: AsRef<Path>>(path: P, chunk_lines: usize) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_reader(open_text(path)?, path, chunk_lines))
    }

    pub fn from_reader(reader: Box<dyn BufRead + Send>, path: impl AsRef<Path>, chunk_lines: usize) -> Self {
        Self {
            reader,
            path: path.as_ref().to_path_buf(),
            chunk_lines: chunk_lines.max(1),
            remaining: None,
            next_index: 0,
            done: false,
        }
    }

    /// Stop after `max_lines` lines in total.
    pub fn with_line_limit(mut self, max_lines: Option<u64>) -> Self {
        self.remaining = max_lines;
        self
    }
}

impl Iterator for LineChunks {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let want = match self.remaining {
            Some(0) => {
                self.done = true;
                return None;
            }
            Some(left) => (left.min(self.chunk_lines as u64)) as usize,
            None => self.chunk_lines,
        };

        // Cap the up-front reservation; a huge estimate must not allocate eagerly.
        let mut lines = Vec::with_capacity(want.min(1 << 16));
        let mut bytes = 0u64;
        while lines.len() < want {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    self.done = true;
                    break;
                }
                Ok(n) => {
                    bytes += n as u64;
                    lines.push(line);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(FilterError::io(&self.path, e)));
                }
            }
        }

        if let Some(left) = self.remaining.as_mut() {
            *left -= lines.len() as u64;
        }
        if lines.is_empty() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;
        Some(Ok(Chunk { index, lines, bytes }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    fn chunks_of(data: &str, n: usize, limit: Option<u64>) -> Vec<Vec<String>> {
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(Cursor::new(data.to_string())));
        LineChunks::from_reader(reader, "mem", n)
            .with_line_limit(limit)
            .map(|c| c.unwrap().lines)
            .collect()
    }

    #[test]
    fn final_chunk_may_be_short() {
        let chunks = chunks_of("a\nb\nc\nd\ne\n", 2, None);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], vec!["e\n".to_string()]);
        assert!(chunks_of("", 2, None).is_empty());
    }

    #[test]
    fn chunks_are_numbered_and_sized() {
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(Cursor::new("ab\nc\ndef\n".to_string())));
        let chunks: Vec<Chunk> = LineChunks::from_reader(reader, "mem", 2)
            .map(|c| c.unwrap())
            .collect();
        let meta: Vec<(u64, u64)> = chunks.iter().map(|c| (c.index, c.bytes)).collect();
        assert_eq!(meta, vec![(0, 5), (1, 4)]);
    }

    #[test]
    fn line_limit_is_respected() {
        let chunks = chunks_of("a\nb\nc\nd\ne\n", 2, Some(3));
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn chunk_size_clamps() {
        // 1000 bytes budget / 10 bytes per line
        assert_eq!(derive_chunk_lines(1000, 10.0, 1_000_000), 100);
        // never above the file size in bytes
        assert_eq!(derive_chunk_lines(1000, 1.0, 50), 50);
        // never below one line
        assert_eq!(derive_chunk_lines(1, 500.0, 1_000_000), 1);
        // never above the hard cap
        assert_eq!(
            derive_chunk_lines(u64::MAX, 0.001, u64::MAX) as u64,
            MAX_CHUNK_LINES
        );
        // bad estimates fall back instead of dividing by zero
        assert_eq!(derive_chunk_lines(1000, 0.0, 1_000_000), 10);
    }

    #[test]
    fn empty_mapping_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tsv");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            determine_chunk_lines(&path, 1024, 10),
            Err(FilterError::EmptyInput { .. })
        ));
    }

    #[test]
    fn sampled_estimate_uses_head_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.tsv");
        // every line is 9 bytes including the newline
        std::fs::write(&path, "ABCD\t123\n".repeat(50)).unwrap();
        let mean = estimate_mean_line_bytes(&path, 10).unwrap();
        assert!((mean - 9.0).abs() < f64::EPSILON);
        assert_eq!(determine_chunk_lines(&path, 90, 10).unwrap(), 10);
    }
}
