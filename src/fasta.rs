//src/fasta.rs

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::{FilterError, Result};
use crate::reader::open_text;

/// Lazily yields the identifier of each FASTA record: the header text after `>`
/// up to the first whitespace. Sequence lines are skipped.
pub struct FastaIds {
    reader: Box<dyn BufRead + Send>,
    path: PathBuf,
    line: String,
}

impl FastaIds {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_reader(open_text(path)?, path))
    }

    pub fn from_reader(reader: Box<dyn BufRead + Send>, path: impl AsRef<Path>) -> Self {
        Self {
            reader,
            path: path.as_ref().to_path_buf(),
            line: String::new(),
        }
    }
}

impl Iterator for FastaIds {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(FilterError::io(&self.path, e))),
            }
            // Only headers matter here
            let Some(header) = self.line.strip_prefix('>') else {
                continue;
            };
            let id = header.split_whitespace().next().unwrap_or("");
            return Some(Ok(id.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor};

    #[test]
    fn yields_header_ids_only() {
        let data = ">sp|P12345|ABC_HUMAN Some protein OS=Homo\nMKV\nLLA\n>tr|Q9XYZ1|Q9XYZ1_9VIRU\nMMM\n>\n";
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(Cursor::new(data.to_string())));
        let ids: Vec<String> = FastaIds::from_reader(reader, "mem")
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(ids, vec!["sp|P12345|ABC_HUMAN", "tr|Q9XYZ1|Q9XYZ1_9VIRU", ""]);
    }
}
