//src/reader.rs

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{IoContext, Result};

const BUF_CAPACITY: usize = 1 << 20;

pub(crate) fn is_gz(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

/// Open a text source for buffered reading; `.gz` files are decompressed on the fly.
pub fn open_text<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let f = File::open(path).with_path(path)?;

    let reader: Box<dyn BufRead + Send> = if is_gz(path) {
        Box::new(BufReader::with_capacity(BUF_CAPACITY, MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::with_capacity(BUF_CAPACITY, f))
    };
    Ok(reader)
}

/// Create (truncating) an output file behind a buffered writer.
pub fn create_text<P: AsRef<Path>>(path: P) -> Result<BufWriter<File>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
    }
    let f = File::create(path).with_path(path)?;
    Ok(BufWriter::with_capacity(BUF_CAPACITY, f))
}

/// Byte size of a file on disk.
pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    let path = path.as_ref();
    Ok(std::fs::metadata(path).with_path(path)?.len())
}
