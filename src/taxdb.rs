//src/taxdb.rs

use std::io::BufRead;
use std::path::Path;

use ahash::AHashMap;
use log::{debug, info, warn};

use crate::error::{FilterError, IoContext, Result};
use crate::reader::open_text;
use crate::types::{NameClass, NameRecord, TaxonomyNode};

/// child_taxid -> parent_taxid
pub type ParentMap = AHashMap<u32, u32>;
/// taxid -> scientific name
pub type NameMap = AHashMap<u32, String>;

/// Split an NCBI dump row (`field\t|\tfield\t|`) into trimmed fields.
fn dump_fields(line: &str) -> Vec<&str> {
    let line = line.trim_end_matches(['\n', '\r']);
    let line = line.strip_suffix("\t|").unwrap_or(line);
    line.split("\t|\t").map(str::trim).collect()
}

/// Parse one `nodes.dmp` row: `taxid | parent_taxid | rank | ...`.
pub fn parse_node_line(line: &str) -> Option<TaxonomyNode> {
    let fields = dump_fields(line);
    if fields.len() < 2 {
        return None;
    }
    let taxid = fields[0].parse().ok()?;
    let parent_taxid = fields[1].parse().ok()?;
    Some(TaxonomyNode { taxid, parent_taxid })
}

/// Parse one `names.dmp` row: `taxid | name | unique name | name class |`.
pub fn parse_name_line(line: &str) -> Option<NameRecord> {
    let fields = dump_fields(line);
    if fields.len() < 4 {
        return None;
    }
    let taxid = fields[0].parse().ok()?;
    Some(NameRecord {
        taxid,
        name: fields[1].to_string(),
        name_class: NameClass::parse(fields[3]),
    })
}

/// Read `nodes.dmp` into a `ParentMap`. Malformed rows are skipped.
pub fn read_nodes<P: AsRef<Path>>(path: P) -> Result<ParentMap> {
    let path = path.as_ref();
    let mut parent_map = ParentMap::new();
    let mut skipped = 0u64;

    for line in open_text(path)?.lines() {
        let line = line.with_path(path)?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_node_line(&line) {
            Some(node) => {
                parent_map.insert(node.taxid, node.parent_taxid);
            }
            None => {
                skipped += 1;
                debug!("Skipping malformed node row: {:?}", line);
            }
        }
    }

    if skipped > 0 {
        warn!("Skipped {} malformed rows in {}", skipped, path.display());
    }
    info!("Loaded {} taxonomy nodes from {}", parent_map.len(), path.display());
    Ok(parent_map)
}

/// Collect scientific names from name rows. The first scientific name seen for
/// a taxid wins; later ones are logged and ignored.
pub fn scientific_names<I>(rows: I) -> NameMap
where
    I: IntoIterator<Item = NameRecord>,
{
    let mut name_map = NameMap::new();
    for rec in rows {
        if rec.name_class != NameClass::ScientificName {
            continue;
        }
        if let Some(existing) = name_map.get(&rec.taxid) {
            debug!(
                "Duplicate scientific name for taxid {}: keeping {:?}, ignoring {:?}",
                rec.taxid, existing, rec.name
            );
            continue;
        }
        name_map.insert(rec.taxid, rec.name);
    }
    name_map
}

/// Read `names.dmp`, keeping only `scientific name` rows.
pub fn read_scientific_names<P: AsRef<Path>>(path: P) -> Result<NameMap> {
    let path = path.as_ref();
    let mut read_err = None;
    let mut skipped = 0u64;

    // Rows stream straight into the map; the first read error ends the stream.
    let rows = open_text(path)?
        .lines()
        .map_while(|line| match line {
            Ok(line) => Some(line),
            Err(e) => {
                read_err = Some(e);
                None
            }
        })
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_name_line(&line) {
            Some(rec) if rec.name_class == NameClass::ScientificName => Some(rec),
            Some(_) => None,
            None => {
                skipped += 1;
                debug!("Skipping malformed name row: {:?}", line);
                None
            }
        });
    let name_map = scientific_names(rows);

    if let Some(e) = read_err {
        return Err(FilterError::io(path, e));
    }
    if skipped > 0 {
        warn!("Skipped {} malformed rows in {}", skipped, path.display());
    }
    info!("Loaded {} scientific names from {}", name_map.len(), path.display());
    Ok(name_map)
}
