//src/lineage.rs

use std::io::{BufRead, Write};
use std::path::Path;

use ahash::AHashSet;
use log::{debug, info, warn};

use crate::config::LineageConfig;
use crate::error::{IoContext, Result};
use crate::reader::{create_text, open_text};
use crate::taxdb::{read_nodes, read_scientific_names, NameMap, ParentMap};
use crate::types::{LineageSummary, ROOT_TAXID};

/// Parent-pointer taxonomy plus scientific names.
pub struct Taxonomy {
    parents: ParentMap,
    names: NameMap,
}

impl Taxonomy {
    pub fn new(parents: ParentMap, names: NameMap) -> Self {
        Self { parents, names }
    }

    pub fn from_dump<P: AsRef<Path>, Q: AsRef<Path>>(names_path: P, nodes_path: Q) -> Result<Self> {
        let names = read_scientific_names(names_path)?;
        let parents = read_nodes(nodes_path)?;
        Ok(Self::new(parents, names))
    }

    pub fn node_count(&self) -> usize {
        self.parents.len()
    }

    /// Ancestor chain of `taxid`, always ending in the root.
    ///
    /// The walk stops at the root, at a taxid absent from the node table, or on
    /// revisiting a taxid (a cycle in malformed input). The boolean is false when
    /// the walk stopped early for either of the last two reasons.
    pub fn lineage(&self, taxid: u32) -> (Vec<u32>, bool) {
        let mut seen = AHashSet::new();
        self.lineage_with(taxid, &mut seen)
    }

    fn lineage_with(&self, taxid: u32, seen: &mut AHashSet<u32>) -> (Vec<u32>, bool) {
        seen.clear();
        let mut chain = Vec::new();
        let mut current = taxid;
        let mut complete = true;

        while current != ROOT_TAXID {
            let Some(&parent) = self.parents.get(&current) else {
                complete = false;
                break;
            };
            if !seen.insert(current) {
                debug!("Cycle in taxonomy while walking up from {} (at {})", taxid, current);
                complete = false;
                break;
            }
            chain.push(current);
            current = parent;
        }
        chain.push(ROOT_TAXID);
        (chain, complete)
    }

    /// Every taxid in the node table whose lineage contains one of the
    /// `target_names`, sorted ascending.
    pub fn resolve(&self, config: &LineageConfig) -> Result<(Vec<u32>, LineageSummary)> {
        config.validate()?;
        let targets: AHashSet<&str> = config.target_names.iter().map(String::as_str).collect();

        let mut summary = LineageSummary {
            nodes: self.node_count(),
            ..LineageSummary::default()
        };
        let mut matched = Vec::new();
        let mut seen = AHashSet::new();

        for &taxid in self.parents.keys() {
            let (chain, complete) = self.lineage_with(taxid, &mut seen);
            if !complete {
                summary.truncated_walks += 1;
            }
            let mut hit = false;
            for id in &chain {
                match self.names.get(id) {
                    Some(name) => {
                        if targets.contains(name.as_str()) {
                            hit = true;
                            break;
                        }
                    }
                    None => summary.missing_names += 1,
                }
            }
            if hit {
                matched.push(taxid);
            }
        }

        matched.sort_unstable();
        summary.matched = matched.len();
        info!(
            "Resolved {} of {} taxids under {:?}",
            summary.matched, summary.nodes, config.target_names
        );
        if summary.truncated_walks > 0 {
            warn!(
                "{} lineage walks ended early (missing parent or cycle)",
                summary.truncated_walks
            );
        }
        if summary.missing_names > 0 {
            debug!("{} lineage steps had no scientific name", summary.missing_names);
        }
        Ok((matched, summary))
    }
}

/// Write taxids one per line.
pub fn write_taxid_list<P: AsRef<Path>>(taxids: &[u32], path: P) -> Result<()> {
    let path = path.as_ref();
    let mut out = create_text(path)?;
    for taxid in taxids {
        writeln!(out, "{}", taxid).with_path(path)?;
    }
    out.flush().with_path(path)
}

/// Read a taxid list: one per line, blank lines ignored, non-numeric lines
/// skipped with a warning. Returned sorted and deduplicated.
pub fn read_taxid_list<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let mut taxids = Vec::new();
    for (n, line) in open_text(path)?.lines().enumerate() {
        let line = line.with_path(path)?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.parse::<u32>() {
            Ok(t) => taxids.push(t),
            Err(_) => warn!("{}:{}: not a taxid: {:?}", path.display(), n + 1, trimmed),
        }
    }
    taxids.sort_unstable();
    taxids.dedup();
    info!("Read {} taxids from {}", taxids.len(), path.display());
    Ok(taxids)
}

/// Read target ancestor names, one per line.
pub fn read_target_names<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let mut names = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line.with_path(path)?;
        let name = line.trim();
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy(nodes: &[(u32, u32)], names: &[(u32, &str)]) -> Taxonomy {
        Taxonomy::new(
            nodes.iter().copied().collect(),
            names.iter().map(|(t, n)| (*t, n.to_string())).collect(),
        )
    }

    #[test]
    fn scenario_viruses_subtree() {
        let tax = taxonomy(
            &[(1, 1), (2, 1), (3, 2)],
            &[(1, "root"), (2, "Viruses"), (3, "PhageX")],
        );
        let (taxids, summary) = tax.resolve(&LineageConfig::default()).unwrap();
        assert_eq!(taxids, vec![2, 3]);
        assert_eq!(summary.matched, 2);
        assert_eq!(summary.truncated_walks, 0);
    }

    #[test]
    fn walk_terminates_at_root() {
        let tax = taxonomy(&[(1, 1), (2, 1), (3, 2), (4, 3), (5, 4)], &[]);
        for t in 1..=5 {
            let (chain, complete) = tax.lineage(t);
            assert!(complete);
            assert_eq!(chain.last(), Some(&ROOT_TAXID));
            assert_eq!(chain.first(), Some(&t));
        }
        assert_eq!(tax.lineage(5).0, vec![5, 4, 3, 2, 1]);
        assert_eq!(tax.lineage(1).0, vec![1]);
    }

    #[test]
    fn dangling_parent_and_cycles_stop_the_walk() {
        let tax = taxonomy(&[(1, 1), (10, 99), (20, 21), (21, 20)], &[]);
        let (chain, complete) = tax.lineage(10);
        assert!(!complete);
        assert_eq!(chain, vec![10, 1]);

        let (chain, complete) = tax.lineage(20);
        assert!(!complete);
        assert_eq!(chain, vec![20, 21, 1]);

        // Unknown taxid: chain is just the root.
        assert_eq!(tax.lineage(12345).0, vec![1]);
    }

    #[test]
    fn missing_names_are_skipped_and_targets_combine() {
        let tax = taxonomy(
            &[(1, 1), (2, 1), (3, 2), (4, 3), (5, 1), (6, 5)],
            &[(1, "root"), (2, "Viruses"), (4, "PhageY"), (5, "Bacteria"), (6, "E. coli")],
        );
        assert_eq!(tax.node_count(), 6);
        assert_eq!(tax.lineage(4), (vec![4, 3, 2, 1], true));

        let cfg = LineageConfig {
            target_names: vec!["Viruses".into(), "Bacteria".into()],
        };
        let (taxids, summary) = tax.resolve(&cfg).unwrap();
        assert_eq!(taxids, vec![2, 3, 4, 5, 6]);
        assert!(summary.missing_names > 0);
    }

    #[test]
    fn taxid_list_round_trip_skips_junk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("virus.txt");
        write_taxid_list(&[3, 2, 10239], &path).unwrap();
        let mut body = std::fs::read_to_string(&path).unwrap();
        body.push_str("\nnot-a-taxid\n2\n");
        std::fs::write(&path, body).unwrap();
        assert_eq!(read_taxid_list(&path).unwrap(), vec![2, 3, 10239]);
    }

    #[test]
    fn target_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.txt");
        std::fs::write(&path, "Viruses\n\n  Bacteria \n").unwrap();
        assert_eq!(read_target_names(&path).unwrap(), vec!["Viruses", "Bacteria"]);
    }
}
