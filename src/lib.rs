// src/lib.rs
pub mod accessions;
pub mod chunking;
pub mod config;
pub mod error;
pub mod fasta;
pub mod filter;
pub mod join;
pub mod lineage;
pub mod partition;
pub mod reader;
pub mod taxdb;
pub mod types;

use std::path::{Path, PathBuf};

use log::info;

use crate::accessions::load_or_extract;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::filter::final_filter;
use crate::join::join_mapping;
use crate::lineage::{write_taxid_list, Taxonomy};
use crate::partition::{partition_records, PartitionIndex};
use crate::types::{FilterSummary, JoinSummary, LineageSummary, PartitionSummary};

pub use crate::error::FilterError;

/// Inputs of a full run.
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub fasta: PathBuf,
    pub mapping: PathBuf,
    pub names: PathBuf,
    pub nodes: PathBuf,
}

/// Where a full run puts its intermediate and final files.
#[derive(Debug, Clone)]
pub struct PipelineLayout {
    pub accessions: PathBuf,
    pub joined: PathBuf,
    pub partitions: PathBuf,
    pub taxids: PathBuf,
    pub output: PathBuf,
}

impl PipelineLayout {
    pub fn in_dir<P: AsRef<Path>>(work_dir: P) -> Self {
        let dir = work_dir.as_ref();
        Self {
            accessions: dir.join("fasta_ids.txt"),
            joined: dir.join("protein_taxids.txt"),
            partitions: dir.join("partitions"),
            taxids: dir.join("target_taxids.txt"),
            output: dir.join("filtered_protein_taxids.txt"),
        }
    }
}

/// Per-stage summaries of a full run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub accessions: usize,
    pub join: JoinSummary,
    pub partition: PartitionSummary,
    pub lineage: LineageSummary,
    pub filter: FilterSummary,
}

/// Run all four stages in order: extract accessions, join them against the
/// mapping, partition the joined records by taxid range, resolve the target
/// lineage and pull its records out of the partitions.
pub fn run_pipeline(
    inputs: &PipelineInputs,
    layout: &PipelineLayout,
    config: &PipelineConfig,
) -> Result<PipelineReport> {
    config.validate()?;

    let accessions = load_or_extract(&inputs.fasta, &layout.accessions, config.reuse_accessions)?;
    let join = join_mapping(&accessions, &inputs.mapping, &layout.joined, &config.join)?;
    let partition = partition_records(&layout.joined, &layout.partitions, &config.partition)?;

    let taxonomy = Taxonomy::from_dump(&inputs.names, &inputs.nodes)?;
    let (taxids, lineage) = taxonomy.resolve(&config.lineage)?;
    write_taxid_list(&taxids, &layout.taxids)?;

    let index = PartitionIndex::from_ranges(&layout.partitions, &partition.partitions)?;
    let filter = final_filter(&taxids, &index, &layout.output)?;

    info!(
        "Pipeline done: {} accessions, {} joined ({} missing), {} partitions, {} lineage taxids, {} final records",
        accessions.len(),
        join.records_written,
        join.missing.len(),
        partition.partitions.len(),
        taxids.len(),
        filter.records_written
    );

    Ok(PipelineReport {
        accessions: accessions.len(),
        join,
        partition,
        lineage,
        filter,
    })
}
