//src/config.rs

use crate::error::{FilterError, Result};

/// Default in-memory budget for one join chunk (250 MiB).
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 250 * 1024 * 1024;

/// Lines sampled from the head of the mapping file to estimate line length.
pub const DEFAULT_SAMPLE_LINES: usize = 1000;

/// Hard upper bound on lines per chunk, whatever the estimate says.
pub const MAX_CHUNK_LINES: u64 = 1_000_000_000;

/// Width of one taxid partition.
pub const DEFAULT_RANGE_SIZE: u64 = 100_000;

/// Lines read per partitioner chunk.
pub const DEFAULT_PARTITION_CHUNK_LINES: usize = 1_000_000;

/// Upper bound on partition files held open at once.
pub const DEFAULT_MAX_OPEN_PARTITIONS: usize = 256;

pub const DEFAULT_TARGET_NAME: &str = "Viruses";

/// Settings for the chunked parallel join.
#[derive(Debug, Clone)]
pub struct JoinConfig {
    pub memory_budget_bytes: u64,
    pub sample_lines: usize,
    /// Size of the worker pool.
    pub workers: usize,
    /// Skip the size estimate and use this many lines per chunk.
    pub chunk_lines: Option<usize>,
    /// Stop after this many mapping lines (trial runs).
    pub max_lines: Option<u64>,
    pub show_progress: bool,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            sample_lines: DEFAULT_SAMPLE_LINES,
            workers: rayon::current_num_threads(),
            chunk_lines: None,
            max_lines: None,
            show_progress: false,
        }
    }
}

impl JoinConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(FilterError::InvalidConfig("worker count must be at least 1".into()));
        }
        if self.memory_budget_bytes == 0 {
            return Err(FilterError::InvalidConfig("memory budget must be non-zero".into()));
        }
        if self.sample_lines == 0 {
            return Err(FilterError::InvalidConfig("sample size must be at least 1 line".into()));
        }
        if self.chunk_lines == Some(0) {
            return Err(FilterError::InvalidConfig("chunk size must be at least 1 line".into()));
        }
        Ok(())
    }
}

/// Settings for the taxid range partitioner.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub range_size: u64,
    pub chunk_lines: usize,
    pub max_open_files: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            range_size: DEFAULT_RANGE_SIZE,
            chunk_lines: DEFAULT_PARTITION_CHUNK_LINES,
            max_open_files: DEFAULT_MAX_OPEN_PARTITIONS,
        }
    }
}

impl PartitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.range_size == 0 {
            return Err(FilterError::InvalidConfig("range size must be non-zero".into()));
        }
        if self.chunk_lines == 0 {
            return Err(FilterError::InvalidConfig("chunk size must be at least 1 line".into()));
        }
        if self.max_open_files == 0 {
            return Err(FilterError::InvalidConfig(
                "at least one partition file must be allowed open".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for the lineage resolver.
#[derive(Debug, Clone)]
pub struct LineageConfig {
    /// Scientific names of the ancestors to select under.
    pub target_names: Vec<String>,
}

impl Default for LineageConfig {
    fn default() -> Self {
        Self {
            target_names: vec![DEFAULT_TARGET_NAME.to_string()],
        }
    }
}

impl LineageConfig {
    /// Build from CLI names plus names read from a file; falls back to the default
    /// target when both are empty.
    pub fn from_sources(names: Vec<String>, file_names: Vec<String>) -> Self {
        let mut target_names: Vec<String> = names
            .into_iter()
            .chain(file_names)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        target_names.sort();
        target_names.dedup();
        if target_names.is_empty() {
            return Self::default();
        }
        Self { target_names }
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_names.iter().all(|n| n.trim().is_empty()) {
            return Err(FilterError::InvalidConfig("no target ancestor names given".into()));
        }
        Ok(())
    }
}

/// Settings for a whole pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub join: JoinConfig,
    pub partition: PartitionConfig,
    pub lineage: LineageConfig,
    /// Reuse an existing accession side file instead of re-reading the FASTA.
    pub reuse_accessions: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.join.validate()?;
        self.partition.validate()?;
        self.lineage.validate()
    }
}
