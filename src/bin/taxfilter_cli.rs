use std::path::PathBuf;
use std::process;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::error;

use taxfilter::accessions::{load_or_extract, write_accession_file, extract_accessions_from_fasta};
use taxfilter::config::{JoinConfig, LineageConfig, PartitionConfig, PipelineConfig};
use taxfilter::filter::{direct_filter, final_filter};
use taxfilter::join::{benchmark_join, join_mapping};
use taxfilter::lineage::{read_target_names, read_taxid_list, write_taxid_list, Taxonomy};
use taxfilter::partition::{partition_records, PartitionIndex};
use taxfilter::{run_pipeline, FilterError, PipelineInputs, PipelineLayout};

#[derive(Parser)]
#[command(
    name = "taxfilter",
    version,
    about = "Filter protein accession->taxid mappings down to a taxonomic lineage"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (can be repeated)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Number of threads for the global pool (0 = all available)
    #[arg(short = 'j', long, default_value = "0", env = "TAXFILTER_THREADS", global = true)]
    threads: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract accessions from a FASTA file
    ExtractAccessions {
        fasta: PathBuf,
        #[arg(short, long, default_value = "fasta_ids.txt")]
        output: PathBuf,
    },

    /// Join FASTA accessions against an accession->taxid mapping
    JoinFilter(JoinArgs),

    /// Split joined records into taxid-range partition files
    Partition {
        input: PathBuf,
        output_dir: PathBuf,
        #[command(flatten)]
        opts: PartitionOpts,
    },

    /// List every taxid under the target ancestor names
    ResolveLineage(LineageArgs),

    /// Pull the records of listed taxids out of a partition directory
    FinalFilter {
        partition_dir: PathBuf,
        taxids: PathBuf,
        output: PathBuf,
    },

    /// Pull the records of listed taxids out of an unpartitioned file
    DirectFilter {
        input: PathBuf,
        taxids: PathBuf,
        output: PathBuf,
    },

    /// Run every stage into a work directory
    Run(RunArgs),
}

#[derive(Args)]
struct JoinOpts {
    /// Target memory per chunk, in MiB
    #[arg(long = "memory-mb", default_value = "250", env = "TAXFILTER_MEMORY_MB")]
    memory_mb: u64,

    /// Worker pool size (0 = all available)
    #[arg(short = 'p', long, default_value = "0", env = "TAXFILTER_WORKERS")]
    workers: usize,

    /// Stop after this many mapping lines
    #[arg(long)]
    max_lines: Option<u64>,

    /// Reuse an existing accession side file instead of re-reading the FASTA
    #[arg(long)]
    reuse_ids: bool,
}

impl JoinOpts {
    fn to_config(&self, show_progress: bool) -> Result<JoinConfig, FilterError> {
        let defaults = JoinConfig::default();
        let memory_budget_bytes = self.memory_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            FilterError::InvalidConfig(format!("--memory-mb {} is too large", self.memory_mb))
        })?;
        Ok(JoinConfig {
            memory_budget_bytes,
            workers: if self.workers == 0 { defaults.workers } else { self.workers },
            max_lines: self.max_lines,
            show_progress,
            ..defaults
        })
    }
}

#[derive(Args)]
struct JoinArgs {
    #[arg(short, long, default_value = "uniprot_sprot.fasta")]
    fasta: PathBuf,
    #[arg(short, long, default_value = "prot.accession2taxid.FULL")]
    mapping: PathBuf,
    #[arg(short, long, default_value = "protein_taxids.txt")]
    output: PathBuf,
    /// Accession side file (written, or read with --reuse-ids)
    #[arg(short, long, default_value = "fasta_ids.txt")]
    ids: PathBuf,
    #[command(flatten)]
    opts: JoinOpts,
    /// Time a full join once per listed worker count
    #[arg(long, num_args = 1..)]
    benchmark: Option<Vec<usize>>,
}

#[derive(Args)]
struct PartitionOpts {
    #[arg(long, default_value = "100000", env = "TAXFILTER_RANGE_SIZE")]
    range_size: u64,
    #[arg(long, default_value = "1000000", env = "TAXFILTER_CHUNK_SIZE")]
    chunk_size: usize,
    /// Maximum partition files open at once
    #[arg(long, default_value = "256", env = "TAXFILTER_MAX_OPEN")]
    max_open: usize,
}

impl PartitionOpts {
    fn to_config(&self) -> PartitionConfig {
        PartitionConfig {
            range_size: self.range_size,
            chunk_lines: self.chunk_size,
            max_open_files: self.max_open,
        }
    }
}

#[derive(Args)]
struct TargetOpts {
    /// Target ancestor scientific name (repeatable; default "Viruses")
    #[arg(short = 't', long = "target")]
    targets: Vec<String>,
    /// File of target names, one per line
    #[arg(long)]
    targets_file: Option<PathBuf>,
}

impl TargetOpts {
    fn to_config(&self) -> Result<LineageConfig, FilterError> {
        let from_file = match &self.targets_file {
            Some(path) => read_target_names(path)?,
            None => Vec::new(),
        };
        Ok(LineageConfig::from_sources(self.targets.clone(), from_file))
    }
}

#[derive(Args)]
struct LineageArgs {
    names: PathBuf,
    nodes: PathBuf,
    #[command(flatten)]
    targets: TargetOpts,
    #[arg(short, long, default_value = "virus_taxids.txt")]
    output: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    #[arg(short, long)]
    fasta: PathBuf,
    #[arg(short, long)]
    mapping: PathBuf,
    #[arg(long)]
    names: PathBuf,
    #[arg(long)]
    nodes: PathBuf,
    #[arg(short, long, default_value = "taxfilter-work")]
    workdir: PathBuf,
    #[command(flatten)]
    join: JoinOpts,
    #[command(flatten)]
    partition: PartitionOpts,
    #[command(flatten)]
    targets: TargetOpts,
}

fn spinner(color: &str, msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{color}}} {{msg}}");
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    if cli.threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global() {
            error!("Failed to configure thread pool: {}", e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli.command) {
        error!("{}", e);
        let code = match e {
            FilterError::InvalidConfig(_) => 2,
            FilterError::Io { .. } | FilterError::EmptyInput { .. } => 3,
            _ => 1,
        };
        process::exit(code);
    }
}

fn run(command: Commands) -> Result<(), FilterError> {
    match command {
        Commands::ExtractAccessions { fasta, output } => {
            let pb = spinner("blue", "Extracting accessions...");
            let set = extract_accessions_from_fasta(&fasta)?;
            write_accession_file(&set, &output)?;
            pb.finish_with_message(format!("{} accessions written to {}", set.len(), output.display()));
        }

        Commands::JoinFilter(args) => {
            let accessions = load_or_extract(&args.fasta, &args.ids, args.opts.reuse_ids)?;
            let config = args.opts.to_config(true)?;
            match args.benchmark {
                Some(counts) => {
                    let timings = benchmark_join(&accessions, &args.mapping, &args.output, &config, &counts)?;
                    println!("workers\tseconds");
                    for (workers, elapsed) in timings {
                        println!("{}\t{:.2}", workers, elapsed.as_secs_f64());
                    }
                }
                None => {
                    let s = join_mapping(&accessions, &args.mapping, &args.output, &config)?;
                    println!(
                        "matched records: {}\naccessions found: {}\naccessions missing: {}\nmalformed lines skipped: {}",
                        s.records_written,
                        s.found.len(),
                        s.missing.len(),
                        s.malformed_lines
                    );
                }
            }
        }

        Commands::Partition { input, output_dir, opts } => {
            let pb = spinner("green", "Partitioning by taxid range...");
            let s = partition_records(&input, &output_dir, &opts.to_config())?;
            pb.finish_with_message(format!(
                "{} records in {} partitions ({} lines skipped)",
                s.records,
                s.partitions.len(),
                s.skipped_lines
            ));
        }

        Commands::ResolveLineage(args) => {
            let config = args.targets.to_config()?;
            let pb = spinner("yellow", "Resolving lineages...");
            let taxonomy = Taxonomy::from_dump(&args.names, &args.nodes)?;
            let (taxids, s) = taxonomy.resolve(&config)?;
            write_taxid_list(&taxids, &args.output)?;
            pb.finish_with_message(format!(
                "{} of {} taxids written to {} ({} walks cut short)",
                s.matched,
                s.nodes,
                args.output.display(),
                s.truncated_walks
            ));
        }

        Commands::FinalFilter { partition_dir, taxids, output } => {
            let pb = spinner("cyan", "Filtering partitions...");
            let taxids = read_taxid_list(&taxids)?;
            let index = PartitionIndex::load(&partition_dir)?;
            let s = final_filter(&taxids, &index, &output)?;
            pb.finish_with_message(format!(
                "{} records written; {} taxids without a partition; {} malformed lines skipped",
                s.records_written, s.uncovered_taxids, s.malformed_lines
            ));
        }

        Commands::DirectFilter { input, taxids, output } => {
            let pb = spinner("cyan", "Filtering...");
            let taxids = read_taxid_list(&taxids)?;
            let s = direct_filter(&input, &taxids, &output)?;
            pb.finish_with_message(format!(
                "{} records written; {} malformed lines skipped",
                s.records_written, s.malformed_lines
            ));
        }

        Commands::Run(args) => {
            let config = PipelineConfig {
                join: args.join.to_config(false)?,
                partition: args.partition.to_config(),
                lineage: args.targets.to_config()?,
                reuse_accessions: args.join.reuse_ids,
            };
            let inputs = PipelineInputs {
                fasta: args.fasta,
                mapping: args.mapping,
                names: args.names,
                nodes: args.nodes,
            };
            let layout = PipelineLayout::in_dir(&args.workdir);

            let pb = spinner("green", "Running pipeline...");
            let report = run_pipeline(&inputs, &layout, &config)?;
            pb.finish_with_message("Pipeline finished.");
            println!(
                "accessions: {}\njoined records: {}\nmissing accessions: {}\nmalformed mapping lines: {}\npartitions: {}\nlineage taxids: {}\nfinal records: {}\noutput: {}",
                report.accessions,
                report.join.records_written,
                report.join.missing.len(),
                report.join.malformed_lines,
                report.partition.partitions.len(),
                report.lineage.matched,
                report.filter.records_written,
                layout.output.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn join_args(extra: &[&str]) -> JoinArgs {
        let mut argv = vec!["taxfilter", "join-filter"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::JoinFilter(args) => args,
            _ => panic!("expected join-filter"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn memory_budget_is_converted_to_bytes() {
        let config = join_args(&["--memory-mb", "2", "-p", "3"]).opts.to_config(false).unwrap();
        assert_eq!(config.memory_budget_bytes, 2 * 1024 * 1024);
        assert_eq!(config.workers, 3);
    }

    #[test]
    fn oversized_memory_budget_is_a_config_error() {
        let huge = u64::MAX.to_string();
        let err = join_args(&["--memory-mb", &huge]).opts.to_config(false).unwrap_err();
        assert!(matches!(err, FilterError::InvalidConfig(_)));
    }
}
