use anyhow::Result;
use clap::Parser;
use meta_weaver::utils::configuration::AssemblerConfig;
use std::path::PathBuf;

/// Distributed de novo metagenome assembler.
#[derive(Parser, Debug)]
#[command(name = "meta-weaver", version, about)]
struct Cli {
    /// Paired FASTQ inputs: an interleaved file, or two files joined by ':'
    #[arg(short, long = "reads", required_unless_present = "config")]
    reads: Vec<String>,

    /// TOML configuration file (CLI flags override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated ascending k values, one contigging round each
    #[arg(short, long, value_delimiter = ',')]
    kmer_lens: Option<Vec<usize>>,

    /// Number of symmetric workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output directory
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// FASTQ quality encoding offset (33 or 64)
    #[arg(long)]
    qual_offset: Option<u8>,

    /// Depth floor for k-mer retention
    #[arg(long)]
    dmin_thres: Option<u16>,

    /// Enable the first-stage k-mer counting filter
    #[arg(long)]
    use_qf: bool,

    /// Re-partition reads by contig locality after each round
    #[arg(long)]
    shuffle_reads: bool,

    /// Alignments (TSV) driving local assembly in the last round
    #[arg(long)]
    alns: Option<String>,

    /// Minimum contig length in the final FASTA
    #[arg(long)]
    min_ctg_print_len: Option<usize>,

    /// Disable per-round checkpoint dumps
    #[arg(long)]
    no_checkpoint: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let mut cfg = AssemblerConfig::load(cli.config.as_deref())?;
    if !cli.reads.is_empty() {
        cfg.reads = cli.reads;
    }
    if let Some(kmer_lens) = cli.kmer_lens {
        cfg.kmer_lens = kmer_lens;
    }
    if let Some(workers) = cli.workers {
        cfg.workers = workers;
    }
    if let Some(out_dir) = cli.out_dir {
        cfg.out_dir = out_dir;
    }
    if let Some(qual_offset) = cli.qual_offset {
        cfg.qual_offset = qual_offset;
    }
    if let Some(dmin) = cli.dmin_thres {
        cfg.dmin_thres = dmin;
    }
    if let Some(min_len) = cli.min_ctg_print_len {
        cfg.min_ctg_print_len = min_len;
    }
    if cli.use_qf {
        cfg.use_qf = true;
    }
    if cli.shuffle_reads {
        cfg.shuffle_reads = true;
    }
    if cli.alns.is_some() {
        cfg.alns_fname = cli.alns;
    }
    if cli.no_checkpoint {
        cfg.checkpoint = false;
        cfg.checkpoint_merged = false;
    }
    cfg.validate()?;

    meta_weaver::run_assembly(&cfg)
}
