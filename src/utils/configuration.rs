//! Configuration for the assembly pipeline.
//!
//! Loads defaults, then an optional TOML file, then `METAWEAVER_`-prefixed
//! environment overrides, into one serde struct validated up front. All the
//! knobs the core recognizes live here so nothing in the pipeline reaches for
//! process-wide state.

use crate::utils::errors::AssemblyError;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level assembler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerConfig {
    /// Paired FASTQ inputs: one interleaved file, or two files joined by ':'.
    pub reads: Vec<String>,
    /// Ascending k values, one contigging round each.
    pub kmer_lens: Vec<usize>,
    /// FASTQ quality encoding offset (33 or 64).
    pub qual_offset: u8,
    /// Depth floor for k-mer retention (seed k-mers bypass it).
    pub dmin_thres: u16,
    /// Aggregate k-mer buffer budget in MB; 0 sizes from free memory.
    pub max_kmer_store_mb: u64,
    /// Bound on in-flight active messages per worker pair.
    pub max_rpcs_in_flight: usize,
    /// First-stage counting filter in front of the k-mer table.
    pub use_qf: bool,
    /// Re-partition reads by contig locality after each round.
    pub shuffle_reads: bool,
    /// Lower length bound for the final FASTA output.
    pub min_ctg_print_len: usize,
    /// Number of symmetric workers.
    pub workers: usize,
    /// Keep per-round contig dumps and skip rounds whose dump exists.
    pub checkpoint: bool,
    /// Write merged reads to `<basename>-merged.fastq`.
    pub checkpoint_merged: bool,
    /// Output directory for dumps and the final assembly.
    pub out_dir: PathBuf,
    /// Previous-round contigs to seed from (restart entry point).
    pub ctgs_fname: Option<String>,
    /// Alignments (TSV) driving local assembly; none disables extension.
    pub alns_fname: Option<String>,
    /// Insert size mean, used for walk and pair-projection limits.
    pub insert_avg: usize,
    /// Insert size standard deviation.
    pub insert_stddev: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            reads: Vec::new(),
            kmer_lens: vec![21, 33, 55, 77, 99],
            qual_offset: 33,
            dmin_thres: 2,
            max_kmer_store_mb: 0,
            max_rpcs_in_flight: 100,
            use_qf: false,
            shuffle_reads: false,
            min_ctg_print_len: 500,
            workers: num_cpus::get(),
            checkpoint: true,
            checkpoint_merged: true,
            out_dir: PathBuf::from("."),
            ctgs_fname: None,
            alns_fname: None,
            insert_avg: 320,
            insert_stddev: 30,
        }
    }
}

impl AssemblerConfig {
    /// Load defaults, an optional TOML file, and environment overrides.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);
        if let Some(path) = config_path {
            builder = builder.add_source(
                File::new(
                    path.to_str().context("config path is not valid UTF-8")?,
                    FileFormat::Toml,
                )
                .required(true),
            );
        }
        builder = builder.add_source(Environment::with_prefix("METAWEAVER").separator("__"));
        let cfg: Self = builder
            .build()
            .context("failed to load configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.qual_offset != 33 && self.qual_offset != 64 {
            return Err(AssemblyError::InvalidConfig {
                field: "qual_offset".into(),
                reason: format!("must be 33 or 64, got {}", self.qual_offset),
            }
            .into());
        }
        if self.kmer_lens.is_empty() {
            return Err(AssemblyError::InvalidConfig {
                field: "kmer_lens".into(),
                reason: "at least one k value is required".into(),
            }
            .into());
        }
        if !self.kmer_lens.windows(2).all(|w| w[0] < w[1]) {
            return Err(AssemblyError::InvalidConfig {
                field: "kmer_lens".into(),
                reason: format!("must be strictly ascending, got {:?}", self.kmer_lens),
            }
            .into());
        }
        for &k in &self.kmer_lens {
            if !(15..=160).contains(&k) {
                return Err(AssemblyError::InvalidConfig {
                    field: "kmer_lens".into(),
                    reason: format!("k must be within 15..=160, got {}", k),
                }
                .into());
            }
        }
        if self.workers == 0 {
            return Err(AssemblyError::InvalidConfig {
                field: "workers".into(),
                reason: "need at least one worker".into(),
            }
            .into());
        }
        if self.max_rpcs_in_flight < 2 {
            return Err(AssemblyError::InvalidConfig {
                field: "max_rpcs_in_flight".into(),
                reason: "need at least 2 in-flight messages for progress".into(),
            }
            .into());
        }
        Ok(())
    }

    /// `contigs-<k>.fasta` path for a round's checkpoint dump.
    pub fn round_dump_path(&self, k: usize) -> PathBuf {
        self.out_dir.join(format!("contigs-{}.fasta", k))
    }

    /// `<basename>-merged.fastq` path for the merged-read checkpoint.
    pub fn merged_reads_path(&self, reads_fname: &str) -> PathBuf {
        // for paired files take the second of the pair, like the original
        let fname = reads_fname.rsplit(':').next().unwrap_or(reads_fname);
        let base = Path::new(fname)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| fname.to_string());
        let stem = base
            .strip_suffix(".gz")
            .unwrap_or(&base)
            .trim_end_matches(".fastq")
            .trim_end_matches(".fq");
        self.out_dir.join(format!("{}-merged.fastq", stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        AssemblerConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_qual_offset() {
        let cfg = AssemblerConfig { qual_offset: 40, ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_unsorted_kmer_lens() {
        let cfg = AssemblerConfig { kmer_lens: vec![33, 21], ..Default::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_merged_reads_path() {
        let cfg = AssemblerConfig::default();
        assert_eq!(
            cfg.merged_reads_path("data/lib1_1.fastq:data/lib1_2.fastq"),
            PathBuf::from("./lib1_2-merged.fastq")
        );
        assert_eq!(
            cfg.merged_reads_path("reads.fq.gz"),
            PathBuf::from("./reads-merged.fastq")
        );
    }
}
