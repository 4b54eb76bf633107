//! # meta-weaver
//!
//! A distributed de novo metagenome assembler. Symmetric workers shard the
//! reads, count k-mers into a distributed table, walk the de Bruijn graph
//! into contigs, and optionally re-shuffle reads by contig locality and
//! extend contig ends from aligned reads.

pub mod assembly;
pub mod comm;
pub mod core;
pub mod io;
pub mod kcount;
pub mod pipeline;
pub mod utils;

pub use crate::core::{Contig, Contigs, Kmer, PackedRead, PackedReads};
pub use crate::pipeline::run_assembly;
pub use crate::utils::configuration::AssemblerConfig;

/// Result type used throughout the crate.
pub type Result<T> = anyhow::Result<T>;
