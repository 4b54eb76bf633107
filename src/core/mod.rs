//! Core data structures: packed k-mers, packed reads, contigs and sequence
//! helpers.

pub mod contigs;
pub mod kmer;
pub mod packed_reads;
pub mod sequence;

pub use contigs::{Contig, Contigs};
pub use kmer::Kmer;
pub use packed_reads::{PackedRead, PackedReads};
