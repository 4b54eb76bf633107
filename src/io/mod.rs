//! File formats: paired FASTQ input, read merging, alignment records.

pub mod alignments;
pub mod fastq;
pub mod merge;
