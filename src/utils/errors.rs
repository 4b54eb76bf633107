//! Error taxonomy for the assembler.
//!
//! Malformed input and distributed invariant violations fail the whole job;
//! recoverable events (ambiguous overlaps, unusable alignments, empty
//! contigs) are dropped and counted by the stage that sees them.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("malformed input: mismatched pair ids '{id1}' and '{id2}'")]
    MismatchedPair { id1: String, id2: String },

    #[error("malformed input: truncated FASTQ record near '{id}' in {path}")]
    TruncatedRecord { id: String, path: String },

    #[error("malformed input: {message}")]
    MalformedInput { message: String },

    #[error("could not open {path}: {source}")]
    FileOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invariant violation: {message}")]
    InvariantViolation { message: String },

    #[error("configuration error: {field} is invalid: {reason}")]
    InvalidConfig { field: String, reason: String },
}
