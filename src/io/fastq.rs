//! Paired FASTQ input.
//!
//! Supports plain and gzipped files, either one interleaved file or two
//! files joined by ':'. Records are the standard four lines; pair names must
//! end in /1 and /2 and differ only in that digit. Any malformed record
//! fails the job.

use crate::utils::errors::AssemblyError;
use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub id: String,
    pub seq: String,
    pub quals: String,
}

pub struct FastqReader {
    path: String,
    reader: Box<dyn BufRead + Send>,
}

impl FastqReader {
    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).map_err(|source| AssemblyError::FileOpen {
            path: path.to_string(),
            source,
        })?;
        let reader: Box<dyn BufRead + Send> = if path.ends_with(".gz") {
            Box::new(BufReader::new(MultiGzDecoder::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };
        Ok(Self { path: path.to_string(), reader })
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// The next four-line record, or `None` at end of file.
    pub fn next_record(&mut self) -> Result<Option<FastqRecord>> {
        let Some(id_line) = self.read_line()? else {
            return Ok(None);
        };
        if id_line.is_empty() {
            return Ok(None);
        }
        if !id_line.starts_with('@') {
            bail!(AssemblyError::MalformedInput {
                message: format!("expected '@' header, got '{}' in {}", id_line, self.path),
            });
        }
        // drop any comment after the name
        let id = id_line[1..].split_whitespace().next().unwrap_or("").to_string();
        let truncated = |id: &str, path: &str| AssemblyError::TruncatedRecord {
            id: id.to_string(),
            path: path.to_string(),
        };
        let seq = self.read_line()?.ok_or_else(|| truncated(&id, &self.path))?;
        let plus = self.read_line()?.ok_or_else(|| truncated(&id, &self.path))?;
        if !plus.starts_with('+') {
            bail!(AssemblyError::MalformedInput {
                message: format!("expected '+' separator for read '{}' in {}", id, self.path),
            });
        }
        let quals = self.read_line()?.ok_or_else(|| truncated(&id, &self.path))?;
        if seq.len() != quals.len() {
            bail!(AssemblyError::MalformedInput {
                message: format!(
                    "read '{}' has {} bases but {} quality scores in {}",
                    id,
                    seq.len(),
                    quals.len(),
                    self.path
                ),
            });
        }
        Ok(Some(FastqRecord { id, seq: seq.to_ascii_uppercase(), quals }))
    }
}

/// Mate names must differ only in the trailing pair digit.
fn validate_pair(r1: &FastqRecord, r2: &FastqRecord) -> Result<()> {
    let ok = r1.id.len() == r2.id.len()
        && !r1.id.is_empty()
        && r1.id.ends_with('1')
        && r2.id.ends_with('2')
        && r1.id[..r1.id.len() - 1] == r2.id[..r2.id.len() - 1];
    if !ok {
        bail!(AssemblyError::MismatchedPair { id1: r1.id.clone(), id2: r2.id.clone() });
    }
    Ok(())
}

/// A source of read pairs: one interleaved file or a ':'-joined file pair.
pub enum PairedFastqReader {
    Interleaved(FastqReader),
    Split(FastqReader, FastqReader),
}

impl PairedFastqReader {
    pub fn open(spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            Some((path1, path2)) => Ok(Self::Split(
                FastqReader::open(path1).context("opening first file of pair")?,
                FastqReader::open(path2).context("opening second file of pair")?,
            )),
            None => Ok(Self::Interleaved(FastqReader::open(spec)?)),
        }
    }

    pub fn next_pair(&mut self) -> Result<Option<(FastqRecord, FastqRecord)>> {
        let (r1, r2) = match self {
            Self::Interleaved(reader) => {
                let Some(r1) = reader.next_record()? else {
                    return Ok(None);
                };
                let r2 = reader.next_record()?.ok_or_else(|| AssemblyError::MalformedInput {
                    message: format!("interleaved file ends mid-pair after '{}'", r1.id),
                })?;
                (r1, r2)
            }
            Self::Split(reader1, reader2) => {
                let (r1, r2) = (reader1.next_record()?, reader2.next_record()?);
                match (r1, r2) {
                    (Some(r1), Some(r2)) => (r1, r2),
                    (None, None) => return Ok(None),
                    (Some(r), None) | (None, Some(r)) => {
                        bail!(AssemblyError::MalformedInput {
                            message: format!("paired files have unequal read counts near '{}'", r.id),
                        })
                    }
                }
            }
        };
        validate_pair(&r1, &r2)?;
        Ok(Some((r1, r2)))
    }
}

/// Raw qualities (offset removed), failing on out-of-range characters.
pub fn decode_quals(quals: &str, qual_offset: u8) -> Result<Vec<u8>> {
    quals
        .bytes()
        .map(|q| {
            q.checked_sub(qual_offset).with_context(|| {
                format!("quality char '{}' below the configured offset {}", q as char, qual_offset)
            })
        })
        .collect()
}

/// True when the file exists and is non-empty; used for checkpoint skips.
pub fn usable_checkpoint(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fastq(records: &[(&str, &str, &str)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (id, seq, quals) in records {
            writeln!(file, "@{}\n{}\n+\n{}", id, seq, quals).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_interleaved_pairs() {
        let file = write_fastq(&[
            ("r1/1", "ACGT", "IIII"),
            ("r1/2", "TTTT", "IIII"),
            ("r2/1", "GGGG", "IIII"),
            ("r2/2", "CCCC", "IIII"),
        ]);
        let mut reader =
            PairedFastqReader::open(file.path().to_str().unwrap()).unwrap();
        let (r1, r2) = reader.next_pair().unwrap().unwrap();
        assert_eq!(r1.id, "r1/1");
        assert_eq!(r2.id, "r1/2");
        let (r3, _) = reader.next_pair().unwrap().unwrap();
        assert_eq!(r3.seq, "GGGG");
        assert!(reader.next_pair().unwrap().is_none());
    }

    #[test]
    fn test_mismatched_pair_ids_fail() {
        let file = write_fastq(&[("r1/1", "ACGT", "IIII"), ("r7/2", "TTTT", "IIII")]);
        let mut reader =
            PairedFastqReader::open(file.path().to_str().unwrap()).unwrap();
        assert!(reader.next_pair().is_err());
    }

    #[test]
    fn test_truncated_record_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "@r1/1\nACGT\n+\n").unwrap();
        file.flush().unwrap();
        let mut reader = FastqReader::open(file.path().to_str().unwrap()).unwrap();
        assert!(reader.next_record().is_err());
    }

    #[test]
    fn test_decode_quals() {
        assert_eq!(decode_quals("I#", 33).unwrap(), vec![40, 2]);
        assert!(decode_quals(" ", 64).is_err());
    }
}
