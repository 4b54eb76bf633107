//! Read-to-contig alignment records.
//!
//! The aligner itself is an external collaborator; its output arrives as TSV
//! records, pre-sorted so all alignments for one read are contiguous.
//! Coordinates are 1-based inclusive.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::ops::Index;
use std::path::Path;

use crate::utils::errors::AssemblyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aln {
    pub read_id: i64,
    pub cid: i64,
    pub orient: u8,
    pub rstart: i32,
    pub rstop: i32,
    pub rlen: i32,
    pub cstart: i32,
    pub cstop: i32,
    pub clen: i32,
    pub score: i32,
}

/// This worker's shard of alignments, grouped by read.
#[derive(Debug, Default)]
pub struct Alns {
    alns: Vec<Aln>,
}

impl Alns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, aln: Aln) {
        self.alns.push(aln);
    }

    pub fn len(&self) -> usize {
        self.alns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Aln> {
        self.alns.iter()
    }

    fn parse_line(line: &str) -> Result<Aln> {
        let mut fields = line.split('\t');
        let mut next = |name: &str| {
            fields.next().with_context(|| format!("alignment record missing field '{}'", name))
        };
        let read_id: i64 = next("read_id")?.parse()?;
        let cid: i64 = next("cid")?.parse()?;
        let orient_field = next("orient")?;
        let orient = match orient_field {
            "+" => b'+',
            "-" => b'-',
            other => {
                return Err(AssemblyError::MalformedInput {
                    message: format!("bad alignment orientation '{}'", other),
                }
                .into())
            }
        };
        Ok(Aln {
            read_id,
            cid,
            orient,
            rstart: next("rstart")?.parse()?,
            rstop: next("rstop")?.parse()?,
            rlen: next("rlen")?.parse()?,
            cstart: next("cstart")?.parse()?,
            cstop: next("cstop")?.parse()?,
            clen: next("clen")?.parse()?,
            score: next("score")?.parse()?,
        })
    }

    /// Load a worker's shard: read groups deal round-robin across workers,
    /// keeping each read's alignments together.
    pub fn load(path: &Path, rank: usize, nworkers: usize) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|source| AssemblyError::FileOpen {
            path: path.display().to_string(),
            source,
        })?;
        let mut alns = Self::new();
        let mut group_read_id: Option<i64> = None;
        let mut group_index = 0usize;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let aln = Self::parse_line(&line)
                .with_context(|| format!("parsing alignment '{}'", line))?;
            if group_read_id != Some(aln.read_id) {
                if group_read_id.is_some() {
                    group_index += 1;
                }
                group_read_id = Some(aln.read_id);
            }
            if group_index % nworkers == rank {
                alns.push(aln);
            }
        }
        Ok(alns)
    }
}

impl Index<usize> for Alns {
    type Output = Aln;

    fn index(&self, index: usize) -> &Aln {
        &self.alns[index]
    }
}
