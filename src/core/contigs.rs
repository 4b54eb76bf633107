//! Ordered per-worker contig collection with FASTA round-tripping.
//!
//! Dumps write `>Contig<id> <depth>` headers with the sequence in canonical
//! orientation (the lexicographically smaller of the sequence and its reverse
//! complement). Loading re-partitions the file by byte range so every contig
//! is ingested by exactly one worker regardless of how it was written.

use crate::comm::WorkerComm;
use crate::core::sequence::revcomp_checked;
use crate::utils::{perc_str, size_str};
use anyhow::{bail, Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Contig {
    pub id: i64,
    pub seq: String,
    pub depth: f64,
}

impl Contig {
    /// Depth saturated to u16 for seed-weighted k-mer counting.
    pub fn depth_u16(&self) -> u16 {
        self.depth.round().clamp(1.0, u16::MAX as f64) as u16
    }
}

#[derive(Debug, Default)]
pub struct Contigs {
    contigs: Vec<Contig>,
}

impl Contigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_contig(&mut self, contig: Contig) {
        self.contigs.push(contig);
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    pub fn clear(&mut self) {
        self.contigs.clear();
        self.contigs.shrink_to_fit();
    }

    pub fn set_capacity(&mut self, cap: usize) {
        self.contigs.reserve(cap);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Contig> {
        self.contigs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Contig> {
        self.contigs.iter_mut()
    }

    /// This worker's FASTA section, canonical orientation, one sequence line
    /// per contig.
    fn fasta_section(&self, min_ctg_len: usize) -> String {
        let mut out = String::new();
        for ctg in &self.contigs {
            if ctg.seq.len() < min_ctg_len {
                continue;
            }
            let rc = revcomp_checked(&ctg.seq);
            let seq = if rc < ctg.seq { &rc } else { &ctg.seq };
            out.push_str(&format!(">Contig{} {}\n{}\n", ctg.id, ctg.depth, seq));
        }
        out
    }

    /// Collective dump: sections gather to rank 0 in rank order.
    pub fn dump_fasta<const N: usize>(
        &self,
        comm: &WorkerComm<N>,
        path: &Path,
        min_ctg_len: usize,
    ) -> Result<()> {
        let section = self.fasta_section(min_ctg_len);
        let bytes = section.len() as i64;
        if let Some(sections) = comm.gather_strings(section) {
            let mut file = File::create(path)
                .with_context(|| format!("could not create {}", path.display()))?;
            for section in &sections {
                file.write_all(section.as_bytes())?;
            }
        }
        let all_bytes = comm.reduce_sum_i64(bytes);
        if comm.rank() == 0 {
            info!("Wrote {} to {}", size_str(all_bytes as u64), path.display());
        }
        comm.barrier();
        Ok(())
    }

    /// First `>Contig` header at or after `from`, skipping any partial line
    /// the seek landed in. Deterministic, so a worker's stop offset always
    /// equals the next worker's start offset.
    fn header_offset(path: &Path, from: u64, file_size: u64) -> Result<u64> {
        if from == 0 {
            return Ok(0);
        }
        if from >= file_size {
            return Ok(file_size);
        }
        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(from))?;
        let mut pos = from;
        let mut line = String::new();
        // discard the partial line the seek landed in
        let n = reader.read_line(&mut line)?;
        pos += n as u64;
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(file_size);
            }
            if line.starts_with(">Contig") {
                return Ok(pos);
            }
            pos += n as u64;
        }
    }

    /// Collective load: worker r reads the byte range `[rS/W, (r+1)S/W)`
    /// advanced to record boundaries.
    pub fn load_fasta<const N: usize>(&mut self, comm: &WorkerComm<N>, path: &Path) -> Result<()> {
        self.contigs.clear();
        let file_size = std::fs::metadata(path)
            .with_context(|| format!("could not open contigs file {}", path.display()))?
            .len();
        let rank = comm.rank() as u64;
        let nworkers = comm.world_size() as u64;
        let start = Self::header_offset(path, file_size * rank / nworkers, file_size)?;
        let stop = Self::header_offset(path, file_size * (rank + 1) / nworkers, file_size)?;

        let mut reader = BufReader::new(File::open(path)?);
        reader.seek(SeekFrom::Start(start))?;
        let mut pos = start;
        let mut tot_len = 0u64;
        let mut header = String::new();
        let mut seq = String::new();
        while pos < stop {
            header.clear();
            seq.clear();
            let nh = reader.read_line(&mut header)?;
            if nh == 0 {
                break;
            }
            let ns = reader.read_line(&mut seq)?;
            if ns == 0 {
                bail!("truncated contig record at byte {} in {}", pos, path.display());
            }
            pos += (nh + ns) as u64;
            let header = header.trim_end();
            let seq = seq.trim_end();
            let body = header
                .strip_prefix(">Contig")
                .with_context(|| format!("bad contig header '{}'", header))?;
            let mut fields = body.split_whitespace();
            let id: i64 = fields
                .next()
                .and_then(|v| v.parse().ok())
                .with_context(|| format!("bad contig id in header '{}'", header))?;
            let depth: f64 = fields
                .next()
                .and_then(|v| v.parse().ok())
                .with_context(|| format!("bad contig depth in header '{}'", header))?;
            tot_len += seq.len() as u64;
            self.add_contig(Contig { id, seq: seq.to_string(), depth });
        }
        comm.barrier();
        let all_ctgs = comm.reduce_sum_i64(self.contigs.len() as i64);
        let all_len = comm.reduce_sum_i64(tot_len as i64);
        if comm.rank() == 0 {
            info!(
                "Loaded {} contigs ({}) from {}",
                all_ctgs,
                size_str(all_len as u64),
                path.display()
            );
        }
        Ok(())
    }

    /// Collective assembly summary over contigs of at least `min_ctg_len`.
    pub fn print_stats<const N: usize>(&self, comm: &WorkerComm<N>, min_ctg_len: usize) {
        let mut num_ctgs = 0i64;
        let mut tot_len = 0i64;
        let mut max_len = 0i64;
        let mut tot_depth = 0.0f64;
        let mut length_sums: Vec<(usize, i64)> =
            vec![(1, 0), (5, 0), (10, 0), (25, 0), (50, 0)];
        for ctg in &self.contigs {
            let len = ctg.seq.len();
            if len < min_ctg_len {
                continue;
            }
            num_ctgs += 1;
            tot_len += len as i64;
            tot_depth += ctg.depth;
            max_len = max_len.max(len as i64);
            for (kbp, sum) in length_sums.iter_mut() {
                if len >= *kbp * 1000 {
                    *sum += len as i64;
                }
            }
        }
        let all_num_ctgs = comm.reduce_sum_i64(num_ctgs);
        let all_tot_len = comm.reduce_sum_i64(tot_len);
        let all_max_len = comm.reduce_max_i64(max_len);
        let all_tot_depth = comm.reduce_sum_f64(tot_depth);
        let bucket_sums: Vec<i64> = length_sums
            .iter()
            .map(|(_, sum)| comm.reduce_sum_i64(*sum))
            .collect();
        if comm.rank() == 0 {
            info!("Assembly statistics (contig lengths >= {})", min_ctg_len);
            info!("    Number of contigs:      {}", all_num_ctgs);
            info!("    Total assembled length: {}", all_tot_len);
            if all_num_ctgs > 0 {
                info!("    Average contig depth:   {:.2}", all_tot_depth / all_num_ctgs as f64);
            }
            info!("    Max. contig length:     {}", all_max_len);
            for ((kbp, _), all_sum) in length_sums.iter().zip(&bucket_sums) {
                info!(
                    "        > {}kbp: {}",
                    kbp,
                    perc_str(*all_sum as u64, all_tot_len.max(0) as u64)
                );
            }
        }
        comm.barrier();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fasta_section_canonical() {
        let mut ctgs = Contigs::new();
        // TTTT's revcomp AAAA is smaller, so the dump flips it
        ctgs.add_contig(Contig { id: 0, seq: "TTTT".to_string(), depth: 2.0 });
        ctgs.add_contig(Contig { id: 1, seq: "ACGG".to_string(), depth: 1.0 });
        let section = ctgs.fasta_section(0);
        assert_eq!(section, ">Contig0 2\nAAAA\n>Contig1 1\nACGG\n");
    }

    #[test]
    fn test_fasta_section_min_len_filter() {
        let mut ctgs = Contigs::new();
        ctgs.add_contig(Contig { id: 0, seq: "ACGTACGT".to_string(), depth: 2.0 });
        ctgs.add_contig(Contig { id: 1, seq: "ACG".to_string(), depth: 1.0 });
        let section = ctgs.fasta_section(5);
        assert!(section.contains(">Contig0"));
        assert!(!section.contains(">Contig1"));
    }

    #[test]
    fn test_depth_u16_saturates() {
        let ctg = Contig { id: 0, seq: "A".to_string(), depth: 1e9 };
        assert_eq!(ctg.depth_u16(), u16::MAX);
        let ctg = Contig { id: 0, seq: "A".to_string(), depth: 0.2 };
        assert_eq!(ctg.depth_u16(), 1);
    }
}
