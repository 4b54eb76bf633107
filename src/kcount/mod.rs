//! Distributed k-mer counting.
//!
//! Reads (and, after the first round, previous-round contigs acting as
//! seeds) stream through the aggregating store into the sharded k-mer table;
//! `finalize` then picks each record's extensions and prunes noise.

pub mod extensions;
pub mod kmer_dht;
pub mod qfilter;

use anyhow::Result;
use tracing::info;

use crate::comm::WorkerComm;
use crate::core::contigs::Contigs;
use crate::core::kmer::Kmer;
use crate::core::packed_reads::PackedReads;
use crate::kcount::extensions::QUAL_HI;
use crate::kcount::kmer_dht::{KmerDht, KmerUpdate};
use crate::utils::perc_str;

/// How many reads a worker samples when estimating table capacity.
const EST_SAMPLE_READS: usize = 100_000;

#[inline]
fn comp_ext(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        _ => 0,
    }
}

/// Submit every k-mer of `seq` with its single-base extensions. `depth` is
/// the vote weight (1 for reads); `quals` empty means uniformly high quality
/// (the seed-contig path).
fn process_seq<const N: usize>(
    dht: &mut KmerDht<N>,
    comm: &WorkerComm<N>,
    k: usize,
    seq: &str,
    quals: &[u8],
    depth: u16,
    from_ctg: bool,
) {
    let bytes = seq.as_bytes();
    if bytes.len() < k {
        return;
    }
    for i in 0..=bytes.len() - k {
        let Some(kmer) = Kmer::<N>::from_bases(&bytes[i..i + k]) else {
            continue;
        };
        let (canon, flipped) = kmer.canonical();
        let qual_at = |j: usize| -> u8 {
            if quals.is_empty() {
                QUAL_HI + 1
            } else {
                quals[j]
            }
        };
        let (mut left, mut left_qual) = if i > 0 {
            (bytes[i - 1], qual_at(i - 1))
        } else {
            (0, 0)
        };
        let (mut right, mut right_qual) = if i + k < bytes.len() {
            (bytes[i + k], qual_at(i + k))
        } else {
            (0, 0)
        };
        if !matches!(left, b'A' | b'C' | b'G' | b'T') {
            left = 0;
        }
        if !matches!(right, b'A' | b'C' | b'G' | b'T') {
            right = 0;
        }
        if flipped {
            // the stored orientation sees complemented, swapped neighbours
            (left, right) = (comp_ext(right), comp_ext(left));
            (left_qual, right_qual) = (right_qual, left_qual);
        }
        dht.add_kmer(
            comm,
            KmerUpdate { kmer: canon, count: depth, left, left_qual, right, right_qual, from_ctg },
        );
    }
}

/// Sample local reads to extrapolate the k-mer load per worker.
pub fn estimate_num_kmers<const N: usize>(
    comm: &WorkerComm<N>,
    k: usize,
    reads: &PackedReads,
) -> usize {
    let mut num_kmers = 0usize;
    let mut num_reads = 0usize;
    for read in reads.iter().take(EST_SAMPLE_READS) {
        let len = read.len();
        if len >= k {
            num_kmers += len - k + 1;
        }
        num_reads += 1;
    }
    let my_estimate = if num_reads > 0 {
        num_kmers * reads.len() / num_reads
    } else {
        0
    };
    // size for the worst-off worker so capacities match everywhere
    comm.reduce_max_i64(my_estimate as i64) as usize
}

/// Count k-mers from this worker's reads into the table.
fn count_kmers<const N: usize>(
    comm: &WorkerComm<N>,
    k: usize,
    reads: &PackedReads,
    dht: &mut KmerDht<N>,
) {
    let mut num_reads = 0i64;
    let mut tot_read_len = 0i64;
    for read in reads.iter() {
        num_reads += 1;
        if read.len() < k {
            // placeholder mates of merged pairs land here
            continue;
        }
        tot_read_len += read.len() as i64;
        let (seq, quals) = read.unpack();
        process_seq(dht, comm, k, &seq, &quals, 1, false);
    }
    dht.flush_updates(comm);
    let all_num_reads = comm.reduce_sum_i64(num_reads);
    let all_read_len = comm.reduce_sum_i64(tot_read_len);
    if comm.rank() == 0 {
        info!("Processed {} reads ({} bases) for k = {}", all_num_reads, all_read_len, k);
    }
}

/// Seed the table with k-mers from the previous round's contigs. Inserts
/// bypass the depth filter and vote with the contig's depth.
fn add_ctg_kmers<const N: usize>(
    comm: &WorkerComm<N>,
    k: usize,
    ctgs: &Contigs,
    dht: &mut KmerDht<N>,
) {
    let mut num_ctgs = 0i64;
    for ctg in ctgs.iter() {
        if ctg.seq.len() < k + 2 {
            continue;
        }
        num_ctgs += 1;
        process_seq(dht, comm, k, &ctg.seq, &[], ctg.depth_u16(), true);
    }
    dht.flush_updates(comm);
    let all_num_ctgs = comm.reduce_sum_i64(num_ctgs);
    if comm.rank() == 0 {
        info!("Seeded k-mer table from {} previous-round contigs", all_num_ctgs);
    }
}

/// The full counting stage for one round: reads, optional contig seeds, then
/// extension selection.
pub fn analyze_kmers<const N: usize>(
    comm: &WorkerComm<N>,
    k: usize,
    reads: &PackedReads,
    ctgs: &Contigs,
    dht: &mut KmerDht<N>,
) -> Result<()> {
    count_kmers(comm, k, reads, dht);
    comm.barrier();
    let max_ctgs = comm.reduce_max_i64(ctgs.len() as i64);
    if max_ctgs > 0 {
        add_ctg_kmers(comm, k, ctgs, dht);
        comm.barrier();
    }
    let before = dht.num_local_kmers() as i64;
    dht.finalize();
    let after = dht.num_local_kmers() as i64;
    let all_before = comm.reduce_sum_i64(before);
    let all_after = comm.reduce_sum_i64(after);
    if comm.rank() == 0 {
        info!(
            "Retained {} of {} k-mers after the depth filter",
            perc_str(all_after as u64, all_before as u64),
            all_before
        );
    }
    comm.barrier();
    Ok(())
}
