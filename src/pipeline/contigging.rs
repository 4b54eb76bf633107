//! One contigging round: count, traverse, optionally shuffle and extend.

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::assembly::localassm::localassm;
use crate::assembly::shuffle::shuffle_reads;
use crate::assembly::traversal::traverse_debruijn_graph;
use crate::comm::WorkerComm;
use crate::core::contigs::Contigs;
use crate::core::packed_reads::PackedReads;
use crate::io::alignments::Alns;
use crate::io::fastq::usable_checkpoint;
use crate::kcount::kmer_dht::KmerDht;
use crate::kcount::{analyze_kmers, estimate_num_kmers};

/// Contig length floor for the per-round statistics report.
const ROUND_STATS_MIN_CTG_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct LassmOptions {
    pub alns_path: PathBuf,
    pub max_kmer_len: usize,
    pub insert_avg: usize,
    pub insert_stddev: usize,
}

#[derive(Debug, Clone)]
pub struct RoundOptions {
    pub k: usize,
    pub dmin: u16,
    pub max_kmer_store_mb: u64,
    pub use_qf: bool,
    pub shuffle: bool,
    /// Dump path for this round; an existing dump short-circuits the round.
    pub checkpoint_path: Option<PathBuf>,
    pub lassm: Option<LassmOptions>,
}

/// Run one round at `opts.k`. `ctgs` carries the previous round's contigs in
/// (as seeds) and this round's contigs out.
pub fn contigging<const N: usize>(
    comm: &WorkerComm<N>,
    opts: &RoundOptions,
    reads: &mut PackedReads,
    ctgs: &mut Contigs,
) -> Result<()> {
    let k = opts.k;
    if comm.rank() == 0 {
        info!("_________________________");
        info!("Contig generation k = {}", k);
    }
    if let Some(path) = &opts.checkpoint_path {
        if usable_checkpoint(path) {
            if comm.rank() == 0 {
                info!("Round k = {} already checkpointed, loading {}", k, path.display());
            }
            ctgs.load_fasta(comm, path)?;
            return Ok(());
        }
    }

    let est_kmers = estimate_num_kmers(comm, k, reads);
    // headroom for the hash table load factor
    let mut dht = KmerDht::<N>::new(
        comm,
        k,
        est_kmers + est_kmers / 2,
        opts.max_kmer_store_mb,
        opts.use_qf,
        opts.dmin,
    );
    analyze_kmers(comm, k, reads, ctgs, &mut dht)?;
    traverse_debruijn_graph(comm, &mut dht, ctgs)?;
    drop(dht);

    if opts.shuffle {
        shuffle_reads(comm, reads, ctgs)?;
    }
    if let Some(lassm) = &opts.lassm {
        let alns = Alns::load(&lassm.alns_path, comm.rank(), comm.world_size())?;
        localassm(
            comm,
            ctgs,
            reads,
            &alns,
            k,
            lassm.max_kmer_len,
            lassm.insert_avg,
            lassm.insert_stddev,
        )?;
    }

    if let Some(path) = &opts.checkpoint_path {
        ctgs.dump_fasta(comm, path, 0)?;
    }
    ctgs.print_stats(comm, ROUND_STATS_MIN_CTG_LEN);
    comm.barrier();
    Ok(())
}
