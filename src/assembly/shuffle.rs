//! Locality-aware read shuffling.
//!
//! After a round's contigs are built, every read pair moves to the worker
//! that owns the contig it most likely came from, so local assembly can run
//! on local data. Matching goes through a sharded `k-mer -> contig id` map
//! built from the contigs at a small shuffle k; reads vote by sampling every
//! 32nd k-mer. Reads that match nothing scatter to a seeded-random worker to
//! preserve load balance. Mates always travel in the same message.

use ahash::AHashMap;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use tracing::{info, warn};

use crate::comm::{AggrStore, Envelope, Lane, LaneTracker, Message, WorkerComm};
use crate::core::kmer::{stable_hash_u64, Kmer, MINIMIZER_LEN};
use crate::core::packed_reads::{PackedRead, PackedReads};
use crate::core::Contigs;
use crate::utils::perc_str;

/// The small k used for read-to-contig matching.
pub const SHUFFLE_KMER_LEN: usize = 21;
/// Batched k-mer queries per destination before the round trip is issued.
const MAX_REQ_BUFF: usize = 1000;
/// Sample every this-many k-mers of a read when voting.
const READ_KMER_STRIDE: usize = 32;

fn id_target_rank(id: i64, nworkers: usize) -> usize {
    (stable_hash_u64(id as u64) % nworkers as u64) as usize
}

/// Shuffle k-mers shard by minimizer so graph neighbourhoods stay together;
/// producers and consumers must agree on this function.
fn kmer_target_rank(kmer: &Kmer<1>, nworkers: usize) -> usize {
    (kmer.minimizer_hash(MINIMIZER_LEN) % nworkers as u64) as usize
}

/// Build the sharded `kmer -> cid` map from this round's contigs. On
/// collisions the first writer wins.
fn compute_kmer_to_cid_map<const N: usize>(
    comm: &WorkerComm<N>,
    ctgs: &Contigs,
) -> AHashMap<u64, i64> {
    let nworkers = comm.world_size();
    let mut kmer_to_cid: AHashMap<u64, i64> = AHashMap::new();
    let tracker = RefCell::new(LaneTracker::new());
    let mut store: AggrStore<(u64, i64), N> = AggrStore::new(
        comm,
        Lane::KmerCids,
        "kmer cid store",
        std::mem::size_of::<(u64, i64)>(),
        0,
        Message::KmerCidBatch,
    );
    {
        let map = &mut kmer_to_cid;
        let tracker = &tracker;
        let mut service = |env: Envelope<N>| match env.msg {
            Message::KmerCidBatch(batch) => {
                for (kmer, cid) in batch {
                    map.entry(kmer).or_insert(cid);
                }
                tracker.borrow_mut().on_batch(Lane::KmerCids);
            }
            Message::FlushMarker { lane, batches } => {
                tracker.borrow_mut().on_marker(lane, batches);
            }
            other => panic!("unexpected message while building kmer->cid map: {:?}", other),
        };
        for ctg in ctgs.iter() {
            for kmer in Kmer::<1>::get_kmers(SHUFFLE_KMER_LEN, &ctg.seq) {
                let (canon, _) = kmer.canonical();
                let target = kmer_target_rank(&canon, nworkers);
                store.update(comm, target, (canon.packed_u64(), ctg.id), &mut service);
            }
        }
        store.flush_send(comm, &mut service);
        comm.pump_until(&mut service, &mut || {
            tracker.borrow().drained(Lane::KmerCids, nworkers)
        });
    }
    comm.barrier();
    kmer_to_cid
}

#[derive(Default)]
struct KmerReqBuf {
    kmers: Vec<u64>,
    read_ids: Vec<i64>,
}

/// Query the k-mer map for every local read and accumulate the resulting
/// `cid -> read ids` votes on the contig owners.
fn compute_cid_to_reads_map<const N: usize>(
    comm: &WorkerComm<N>,
    reads: &PackedReads,
    kmer_to_cid: &AHashMap<u64, i64>,
) -> AHashMap<i64, Vec<i64>> {
    let nworkers = comm.world_size();
    let mut cid_to_reads: AHashMap<i64, Vec<i64>> = AHashMap::new();
    let tracker = RefCell::new(LaneTracker::new());
    let mut cid_store: AggrStore<(i64, i64), N> = AggrStore::new(
        comm,
        Lane::CidReads,
        "cid reads store",
        std::mem::size_of::<(i64, i64)>(),
        0,
        Message::CidReadBatch,
    );
    {
        let votes = &mut cid_to_reads;
        let tracker = &tracker;
        let mut service = |env: Envelope<N>| -> Option<Vec<i64>> {
            match env.msg {
                Message::CidQuery { kmers } => {
                    let cids = kmers
                        .iter()
                        .map(|kmer| kmer_to_cid.get(kmer).copied().unwrap_or(-1))
                        .collect();
                    comm.send(env.src, Message::CidQueryReply { cids });
                    None
                }
                Message::CidQueryReply { cids } => Some(cids),
                Message::CidReadBatch(batch) => {
                    for (cid, read_id) in batch {
                        votes.entry(cid).or_default().push(read_id);
                    }
                    tracker.borrow_mut().on_batch(Lane::CidReads);
                    None
                }
                Message::FlushMarker { lane, batches } => {
                    tracker.borrow_mut().on_marker(lane, batches);
                    None
                }
                other => panic!("unexpected message while matching reads: {:?}", other),
            }
        };
        let mut req_bufs: Vec<KmerReqBuf> = (0..nworkers).map(|_| KmerReqBuf::default()).collect();
        let mut run_query = |target: usize,
                             buf: &mut KmerReqBuf,
                             cid_store: &mut AggrStore<(i64, i64), N>,
                             service: &mut dyn FnMut(Envelope<N>) -> Option<Vec<i64>>| {
            if buf.kmers.is_empty() {
                return;
            }
            let kmers = std::mem::take(&mut buf.kmers);
            let read_ids = std::mem::take(&mut buf.read_ids);
            let cids = comm.rpc(target, Message::CidQuery { kmers }, service);
            debug_assert_eq!(cids.len(), read_ids.len());
            for (cid, read_id) in cids.into_iter().zip(read_ids) {
                if cid != -1 {
                    let owner = id_target_rank(cid, nworkers);
                    cid_store.update(comm, owner, (cid, read_id), &mut |env| {
                        service(env);
                    });
                }
            }
        };
        for (read1, read2) in reads.pairs() {
            let read_id = read1.pair_id();
            for read in [read1, read2] {
                let (seq, _) = read.unpack();
                if seq.len() < SHUFFLE_KMER_LEN {
                    continue;
                }
                let kmers = Kmer::<1>::get_kmers(SHUFFLE_KMER_LEN, &seq);
                let mut i = 0;
                while i < kmers.len() {
                    let (canon, _) = kmers[i].canonical();
                    let target = kmer_target_rank(&canon, nworkers);
                    req_bufs[target].kmers.push(canon.packed_u64());
                    req_bufs[target].read_ids.push(read_id);
                    if req_bufs[target].kmers.len() == MAX_REQ_BUFF {
                        let mut buf = std::mem::take(&mut req_bufs[target]);
                        run_query(target, &mut buf, &mut cid_store, &mut service);
                    }
                    i += READ_KMER_STRIDE;
                }
            }
        }
        for target in 0..nworkers {
            let mut buf = std::mem::take(&mut req_bufs[target]);
            run_query(target, &mut buf, &mut cid_store, &mut service);
        }
        let mut plain_service = |env: Envelope<N>| {
            service(env);
        };
        cid_store.flush_send(comm, &mut plain_service);
        comm.pump_until(&mut plain_service, &mut || {
            tracker.borrow().drained(Lane::CidReads, nworkers)
        });
    }
    comm.barrier();
    cid_to_reads
}

/// Reserve contiguous read slots through the global counter and write the
/// `read id -> target worker` map, sharded by read id hash.
fn compute_read_locations<const N: usize>(
    comm: &WorkerComm<N>,
    cid_to_reads: &AHashMap<i64, Vec<i64>>,
) -> AHashMap<i64, u32> {
    let nworkers = comm.world_size();
    let num_mapped: i64 = cid_to_reads.values().map(|v| v.len() as i64 * 2).sum();
    let all_mapped = comm.reduce_sum_i64(num_mapped);
    let max_mapped = comm.reduce_max_i64(num_mapped);
    if comm.rank() == 0 && max_mapped > 0 {
        info!(
            "Mapped reads per worker: avg {} max {} balance {:.3}",
            all_mapped / nworkers as i64,
            max_mapped,
            all_mapped as f64 / nworkers as f64 / max_mapped as f64
        );
    }
    comm.global_counter_reset();
    let mut read_slot = comm.global_fetch_add(num_mapped);
    comm.barrier();
    let block = (all_mapped as f64 / nworkers as f64).ceil().max(1.0) as i64;
    let mut read_to_target: AHashMap<i64, u32> = AHashMap::new();
    let tracker = RefCell::new(LaneTracker::new());
    let mut store: AggrStore<(i64, u32), N> = AggrStore::new(
        comm,
        Lane::ReadTargets,
        "read target store",
        std::mem::size_of::<(i64, u32)>(),
        0,
        Message::ReadTargetBatch,
    );
    {
        let map = &mut read_to_target;
        let tracker = &tracker;
        let mut service = |env: Envelope<N>| match env.msg {
            Message::ReadTargetBatch(batch) => {
                for (read_id, target) in batch {
                    map.insert(read_id, target);
                }
                tracker.borrow_mut().on_batch(Lane::ReadTargets);
            }
            Message::FlushMarker { lane, batches } => {
                tracker.borrow_mut().on_marker(lane, batches);
            }
            other => panic!("unexpected message while assigning read targets: {:?}", other),
        };
        for read_ids in cid_to_reads.values() {
            for &read_id in read_ids {
                let target = ((read_slot / block) as u32).min(nworkers as u32 - 1);
                let owner = id_target_rank(read_id, nworkers);
                store.update(comm, owner, (read_id, target), &mut service);
                // each entry stands for a pair
                read_slot += 2;
            }
        }
        store.flush_send(comm, &mut service);
        comm.pump_until(&mut service, &mut || {
            tracker.borrow().drained(Lane::ReadTargets, nworkers)
        });
    }
    comm.barrier();
    read_to_target
}

/// Move every pair to its assigned worker; unassigned pairs scatter to a
/// seeded-random worker so the load stays balanced.
fn move_reads_to_targets<const N: usize>(
    comm: &WorkerComm<N>,
    reads: &PackedReads,
    read_to_target: &AHashMap<i64, u32>,
) -> Vec<PackedRead> {
    let nworkers = comm.world_size();
    let mut new_reads: Vec<PackedRead> = Vec::new();
    let mut num_not_found = 0i64;
    let tracker = RefCell::new(LaneTracker::new());
    let mut store: AggrStore<(PackedRead, PackedRead), N> = AggrStore::new(
        comm,
        Lane::ReadPairs,
        "read seq store",
        600,
        0,
        Message::ReadPairBatch,
    );
    let mut rng = StdRng::seed_from_u64((comm.rank() as u64) << 32 | nworkers as u64);
    {
        let incoming = &mut new_reads;
        let tracker = &tracker;
        let mut service = |env: Envelope<N>| -> Option<Option<u32>> {
            match env.msg {
                Message::TargetQuery { read_id } => {
                    let target = read_to_target.get(&read_id).copied();
                    comm.send(env.src, Message::TargetQueryReply(target));
                    None
                }
                Message::TargetQueryReply(target) => Some(target),
                Message::ReadPairBatch(batch) => {
                    for (read1, read2) in batch {
                        incoming.push(read1);
                        incoming.push(read2);
                    }
                    tracker.borrow_mut().on_batch(Lane::ReadPairs);
                    None
                }
                Message::FlushMarker { lane, batches } => {
                    tracker.borrow_mut().on_marker(lane, batches);
                    None
                }
                other => panic!("unexpected message while moving reads: {:?}", other),
            }
        };
        for (read1, read2) in reads.pairs() {
            let read_id = read1.pair_id();
            let owner = id_target_rank(read_id, nworkers);
            let target = if owner == comm.rank() {
                read_to_target.get(&read_id).copied()
            } else {
                comm.rpc(owner, Message::TargetQuery { read_id }, &mut service)
            };
            let target = match target {
                Some(t) => t as usize,
                None => {
                    num_not_found += 1;
                    rng.gen_range(0..nworkers)
                }
            };
            assert!(target < nworkers, "read target {} out of range", target);
            store.update(comm, target, (read1.clone(), read2.clone()), &mut |env| {
                service(env);
            });
        }
        let mut plain_service = |env: Envelope<N>| {
            service(env);
        };
        store.flush_send(comm, &mut plain_service);
        comm.pump_until(&mut plain_service, &mut || {
            tracker.borrow().drained(Lane::ReadPairs, nworkers)
        });
    }
    comm.barrier();
    let all_not_found = comm.reduce_sum_i64(num_not_found);
    let all_pairs = comm.reduce_sum_i64(reads.num_pairs() as i64);
    if comm.rank() == 0 {
        info!(
            "No contig target for {} read pairs",
            perc_str(all_not_found as u64, all_pairs.max(0) as u64)
        );
    }
    new_reads
}

/// Re-partition reads so each pair lands on the worker owning its contig.
pub fn shuffle_reads<const N: usize>(
    comm: &WorkerComm<N>,
    reads: &mut PackedReads,
    ctgs: &Contigs,
) -> Result<()> {
    let all_reads_before = comm.reduce_sum_i64(reads.len() as i64);
    let kmer_to_cid = compute_kmer_to_cid_map(comm, ctgs);
    let cid_to_reads = compute_cid_to_reads_map(comm, reads, &kmer_to_cid);
    let read_to_target = compute_read_locations(comm, &cid_to_reads);
    let new_reads = move_reads_to_targets(comm, reads, &read_to_target);

    let qual_offset = reads.qual_offset();
    *reads = PackedReads::from_reads(qual_offset, new_reads);

    let num_received = reads.len() as i64;
    let all_received = comm.reduce_sum_i64(num_received);
    let max_received = comm.reduce_max_i64(num_received);
    if comm.rank() == 0 {
        if max_received > 0 {
            info!(
                "Shuffled read balance {:.3}",
                all_received as f64 / comm.world_size() as f64 / max_received as f64
            );
        }
        if all_received != all_reads_before {
            warn!(
                "Not all reads shuffled: expected {} but moved {}",
                all_reads_before, all_received
            );
        }
    }
    comm.barrier();
    Ok(())
}
