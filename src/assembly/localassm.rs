//! Local assembly: extend contig ends with the reads that align past them.
//!
//! Alignments nominate reads for a contig end; the reads gather on the
//! contig's owner; each end is then extended by repeated walks over a small
//! local mer graph, shrinking the mer length on dead ends and growing it
//! through forks and repeats, keeping the longest walk found.

use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use rayon::prelude::*;
use std::cell::RefCell;
use tracing::info;

use crate::comm::{AggrStore, Envelope, Lane, LaneTracker, Message, WorkerComm};
use crate::core::contigs::{Contig, Contigs};
use crate::core::kmer::stable_hash_u64;
use crate::core::packed_reads::PackedReads;
use crate::core::sequence::revcomp_checked;
use crate::io::alignments::{Aln, Alns};
use crate::kcount::extensions::{choose_ext, ExtVotes, EXT_DEADEND, EXT_FORK};
use crate::utils::perc_str;

/// Count mers from at most this many reads per contig end.
const LASSM_MAX_COUNT_MERS_READS: usize = 2000;
/// Smallest mer length the iterative walks will try.
const LASSM_MIN_KMER_LEN: usize = 21;
/// Step between successive mer lengths.
const LASSM_SHIFT_SIZE: isize = 8;
/// Unaligned tail below which a read end counts as reaching the contig end.
const ALN_UNALIGNED_THRES: i32 = 5;

/// Where a read maps on a contig: which end it extends and in which
/// orientation it aligned.
#[derive(Debug, Clone, Copy)]
pub struct CtgInfo {
    pub cid: i64,
    pub orient: u8,
    pub side: u8,
}

#[derive(Debug, Clone)]
pub struct ReadCtgUpdate {
    pub read_id: i64,
    pub info: CtgInfo,
}

/// A read delivered to a contig end, already oriented to read off the end.
#[derive(Debug, Clone)]
pub struct ReadSeq {
    pub read_id: i64,
    pub seq: String,
    pub quals: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CtgData {
    pub cid: i64,
    pub seq: String,
    pub depth: f64,
}

#[derive(Debug, Clone)]
pub struct CtgReadData {
    pub cid: i64,
    pub side: u8,
    pub read: ReadSeq,
}

/// A contig with the reads nominated for each of its ends.
#[derive(Debug)]
pub struct CtgWithReads {
    pub cid: i64,
    pub seq: String,
    pub depth: f64,
    pub reads_left: Vec<ReadSeq>,
    pub reads_right: Vec<ReadSeq>,
}

fn id_target_rank(id: i64, nworkers: usize) -> usize {
    (stable_hash_u64(id as u64) % nworkers as u64) as usize
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AlnStatus {
    NoAln,
    OverlapsContig,
    ExtendsContig,
}

fn classify_aln(runaligned: i32, cunaligned: i32) -> AlnStatus {
    if runaligned > cunaligned && cunaligned < ALN_UNALIGNED_THRES {
        return AlnStatus::ExtendsContig;
    }
    if runaligned <= cunaligned && runaligned < ALN_UNALIGNED_THRES {
        return AlnStatus::OverlapsContig;
    }
    AlnStatus::NoAln
}

/// Pick the best-scoring usable alignment for the read group starting at
/// `i`; leaves `i` at the first alignment of the next read.
fn get_best_aln_for_read(
    alns: &Alns,
    i: &mut usize,
    num_alns_invalid: &mut i64,
) -> Option<(Aln, AlnStatus, AlnStatus)> {
    let mut best: Option<(Aln, AlnStatus, AlnStatus)> = None;
    let mut best_score = 0;
    let mut group_read_id: Option<i64> = None;
    while *i < alns.len() {
        let aln = &alns[*i];
        if let Some(read_id) = group_read_id {
            if aln.read_id != read_id {
                break;
            }
        }
        group_read_id = Some(aln.read_id);
        *i += 1;
        if aln.score < best_score {
            continue;
        }
        let (start_status, end_status) = if aln.orient == b'+' {
            (
                classify_aln(aln.rstart - 1, aln.cstart - 1),
                classify_aln(aln.rlen - aln.rstop, aln.clen - aln.cstop),
            )
        } else {
            // '-' strand alignments run against the reverse complement
            (
                classify_aln(aln.rstart - 1, aln.clen - aln.cstop),
                classify_aln(aln.rlen - aln.rstop, aln.cstart - 1),
            )
        };
        if start_status == AlnStatus::NoAln || end_status == AlnStatus::NoAln {
            *num_alns_invalid += 1;
            continue;
        }
        best_score = aln.score;
        best = Some((aln.clone(), start_status, end_status));
    }
    best
}

/// Could this read's mate land on the same contig? If so there is no point
/// projecting it off the end.
fn pair_overlap(aln: &Aln, min_pair_len: i32) -> bool {
    if aln.orient == b'+' {
        min_pair_len - aln.rlen - aln.rstart + 1 <= aln.clen - aln.cstart
    } else {
        min_pair_len - 2 * aln.rlen + aln.rstart - 1 <= aln.cstart
    }
}

type ReadsToCtgsMap = AHashMap<i64, Vec<CtgInfo>>;

fn service_read_ctgs<const N: usize>(
    map: &mut ReadsToCtgsMap,
    tracker: &RefCell<LaneTracker>,
    env: Envelope<N>,
) {
    match env.msg {
        Message::ReadCtgBatch(batch) => {
            for update in batch {
                map.entry(update.read_id).or_default().push(update.info);
            }
            tracker.borrow_mut().on_batch(Lane::ReadCtgs);
        }
        Message::FlushMarker { lane, batches } => {
            tracker.borrow_mut().on_marker(lane, batches);
        }
        other => panic!("unexpected message while mapping reads to contigs: {:?}", other),
    }
}

/// Turn alignments into per-read contig-end nominations, sharded by read id.
fn process_alns<const N: usize>(
    comm: &WorkerComm<N>,
    alns: &Alns,
    insert_avg: usize,
    insert_stddev: usize,
) -> Result<ReadsToCtgsMap> {
    let nworkers = comm.world_size();
    let min_pair_len = (insert_avg + 3 * insert_stddev) as i32;
    let mut reads_to_ctgs: ReadsToCtgsMap = AHashMap::new();
    let tracker = RefCell::new(LaneTracker::new());
    let mut store: AggrStore<ReadCtgUpdate, N> = AggrStore::new(
        comm,
        Lane::ReadCtgs,
        "reads to contigs",
        std::mem::size_of::<ReadCtgUpdate>(),
        0,
        Message::ReadCtgBatch,
    );
    let mut num_direct = 0i64;
    let mut num_proj = 0i64;
    let mut num_invalid = 0i64;
    {
        let map = &mut reads_to_ctgs;
        let tracker = &tracker;
        let mut service = |env: Envelope<N>| service_read_ctgs(map, tracker, env);
        let mut i = 0usize;
        while i < alns.len() {
            let Some((aln, start_status, end_status)) =
                get_best_aln_for_read(alns, &mut i, &mut num_invalid)
            else {
                continue;
            };
            // a direct extension off the start or the end of the contig
            let side = if start_status == AlnStatus::ExtendsContig {
                Some(if aln.orient == b'+' { b'L' } else { b'R' })
            } else if end_status == AlnStatus::ExtendsContig {
                Some(if aln.orient == b'+' { b'R' } else { b'L' })
            } else {
                None
            };
            if let Some(side) = side {
                num_direct += 1;
                let update = ReadCtgUpdate {
                    read_id: aln.read_id,
                    info: CtgInfo { cid: aln.cid, orient: aln.orient, side },
                };
                let target = id_target_rank(update.read_id, nworkers);
                store.update(comm, target, update, &mut service);
            }
            // project the mate off the far end when the pair cannot overlap
            if !pair_overlap(&aln, min_pair_len) {
                num_proj += 1;
                let update = ReadCtgUpdate {
                    read_id: -aln.read_id,
                    info: CtgInfo {
                        cid: aln.cid,
                        orient: if aln.orient == b'+' { b'-' } else { b'+' },
                        side: if aln.orient == b'+' { b'R' } else { b'L' },
                    },
                };
                let target = id_target_rank(update.read_id, nworkers);
                store.update(comm, target, update, &mut service);
            }
        }
        store.flush_send(comm, &mut service);
        comm.pump_until(
            &mut |env| service_read_ctgs(map, tracker, env),
            &mut || tracker.borrow().drained(Lane::ReadCtgs, nworkers),
        );
    }
    comm.barrier();
    let all_alns = comm.reduce_sum_i64(alns.len() as i64);
    let all_invalid = comm.reduce_sum_i64(num_invalid);
    let all_direct = comm.reduce_sum_i64(num_direct);
    let all_proj = comm.reduce_sum_i64(num_proj);
    if comm.rank() == 0 {
        info!("Processed {} alignments:", all_alns);
        info!("  invalid:   {}", perc_str(all_invalid as u64, all_alns.max(0) as u64));
        info!("  direct:    {}", perc_str(all_direct as u64, all_alns.max(0) as u64));
        info!("  projected: {}", perc_str(all_proj as u64, all_alns.max(0) as u64));
    }
    Ok(reads_to_ctgs)
}

type CtgsMap = AHashMap<i64, CtgWithReads>;

fn service_ctgs<const N: usize>(
    ctgs_map: &mut CtgsMap,
    tracker: &RefCell<LaneTracker>,
    env: Envelope<N>,
) {
    match env.msg {
        Message::CtgBatch(batch) => {
            for data in batch {
                let prev = ctgs_map.insert(
                    data.cid,
                    CtgWithReads {
                        cid: data.cid,
                        seq: data.seq,
                        depth: data.depth,
                        reads_left: Vec::new(),
                        reads_right: Vec::new(),
                    },
                );
                assert!(prev.is_none(), "duplicate contig {}", data.cid);
            }
            tracker.borrow_mut().on_batch(Lane::Ctgs);
        }
        Message::CtgReadBatch(batch) => {
            for data in batch {
                let ctg = ctgs_map
                    .get_mut(&data.cid)
                    .unwrap_or_else(|| panic!("read for unknown contig {}", data.cid));
                if data.side == b'L' {
                    ctg.reads_left.push(data.read);
                } else {
                    ctg.reads_right.push(data.read);
                }
            }
            tracker.borrow_mut().on_batch(Lane::CtgReads);
        }
        Message::FlushMarker { lane, batches } => {
            tracker.borrow_mut().on_marker(lane, batches);
        }
        other => panic!("unexpected message while gathering contig reads: {:?}", other),
    }
}

/// Re-shard contigs by cid hash into the extension table.
fn add_ctgs<const N: usize>(comm: &WorkerComm<N>, ctgs: &Contigs) -> CtgsMap {
    let nworkers = comm.world_size();
    let mut ctgs_map: CtgsMap = AHashMap::new();
    let tracker = RefCell::new(LaneTracker::new());
    let mut store: AggrStore<CtgData, N> = AggrStore::new(
        comm,
        Lane::Ctgs,
        "localassm contigs",
        std::mem::size_of::<CtgData>() + 400,
        0,
        Message::CtgBatch,
    );
    {
        let map = &mut ctgs_map;
        let tracker = &tracker;
        let mut service = |env: Envelope<N>| service_ctgs(map, tracker, env);
        for ctg in ctgs.iter() {
            let data = CtgData { cid: ctg.id, seq: ctg.seq.clone(), depth: ctg.depth };
            let target = id_target_rank(ctg.id, nworkers);
            store.update(comm, target, data, &mut service);
        }
        store.flush_send(comm, &mut service);
        comm.pump_until(
            &mut |env| service_ctgs(map, tracker, env),
            &mut || tracker.borrow().drained(Lane::Ctgs, nworkers),
        );
    }
    comm.barrier();
    ctgs_map
}

/// For every local read with a nomination, deliver the (re-oriented) read to
/// the contig end it extends.
fn process_reads<const N: usize>(
    comm: &WorkerComm<N>,
    reads: &PackedReads,
    reads_to_ctgs: &ReadsToCtgsMap,
    ctgs_map: &mut CtgsMap,
    kmer_len: usize,
) -> Result<()> {
    let nworkers = comm.world_size();
    let tracker = RefCell::new(LaneTracker::new());
    let mut store: AggrStore<CtgReadData, N> = AggrStore::new(
        comm,
        Lane::CtgReads,
        "localassm contig reads",
        std::mem::size_of::<CtgReadData>() + 500,
        0,
        Message::CtgReadBatch,
    );
    let mut num_reads = 0i64;
    let mut num_read_maps_found = 0i64;
    {
        let map = &mut *ctgs_map;
        let rtc = reads_to_ctgs;
        let tracker = &tracker;
        let mut service = |env: Envelope<N>| -> Option<Vec<Vec<CtgInfo>>> {
            match env.msg {
                Message::CtgInfoQuery { read_ids } => {
                    let infos = read_ids
                        .iter()
                        .map(|id| rtc.get(id).cloned().unwrap_or_default())
                        .collect();
                    comm.send(env.src, Message::CtgInfoQueryReply { infos });
                    None
                }
                Message::CtgInfoQueryReply { infos } => Some(infos),
                ref other => {
                    let _ = other;
                    service_ctgs(map, tracker, env);
                    None
                }
            }
        };
        // batch the nomination queries per owner
        let mut rank_read_ids: Vec<Vec<(i64, usize)>> = vec![Vec::new(); nworkers];
        for (index, read) in reads.iter().enumerate() {
            if read.len() < kmer_len {
                continue;
            }
            num_reads += 1;
            let target = id_target_rank(read.id(), nworkers);
            rank_read_ids[target].push((read.id(), index));
        }
        for target in 0..nworkers {
            if rank_read_ids[target].is_empty() {
                continue;
            }
            let read_ids: Vec<i64> = rank_read_ids[target].iter().map(|(id, _)| *id).collect();
            let infos = if target == comm.rank() {
                read_ids.iter().map(|id| rtc.get(id).cloned().unwrap_or_default()).collect()
            } else {
                comm.rpc(target, Message::CtgInfoQuery { read_ids }, &mut service)
            };
            for ((read_id, read_index), ctg_infos) in rank_read_ids[target].iter().zip(infos) {
                if ctg_infos.is_empty() {
                    continue;
                }
                num_read_maps_found += 1;
                let (seq, quals) = reads.get(*read_index).unpack();
                let mut rc: Option<(String, Vec<u8>)> = None;
                for info in ctg_infos {
                    let needs_rc = (info.orient == b'-' && info.side == b'R')
                        || (info.orient == b'+' && info.side == b'L');
                    let read_seq = if needs_rc {
                        let (seq_rc, quals_rc) = rc.get_or_insert_with(|| {
                            let mut q = quals.clone();
                            q.reverse();
                            (revcomp_checked(&seq), q)
                        });
                        ReadSeq { read_id: *read_id, seq: seq_rc.clone(), quals: quals_rc.clone() }
                    } else {
                        ReadSeq { read_id: *read_id, seq: seq.clone(), quals: quals.clone() }
                    };
                    let data = CtgReadData { cid: info.cid, side: info.side, read: read_seq };
                    let target = id_target_rank(info.cid, nworkers);
                    store.update(comm, target, data, &mut |env| {
                        service(env);
                    });
                }
            }
        }
        let mut plain_service = |env: Envelope<N>| {
            service(env);
        };
        store.flush_send(comm, &mut plain_service);
        comm.pump_until(&mut plain_service, &mut || {
            tracker.borrow().drained(Lane::CtgReads, nworkers)
        });
    }
    comm.barrier();
    let all_reads = comm.reduce_sum_i64(num_reads);
    let all_found = comm.reduce_sum_i64(num_read_maps_found);
    if comm.rank() == 0 {
        info!(
            "Found {} reads mapping to contig ends",
            perc_str(all_found as u64, all_reads.max(0) as u64)
        );
    }
    Ok(())
}

#[derive(Debug, Default)]
struct WalkMetrics {
    num_walks: i64,
    num_sides: i64,
    num_reads: i64,
    max_walk_len: i64,
    sum_ext: i64,
    sum_clen: i64,
    excess_reads: i64,
    // X, F, R terminations
    term_counts: [i64; 3],
}

impl WalkMetrics {
    fn merge(&mut self, other: &WalkMetrics) {
        self.num_walks += other.num_walks;
        self.num_sides += other.num_sides;
        self.num_reads += other.num_reads;
        self.max_walk_len = self.max_walk_len.max(other.max_walk_len);
        self.sum_ext += other.sum_ext;
        self.sum_clen += other.sum_clen;
        self.excess_reads += other.excess_reads;
        for i in 0..3 {
            self.term_counts[i] += other.term_counts[i];
        }
    }
}

#[derive(Debug, Default)]
struct MerFreqs {
    votes: ExtVotes,
    ext: u8,
}

type MerMap = AHashMap<String, MerFreqs>;

/// Count mer extension votes over the first reads of a contig end.
fn count_mers(reads: &[ReadSeq], seq_depth: u32, mer_len: usize, excess_reads: &mut i64) -> MerMap {
    let mut mers: MerMap = AHashMap::new();
    for (num_reads, read) in reads.iter().enumerate() {
        if num_reads >= LASSM_MAX_COUNT_MERS_READS {
            *excess_reads += (reads.len() - LASSM_MAX_COUNT_MERS_READS) as i64;
            break;
        }
        if mer_len >= read.seq.len() {
            continue;
        }
        let bytes = read.seq.as_bytes();
        for start in 0..read.seq.len() - mer_len {
            let mer = &bytes[start..start + mer_len];
            if mer.contains(&b'N') {
                continue;
            }
            let ext_pos = start + mer_len;
            let ext = bytes[ext_pos];
            if ext == b'N' {
                continue;
            }
            let entry = mers
                .entry(String::from_utf8_lossy(mer).into_owned())
                .or_default();
            entry.votes.vote(ext, read.quals[ext_pos], 1);
        }
    }
    for freqs in mers.values_mut() {
        freqs.ext = choose_ext(&freqs.votes, seq_depth);
    }
    mers
}

/// Walk the mer graph from `mer`, appending chosen extensions. Returns the
/// termination kind: X (dead end), F (fork) or R (repeat).
fn walk_mers(mers: &MerMap, mer: &mut String, walk: &mut String, walk_len_limit: usize) -> u8 {
    let mut visited: AHashSet<String> = AHashSet::new();
    for _ in 0..walk_len_limit {
        if !visited.insert(mer.clone()) {
            return b'R';
        }
        let Some(freqs) = mers.get(mer.as_str()) else {
            return EXT_DEADEND;
        };
        if freqs.ext == EXT_FORK || freqs.ext == EXT_DEADEND {
            return freqs.ext;
        }
        mer.remove(0);
        mer.push(freqs.ext as char);
        walk.push(freqs.ext as char);
    }
    EXT_DEADEND
}

/// Iteratively walk with varying mer length, keeping the longest extension.
/// Dead ends shrink the mer, forks and repeats grow it; a direction reversal
/// or the length bounds stop the iteration.
fn iterative_walks(
    seq: &str,
    seq_depth: u32,
    reads: &[ReadSeq],
    max_mer_len: usize,
    kmer_len: usize,
    walk_len_limit: usize,
    metrics: &mut WalkMetrics,
) -> String {
    let max_mer_len = max_mer_len.min(seq.len());
    let mut longest_walk = String::new();
    let mut shift: isize = 0;
    let mut mer_len = kmer_len as isize;
    while mer_len >= LASSM_MIN_KMER_LEN as isize && mer_len <= max_mer_len as isize {
        let mers = count_mers(reads, seq_depth, mer_len as usize, &mut metrics.excess_reads);
        let mut mer = seq[seq.len() - mer_len as usize..].to_string();
        let mut walk = String::new();
        let walk_result = walk_mers(&mers, &mut mer, &mut walk, walk_len_limit);
        if walk.len() > longest_walk.len() {
            longest_walk = walk;
        }
        if walk_result == EXT_DEADEND {
            metrics.term_counts[0] += 1;
            // dead end: downshift, unless we just upshifted
            if shift == LASSM_SHIFT_SIZE {
                break;
            }
            shift = -LASSM_SHIFT_SIZE;
        } else {
            if walk_result == EXT_FORK {
                metrics.term_counts[1] += 1;
            } else {
                metrics.term_counts[2] += 1;
            }
            // fork or repeat: a longer mer may resolve it
            if shift == -LASSM_SHIFT_SIZE {
                break;
            }
            if mer_len > seq.len() as isize {
                break;
            }
            shift = LASSM_SHIFT_SIZE;
        }
        mer_len += shift;
    }
    if !longest_walk.is_empty() {
        metrics.num_walks += 1;
        metrics.max_walk_len = metrics.max_walk_len.max(longest_walk.len() as i64);
        metrics.sum_ext += longest_walk.len() as i64;
    }
    longest_walk
}

/// Extend both ends of one contig in place.
fn extend_ctg(
    ctg: &mut CtgWithReads,
    max_kmer_len: usize,
    kmer_len: usize,
    walk_len_limit: usize,
) -> WalkMetrics {
    let mut metrics = WalkMetrics::default();
    metrics.sum_clen += ctg.seq.len() as i64;
    let depth = ctg.depth.round().max(1.0) as u32;
    if !ctg.reads_right.is_empty() {
        metrics.num_sides += 1;
        metrics.num_reads += ctg.reads_right.len() as i64;
        let walk = iterative_walks(
            &ctg.seq,
            depth,
            &ctg.reads_right,
            max_kmer_len,
            kmer_len,
            walk_len_limit,
            &mut metrics,
        );
        ctg.seq.push_str(&walk);
    }
    if !ctg.reads_left.is_empty() {
        metrics.num_sides += 1;
        metrics.num_reads += ctg.reads_left.len() as i64;
        let seq_rc = revcomp_checked(&ctg.seq);
        let walk = iterative_walks(
            &seq_rc,
            depth,
            &ctg.reads_left,
            max_kmer_len,
            kmer_len,
            walk_len_limit,
            &mut metrics,
        );
        if !walk.is_empty() {
            ctg.seq.insert_str(0, &revcomp_checked(&walk));
        }
    }
    metrics
}

/// Run local assembly: gather reads per contig end from alignments, extend
/// every contig, and replace this worker's contigs with the extended shard.
pub fn localassm<const N: usize>(
    comm: &WorkerComm<N>,
    ctgs: &mut Contigs,
    reads: &PackedReads,
    alns: &Alns,
    kmer_len: usize,
    max_kmer_len: usize,
    insert_avg: usize,
    insert_stddev: usize,
) -> Result<()> {
    let walk_len_limit = insert_avg + 3 * insert_stddev;
    let reads_to_ctgs = process_alns(comm, alns, insert_avg, insert_stddev)?;
    let mut ctgs_map = add_ctgs(comm, ctgs);
    process_reads(comm, reads, &reads_to_ctgs, &mut ctgs_map, kmer_len)?;

    // extension is embarrassingly parallel over the local shard
    let mut ctg_list: Vec<&mut CtgWithReads> = ctgs_map.values_mut().collect();
    let metrics = ctg_list
        .par_iter_mut()
        .map(|ctg| extend_ctg(ctg, max_kmer_len, kmer_len, walk_len_limit))
        .reduce(WalkMetrics::default, |mut a, b| {
            a.merge(&b);
            a
        });

    let all_walks = comm.reduce_sum_i64(metrics.num_walks);
    let all_sum_ext = comm.reduce_sum_i64(metrics.sum_ext);
    let all_sum_clen = comm.reduce_sum_i64(metrics.sum_clen);
    let all_max_walk = comm.reduce_max_i64(metrics.max_walk_len);
    let all_sides = comm.reduce_sum_i64(metrics.num_sides);
    let all_excess = comm.reduce_sum_i64(metrics.excess_reads);
    if comm.rank() == 0 {
        info!(
            "Walked {} contig ends of {} candidates: extended {} bases over {} contig bases (max walk {})",
            all_walks, all_sides, all_sum_ext, all_sum_clen, all_max_walk
        );
        if all_excess > 0 {
            info!("Skipped {} reads above the per-end mer counting cap", all_excess);
        }
    }

    // the extended shard replaces this worker's contigs, ordered by cid
    ctgs.clear();
    let mut extended: Vec<CtgWithReads> =
        ctgs_map.into_iter().map(|(_, ctg)| ctg).collect();
    extended.sort_by_key(|ctg| ctg.cid);
    for ctg in extended {
        ctgs.add_contig(Contig { id: ctg.cid, seq: ctg.seq, depth: ctg.depth });
    }
    comm.barrier();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(seq: &str) -> ReadSeq {
        ReadSeq { read_id: 1, seq: seq.to_string(), quals: vec![35; seq.len()] }
    }

    #[test]
    fn test_classify_aln() {
        assert_eq!(classify_aln(20, 0), AlnStatus::ExtendsContig);
        assert_eq!(classify_aln(0, 20), AlnStatus::OverlapsContig);
        assert_eq!(classify_aln(20, 20), AlnStatus::NoAln);
    }

    #[test]
    fn test_count_and_walk_mers() {
        // identical reads walking past the end of AACCGGTT...
        let reads: Vec<ReadSeq> = (0..8).map(|_| read("ACGTACGTAACCGGTTACGT")).collect();
        let mut excess = 0;
        let mers = count_mers(&reads, 8, 10, &mut excess);
        let mut mer = "ACGTACGTAA".to_string();
        let mut walk = String::new();
        let result = walk_mers(&mers, &mut mer, &mut walk, 100);
        assert_eq!(result, EXT_DEADEND);
        assert_eq!(walk, "CCGGTTACGT");
    }

    #[test]
    fn test_iterative_walks_extends_contig_end() {
        let seq = format!("{}ACGTACGTAACCGGTTACGT", "C".repeat(10));
        // reads cover the contig's terminal mer and continue past the end
        let reads: Vec<ReadSeq> =
            (0..10).map(|_| read("CACGTACGTAACCGGTTACGTTTTTAAAACCCC")).collect();
        let mut metrics = WalkMetrics::default();
        let walk = iterative_walks(&seq, 10, &reads, 33, 21, 200, &mut metrics);
        assert_eq!(walk, "TTTTAAAACCCC");
        assert_eq!(metrics.num_walks, 1);
    }
}
