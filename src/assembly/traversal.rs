//! Distributed de Bruijn graph traversal.
//!
//! Three bulk-synchronous phases: walk the k-mer table into unitig fragments
//! (crossing worker boundaries through step RPCs), validate the fragment
//! links by (k-1)-overlap, then stitch linked fragments into contigs with
//! owner-monotone emission so every path is emitted exactly once.

use ahash::{AHashMap, AHashSet};
use anyhow::{bail, Result};
use tracing::info;

use crate::assembly::fragments::{FragHandle, FragSnapshot, FragStore};
use crate::comm::{Envelope, Message, WorkerComm};
use crate::core::contigs::{Contig, Contigs};
use crate::core::kmer::Kmer;
use crate::core::sequence::revcomp_checked;
use crate::kcount::kmer_dht::{target_rank, KmerCounts, KmerDht};
use crate::utils::perc_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dirn {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    Running,
    DeadEnd,
    Fork,
    Conflict,
    Repeat,
    Visited,
}

/// A step RPC: continue walking on the owner of `kmer` until the walk leaves
/// its shard or terminates.
#[derive(Debug, Clone)]
pub struct StepRequest<const N: usize> {
    pub kmer: Kmer<N>,
    pub dirn: Dirn,
    pub prev_ext: u8,
    pub next_ext: u8,
    pub revisit_allowed: bool,
    pub is_rc: bool,
    pub frag: FragHandle,
}

/// What a stretch of walking produced: the bases consumed, their summed
/// depths, and where the walk stands now.
#[derive(Debug, Clone)]
pub struct StepInfo<const N: usize> {
    pub status: WalkStatus,
    pub sum_depths: u32,
    pub prev_ext: u8,
    pub next_ext: u8,
    pub visited_frag: Option<FragHandle>,
    pub uutig: String,
    pub kmer: Kmer<N>,
}

#[derive(Debug, Default)]
struct WalkTermStats {
    num_deadends: i64,
    num_forks: i64,
    num_conflicts: i64,
    num_repeats: i64,
    num_visited: i64,
}

impl WalkTermStats {
    fn update(&mut self, status: WalkStatus) {
        match status {
            WalkStatus::DeadEnd => self.num_deadends += 1,
            WalkStatus::Fork => self.num_forks += 1,
            WalkStatus::Conflict => self.num_conflicts += 1,
            WalkStatus::Repeat => self.num_repeats += 1,
            WalkStatus::Visited => self.num_visited += 1,
            WalkStatus::Running => unreachable!("walks never terminate in Running"),
        }
    }

    fn print<const N: usize>(&self, comm: &WorkerComm<N>) {
        let deadends = comm.reduce_sum_i64(self.num_deadends);
        let forks = comm.reduce_sum_i64(self.num_forks);
        let conflicts = comm.reduce_sum_i64(self.num_conflicts);
        let repeats = comm.reduce_sum_i64(self.num_repeats);
        let visited = comm.reduce_sum_i64(self.num_visited);
        let total = (deadends + forks + conflicts + repeats + visited).max(0) as u64;
        if comm.rank() == 0 {
            info!("Walk terminations:");
            info!("  deadends:  {}", perc_str(deadends as u64, total));
            info!("  forks:     {}", perc_str(forks as u64, total));
            info!("  conflicts: {}", perc_str(conflicts as u64, total));
            info!("  repeats:   {}", perc_str(repeats as u64, total));
            info!("  visited:   {}", perc_str(visited as u64, total));
        }
    }
}

#[inline]
fn comp_base(base: u8) -> u8 {
    match base {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}

/// Advance a walk over this worker's k-mers, claiming records for `frag` as
/// it goes, until the walk terminates or crosses to another shard.
fn get_next_step<const N: usize>(
    map: &mut AHashMap<Kmer<N>, KmerCounts>,
    nworkers: usize,
    my_rank: usize,
    req: StepRequest<N>,
) -> StepInfo<N> {
    let dirn = req.dirn;
    let mut revisit_allowed = req.revisit_allowed;
    let mut is_rc = req.is_rc;
    let mut info = StepInfo {
        status: WalkStatus::Running,
        sum_depths: 0,
        prev_ext: req.prev_ext,
        next_ext: req.next_ext,
        visited_frag: None,
        uutig: String::new(),
        kmer: req.kmer,
    };
    loop {
        let count;
        {
            let Some(record) = map.get_mut(&info.kmer) else {
                info.status = WalkStatus::DeadEnd;
                break;
            };
            if record.is_terminal() {
                info.status = WalkStatus::DeadEnd;
                break;
            }
            if record.is_fork() {
                info.status = WalkStatus::Fork;
                break;
            }
            let (mut left, mut right) = (record.left, record.right);
            if is_rc {
                left = comp_base(left);
                right = comp_base(right);
                std::mem::swap(&mut left, &mut right);
            }
            if info.prev_ext != 0
                && ((dirn == Dirn::Left && info.prev_ext != right)
                    || (dirn == Dirn::Right && info.prev_ext != left))
            {
                info.status = WalkStatus::Conflict;
                break;
            }
            match record.frag {
                Some(other) if other != req.frag => {
                    info.status = WalkStatus::Visited;
                    info.visited_frag = Some(other);
                    break;
                }
                Some(_) if !revisit_allowed => {
                    info.status = WalkStatus::Repeat;
                    break;
                }
                _ => {}
            }
            record.frag = Some(req.frag);
            count = record.count;
            info.uutig.push(info.next_ext as char);
            info.next_ext = if dirn == Dirn::Left { left } else { right };
        }
        // restore walk orientation before stepping
        let mut oriented = if is_rc { info.kmer.revcomp() } else { info.kmer };
        if dirn == Dirn::Left {
            info.prev_ext = oriented.back();
            oriented = oriented.backward_base(info.next_ext);
        } else {
            info.prev_ext = oriented.front();
            oriented = oriented.forward_base(info.next_ext);
        }
        info.sum_depths += count as u32;
        revisit_allowed = false;
        let (canon, flipped) = oriented.canonical();
        if target_rank(&canon, nworkers) != my_rank {
            // hand the oriented k-mer back to the walk driver
            info.kmer = oriented;
            break;
        }
        info.kmer = canon;
        is_rc = flipped;
    }
    info
}

/// Walk one direction from a seed k-mer, appending bases to `uutig`. Local
/// stretches run inline; remote stretches go through step RPCs whose pump
/// also services other walkers' steps against our shard.
#[allow(clippy::too_many_arguments)]
fn traverse_dirn<const N: usize>(
    comm: &WorkerComm<N>,
    map: &mut AHashMap<Kmer<N>, KmerCounts>,
    seed: Kmer<N>,
    frag: FragHandle,
    dirn: Dirn,
    uutig: &mut String,
    sum_depths: &mut i64,
    stats: &mut WalkTermStats,
) -> Option<FragHandle> {
    let k = seed.k();
    let nworkers = comm.world_size();
    let my_rank = comm.rank();
    let mut prev_ext = 0u8;
    let mut next_ext = if dirn == Dirn::Left { seed.front() } else { seed.back() };
    let mut revisit_allowed = dirn == Dirn::Right;
    if dirn == Dirn::Right {
        let seed_str = seed.to_string();
        uutig.push_str(&seed_str[1..k - 1]);
    }
    let mut kmer = seed;
    loop {
        let (canon, is_rc) = kmer.canonical();
        let target = target_rank(&canon, nworkers);
        let req = StepRequest {
            kmer: canon,
            dirn,
            prev_ext,
            next_ext,
            revisit_allowed,
            is_rc,
            frag,
        };
        let step = if target == my_rank {
            get_next_step(map, nworkers, my_rank, req)
        } else {
            comm.rpc(target, Message::WalkStep(req), &mut |env: Envelope<N>| match env.msg {
                Message::WalkStep(req) => {
                    let info = get_next_step(map, nworkers, my_rank, req);
                    comm.send(env.src, Message::WalkStepReply(info));
                    None
                }
                Message::WalkStepReply(info) => Some(info),
                other => panic!("unexpected message during fragment construction: {:?}", other),
            })
        };
        revisit_allowed = false;
        *sum_depths += step.sum_depths as i64;
        uutig.push_str(&step.uutig);
        if step.status != WalkStatus::Running {
            stats.update(step.status);
            if dirn == Dirn::Left {
                // we walked backwards
                *uutig = uutig.chars().rev().collect();
            }
            return step.visited_frag;
        }
        prev_ext = step.prev_ext;
        next_ext = step.next_ext;
        kmer = step.kmer;
    }
}

/// Phase 1: build unitig fragments from every eligible unclaimed k-mer.
fn construct_frags<const N: usize>(
    comm: &WorkerComm<N>,
    dht: &mut KmerDht<N>,
    frags: &mut FragStore,
) {
    let mut stats = WalkTermStats::default();
    let nworkers = comm.world_size();
    let my_rank = comm.rank();
    // snapshot the seeds: walks mutate the records as they claim them
    let seeds: Vec<Kmer<N>> = dht
        .map
        .iter()
        .filter(|(_, r)| r.frag.is_none() && !r.is_terminal() && !r.is_fork())
        .map(|(kmer, _)| *kmer)
        .collect();
    let map = &mut dht.map;
    for seed in seeds {
        // a remote walk may have claimed it since the snapshot
        match map.get(&seed) {
            Some(r) if r.frag.is_none() && !r.is_terminal() && !r.is_fork() => {}
            _ => continue,
        }
        let frag_handle = frags.alloc();
        let mut uutig = String::new();
        let mut sum_depths = 0i64;
        let left =
            traverse_dirn(comm, map, seed, frag_handle, Dirn::Left, &mut uutig, &mut sum_depths, &mut stats);
        let right =
            traverse_dirn(comm, map, seed, frag_handle, Dirn::Right, &mut uutig, &mut sum_depths, &mut stats);
        let frag = frags.get_mut(frag_handle.index());
        frag.seq = uutig;
        frag.sum_depths = sum_depths;
        frag.left = left;
        frag.right = right;
    }
    // stay responsive until every worker has finished walking
    comm.quiesce(&mut |env: Envelope<N>| match env.msg {
        Message::WalkStep(req) => {
            let reply = get_next_step(map, nworkers, my_rank, req);
            comm.send(env.src, Message::WalkStepReply(reply));
        }
        other => panic!("unexpected message during fragment construction: {:?}", other),
    });
    let all_frags = comm.reduce_sum_i64(frags.len() as i64);
    if comm.rank() == 0 {
        info!("Constructed {} uutig fragments", all_frags);
    }
    stats.print(comm);
}

fn is_overlap(left_seq: &str, right_seq: &str, overlap: usize) -> bool {
    left_seq.len() >= overlap
        && right_seq.len() >= overlap
        && left_seq[left_seq.len() - overlap..] == right_seq[..overlap]
}

/// One-sided read of a fragment record, servicing other workers' reads while
/// waiting.
fn fetch_frag<const N: usize>(
    comm: &WorkerComm<N>,
    frags: &FragStore,
    handle: FragHandle,
) -> FragSnapshot {
    if handle.owner() == comm.rank() {
        return frags.snapshot(handle.index());
    }
    comm.rpc(
        handle.owner(),
        Message::FragFetch { handle },
        &mut |env: Envelope<N>| match env.msg {
            Message::FragFetch { handle } => {
                let snapshot = frags.snapshot(handle.index());
                comm.send(env.src, Message::FragFetchReply(Box::new(snapshot)));
                None
            }
            Message::FragFetchReply(snapshot) => Some(*snapshot),
            other => panic!("unexpected message during fragment fetch: {:?}", other),
        },
    )
}

/// The outcome of checking one neighbour link.
struct LinkStatus {
    keep: bool,
    is_rc: bool,
    overlap: bool,
    overlap_rc: bool,
    non_recip: bool,
}

fn check_link(
    dirn: Dirn,
    my_handle: FragHandle,
    nb: &FragSnapshot,
    uutig: &str,
    k: usize,
) -> LinkStatus {
    let mut status =
        LinkStatus { keep: false, is_rc: false, overlap: false, overlap_rc: false, non_recip: false };
    let overlap_len = k - 1;
    let (s1, s2) = match dirn {
        Dirn::Left => (nb.seq.as_str(), uutig),
        Dirn::Right => (uutig, nb.seq.as_str()),
    };
    if is_overlap(s1, s2, overlap_len) {
        // the neighbour must link back to us on its facing side
        let back = if dirn == Dirn::Left { nb.right } else { nb.left };
        if back != Some(my_handle) {
            status.non_recip = true;
            return status;
        }
        status.keep = true;
        status.overlap = true;
        return status;
    }
    let nb_rc = revcomp_checked(&nb.seq);
    let (s1, s2) = match dirn {
        Dirn::Left => (nb_rc.as_str(), uutig),
        Dirn::Right => (uutig, nb_rc.as_str()),
    };
    if is_overlap(s1, s2, overlap_len) {
        let back = if dirn == Dirn::Left { nb.left } else { nb.right };
        if back != Some(my_handle) {
            status.non_recip = true;
            return status;
        }
        status.keep = true;
        status.is_rc = true;
        status.overlap_rc = true;
        return status;
    }
    status
}

/// Phase 2: drop neighbour links that do not hold up to the (k-1)-overlap
/// and reciprocity tests.
fn clean_frag_links<const N: usize>(comm: &WorkerComm<N>, k: usize, frags: &mut FragStore) {
    let mut num_short = 0i64;
    let mut num_equal_links = 0i64;
    let mut num_non_recip = 0i64;
    let mut num_overlaps = 0i64;
    let mut num_overlaps_rc = 0i64;
    let mut num_links = 0i64;
    let my_rank = comm.rank();
    for index in 0..frags.len() {
        let (seq, left, right) = {
            let frag = frags.get(index);
            (frag.seq.clone(), frag.left, frag.right)
        };
        if seq.len() < k {
            num_short += 1;
            continue;
        }
        num_links += left.is_some() as i64 + right.is_some() as i64;
        if left.is_some() && left == right {
            // self-loop: drop both sides
            num_equal_links += 2;
            let frag = frags.get_mut(index);
            frag.left = None;
            frag.right = None;
            continue;
        }
        let my_handle = FragHandle::new(my_rank, index);
        for (dirn, nb_handle) in [(Dirn::Left, left), (Dirn::Right, right)] {
            let Some(nb_handle) = nb_handle else { continue };
            let nb = fetch_frag(comm, frags, nb_handle);
            let status = check_link(dirn, my_handle, &nb, &seq, k);
            num_overlaps += status.overlap as i64;
            num_overlaps_rc += status.overlap_rc as i64;
            num_non_recip += status.non_recip as i64;
            let frag = frags.get_mut(index);
            match dirn {
                Dirn::Left => {
                    frag.left = status.keep.then_some(nb_handle);
                    frag.left_is_rc = status.is_rc;
                }
                Dirn::Right => {
                    frag.right = status.keep.then_some(nb_handle);
                    frag.right_is_rc = status.is_rc;
                }
            }
        }
    }
    comm.quiesce(&mut |env: Envelope<N>| match env.msg {
        Message::FragFetch { handle } => {
            let snapshot = frags.snapshot(handle.index());
            comm.send(env.src, Message::FragFetchReply(Box::new(snapshot)));
        }
        other => panic!("unexpected message during link cleaning: {:?}", other),
    });
    let all_links = comm.reduce_sum_i64(num_links);
    let all_short = comm.reduce_sum_i64(num_short);
    let all_overlaps = comm.reduce_sum_i64(num_overlaps);
    let all_overlaps_rc = comm.reduce_sum_i64(num_overlaps_rc);
    let all_equal = comm.reduce_sum_i64(num_equal_links);
    let all_non_recip = comm.reduce_sum_i64(num_non_recip);
    if comm.rank() == 0 {
        info!(
            "Checked {} fragment links: {} overlaps, {} revcomp overlaps, {} self-loops, {} non-reciprocating, {} short fragments",
            all_links,
            all_overlaps,
            all_overlaps_rc,
            all_equal,
            all_non_recip,
            all_short
        );
    }
}

fn other_side(snapshot: &FragSnapshot, came_from: FragHandle) -> Option<FragHandle> {
    if snapshot.left == Some(came_from) {
        snapshot.right
    } else {
        snapshot.left
    }
}

/// Follow surviving links in one direction, growing `uutig`. Returns false
/// when the walk must be abandoned to a higher-ranked owner.
#[allow(clippy::too_many_arguments)]
fn walk_frags_dirn<const N: usize>(
    comm: &WorkerComm<N>,
    k: usize,
    frags: &FragStore,
    start: FragHandle,
    first: Option<FragHandle>,
    uutig: &mut String,
    depths: &mut f64,
    walk_steps: &mut i64,
    num_repeats: &mut i64,
    visited_local: &mut Vec<usize>,
) -> Result<bool> {
    let Some(mut next_handle) = first else {
        return Ok(true);
    };
    let my_rank = comm.rank();
    let overlap = k - 1;
    let mut visited: AHashSet<FragHandle> = AHashSet::new();
    visited.insert(start);
    let mut prev_handle = start;
    let mut dirn: Option<Dirn> = None;
    loop {
        if next_handle.owner() > my_rank {
            // a higher-ranked owner emits this path
            return Ok(false);
        }
        if !visited.insert(next_handle) {
            *num_repeats += 1;
            return Ok(true);
        }
        let next = fetch_frag(comm, frags, next_handle);
        if next_handle.owner() == my_rank {
            if frags.get(next_handle.index()).visited {
                bail!("fragment {:?} was already consumed by another walk", next_handle);
            }
            visited_local.push(next_handle.index());
        }
        let next_rc = revcomp_checked(&next.seq);
        if dirn.is_none() {
            dirn = if is_overlap(uutig, &next.seq, overlap) {
                Some(Dirn::Right)
            } else if is_overlap(&next.seq, uutig, overlap) {
                Some(Dirn::Left)
            } else if is_overlap(uutig, &next_rc, overlap) {
                Some(Dirn::Right)
            } else if is_overlap(&next_rc, uutig, overlap) {
                Some(Dirn::Left)
            } else {
                bail!("no overlap between linked fragments");
            };
        }
        match dirn.unwrap() {
            Dirn::Left => {
                let slen = next.seq.len() - overlap;
                if is_overlap(&next.seq, uutig, overlap) {
                    uutig.insert_str(0, &next.seq[..slen]);
                } else if is_overlap(&next_rc, uutig, overlap) {
                    uutig.insert_str(0, &next_rc[..slen]);
                } else {
                    bail!("no valid left overlap in fragment walk");
                }
            }
            Dirn::Right => {
                if is_overlap(uutig, &next.seq, overlap) {
                    uutig.push_str(&next.seq[overlap..]);
                } else if is_overlap(uutig, &next_rc, overlap) {
                    uutig.push_str(&next_rc[overlap..]);
                } else {
                    bail!("no valid right overlap in fragment walk");
                }
            }
        }
        *depths += next.sum_depths as f64 * (1.0 - (k - 1) as f64 / next.seq.len() as f64);
        *walk_steps += 1;
        let onward = other_side(&next, prev_handle);
        prev_handle = next_handle;
        match onward {
            Some(handle) => next_handle = handle,
            None => return Ok(true),
        }
    }
}

/// Phase 3: stitch linked fragments into contigs. A walk is emitted only by
/// the lowest-ranked owner it touches.
fn connect_frags<const N: usize>(
    comm: &WorkerComm<N>,
    k: usize,
    frags: &mut FragStore,
    my_uutigs: &mut Contigs,
) -> Result<()> {
    let mut num_drops = 0i64;
    let mut num_steps = 0i64;
    let mut max_steps = 0i64;
    let mut num_repeats = 0i64;
    let mut num_prev_visited = 0i64;
    let my_rank = comm.rank();
    for index in 0..frags.len() {
        let (seq, left, right, visited, sum_depths) = {
            let frag = frags.get(index);
            (frag.seq.clone(), frag.left, frag.right, frag.visited, frag.sum_depths)
        };
        if seq.len() < k {
            continue;
        }
        if visited {
            num_prev_visited += 1;
            continue;
        }
        let my_handle = FragHandle::new(my_rank, index);
        let mut visited_local = vec![index];
        let mut uutig = seq;
        let mut depths = sum_depths as f64;
        let mut walk_steps = 1i64;
        let mut ok = walk_frags_dirn(
            comm, k, frags, my_handle, left, &mut uutig, &mut depths, &mut walk_steps,
            &mut num_repeats, &mut visited_local,
        )?;
        if ok {
            ok = walk_frags_dirn(
                comm, k, frags, my_handle, right, &mut uutig, &mut depths, &mut walk_steps,
                &mut num_repeats, &mut visited_local,
            )?;
        }
        if ok {
            num_steps += walk_steps;
            max_steps = max_steps.max(walk_steps);
            let depth = depths / (uutig.len() - k + 2) as f64;
            my_uutigs.add_contig(Contig { id: 0, seq: uutig, depth });
            for local_index in visited_local {
                frags.get_mut(local_index).visited = true;
            }
        } else {
            num_drops += 1;
        }
    }
    comm.quiesce(&mut |env: Envelope<N>| match env.msg {
        Message::FragFetch { handle } => {
            let snapshot = frags.snapshot(handle.index());
            comm.send(env.src, Message::FragFetchReply(Box::new(snapshot)));
        }
        other => panic!("unexpected message during fragment stitching: {:?}", other),
    });
    let all_uutigs = comm.reduce_sum_i64(my_uutigs.len() as i64);
    let all_steps = comm.reduce_sum_i64(num_steps);
    let all_max_steps = comm.reduce_max_i64(max_steps);
    let all_drops = comm.reduce_sum_i64(num_drops);
    let all_prev_visited = comm.reduce_sum_i64(num_prev_visited);
    let all_repeats = comm.reduce_sum_i64(num_repeats);
    if comm.rank() == 0 {
        let avg_steps =
            if all_uutigs > 0 { all_steps as f64 / all_uutigs as f64 } else { 0.0 };
        info!(
            "Stitched {} contigs, avg path {:.2} fragments (max {}), dropped {} owner-crossing walks",
            all_uutigs, avg_steps, all_max_steps, all_drops
        );
        info!(
            "Skipped {} already-consumed fragments, found {} fragment cycles",
            all_prev_visited, all_repeats
        );
    }
    Ok(())
}

/// Run the full traversal for one round: the contigs come back with
/// globally unique, contiguous ids.
pub fn traverse_debruijn_graph<const N: usize>(
    comm: &WorkerComm<N>,
    dht: &mut KmerDht<N>,
    my_uutigs: &mut Contigs,
) -> Result<()> {
    let k = dht.k();
    let mut frags = FragStore::new(comm.rank());
    construct_frags(comm, dht, &mut frags);
    clean_frag_links(comm, k, &mut frags);
    my_uutigs.clear();
    connect_frags(comm, k, &mut frags, my_uutigs)?;
    // assign globally unique contiguous ids
    let num_ctgs = my_uutigs.len() as i64;
    let my_start = comm.prefix_sum_exclusive(num_ctgs);
    for (offset, ctg) in my_uutigs.iter_mut().enumerate() {
        ctg.id = my_start + offset as i64;
    }
    comm.barrier();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_overlap() {
        assert!(is_overlap("ACGTA", "GTACC", 3));
        assert!(!is_overlap("ACGTA", "TTACC", 3));
        assert!(!is_overlap("AC", "GTACC", 3));
    }

    #[test]
    fn test_other_side() {
        let a = FragHandle::new(0, 1);
        let b = FragHandle::new(0, 2);
        let snap = FragSnapshot { seq: String::new(), sum_depths: 0, left: Some(a), right: Some(b) };
        assert_eq!(other_side(&snap, a), Some(b));
        assert_eq!(other_side(&snap, b), Some(a));
    }
}
