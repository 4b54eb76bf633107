//! Shared fixtures for the integration suites: deterministic references,
//! stride-sampled read pairs and per-worker shards.
#![allow(dead_code)]

use meta_weaver::core::contigs::Contigs;
use meta_weaver::core::packed_reads::PackedReads;
use meta_weaver::core::sequence::revcomp_checked;

pub const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

/// Deterministic pseudo-random reference (xorshift64*), identical across
/// platforms so the expected contigs are stable.
pub fn synth_ref(seed: u64, len: usize) -> String {
    let mut state = seed;
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        let base = (state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 60) & 3;
        out.push(BASES[base as usize] as char);
    }
    out
}

/// The lexicographically smaller of a sequence and its reverse complement.
pub fn canonical_seq(seq: &str) -> String {
    let rc = revcomp_checked(seq);
    if rc.as_str() < seq {
        rc
    } else {
        seq.to_string()
    }
}

/// Read pairs sampled at a fixed stride: the forward window as mate 1 and
/// its reverse complement as mate 2, so every position gets double coverage.
/// The final window is always included so the reference ends are covered.
pub fn stride_pairs(
    reference: &str,
    read_len: usize,
    stride: usize,
    circular: bool,
) -> Vec<(String, String)> {
    let len = reference.len();
    let mut starts: Vec<usize> = if circular {
        (0..len).step_by(stride).collect()
    } else {
        let mut starts: Vec<usize> = (0..=len - read_len).step_by(stride).collect();
        if *starts.last().unwrap() != len - read_len {
            starts.push(len - read_len);
        }
        starts
    };
    starts.dedup();
    starts
        .into_iter()
        .map(|start| {
            let window: String = if circular {
                (0..read_len)
                    .map(|j| reference.as_bytes()[(start + j) % len] as char)
                    .collect()
            } else {
                reference[start..start + read_len].to_string()
            };
            let rc = revcomp_checked(&window);
            (window, rc)
        })
        .collect()
}

/// Deal pairs round-robin into per-worker packed shards. Pair i gets id
/// i + 1; mate 1 is negative, mate 2 positive.
pub fn packed_shards(pairs: &[(String, String)], workers: usize) -> Vec<PackedReads> {
    let mut shards: Vec<PackedReads> = (0..workers).map(|_| PackedReads::new(33)).collect();
    for (i, (mate1, mate2)) in pairs.iter().enumerate() {
        let shard = &mut shards[i % workers];
        let pair_id = i as i64 + 1;
        shard
            .add_read(-pair_id, mate1, &"I".repeat(mate1.len()))
            .expect("clean synthetic read");
        shard
            .add_read(pair_id, mate2, &"I".repeat(mate2.len()))
            .expect("clean synthetic read");
    }
    shards
}

pub fn empty_ctgs(workers: usize) -> Vec<Contigs> {
    (0..workers).map(|_| Contigs::new()).collect()
}

/// All contigs from a set of per-worker stores, as (id, seq, depth).
pub fn collect_contigs(ctgs: &[Contigs]) -> Vec<(i64, String, f64)> {
    let mut all: Vec<(i64, String, f64)> = ctgs
        .iter()
        .flat_map(|shard| shard.iter().map(|c| (c.id, c.seq.clone(), c.depth)))
        .collect();
    all.sort_by_key(|(id, _, _)| *id);
    all
}
