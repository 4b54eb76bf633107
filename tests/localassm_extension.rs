//! Local assembly: contig ends grow along the reads that align past them.

mod common;

use common::*;
use meta_weaver::assembly::localassm::localassm;
use meta_weaver::comm::run_team;
use meta_weaver::core::contigs::{Contig, Contigs};
use meta_weaver::core::packed_reads::PackedReads;
use meta_weaver::io::alignments::{Aln, Alns};

const K: usize = 21;
const READ_LEN: usize = 100;

struct Fixture {
    reads: Vec<PackedReads>,
    ctgs: Vec<Contigs>,
    alns: Vec<Alns>,
}

fn run_localassm(fixture: Fixture) -> Vec<(i64, String)> {
    let inputs: Vec<_> = fixture
        .reads
        .into_iter()
        .zip(fixture.ctgs)
        .zip(fixture.alns)
        .map(|((reads, ctgs), alns)| (reads, ctgs, alns))
        .collect();
    let outputs = run_team::<1, _, _, _>(64, inputs, |comm, (reads, mut ctgs, alns)| {
        localassm(&comm, &mut ctgs, &reads, &alns, K, READ_LEN, 200, 0)?;
        Ok(ctgs)
    })
    .unwrap();
    let mut all: Vec<(i64, String)> = outputs
        .iter()
        .flat_map(|shard| shard.iter().map(|c| (c.id, c.seq.clone())))
        .collect();
    all.sort_by_key(|(id, _)| *id);
    all
}

/// Reads at the given reference offsets, one aligned mate plus a placeholder,
/// dealt over two workers.
fn reads_at(reference: &str, offsets: &[usize]) -> (Vec<PackedReads>, Vec<i64>) {
    let mut shards: Vec<PackedReads> = (0..2).map(|_| PackedReads::new(33)).collect();
    let mut ids = Vec::new();
    for (i, &p) in offsets.iter().enumerate() {
        let pair_id = i as i64 + 1;
        let window = &reference[p..p + READ_LEN];
        let shard = &mut shards[i % 2];
        shard.add_read(-pair_id, window, &"I".repeat(READ_LEN)).unwrap();
        shard.add_read(pair_id, "N", "I").unwrap();
        ids.push(-pair_id);
    }
    (shards, ids)
}

#[test]
fn test_right_end_extension() {
    let reference = synth_ref(0x1234_ABCD_5678_EF00, 400);
    let offsets: Vec<usize> = (250..=295).step_by(5).collect();
    let (reads, ids) = reads_at(&reference, &offsets);

    let mut ctgs0 = Contigs::new();
    ctgs0.add_contig(Contig { id: 0, seq: reference[..300].to_string(), depth: 40.0 });

    let mut alns0 = Alns::new();
    for (&p, &read_id) in offsets.iter().zip(&ids) {
        // the read overhangs the right end of the contig
        alns0.push(Aln {
            read_id,
            cid: 0,
            orient: b'+',
            rstart: 1,
            rstop: (300 - p) as i32,
            rlen: READ_LEN as i32,
            cstart: p as i32 + 1,
            cstop: 300,
            clen: 300,
            score: (300 - p) as i32,
        });
    }

    let fixture = Fixture { reads, ctgs: vec![ctgs0, Contigs::new()], alns: vec![alns0, Alns::new()] };
    let all = run_localassm(fixture);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1, reference[..390], "right end should extend to base 390");
}

#[test]
fn test_left_end_extension() {
    let reference = synth_ref(0x1234_ABCD_5678_EF00, 400);
    let offsets: Vec<usize> = (5..=95).step_by(5).collect();
    let (reads, ids) = reads_at(&reference, &offsets);

    let mut ctgs0 = Contigs::new();
    ctgs0.add_contig(Contig { id: 0, seq: reference[100..400].to_string(), depth: 40.0 });

    let mut alns0 = Alns::new();
    for (&p, &read_id) in offsets.iter().zip(&ids) {
        // the read overhangs the left end of the contig
        alns0.push(Aln {
            read_id,
            cid: 0,
            orient: b'+',
            rstart: (101 - p) as i32,
            rstop: READ_LEN as i32,
            rlen: READ_LEN as i32,
            cstart: 1,
            cstop: p as i32,
            clen: 300,
            score: p as i32,
        });
    }

    let fixture = Fixture { reads, ctgs: vec![ctgs0, Contigs::new()], alns: vec![alns0, Alns::new()] };
    let all = run_localassm(fixture);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1, reference[10..400], "left end should extend to base 10");
}

#[test]
fn test_contig_without_candidate_reads_is_unchanged() {
    let reference = synth_ref(0x1234_ABCD_5678_EF00, 400);
    let (reads, _) = reads_at(&reference, &[0]);
    let mut ctgs0 = Contigs::new();
    ctgs0.add_contig(Contig { id: 7, seq: reference[..300].to_string(), depth: 40.0 });
    let fixture =
        Fixture { reads, ctgs: vec![ctgs0, Contigs::new()], alns: vec![Alns::new(), Alns::new()] };
    let all = run_localassm(fixture);
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].0, 7);
    assert_eq!(all[0].1, reference[..300]);
}
