//! End-to-end contigging scenarios over synthetic references.

mod common;

use common::*;
use meta_weaver::assembly::traversal::traverse_debruijn_graph;
use meta_weaver::comm::run_team;
use meta_weaver::core::contigs::Contigs;
use meta_weaver::core::kmer::Kmer;
use meta_weaver::core::sequence::revcomp_checked;
use meta_weaver::kcount::kmer_dht::{target_rank, KmerDht};
use meta_weaver::kcount::{analyze_kmers, estimate_num_kmers};
use meta_weaver::pipeline::contigging::{contigging, RoundOptions};

const K: usize = 21;

fn round_opts() -> RoundOptions {
    RoundOptions {
        k: K,
        dmin: 2,
        max_kmer_store_mb: 1,
        use_qf: false,
        shuffle: false,
        checkpoint_path: None,
        lassm: None,
    }
}

/// Run one contigging round and return the per-worker contigs.
fn assemble(workers: usize, reads: Vec<meta_weaver::PackedReads>, seeds: Vec<Contigs>) -> Vec<Contigs> {
    let opts = round_opts();
    let inputs: Vec<_> = reads.into_iter().zip(seeds).collect();
    let outputs = run_team::<1, _, _, _>(64, inputs, |comm, (mut reads, mut ctgs)| {
        contigging(&comm, &opts, &mut reads, &mut ctgs)?;
        Ok(ctgs)
    })
    .expect("round should succeed");
    outputs
}

#[test]
fn test_s1_single_reference_one_worker() {
    let reference = synth_ref(0x5EED_5EED_5EED_5EED, 1000);
    let pairs = stride_pairs(&reference, 150, 3, false);
    let ctgs = assemble(1, packed_shards(&pairs, 1), empty_ctgs(1));
    let all = collect_contigs(&ctgs);
    assert_eq!(all.len(), 1);
    let (id, seq, depth) = &all[0];
    assert_eq!(*id, 0);
    // the terminal k-mers have no observed extension, so the walk spans
    // bases 1..len-1 of the reference
    assert_eq!(canonical_seq(seq), canonical_seq(&reference[1..999]));
    assert!(*depth > 50.0 && *depth < 110.0, "depth {} out of range", depth);
}

#[test]
fn test_s2_same_reference_four_workers() {
    let reference = synth_ref(0x5EED_5EED_5EED_5EED, 1000);
    let pairs = stride_pairs(&reference, 150, 3, false);
    let ctgs = assemble(4, packed_shards(&pairs, 4), empty_ctgs(4));
    let all = collect_contigs(&ctgs);
    assert_eq!(all.len(), 1, "got contigs {:?}", all.iter().map(|c| c.1.len()).collect::<Vec<_>>());
    assert_eq!(canonical_seq(&all[0].1), canonical_seq(&reference[1..999]));
    assert_eq!(all[0].0, 0);
}

#[test]
fn test_s1_invariants_fragment_partition_and_coverage() {
    let reference = synth_ref(0x5EED_5EED_5EED_5EED, 1000);
    let pairs = stride_pairs(&reference, 150, 3, false);
    let shards = packed_shards(&pairs, 2);
    let inputs: Vec<_> = shards.into_iter().zip(empty_ctgs(2)).collect();
    run_team::<1, _, _, _>(64, inputs, |comm, (reads, mut ctgs)| {
        let est = estimate_num_kmers(&comm, K, &reads);
        let mut dht = KmerDht::<1>::new(&comm, K, est * 2, 1, false, 2);
        analyze_kmers(&comm, K, &reads, &ctgs, &mut dht)?;
        // sharding invariant: every local k-mer hashes home
        for (kmer, _) in dht.local_kmers() {
            assert_eq!(target_rank(kmer, comm.world_size()), comm.rank());
        }
        traverse_debruijn_graph(&comm, &mut dht, &mut ctgs)?;
        // fragment partition: both-sides-concrete records are all claimed
        for (_, record) in dht.local_kmers() {
            if !record.is_terminal() && !record.is_fork() {
                assert!(record.frag.is_some());
            }
        }
        // contig coverage: every contig k-mer survives in the table, and the
        // contig claims each canonical k-mer at most once
        let mut seen = std::collections::HashSet::new();
        for ctg in ctgs.iter() {
            for kmer in Kmer::<1>::get_kmers(K, &ctg.seq) {
                let (canon, _) = kmer.canonical();
                assert!(seen.insert(canon), "duplicate k-mer across contigs");
                let info = dht.lookup(&comm, &canon);
                assert!(info.is_some(), "contig k-mer missing from the table");
            }
        }
        dht.finish_lookups(&comm);
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_s3_shared_tract_splits_at_forks() {
    let ref_a = synth_ref(0xAAAA_1111_BBBB_2222, 500);
    let tract = &ref_a[237..262];
    let ref_b0 = synth_ref(0x3333_CCCC_4444_DDDD, 500);
    let ref_b = format!("{}{}{}", &ref_b0[..237], tract, &ref_b0[262..]);
    let mut pairs = stride_pairs(&ref_a, 150, 3, false);
    pairs.extend(stride_pairs(&ref_b, 150, 3, false));
    let ctgs = assemble(2, packed_shards(&pairs, 2), empty_ctgs(2));
    let all = collect_contigs(&ctgs);

    // the shared 25-base tract forks both flanks of both references
    assert_eq!(all.len(), 5, "lens {:?}", all.iter().map(|c| c.1.len()).collect::<Vec<_>>());
    let mut lens: Vec<usize> = all.iter().map(|(_, seq, _)| seq.len()).collect();
    lens.sort_unstable();
    assert_eq!(lens, vec![23, 256, 256, 257, 257]);
    for (_, seq, _) in &all {
        let rc = revcomp_checked(seq);
        assert!(
            ref_a.contains(seq) || ref_a.contains(&rc) || ref_b.contains(seq) || ref_b.contains(&rc),
            "contig is not a substring of either reference"
        );
    }
    // contig ids are a contiguous prefix of the naturals
    let ids: Vec<i64> = all.iter().map(|(id, _, _)| *id).collect();
    assert_eq!(ids, (0..5).collect::<Vec<i64>>());
}

#[test]
fn test_s4_circular_reference_single_contig() {
    let reference = synth_ref(0x0C1B_C1BC_1BC1_BC1B, 2000);
    let pairs = stride_pairs(&reference, 150, 3, true);
    let ctgs = assemble(1, packed_shards(&pairs, 1), empty_ctgs(1));
    let all = collect_contigs(&ctgs);
    // the walk goes all the way round and stops on its own claim
    assert_eq!(all.len(), 1);
    let seq = &all[0].1;
    assert_eq!(seq.len(), 2000 + K - 1);
    let doubled = format!("{}{}", reference, reference);
    let rc = revcomp_checked(seq);
    assert!(doubled.contains(seq) || doubled.contains(&rc));
}

#[test]
fn test_s5_repeat_splits_contigs() {
    let base = synth_ref(0x7777_EEEE_8888_FFFF, 800);
    let repeat = &base[100..150];
    let reference = format!("{}{}{}{}{}", &base[..300], repeat, &base[350..600], repeat, &base[650..]);
    assert_eq!(reference.len(), 800);
    let pairs = stride_pairs(&reference, 150, 3, false);
    let ctgs = assemble(2, packed_shards(&pairs, 2), empty_ctgs(2));
    let all = collect_contigs(&ctgs);
    assert!(all.len() >= 3, "expected the repeat to split the assembly");
    let total: usize = all.iter().map(|(_, seq, _)| seq.len()).sum();
    assert!(total >= 800, "sum of contig lengths {} too small", total);
    for (_, seq, _) in &all {
        let rc = revcomp_checked(seq);
        assert!(reference.contains(seq) || reference.contains(&rc));
    }
}

#[test]
fn test_s6_empty_input() {
    let ctgs = assemble(2, vec![meta_weaver::PackedReads::new(33), meta_weaver::PackedReads::new(33)], empty_ctgs(2));
    assert!(collect_contigs(&ctgs).is_empty());
}

#[test]
fn test_round_is_idempotent_on_closed_unitigs() {
    // a circular reference is a closed unitig set: no dead ends, no forks
    let reference = synth_ref(0x0C1B_C1BC_1BC1_BC1B, 2000);
    let pairs = stride_pairs(&reference, 150, 3, true);
    let first = assemble(1, packed_shards(&pairs, 1), empty_ctgs(1));
    let first_ctgs = collect_contigs(&first);
    assert_eq!(first_ctgs.len(), 1);

    // re-run the round the way the pipeline would: reads persist, the
    // previous contigs come in as seeds
    let second = assemble(1, packed_shards(&pairs, 1), first);
    let second_ctgs = collect_contigs(&second);
    assert_eq!(second_ctgs.len(), 1);
    assert_eq!(second_ctgs[0].1.len(), first_ctgs[0].1.len());

    // same k-mer content up to orientation (the walk may rotate the circle)
    let kmer_set = |seq: &str| {
        let mut kmers: Vec<String> = Kmer::<1>::get_kmers(K, seq)
            .into_iter()
            .map(|kmer| kmer.canonical().0.to_string())
            .collect();
        kmers.sort();
        kmers
    };
    assert_eq!(kmer_set(&first_ctgs[0].1), kmer_set(&second_ctgs[0].1));
}
