//! Pair-locality invariants for the read shuffler.

mod common;

use common::*;
use meta_weaver::assembly::shuffle::shuffle_reads;
use meta_weaver::comm::run_team;
use meta_weaver::pipeline::contigging::{contigging, RoundOptions};
use std::collections::HashMap;

const K: usize = 21;

#[test]
fn test_mates_stay_together_after_shuffle() {
    let reference = synth_ref(0x5EED_5EED_5EED_5EED, 1000);
    let pairs = stride_pairs(&reference, 150, 3, false);
    let num_pairs = pairs.len();
    let shards = packed_shards(&pairs, 4);
    let opts = RoundOptions {
        k: K,
        dmin: 2,
        max_kmer_store_mb: 1,
        use_qf: false,
        shuffle: false,
        checkpoint_path: None,
        lassm: None,
    };
    let inputs: Vec<_> = shards.into_iter().zip(empty_ctgs(4)).collect();
    let outputs = run_team::<1, _, _, _>(64, inputs, |comm, (mut reads, mut ctgs)| {
        contigging(&comm, &opts, &mut reads, &mut ctgs)?;
        shuffle_reads(&comm, &mut reads, &ctgs)?;
        Ok(reads)
    })
    .unwrap();

    let mut seen_pairs: HashMap<i64, usize> = HashMap::new();
    let mut total_reads = 0usize;
    for (worker, reads) in outputs.iter().enumerate() {
        // mates arrive together: even count, adjacent, opposite signs
        assert_eq!(reads.len() % 2, 0);
        for (mate1, mate2) in reads.pairs() {
            assert_eq!(mate1.pair_id(), mate2.pair_id());
            assert!(mate1.id() < 0 && mate2.id() > 0);
            let prev = seen_pairs.insert(mate1.pair_id(), worker);
            assert!(prev.is_none(), "pair {} appears on two workers", mate1.pair_id());
        }
        total_reads += reads.len();
    }
    // nothing lost, nothing duplicated
    assert_eq!(total_reads, num_pairs * 2);
    assert_eq!(seen_pairs.len(), num_pairs);
}
