//! FASTA dump/load round-trips across worker counts.

mod common;

use common::*;
use meta_weaver::comm::run_team;
use meta_weaver::core::contigs::{Contig, Contigs};
use std::collections::BTreeMap;

fn multiset(ctgs: &[Contigs]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for shard in ctgs {
        for ctg in shard.iter() {
            *counts.entry(canonical_seq(&ctg.seq)).or_insert(0) += 1;
        }
    }
    counts
}

#[test]
fn test_dump_load_roundtrip_across_worker_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("contigs-21.fasta");

    // three workers write an uneven spread of contigs
    let mut sources: Vec<Contigs> = empty_ctgs(3);
    for id in 0..17i64 {
        let seq = synth_ref(0xF00D + id as u64, 60 + (id as usize % 5) * 37);
        sources[(id % 3) as usize].add_contig(Contig { id, seq, depth: 1.5 + id as f64 });
    }
    let expected = multiset(&sources);

    let write_path = path.clone();
    run_team::<1, _, _, _>(16, sources, move |comm, ctgs| {
        ctgs.dump_fasta(&comm, &write_path, 0)?;
        Ok(())
    })
    .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().filter(|l| l.starts_with(">Contig")).count(), 17);

    // reload on a different worker count
    let read_path = path.clone();
    let loaded = run_team::<1, _, _, _>(16, vec![(); 2], move |comm, _| {
        let mut ctgs = Contigs::new();
        ctgs.load_fasta(&comm, &read_path)?;
        Ok(ctgs)
    })
    .unwrap();

    assert_eq!(multiset(&loaded), expected);
    // every contig was ingested exactly once
    let total: usize = loaded.iter().map(|c| c.len()).sum();
    assert_eq!(total, 17);
}

#[test]
fn test_dump_respects_min_length_and_canonical_orientation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final.fasta");
    let mut ctgs = Contigs::new();
    ctgs.add_contig(Contig { id: 0, seq: "TTTTGGGGAAAACCCCGGAT".to_string(), depth: 3.0 });
    ctgs.add_contig(Contig { id: 1, seq: "ACG".to_string(), depth: 1.0 });

    let write_path = path.clone();
    run_team::<1, _, _, _>(16, vec![ctgs], move |comm, ctgs| {
        ctgs.dump_fasta(&comm, &write_path, 10)?;
        Ok(())
    })
    .unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    // the short contig is filtered; the long one dumps canonically
    assert!(!text.contains(">Contig1"));
    let expected_seq = canonical_seq("TTTTGGGGAAAACCCCGGAT");
    assert_eq!(text, format!(">Contig0 3\n{}\n", expected_seq));
}
