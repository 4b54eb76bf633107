//! Whole-pipeline run: paired FASTQ in, final assembly FASTA out, with
//! checkpointed restart.

mod common;

use common::*;
use meta_weaver::utils::configuration::AssemblerConfig;
use std::io::Write;
use std::path::PathBuf;

const READ_LEN: usize = 150;
const INSERT: usize = 300;

/// Paired files with an insert-300 library over the reference: mate 1 reads
/// the fragment start, mate 2 the reverse complement of the fragment end.
/// Every fragment is emitted twice so the reference ends clear the depth
/// floor.
fn write_paired_fastq(dir: &std::path::Path, reference: &str) -> (PathBuf, PathBuf) {
    let r1_path = dir.join("lib_1.fastq");
    let r2_path = dir.join("lib_2.fastq");
    let mut r1 = std::fs::File::create(&r1_path).unwrap();
    let mut r2 = std::fs::File::create(&r2_path).unwrap();
    let mut starts: Vec<usize> = (0..=reference.len() - INSERT).step_by(3).collect();
    if *starts.last().unwrap() != reference.len() - INSERT {
        starts.push(reference.len() - INSERT);
    }
    let quals = "I".repeat(READ_LEN);
    let mut pair = 0;
    for &p in &starts {
        let mate1 = &reference[p..p + READ_LEN];
        let mate2 =
            meta_weaver::core::sequence::revcomp_checked(&reference[p + READ_LEN..p + INSERT]);
        for _ in 0..2 {
            writeln!(r1, "@p{}/1\n{}\n+\n{}", pair, mate1, quals).unwrap();
            writeln!(r2, "@p{}/2\n{}\n+\n{}", pair, mate2, quals).unwrap();
            pair += 1;
        }
    }
    (r1_path, r2_path)
}

fn read_final_assembly(out_dir: &std::path::Path) -> Vec<(String, String)> {
    let text = std::fs::read_to_string(out_dir.join("final_assembly.fasta")).unwrap();
    let mut records = Vec::new();
    let mut lines = text.lines();
    while let (Some(header), Some(seq)) = (lines.next(), lines.next()) {
        records.push((header.to_string(), seq.to_string()));
    }
    records
}

#[test]
fn test_full_pipeline_and_checkpoint_restart() {
    let dir = tempfile::tempdir().unwrap();
    let reference = synth_ref(0x5EED_5EED_5EED_5EED, 1000);
    let (r1, r2) = write_paired_fastq(dir.path(), &reference);

    let cfg = AssemblerConfig {
        reads: vec![format!("{}:{}", r1.display(), r2.display())],
        kmer_lens: vec![21],
        qual_offset: 33,
        dmin_thres: 2,
        max_kmer_store_mb: 1,
        max_rpcs_in_flight: 64,
        use_qf: false,
        shuffle_reads: true,
        min_ctg_print_len: 500,
        workers: 2,
        checkpoint: true,
        checkpoint_merged: true,
        out_dir: dir.path().to_path_buf(),
        ctgs_fname: None,
        alns_fname: None,
        insert_avg: 300,
        insert_stddev: 10,
    };

    meta_weaver::run_assembly(&cfg).unwrap();

    let expected = canonical_seq(&reference[1..999]);
    let records = read_final_assembly(dir.path());
    assert_eq!(records.len(), 1);
    assert!(records[0].0.starts_with(">Contig0 "));
    assert_eq!(records[0].1, expected);

    // the round dump and the merged-read cache both exist now
    assert!(dir.path().join("contigs-21.fasta").exists());
    assert!(dir.path().join("lib_2-merged.fastq").exists());

    // a restart reuses both checkpoints and reproduces the output
    meta_weaver::run_assembly(&cfg).unwrap();
    let records = read_final_assembly(dir.path());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].1, expected);
}

#[test]
fn test_empty_input_produces_empty_assembly() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = AssemblerConfig {
        reads: vec![],
        kmer_lens: vec![21],
        workers: 2,
        checkpoint: false,
        checkpoint_merged: false,
        out_dir: dir.path().to_path_buf(),
        max_rpcs_in_flight: 64,
        ..Default::default()
    };
    meta_weaver::run_assembly(&cfg).unwrap();
    let text = std::fs::read_to_string(dir.path().join("final_assembly.fasta")).unwrap();
    assert!(text.is_empty());
}
