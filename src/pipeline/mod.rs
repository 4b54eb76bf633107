//! The assembly driver: reads in, rounds of contigging over ascending k,
//! final FASTA out.
//!
//! Every round runs on a fresh worker team whose k-mer word width matches
//! that round's k; packed reads and contigs persist between rounds as
//! per-worker shards handed from team to team.

pub mod contigging;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::comm::run_team;
use crate::core::contigs::Contigs;
use crate::core::packed_reads::PackedReads;
use crate::io::fastq::usable_checkpoint;
use crate::io::merge::{load_merged_reads, merge_reads};
use crate::utils::configuration::AssemblerConfig;
use contigging::{contigging, LassmOptions, RoundOptions};

/// Per-worker pipeline state carried across rounds.
struct RoundState {
    reads: Vec<PackedReads>,
    ctgs: Vec<Contigs>,
}

fn run_round<const N: usize>(
    cfg: &AssemblerConfig,
    opts: &RoundOptions,
    state: RoundState,
) -> Result<RoundState> {
    let inputs: Vec<(PackedReads, Contigs)> =
        state.reads.into_iter().zip(state.ctgs).collect();
    let outputs = run_team::<N, _, _, _>(cfg.max_rpcs_in_flight, inputs, |comm, input| {
        let (mut reads, mut ctgs) = input;
        contigging(&comm, opts, &mut reads, &mut ctgs)?;
        Ok((reads, ctgs))
    })?;
    let (reads, ctgs): (Vec<PackedReads>, Vec<Contigs>) = outputs.into_iter().unzip();
    Ok(RoundState { reads, ctgs })
}

/// Ingest reads: reload the merged checkpoint when present, otherwise merge
/// the raw paired FASTQ inputs.
fn load_reads(cfg: &AssemblerConfig) -> Result<Vec<PackedReads>> {
    let merged_path = cfg
        .reads
        .first()
        .filter(|_| cfg.checkpoint_merged)
        .map(|fname| cfg.merged_reads_path(fname));
    run_team::<1, _, _, _>(
        cfg.max_rpcs_in_flight,
        vec![(); cfg.workers],
        |comm, _| match &merged_path {
            Some(path) if usable_checkpoint(path) => {
                load_merged_reads(&comm, path, cfg.qual_offset)
            }
            _ => merge_reads(&comm, &cfg.reads, cfg.qual_offset, merged_path.as_deref()),
        },
    )
}

/// Run the whole assembly per the configuration; the final contigs land in
/// `final_assembly.fasta` under the output directory.
pub fn run_assembly(cfg: &AssemblerConfig) -> Result<()> {
    cfg.validate()?;
    std::fs::create_dir_all(&cfg.out_dir)
        .with_context(|| format!("could not create output dir {}", cfg.out_dir.display()))?;

    let reads = load_reads(cfg)?;
    let max_read_len = reads.iter().map(|r| r.max_read_len()).max().unwrap_or(0);
    let total_reads: usize = reads.iter().map(|r| r.len()).sum();
    info!("Cached {} reads across {} workers", total_reads, cfg.workers);

    // optional previous contigs to seed the first round
    let mut ctgs: Vec<Contigs> = (0..cfg.workers).map(|_| Contigs::new()).collect();
    if let Some(ctgs_fname) = &cfg.ctgs_fname {
        let path = std::path::PathBuf::from(ctgs_fname);
        ctgs = run_team::<1, _, _, _>(cfg.max_rpcs_in_flight, vec![(); cfg.workers], |comm, _| {
            let mut ctgs = Contigs::new();
            ctgs.load_fasta(&comm, &path)?;
            Ok(ctgs)
        })?;
    }

    let mut state = RoundState { reads, ctgs };
    let last_k = *cfg.kmer_lens.last().expect("validated non-empty");
    for &k in &cfg.kmer_lens {
        let lassm = (k == last_k)
            .then(|| {
                cfg.alns_fname.as_ref().map(|alns| LassmOptions {
                    alns_path: alns.into(),
                    max_kmer_len: max_read_len.max(k),
                    insert_avg: cfg.insert_avg,
                    insert_stddev: cfg.insert_stddev,
                })
            })
            .flatten();
        let opts = RoundOptions {
            k,
            dmin: cfg.dmin_thres,
            max_kmer_store_mb: cfg.max_kmer_store_mb,
            use_qf: cfg.use_qf,
            shuffle: cfg.shuffle_reads,
            checkpoint_path: cfg.checkpoint.then(|| cfg.round_dump_path(k)),
            lassm,
        };
        state = match (k + 31) / 32 {
            1 => run_round::<1>(cfg, &opts, state)?,
            2 => run_round::<2>(cfg, &opts, state)?,
            3 => run_round::<3>(cfg, &opts, state)?,
            4 => run_round::<4>(cfg, &opts, state)?,
            5 => run_round::<5>(cfg, &opts, state)?,
            _ => bail!("k = {} exceeds the largest supported k-mer width", k),
        };
    }

    // final output
    let final_path = cfg.out_dir.join("final_assembly.fasta");
    let min_len = cfg.min_ctg_print_len;
    let shard_stats = run_team::<1, _, _, _>(cfg.max_rpcs_in_flight, state.ctgs, |comm, ctgs| {
        ctgs.dump_fasta(&comm, &final_path, min_len)?;
        ctgs.print_stats(&comm, min_len);
        let printed = ctgs.iter().filter(|c| c.seq.len() >= min_len);
        let (num_ctgs, total_len) =
            printed.fold((0usize, 0usize), |(n, len), c| (n + 1, len + c.seq.len()));
        Ok((num_ctgs, total_len))
    })?;

    let num_ctgs: usize = shard_stats.iter().map(|(n, _)| n).sum();
    let total_len: usize = shard_stats.iter().map(|(_, len)| len).sum();
    let summary = serde_json::json!({
        "workers": cfg.workers,
        "kmer_lens": cfg.kmer_lens,
        "reads": total_reads,
        "contigs": num_ctgs,
        "assembled_length": total_len,
        "min_ctg_print_len": min_len,
    });
    std::fs::write(
        cfg.out_dir.join("assembly_summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;
    info!("Assembly complete: {} contigs ({} bases) in {}", num_ctgs, total_len, final_path.display());
    Ok(())
}
