//! Paired-read overlap merging.
//!
//! Illumina pairs from short fragments overlap at their 3' ends. When the
//! overlap passes the mismatch and differential-quality gates, the pair
//! fuses into one long read: agreeing bases get boosted quality, conflicts
//! keep the higher-quality base at discounted quality. Ambiguous overlaps
//! (more than one plausible placement, or too many Ns) are counted and the
//! pair stays unmerged. Merged pairs keep the pairing invariant by storing a
//! single-N placeholder as their second mate.

use anyhow::{Context, Result};
use std::io::Write;
use tracing::info;

use crate::comm::WorkerComm;
use crate::core::packed_reads::PackedReads;
use crate::core::sequence::revcomp;
use crate::io::fastq::{decode_quals, PairedFastqReader};
use crate::utils::perc_str;

const MIN_OVERLAP: i32 = 12;
const EXTRA_TEST_OVERLAP: i32 = 2;
const MAX_MISMATCHES: i32 = 3;
/// Extra tolerated mismatches per 1000 overlap bases.
const EXTRA_MISMATCHES_PER_1000: i32 = 150;
/// Accumulated differential-quality error probability allowed per overlap base.
const MAX_PERROR: f64 = 0.025;
const MAX_MATCH_QUAL: u8 = 41;

#[inline]
fn q2perror(qual: u8) -> f64 {
    10f64.powf(-(qual as f64) / 10.0)
}

/// Mismatches between two equal-length slices, giving up past `max`.
fn count_mismatches(a: &[u8], b: &[u8], max: i32) -> i32 {
    let mut mismatches = 0;
    for (x, y) in a.iter().zip(b) {
        if x != y {
            mismatches += 1;
            if mismatches > max {
                break;
            }
        }
    }
    mismatches
}

#[derive(Debug, Default)]
pub struct MergeStats {
    pub num_pairs: i64,
    pub num_merged: i64,
    pub num_ambiguous: i64,
    pub merged_len: i64,
    pub overlap_len: i64,
}

/// Try to merge one pair. Mate 2 arrives in sequencing orientation and is
/// reverse-complemented here. On success returns the fused read.
fn merge_pair(
    seq1: &str,
    quals1: &[u8],
    seq2: &str,
    quals2: &[u8],
    stats: &mut MergeStats,
) -> Result<Option<(String, Vec<u8>)>> {
    let mut s1 = seq1.as_bytes().to_vec();
    let mut q1 = quals1.to_vec();
    let rc2 = revcomp(seq2)?.into_bytes();
    let mut rq2 = quals2.to_vec();
    rq2.reverse();

    let len = (s1.len().min(rc2.len())) as i32;
    let start_i = s1.len() as i32 - len;
    let mut best_i: i32 = -1;
    let mut found_i: i32 = -1;
    let mut abort_merge = false;

    for i in 0..(len - MIN_OVERLAP + EXTRA_TEST_OVERLAP) {
        if abort_merge {
            break;
        }
        let overlap = len - i;
        let this_max_mismatch = MAX_MISMATCHES + EXTRA_MISMATCHES_PER_1000 * overlap / 1000;
        let error_max_mismatch = this_max_mismatch * 4 / 3 + 1;
        let off = (start_i + i) as usize;
        if count_mismatches(&s1[off..], &rc2[..overlap as usize], error_max_mismatch)
            > error_max_mismatch
        {
            continue;
        }
        let mut matches = 0i32;
        let mut mismatches = 0i32;
        let mut both_ns = 0i32;
        let mut n_count = 0i32;
        let mut overlap_checked = 0i32;
        let mut perror = 0.0f64;
        for j in 0..overlap as usize {
            overlap_checked += 1;
            let ps = s1[off + j];
            let rs = rc2[j];
            if ps == rs {
                matches += 1;
                if ps == b'N' {
                    n_count += 2;
                    both_ns += 1;
                    if both_ns > 1 {
                        // multiple N-on-N positions cannot be trusted
                        abort_merge = true;
                        stats.num_ambiguous += 1;
                        break;
                    }
                }
            } else {
                mismatches += 1;
                if ps == b'N' {
                    mismatches += 1;
                    n_count += 1;
                    q1[off + j] = 0;
                    perror += q2perror(rq2[j]);
                } else if rs == b'N' {
                    mismatches += 1;
                    n_count += 1;
                    rq2[j] = 0;
                    perror += q2perror(q1[off + j]);
                }
                let (qa, qb) = (q1[off + j], rq2[j]);
                let diffq = qa.abs_diff(qb);
                if diffq <= 2 {
                    // close quality scores are a coin flip
                    perror += 0.5;
                } else {
                    perror += q2perror(diffq);
                }
            }
            if n_count > 3 {
                abort_merge = true;
                stats.num_ambiguous += 1;
                break;
            }
            if mismatches > error_max_mismatch {
                break;
            }
        }
        let match_thres = (overlap - this_max_mismatch).max(MIN_OVERLAP);
        if matches >= match_thres
            && overlap_checked == overlap
            && mismatches <= this_max_mismatch
            && perror / overlap as f64 <= MAX_PERROR
        {
            if best_i < 0 && found_i < 0 {
                best_i = i;
            } else {
                // a second acceptable placement: ambiguous
                stats.num_ambiguous += 1;
                best_i = -1;
                break;
            }
        } else if overlap_checked == overlap
            && mismatches <= error_max_mismatch
            && perror / overlap as f64 <= MAX_PERROR * 4.0 / 3.0
        {
            found_i = i;
            if best_i >= 0 {
                stats.num_ambiguous += 1;
                best_i = -1;
                break;
            }
        }
    }

    if best_i < 0 || abort_merge {
        return Ok(None);
    }
    let i = best_i;
    let overlap = (len - i) as usize;
    let off = (start_i + i) as usize;
    for j in 0..overlap {
        if s1[off + j] == rc2[j] {
            // agreement boosts quality up to the cap
            q1[off + j] = (q1[off + j].saturating_add(rq2[j])).min(MAX_MATCH_QUAL);
        } else {
            let new_qual = if q1[off + j] < rq2[j] {
                s1[off + j] = rc2[j];
                rq2[j] - q1[off + j]
            } else {
                q1[off + j] - rq2[j]
            };
            q1[off + j] = new_qual.max(2);
        }
    }
    let mut merged_seq = s1;
    merged_seq.extend_from_slice(&rc2[overlap..]);
    let mut merged_quals = q1;
    merged_quals.extend_from_slice(&rq2[overlap..]);

    stats.num_merged += 1;
    stats.merged_len += merged_seq.len() as i64;
    stats.overlap_len += overlap as i64;
    Ok(Some((String::from_utf8(merged_seq).expect("merged bases are ASCII"), merged_quals)))
}

/// Stream the input pairs, keep this worker's share (pair index modulo the
/// worker count), merge what merges, and pack everything. Globally unique
/// pair ids come straight from the global pair index.
pub fn merge_reads<const N: usize>(
    comm: &WorkerComm<N>,
    reads_fnames: &[String],
    qual_offset: u8,
    checkpoint_path: Option<&std::path::Path>,
) -> Result<PackedReads> {
    let nworkers = comm.world_size() as i64;
    let rank = comm.rank() as i64;
    let mut packed = PackedReads::new(qual_offset);
    let mut stats = MergeStats::default();
    let mut global_pair_index = 0i64;
    for fname in reads_fnames {
        let mut reader = PairedFastqReader::open(fname)
            .with_context(|| format!("opening reads file '{}'", fname))?;
        while let Some((r1, r2)) = reader.next_pair()? {
            let pair_index = global_pair_index;
            global_pair_index += 1;
            if pair_index % nworkers != rank {
                continue;
            }
            stats.num_pairs += 1;
            let pair_id = pair_index + 1;
            let quals1 = decode_quals(&r1.quals, qual_offset)?;
            let quals2 = decode_quals(&r2.quals, qual_offset)?;
            match merge_pair(&r1.seq, &quals1, &r2.seq, &quals2, &mut stats)? {
                Some((merged_seq, merged_quals)) => {
                    packed.push(crate::core::packed_reads::PackedRead::new(
                        -pair_id,
                        &merged_seq,
                        &merged_quals,
                    )?);
                    // placeholder mate keeps the pairing invariant
                    packed.push(crate::core::packed_reads::PackedRead::new(pair_id, "N", &[0])?);
                }
                None => {
                    packed.push(crate::core::packed_reads::PackedRead::new(
                        -pair_id, &r1.seq, &quals1,
                    )?);
                    packed.push(crate::core::packed_reads::PackedRead::new(
                        pair_id, &r2.seq, &quals2,
                    )?);
                }
            }
        }
    }

    let all_pairs = comm.reduce_sum_i64(stats.num_pairs);
    let all_merged = comm.reduce_sum_i64(stats.num_merged);
    let all_ambiguous = comm.reduce_sum_i64(stats.num_ambiguous);
    let all_merged_len = comm.reduce_sum_i64(stats.merged_len);
    let all_overlap_len = comm.reduce_sum_i64(stats.overlap_len);
    let max_read_len = comm.reduce_max_i64(packed.max_read_len() as i64);
    if comm.rank() == 0 {
        info!("Merged {} of {} read pairs", perc_str(all_merged as u64, all_pairs.max(0) as u64), all_pairs);
        info!("  ambiguous overlaps: {}", perc_str(all_ambiguous as u64, all_pairs.max(0) as u64));
        if all_merged > 0 {
            info!("  average merged length {:.1}", all_merged_len as f64 / all_merged as f64);
            info!("  average overlap length {:.1}", all_overlap_len as f64 / all_merged as f64);
        }
        info!("  max read length {}", max_read_len);
    }

    if let Some(path) = checkpoint_path {
        write_merged_checkpoint(comm, &packed, path)?;
    }
    comm.barrier();
    Ok(packed)
}

/// Write the merged reads as an interleaved FASTQ checkpoint, gathered in
/// rank order.
fn write_merged_checkpoint<const N: usize>(
    comm: &WorkerComm<N>,
    packed: &PackedReads,
    path: &std::path::Path,
) -> Result<()> {
    let qual_offset = packed.qual_offset();
    let mut section = String::new();
    for read in packed.iter() {
        let (seq, quals) = read.unpack();
        let quals: String = quals.iter().map(|&q| (q + qual_offset) as char).collect();
        section.push_str(&format!("{}\n{}\n+\n{}\n", read.str_id(), seq, quals));
    }
    if let Some(sections) = comm.gather_strings(section) {
        let mut file = std::fs::File::create(path)
            .with_context(|| format!("could not create {}", path.display()))?;
        for section in &sections {
            file.write_all(section.as_bytes())?;
        }
        info!("Wrote merged reads to {}", path.display());
    }
    comm.barrier();
    Ok(())
}

/// Reload a merged-read checkpoint; pair ids come from the stored names.
pub fn load_merged_reads<const N: usize>(
    comm: &WorkerComm<N>,
    path: &std::path::Path,
    qual_offset: u8,
) -> Result<PackedReads> {
    let nworkers = comm.world_size() as i64;
    let rank = comm.rank() as i64;
    let mut packed = PackedReads::new(qual_offset);
    let mut reader = PairedFastqReader::open(path.to_str().context("non-UTF-8 path")?)?;
    let mut pair_index = 0i64;
    while let Some((r1, r2)) = reader.next_pair()? {
        let keep = pair_index % nworkers == rank;
        pair_index += 1;
        if !keep {
            continue;
        }
        let pair_id: i64 = r1
            .id
            .trim_start_matches('r')
            .split('/')
            .next()
            .and_then(|v| v.parse().ok())
            .with_context(|| format!("bad merged read id '{}'", r1.id))?;
        packed.add_read(-pair_id, &r1.seq, &r1.quals)?;
        packed.add_read(pair_id, &r2.seq, &r2.quals)?;
    }
    let all_reads = comm.reduce_sum_i64(packed.len() as i64);
    if comm.rank() == 0 {
        info!("Loaded {} merged reads from {}", all_reads, path.display());
    }
    comm.barrier();
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_overlap_merges() {
        // fragment of 30 bases, mates of 22 each overlapping by 14
        let fragment = "ACGGTTCAGACGGTAACGTTACGGATCCAA";
        let seq1 = &fragment[..22];
        let mate2 = revcomp(&fragment[8..]).unwrap();
        let quals = vec![35u8; 22];
        let mut stats = MergeStats::default();
        let merged = merge_pair(seq1, &quals, &mate2, &quals, &mut stats).unwrap();
        let (merged_seq, merged_quals) = merged.expect("pair should merge");
        assert_eq!(merged_seq, fragment);
        assert_eq!(merged_quals.len(), 30);
        // the overlapping bases got boosted quality, capped at the max
        assert_eq!(merged_quals[15], 41);
        assert_eq!(stats.num_merged, 1);
        assert_eq!(stats.overlap_len, 14);
    }

    #[test]
    fn test_disjoint_pair_does_not_merge() {
        let seq1 = "ACGGTTCAGACGGTAACGTT";
        let seq2 = "TTTTGGGGCCCCAAAATTTT";
        let quals = vec![35u8; 20];
        let mut stats = MergeStats::default();
        let merged = merge_pair(seq1, &quals, seq2, &quals, &mut stats).unwrap();
        assert!(merged.is_none());
        assert_eq!(stats.num_merged, 0);
    }

    #[test]
    fn test_mismatch_keeps_higher_quality_base() {
        let fragment = "ACGGTTCAGACGGTAACGTTACGGATCCAA";
        let seq1 = &fragment[..22];
        // the mate disagrees at one overlap position, with higher quality
        let mut mate_src: Vec<u8> = fragment.as_bytes()[8..].to_vec();
        mate_src[7] = b'T'; // fragment position 15 (was A)
        let mate2 = revcomp(std::str::from_utf8(&mate_src).unwrap()).unwrap();
        let quals1 = vec![20u8; 22];
        let quals2 = vec![38u8; 22];
        let mut stats = MergeStats::default();
        let merged = merge_pair(seq1, &quals1, &mate2, &quals2, &mut stats).unwrap();
        let (merged_seq, merged_quals) = merged.expect("one mismatch should still merge");
        assert_eq!(merged_seq.as_bytes()[15], b'T');
        assert_eq!(merged_quals[15], 18); // the quality difference, discounted
    }
}
