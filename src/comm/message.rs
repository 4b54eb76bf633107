//! The active-message registry.
//!
//! Every payload that can cross a worker boundary is a variant here, so the
//! phase pumps can match exhaustively. `*Batch` variants are one-way batched
//! updates delivered through the aggregating store; `*Query`/`*Reply` pairs
//! are round trips; `FlushMarker` closes an aggregation lane.

use crate::assembly::fragments::{FragHandle, FragSnapshot};
use crate::assembly::localassm::{CtgData, CtgInfo, CtgReadData, ReadCtgUpdate};
use crate::assembly::traversal::{StepInfo, StepRequest};
use crate::core::kmer::Kmer;
use crate::core::packed_reads::PackedRead;
use crate::kcount::kmer_dht::{KmerRecordInfo, KmerUpdate};

/// Identifies an aggregation lane for the flush protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Kmers,
    KmerCids,
    CidReads,
    ReadTargets,
    ReadPairs,
    ReadCtgs,
    Ctgs,
    CtgReads,
}

pub const NUM_LANES: usize = 8;

impl Lane {
    pub fn index(self) -> usize {
        match self {
            Lane::Kmers => 0,
            Lane::KmerCids => 1,
            Lane::CidReads => 2,
            Lane::ReadTargets => 3,
            Lane::ReadPairs => 4,
            Lane::ReadCtgs => 5,
            Lane::Ctgs => 6,
            Lane::CtgReads => 7,
        }
    }
}

#[derive(Debug)]
pub enum Message<const N: usize> {
    // k-mer table (C2)
    KmerBatch(Vec<KmerUpdate<N>>),
    KmerLookup { kmer: Kmer<N> },
    KmerLookupReply(Option<KmerRecordInfo>),

    // de Bruijn traversal (C4)
    WalkStep(StepRequest<N>),
    WalkStepReply(StepInfo<N>),
    FragFetch { handle: FragHandle },
    FragFetchReply(Box<FragSnapshot>),

    // read shuffler (C6)
    KmerCidBatch(Vec<(u64, i64)>),
    CidQuery { kmers: Vec<u64> },
    CidQueryReply { cids: Vec<i64> },
    CidReadBatch(Vec<(i64, i64)>),
    ReadTargetBatch(Vec<(i64, u32)>),
    TargetQuery { read_id: i64 },
    TargetQueryReply(Option<u32>),
    ReadPairBatch(Vec<(PackedRead, PackedRead)>),

    // local assembly (C7)
    ReadCtgBatch(Vec<ReadCtgUpdate>),
    CtgInfoQuery { read_ids: Vec<i64> },
    CtgInfoQueryReply { infos: Vec<Vec<CtgInfo>> },
    CtgBatch(Vec<CtgData>),
    CtgReadBatch(Vec<CtgReadData>),

    // aggregating-store flush protocol (C3)
    FlushMarker { lane: Lane, batches: u64 },
}

/// An active message together with its source rank. FIFO holds per source.
#[derive(Debug)]
pub struct Envelope<const N: usize> {
    pub src: usize,
    pub msg: Message<N>,
}
