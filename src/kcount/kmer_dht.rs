//! The distributed k-mer table.
//!
//! Canonical k-mers shard across workers by stable hash; all mutation flows
//! through the aggregating store as batched updates applied on the owner.
//! After `finalize`, each surviving record carries its chosen left and right
//! extension and never relocates for the rest of the round.

use ahash::AHashMap;
use std::cell::RefCell;
use tracing::debug;

use crate::assembly::fragments::FragHandle;
use crate::comm::{AggrStore, Envelope, Lane, LaneTracker, Message, WorkerComm};
use crate::core::kmer::Kmer;
use crate::kcount::extensions::{choose_ext, ExtVotes, EXT_DEADEND, EXT_FORK};
use crate::kcount::qfilter::CountingFilter;

/// One batched observation of a canonical k-mer. Extension bases are 0 when
/// the k-mer sat at a read boundary or next to an N.
#[derive(Debug, Clone)]
pub struct KmerUpdate<const N: usize> {
    pub kmer: Kmer<N>,
    pub count: u16,
    pub left: u8,
    pub left_qual: u8,
    pub right: u8,
    pub right_qual: u8,
    pub from_ctg: bool,
}

/// Summary returned by remote lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerRecordInfo {
    pub count: u16,
    pub left: u8,
    pub right: u8,
}

/// The per-k-mer record. `left`/`right` hold 0 until `finalize`, then one of
/// A, C, G, T, X, F. `frag` is the traversal's claim back-pointer.
#[derive(Debug, Clone)]
pub struct KmerCounts {
    pub count: u16,
    pub left_votes: ExtVotes,
    pub right_votes: ExtVotes,
    pub left: u8,
    pub right: u8,
    pub from_ctg: bool,
    pub frag: Option<FragHandle>,
}

impl KmerCounts {
    fn new() -> Self {
        Self {
            count: 0,
            left_votes: ExtVotes::default(),
            right_votes: ExtVotes::default(),
            left: 0,
            right: 0,
            from_ctg: false,
            frag: None,
        }
    }

    pub fn info(&self) -> KmerRecordInfo {
        KmerRecordInfo { count: self.count, left: self.left, right: self.right }
    }

    /// Terminal records never start a walk; walks through them end.
    pub fn is_terminal(&self) -> bool {
        self.left == EXT_DEADEND || self.right == EXT_DEADEND
    }

    pub fn is_fork(&self) -> bool {
        self.left == EXT_FORK || self.right == EXT_FORK
    }
}

/// Owner of a canonical k-mer.
pub fn target_rank<const N: usize>(kmer: &Kmer<N>, nworkers: usize) -> usize {
    (kmer.hash() % nworkers as u64) as usize
}

pub struct KmerDht<const N: usize> {
    pub(crate) map: AHashMap<Kmer<N>, KmerCounts>,
    store: AggrStore<KmerUpdate<N>, N>,
    tracker: RefCell<LaneTracker>,
    qfilter: Option<CountingFilter>,
    dmin: u16,
    k: usize,
}

impl<const N: usize> KmerDht<N> {
    pub fn new(
        comm: &WorkerComm<N>,
        k: usize,
        est_local_kmers: usize,
        max_store_mb: u64,
        use_qf: bool,
        dmin: u16,
    ) -> Self {
        let store = AggrStore::new(
            comm,
            Lane::Kmers,
            "kmer store",
            std::mem::size_of::<KmerUpdate<N>>(),
            max_store_mb * 1024 * 1024,
            Message::KmerBatch,
        );
        let qfilter = use_qf.then(|| CountingFilter::new(est_local_kmers));
        if let Some(filter) = &qfilter {
            debug!("kmer counting filter using {} bytes", filter.mem_bytes());
        }
        Self {
            map: AHashMap::with_capacity(est_local_kmers),
            store,
            tracker: RefCell::new(LaneTracker::new()),
            qfilter,
            dmin,
            k,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn num_local_kmers(&self) -> usize {
        self.map.len()
    }

    /// Lazy pass over the records this worker owns.
    pub fn local_kmers(&self) -> impl Iterator<Item = (&Kmer<N>, &KmerCounts)> {
        self.map.iter()
    }

    pub fn get_local(&self, kmer: &Kmer<N>) -> Option<&KmerCounts> {
        self.map.get(kmer)
    }

    fn apply_update(
        map: &mut AHashMap<Kmer<N>, KmerCounts>,
        qfilter: &mut Option<CountingFilter>,
        update: KmerUpdate<N>,
    ) {
        let mut swallowed: u16 = 0;
        if !map.contains_key(&update.kmer) {
            if let Some(filter) = qfilter {
                // seed k-mers always pass; read k-mers must be seen twice
                if !update.from_ctg && filter.increment(update.kmer.hash()) == 0 {
                    return;
                }
                swallowed = 1;
            }
        }
        let record = map.entry(update.kmer).or_insert_with(KmerCounts::new);
        record.count = record.count.saturating_add(update.count.saturating_add(swallowed));
        record.from_ctg |= update.from_ctg;
        if update.left != 0 {
            record.left_votes.vote(update.left, update.left_qual, update.count);
        }
        if update.right != 0 {
            record.right_votes.vote(update.right, update.right_qual, update.count);
        }
    }

    /// Handle one incoming message during an ingest phase.
    fn service_ingest(
        map: &mut AHashMap<Kmer<N>, KmerCounts>,
        qfilter: &mut Option<CountingFilter>,
        tracker: &RefCell<LaneTracker>,
        env: Envelope<N>,
    ) {
        match env.msg {
            Message::KmerBatch(batch) => {
                for update in batch {
                    Self::apply_update(map, qfilter, update);
                }
                tracker.borrow_mut().on_batch(Lane::Kmers);
            }
            Message::FlushMarker { lane, batches } => {
                tracker.borrow_mut().on_marker(lane, batches);
            }
            other => panic!("unexpected message during kmer ingest: {:?}", other),
        }
    }

    /// Route one observation to its owner; applies locally through the same
    /// batched path so ordering and accounting stay uniform.
    pub fn add_kmer(&mut self, comm: &WorkerComm<N>, update: KmerUpdate<N>) {
        let target = target_rank(&update.kmer, comm.world_size());
        let Self { map, store, tracker, qfilter, .. } = self;
        let mut service =
            |env: Envelope<N>| Self::service_ingest(map, qfilter, tracker, env);
        store.update(comm, target, update, &mut service);
    }

    /// Drain the ingest lane globally; returns after every in-flight update
    /// has been applied on its owner.
    pub fn flush_updates(&mut self, comm: &WorkerComm<N>) {
        let nworkers = comm.world_size();
        let Self { map, store, tracker, qfilter, .. } = self;
        let tracker = &*tracker;
        let mut service =
            |env: Envelope<N>| Self::service_ingest(map, qfilter, tracker, env);
        store.flush_send(comm, &mut service);
        comm.pump_until(&mut service, &mut || {
            tracker.borrow().drained(Lane::Kmers, nworkers)
        });
        comm.barrier();
        tracker.borrow_mut().reset(Lane::Kmers);
        comm.barrier();
    }

    /// Choose extensions and drop under-supported k-mers. Purely local; the
    /// caller separates phases with a barrier.
    pub fn finalize(&mut self) {
        let dmin = self.dmin;
        self.map.retain(|_, record| record.from_ctg || record.count >= dmin);
        for record in self.map.values_mut() {
            record.left = choose_ext(&record.left_votes, record.count as u32);
            record.right = choose_ext(&record.right_votes, record.count as u32);
        }
    }

    /// Distributed point lookup. Local when the k-mer shards here, otherwise
    /// one active-message round trip.
    pub fn lookup(&mut self, comm: &WorkerComm<N>, kmer: &Kmer<N>) -> Option<KmerRecordInfo> {
        let (canon, _) = kmer.canonical();
        let target = target_rank(&canon, comm.world_size());
        if target == comm.rank() {
            return self.map.get(&canon).map(|r| r.info());
        }
        let Self { map, .. } = self;
        comm.rpc(target, Message::KmerLookup { kmer: canon }, &mut |env| match env.msg {
            Message::KmerLookup { kmer } => {
                let reply = map.get(&kmer).map(|r| r.info());
                comm.send(env.src, Message::KmerLookupReply(reply));
                None
            }
            Message::KmerLookupReply(reply) => Some(reply),
            other => panic!("unexpected message during kmer lookup: {:?}", other),
        })
    }

    /// Keep answering lookups until every worker is done issuing them.
    pub fn finish_lookups(&mut self, comm: &WorkerComm<N>) {
        let Self { map, .. } = self;
        comm.quiesce(&mut |env| match env.msg {
            Message::KmerLookup { kmer } => {
                let reply = map.get(&kmer).map(|r| r.info());
                comm.send(env.src, Message::KmerLookupReply(reply));
            }
            other => panic!("unexpected message during kmer lookup: {:?}", other),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(
        map: &mut AHashMap<Kmer<1>, KmerCounts>,
        qf: &mut Option<CountingFilter>,
        kmer: Kmer<1>,
        left: u8,
        left_qual: u8,
        right: u8,
        right_qual: u8,
    ) {
        KmerDht::<1>::apply_update(
            map,
            qf,
            KmerUpdate { kmer, count: 1, left, left_qual, right, right_qual, from_ctg: false },
        );
    }

    #[test]
    fn test_apply_update_merges_votes() {
        let mut map = AHashMap::new();
        let mut qf = None;
        let kmer = Kmer::<1>::from_bases(b"ACGTACGTACGTACGTACGTA").unwrap().canonical().0;
        for _ in 0..3 {
            apply(&mut map, &mut qf, kmer, b'C', 35, b'G', 35);
        }
        let record = map.get(&kmer).unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(record.left_votes.lo.get(1), 3);
        assert_eq!(record.right_votes.hi.get(2), 3);
    }

    #[test]
    fn test_qfilter_swallows_singletons() {
        let mut map: AHashMap<Kmer<1>, KmerCounts> = AHashMap::new();
        let mut qf = Some(CountingFilter::new(1024));
        let kmer = Kmer::<1>::from_bases(b"ACGGACGTACGTACGTACGTA").unwrap().canonical().0;
        apply(&mut map, &mut qf, kmer, 0, 0, b'A', 35);
        assert!(map.is_empty());
        apply(&mut map, &mut qf, kmer, 0, 0, b'A', 35);
        // second sighting inserts, credited for the swallowed first
        assert_eq!(map.get(&kmer).unwrap().count, 2);
    }

    #[test]
    fn test_finalize_drops_below_dmin() {
        let mut map: AHashMap<Kmer<1>, KmerCounts> = AHashMap::new();
        let mut qf = None;
        let weak = Kmer::<1>::from_bases(b"AAAAACGTACGTACGTACGTA").unwrap().canonical().0;
        let strong = Kmer::<1>::from_bases(b"CCCCACGTACGTACGTACGTA").unwrap().canonical().0;
        apply(&mut map, &mut qf, weak, 0, 0, b'A', 35);
        for _ in 0..10 {
            apply(&mut map, &mut qf, strong, b'G', 35, b'T', 35);
        }
        // finalize over a hand-built dht
        let dmin = 2;
        map.retain(|_, r| r.from_ctg || r.count >= dmin);
        assert!(map.get(&weak).is_none());
        let record = map.get_mut(&strong).unwrap();
        record.left = choose_ext(&record.left_votes, record.count as u32);
        record.right = choose_ext(&record.right_votes, record.count as u32);
        assert_eq!(record.left, b'G');
        assert_eq!(record.right, b'T');
    }
}
