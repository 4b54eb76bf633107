//! Aggregating update store.
//!
//! Producers submit `(target_worker, payload)` pairs; payloads buffer per
//! target and ship as one batched active message when the byte budget fills.
//! The receiving side applies them inside the phase's message pump. Flushing
//! is two-sided: the producer sends its residual buffers plus a marker per
//! destination carrying the total batch count for the lane; a receiver is
//! drained once it holds every peer's marker and has applied the promised
//! batches. A barrier then closes the flush, so `flush` guarantees global
//! application, FIFO per (src, dst) pair, and exactly-once delivery.

use super::message::{Envelope, Lane, Message, NUM_LANES};
use super::world::WorkerComm;
use crate::utils::free_mem_bytes;
use tracing::debug;

/// Fraction of free memory per worker a store may claim for buffering.
const MEM_FRACTION: f64 = 0.1;
/// Floor: always buffer at least this many payloads per batch.
const MIN_BATCH_ITEMS: usize = 100;
const MAX_BATCH_ITEMS: usize = 100_000;

/// Producer half of one aggregation lane.
pub struct AggrStore<P, const N: usize> {
    lane: Lane,
    buffers: Vec<Vec<P>>,
    batch_items: usize,
    sent_batches: Vec<u64>,
    wrap: fn(Vec<P>) -> Message<N>,
}

impl<P, const N: usize> AggrStore<P, N> {
    /// `max_store_bytes` of 0 sizes the store from free memory.
    pub fn new(
        comm: &WorkerComm<N>,
        lane: Lane,
        name: &str,
        est_payload_bytes: usize,
        max_store_bytes: u64,
        wrap: fn(Vec<P>) -> Message<N>,
    ) -> Self {
        let nworkers = comm.world_size();
        let budget = if max_store_bytes > 0 {
            max_store_bytes
        } else {
            let mem = (MEM_FRACTION * free_mem_bytes() as f64 / nworkers as f64) as u64;
            mem.max((MIN_BATCH_ITEMS * est_payload_bytes) as u64)
        };
        let batch_items = ((budget as usize / nworkers.max(1)) / est_payload_bytes.max(1))
            .clamp(MIN_BATCH_ITEMS, MAX_BATCH_ITEMS);
        debug!(
            "aggr store '{}': {} bytes budget, {} payloads per batch",
            name, budget, batch_items
        );
        Self {
            lane,
            buffers: (0..nworkers).map(|_| Vec::new()).collect(),
            batch_items,
            sent_batches: vec![0; nworkers],
            wrap,
        }
    }

    /// Buffer one payload for `target`, shipping the batch when full. The
    /// service closure keeps the progress pump alive under backpressure.
    pub fn update(
        &mut self,
        comm: &WorkerComm<N>,
        target: usize,
        payload: P,
        service: &mut dyn FnMut(Envelope<N>),
    ) {
        self.buffers[target].push(payload);
        if self.buffers[target].len() >= self.batch_items {
            self.ship(comm, target, service);
        }
    }

    fn ship(&mut self, comm: &WorkerComm<N>, target: usize, service: &mut dyn FnMut(Envelope<N>)) {
        if self.buffers[target].is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.buffers[target]);
        self.sent_batches[target] += 1;
        comm.send_with(target, (self.wrap)(batch), service);
    }

    /// Ship residual buffers and the per-destination flush markers. The
    /// caller then pumps until its lane tracker reports drained and closes
    /// with a barrier.
    pub fn flush_send(&mut self, comm: &WorkerComm<N>, service: &mut dyn FnMut(Envelope<N>)) {
        for target in 0..comm.world_size() {
            self.ship(comm, target, service);
        }
        for target in 0..comm.world_size() {
            let batches = self.sent_batches[target];
            comm.send_with(target, Message::FlushMarker { lane: self.lane, batches }, service);
        }
        self.sent_batches.iter_mut().for_each(|b| *b = 0);
    }
}

/// Receiver-side accounting for lane flushes. The phase pump reports every
/// applied batch and marker; `drained` goes true when all promised batches
/// for the lane have been applied.
#[derive(Debug, Default)]
pub struct LaneTracker {
    markers: [usize; NUM_LANES],
    promised: [u64; NUM_LANES],
    applied: [u64; NUM_LANES],
}

impl LaneTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_batch(&mut self, lane: Lane) {
        self.applied[lane.index()] += 1;
    }

    pub fn on_marker(&mut self, lane: Lane, batches: u64) {
        self.markers[lane.index()] += 1;
        self.promised[lane.index()] += batches;
    }

    pub fn drained(&self, lane: Lane, nworkers: usize) -> bool {
        let i = lane.index();
        self.markers[i] == nworkers && self.applied[i] == self.promised[i]
    }

    /// Reset a lane for reuse within the same phase.
    pub fn reset(&mut self, lane: Lane) {
        let i = lane.index();
        self.markers[i] = 0;
        self.promised[i] = 0;
        self.applied[i] = 0;
    }
}
