//! The worker team runtime.
//!
//! W symmetric workers run as OS threads, one communication endpoint each.
//! Active messages travel over bounded crossbeam channels (one inbox per
//! worker), which gives FIFO delivery per (source, destination) pair and
//! implicit backpressure: a full channel makes the sender service its own
//! inbox until space frees. Collectives (barrier, reductions, exclusive
//! prefix-sum, gather) and the single global fetch-add counter live in the
//! shared [`World`]. A failing worker raises the abort flag so every other
//! worker unwinds out of its barrier or receive loop instead of hanging.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::message::{Envelope, Message};

const ABORT_POLL: Duration = Duration::from_millis(20);
const PUMP_POLL: Duration = Duration::from_micros(50);

struct BarrierState {
    count: usize,
    generation: u64,
}

/// A reusable barrier that wakes and panics all waiters when a worker aborts,
/// so one worker's failure cannot strand the rest of the team.
struct AbortableBarrier {
    state: Mutex<BarrierState>,
    cvar: Condvar,
    nworkers: usize,
}

impl AbortableBarrier {
    fn new(nworkers: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState { count: 0, generation: 0 }),
            cvar: Condvar::new(),
            nworkers,
        }
    }

    fn wait(&self, abort: &AtomicBool) {
        let mut state = self.state.lock();
        if abort.load(Ordering::SeqCst) {
            panic!("barrier abandoned: another worker aborted");
        }
        state.count += 1;
        if state.count == self.nworkers {
            state.count = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return;
        }
        let generation = state.generation;
        while state.generation == generation {
            self.cvar.wait_for(&mut state, ABORT_POLL);
            if abort.load(Ordering::SeqCst) {
                panic!("barrier abandoned: another worker aborted");
            }
        }
    }

    fn notify_abort(&self) {
        self.cvar.notify_all();
    }
}

/// Shared state of a worker team.
pub struct World {
    nworkers: usize,
    barrier: AbortableBarrier,
    abort: AtomicBool,
    /// slot arrays for collectives; reused serially under the bulk-synchronous
    /// phase discipline
    slots_i64: Mutex<Vec<i64>>,
    slots_f64: Mutex<Vec<f64>>,
    slots_str: Mutex<Vec<String>>,
    /// the single global counter used for slot reservation (fetch-add only)
    counter: AtomicI64,
    /// per-phase quiescence counter
    phase_done: AtomicUsize,
}

impl World {
    fn new(nworkers: usize) -> Self {
        Self {
            nworkers,
            barrier: AbortableBarrier::new(nworkers),
            abort: AtomicBool::new(false),
            slots_i64: Mutex::new(vec![0; nworkers]),
            slots_f64: Mutex::new(vec![0.0; nworkers]),
            slots_str: Mutex::new(vec![String::new(); nworkers]),
            counter: AtomicI64::new(0),
            phase_done: AtomicUsize::new(0),
        }
    }

    fn check_abort(&self) {
        if self.abort.load(Ordering::SeqCst) {
            panic!("aborted: another worker failed");
        }
    }
}

/// One worker's endpoint: its rank, its inbox, and a sender per peer.
pub struct WorkerComm<const N: usize> {
    rank: usize,
    world: Arc<World>,
    senders: Vec<Sender<Envelope<N>>>,
    inbox: Receiver<Envelope<N>>,
}

impl<const N: usize> WorkerComm<N> {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world.nworkers
    }

    pub fn barrier(&self) {
        self.world.barrier.wait(&self.world.abort);
    }

    /// Blocking send. Only safe for replies: the destination is guaranteed to
    /// be draining its inbox while it awaits this response.
    pub fn send(&self, target: usize, msg: Message<N>) {
        let env = Envelope { src: self.rank, msg };
        let mut pending = Some(env);
        while let Some(env) = pending.take() {
            match self.senders[target].send_timeout(env, ABORT_POLL) {
                Ok(()) => return,
                Err(crossbeam_channel::SendTimeoutError::Timeout(env)) => {
                    self.world.check_abort();
                    pending = Some(env);
                }
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    panic!("send to dead worker {}", target);
                }
            }
        }
    }

    /// Send that keeps the progress pump running: while the destination
    /// channel is full, incoming messages are serviced so two mutually
    /// blocked workers always drain each other.
    pub fn send_with(
        &self,
        target: usize,
        msg: Message<N>,
        service: &mut dyn FnMut(Envelope<N>),
    ) {
        let mut pending = Envelope { src: self.rank, msg };
        loop {
            match self.senders[target].try_send(pending) {
                Ok(()) => return,
                Err(TrySendError::Full(env)) => {
                    self.world.check_abort();
                    pending = env;
                    if let Ok(incoming) = self.inbox.recv_timeout(PUMP_POLL) {
                        service(incoming);
                    }
                }
                Err(TrySendError::Disconnected(_)) => panic!("send to dead worker {}", target),
            }
        }
    }

    pub fn try_recv(&self) -> Option<Envelope<N>> {
        self.inbox.try_recv().ok()
    }

    /// Blocking receive; panics if the team aborts while waiting.
    pub fn recv(&self) -> Envelope<N> {
        loop {
            match self.inbox.recv_timeout(ABORT_POLL) {
                Ok(env) => return env,
                Err(_) => self.world.check_abort(),
            }
        }
    }

    /// Round trip: send a request, service everything that arrives until the
    /// service closure recognizes the response. The cooperative model allows
    /// exactly one outstanding round trip per worker, so any response kind
    /// arriving here is ours.
    pub fn rpc<R>(
        &self,
        target: usize,
        msg: Message<N>,
        service: &mut dyn FnMut(Envelope<N>) -> Option<R>,
    ) -> R {
        let mut early: Option<R> = None;
        self.send_with(target, msg, &mut |env| {
            if let Some(reply) = service(env) {
                early = Some(reply);
            }
        });
        if let Some(reply) = early {
            return reply;
        }
        loop {
            let env = self.recv();
            if let Some(reply) = service(env) {
                return reply;
            }
        }
    }

    /// Service incoming messages until `done` reports true.
    pub fn pump_until(
        &self,
        service: &mut dyn FnMut(Envelope<N>),
        done: &mut dyn FnMut() -> bool,
    ) {
        loop {
            while let Some(env) = self.try_recv() {
                service(env);
            }
            if done() {
                return;
            }
            self.world.check_abort();
            if let Ok(env) = self.inbox.recv_timeout(PUMP_POLL) {
                service(env);
            }
        }
    }

    /// Phase quiescence: signal that this worker has no more requests to
    /// initiate, keep servicing peers until every worker has signalled, then
    /// close with a barrier. Valid for request/response phases, where every
    /// message a worker sends completes before it signals.
    pub fn quiesce(&self, service: &mut dyn FnMut(Envelope<N>)) {
        self.world.phase_done.fetch_add(1, Ordering::SeqCst);
        let world = Arc::clone(&self.world);
        self.pump_until(service, &mut || {
            world.phase_done.load(Ordering::SeqCst) == world.nworkers
        });
        // everyone is done initiating: inboxes may still hold our replies to
        // stragglers, nothing else; drain and reset for the next phase
        while let Some(env) = self.try_recv() {
            service(env);
        }
        self.barrier();
        if self.rank == 0 {
            self.world.phase_done.store(0, Ordering::SeqCst);
        }
        self.barrier();
    }

    /// Global fetch-add on the single shared counter (relaxed ordering; pair
    /// with a barrier when a happens-before is required).
    pub fn global_fetch_add(&self, value: i64) -> i64 {
        self.world.counter.fetch_add(value, Ordering::Relaxed)
    }

    /// Reset the global counter; collective, rank 0 writes.
    pub fn global_counter_reset(&self) {
        self.barrier();
        if self.rank == 0 {
            self.world.counter.store(0, Ordering::SeqCst);
        }
        self.barrier();
    }

    fn collect_i64(&self, value: i64, reduce: impl Fn(&[i64]) -> i64) -> i64 {
        self.world.slots_i64.lock()[self.rank] = value;
        self.barrier();
        let result = reduce(&self.world.slots_i64.lock());
        self.barrier();
        result
    }

    pub fn reduce_sum_i64(&self, value: i64) -> i64 {
        self.collect_i64(value, |slots| slots.iter().sum())
    }

    pub fn reduce_max_i64(&self, value: i64) -> i64 {
        self.collect_i64(value, |slots| slots.iter().copied().max().unwrap_or(0))
    }

    pub fn reduce_sum_f64(&self, value: f64) -> f64 {
        self.world.slots_f64.lock()[self.rank] = value;
        self.barrier();
        let result = self.world.slots_f64.lock().iter().sum();
        self.barrier();
        result
    }

    /// Exclusive prefix sum over per-worker values: rank r receives the sum of
    /// values from ranks 0..r.
    pub fn prefix_sum_exclusive(&self, value: i64) -> i64 {
        self.collect_i64(value, |slots| slots[..self.rank].iter().sum())
    }

    /// Gather strings in rank order; rank 0 receives the full list.
    pub fn gather_strings(&self, value: String) -> Option<Vec<String>> {
        self.world.slots_str.lock()[self.rank] = value;
        self.barrier();
        let result = if self.rank == 0 {
            Some(self.world.slots_str.lock().clone())
        } else {
            None
        };
        self.barrier();
        result
    }
}

/// Run `f` on a team of `inputs.len()` workers and collect the results in
/// rank order. The channel capacity bounds in-flight active messages.
pub fn run_team<const N: usize, I, T, F>(
    max_msgs_in_flight: usize,
    inputs: Vec<I>,
    f: F,
) -> Result<Vec<T>>
where
    I: Send,
    T: Send,
    F: Fn(WorkerComm<N>, I) -> Result<T> + Send + Sync,
{
    let nworkers = inputs.len();
    assert!(nworkers > 0, "worker team must have at least one member");
    let world = Arc::new(World::new(nworkers));
    let mut senders = Vec::with_capacity(nworkers);
    let mut inboxes = Vec::with_capacity(nworkers);
    for _ in 0..nworkers {
        let (tx, rx) = bounded(max_msgs_in_flight.max(2));
        senders.push(tx);
        inboxes.push(rx);
    }

    let results: Vec<Result<T>> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(nworkers);
        for (rank, (input, inbox)) in inputs.into_iter().zip(inboxes).enumerate() {
            let comm = WorkerComm {
                rank,
                world: Arc::clone(&world),
                senders: senders.clone(),
                inbox,
            };
            let world = Arc::clone(&world);
            let f = &f;
            handles.push(scope.spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    f(comm, input)
                }));
                match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => {
                        world.abort.store(true, Ordering::SeqCst);
                        world.barrier.notify_abort();
                        Err(err)
                    }
                    Err(panic) => {
                        world.abort.store(true, Ordering::SeqCst);
                        world.barrier.notify_abort();
                        let msg = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "worker panicked".to_string());
                        Err(anyhow!("worker panicked: {}", msg))
                    }
                }
            }));
        }
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|_| Err(anyhow!("worker thread died"))))
            .collect()
    });

    // prefer a real error over the secondary abort panics
    let mut out = Vec::with_capacity(nworkers);
    let mut first_err: Option<anyhow::Error> = None;
    for result in results {
        match result {
            Ok(value) => out.push(value),
            Err(err) => {
                let replace = match &first_err {
                    None => true,
                    Some(prev) => {
                        prev.to_string().contains("abort") && !err.to_string().contains("abort")
                    }
                };
                if replace {
                    first_err = Some(err);
                }
            }
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collectives() {
        let results = run_team::<1, _, _, _>(16, vec![(), (), (), ()], |comm, _| {
            let rank = comm.rank() as i64;
            let sum = comm.reduce_sum_i64(rank + 1);
            assert_eq!(sum, 10);
            let max = comm.reduce_max_i64(rank);
            assert_eq!(max, 3);
            let prefix = comm.prefix_sum_exclusive(1);
            assert_eq!(prefix, rank);
            Ok(prefix)
        })
        .unwrap();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_global_counter() {
        let results = run_team::<1, _, _, _>(16, vec![(); 4], |comm, _| {
            let slot = comm.global_fetch_add(2);
            comm.barrier();
            Ok(slot)
        })
        .unwrap();
        let mut slots = results.clone();
        slots.sort_unstable();
        assert_eq!(slots, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_worker_error_propagates() {
        let result = run_team::<1, _, _, _>(16, vec![0usize, 1, 2], |comm, rank_in| {
            if rank_in == 1 {
                anyhow::bail!("bad input on worker 1");
            }
            comm.barrier();
            Ok(())
        });
        let err = result.unwrap_err();
        assert!(err.to_string().contains("bad input"));
    }

    #[test]
    fn test_gather_strings() {
        let results = run_team::<1, _, _, _>(16, vec![(); 3], |comm, _| {
            Ok(comm.gather_strings(format!("w{}", comm.rank())))
        })
        .unwrap();
        assert_eq!(results[0].as_ref().unwrap(), &vec!["w0", "w1", "w2"]);
        assert!(results[1].is_none());
    }
}
