//! The collector: global lock, rendezvous protocol, background thread.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::host::HostRuntime;
use crate::marker;
use crate::ptr::{ObjPtr, WorkerId};
use crate::queue::ReleaseQueue;
use crate::registry::{RootRegistry, WorkerRegistry};
use crate::scheduler::Scheduler;

/// Where the current collection cycle stands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// No cycle in flight.
    Idle = 0,
    /// Waiting for every registered worker to contribute stack counts.
    Gathering = 1,
    /// The collector thread is walking the cell graph under the lock.
    Marking = 2,
    /// Slots of releasable cells await zeroing at the next rendezvous.
    Releasing = 3,
}

impl From<u8> for CyclePhase {
    fn from(v: u8) -> Self {
        match v {
            1 => CyclePhase::Gathering,
            2 => CyclePhase::Marking,
            3 => CyclePhase::Releasing,
            _ => CyclePhase::Idle,
        }
    }
}

/// Counters published by [`CycleCollector::stats`]. Informational only.
#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    /// Collection cycles armed, whether or not they have finished yet.
    pub cycles_started: u64,
    /// Collection cycles that ran to completion.
    pub cycles_completed: u64,
    /// Atomic cells judged releasable, cumulative.
    pub cells_released: u64,
    /// Slots zeroed by rendezvous drains, cumulative.
    pub slots_cleared: u64,
    /// Rootset size captured by the most recent cycle.
    pub last_rootset: usize,
    /// Objects visited by the most recent mark walk.
    pub last_visited: usize,
    /// Duration of the most recent mark walk.
    pub last_mark_time: Duration,
}

/// Everything the global lock protects.
struct CycleState {
    roots: RootRegistry,
    workers: WorkerRegistry,
    /// Workers that already contributed stack counts this cycle. Always a
    /// subset of the registered workers; cleared when a cycle is armed.
    contributed: FxHashSet<WorkerId>,
    /// Rootset captured when the current cycle was armed.
    snapshot: Vec<ObjPtr>,
    /// Per-cell aggregate: closure edges minus stack references. Empty
    /// outside an active cycle.
    counts: FxHashMap<ObjPtr, i64>,
    queue: ReleaseQueue,
    /// Set once every worker has contributed; consumed by the collector
    /// thread.
    collect_pending: bool,
    stats: CycleStats,
}

/// The cycle collector.
///
/// One per process in practice (see [`crate::global`]), though instances are
/// self-contained and tests create as many as they like. Construction spawns
/// the background collector thread; call [`shutdown`](Self::shutdown) to
/// stop it and flush pending work.
pub struct CycleCollector {
    host: Arc<dyn HostRuntime>,
    state: Mutex<CycleState>,
    wake: Condvar,
    /// Mirror of the cycle phase, written only under the state lock and
    /// read lock-free on the rendezvous fast path.
    phase: AtomicU8,
    /// Mirror of the registered worker ids, written only under the state
    /// lock. The rendezvous fast path reads it to catch an unregistered
    /// caller without touching the state lock, which a running mark may
    /// hold for a long time.
    attached: RwLock<FxHashSet<WorkerId>>,
    terminating: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    scheduler: Scheduler,
}

impl CycleCollector {
    /// Construct the collector and spawn its background thread.
    pub fn spawn(host: Arc<dyn HostRuntime>) -> Arc<Self> {
        let collector = Arc::new(Self {
            host,
            state: Mutex::new(CycleState {
                roots: RootRegistry::default(),
                workers: WorkerRegistry::default(),
                contributed: FxHashSet::default(),
                snapshot: Vec::new(),
                counts: FxHashMap::default(),
                queue: ReleaseQueue::default(),
                collect_pending: false,
                stats: CycleStats::default(),
            }),
            wake: Condvar::new(),
            phase: AtomicU8::new(CyclePhase::Idle as u8),
            attached: RwLock::new(FxHashSet::default()),
            terminating: AtomicBool::new(false),
            thread: Mutex::new(None),
            scheduler: Scheduler::new(),
        });
        let thread = {
            let collector = collector.clone();
            std::thread::Builder::new()
                .name("marten-cycle-gc".into())
                .spawn(move || collector.run())
                .expect("failed to spawn the cycle collector thread")
        };
        *collector.thread.lock() = Some(thread);
        collector
    }

    /// Current cycle phase.
    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from(self.phase.load(Ordering::Acquire))
    }

    /// Snapshot of the collector's counters.
    pub fn stats(&self) -> CycleStats {
        self.state.lock().stats.clone()
    }

    /// The first worker that ever attached, if any. The host treats it as
    /// the UI thread and can keep long-running work off it.
    pub fn primary_worker(&self) -> Option<WorkerId> {
        self.state.lock().workers.primary()
    }

    /// Number of atomic cells currently registered.
    pub fn registered_cells(&self) -> usize {
        self.state.lock().roots.len()
    }

    /// Attach a mutator thread. A worker attaching while contributions are
    /// being gathered raises the completion bar: the new worker must also
    /// contribute before marking starts.
    pub fn add_worker(&self, id: WorkerId) {
        let mut state = self.state.lock();
        self.add_worker_locked(&mut state, id);
    }

    fn add_worker_locked(&self, state: &mut CycleState, id: WorkerId) {
        state.workers.add(id);
        self.attached.write().insert(id);
        // A gather that was complete a moment ago is complete no longer.
        // Withdraw the signal if the collector thread has not consumed it
        // yet, so the mark waits for this worker's contribution too.
        if state.collect_pending {
            debug_assert_eq!(self.phase(), CyclePhase::Gathering);
            state.collect_pending = false;
        }
    }

    /// Detach a mutator thread.
    ///
    /// The worker's stack must already be unwound, so its contribution to an
    /// in-flight cycle is the empty one; removing it from both sets and
    /// re-checking completion keeps the cycle from being stranded. Detach
    /// also forces one final collection for whatever the worker leaves
    /// behind.
    pub fn remove_worker(&self, id: WorkerId) {
        self.scheduler.request();
        let mut state = self.state.lock();
        state.workers.remove(id);
        state.contributed.remove(&id);
        self.attached.write().remove(&id);
        self.check_gather_complete_locked(&mut state);
    }

    /// Register a newborn atomic cell.
    pub fn add_atomic_root(&self, cell: ObjPtr) {
        self.state.lock().roots.register(cell);
    }

    /// Remove a cell that ordinary reference counting reclaimed. Also drops
    /// the cell from an in-flight cycle's bookkeeping and from pending slot
    /// clears, so the collector never touches its memory again.
    pub fn remove_atomic_root(&self, cell: ObjPtr) {
        let mut state = self.state.lock();
        state.roots.unregister(cell);
        state.counts.remove(&cell);
        state.queue.purge_cell(cell);
    }

    /// Ask for a collection at the next rendezvous. Requests coalesce: the
    /// flag stays set until one cycle completes, however many times it is
    /// raised.
    pub fn request_collection(&self) {
        self.scheduler.request();
    }

    /// Run `f` while holding the collector's global lock.
    ///
    /// The host routes every atomic-cell slot mutation through this; the
    /// same lock covers the mark walk, so the cell graph cannot change
    /// mid-mark. Release of a displaced slot target must happen after this
    /// returns, because a destruction cascade re-enters the collector to
    /// unregister dead cells.
    pub fn with_graph<R>(&self, f: impl FnOnce() -> R) -> R {
        let _state = self.state.lock();
        f()
    }

    /// Mutator safe point.
    ///
    /// Fast path first: never block a mutator on a running mark. Stack
    /// counts for the running cycle were complete before marking began, so
    /// a rendezvous skipped here is silently dropped, not deferred. Under
    /// the lock: drain any pending slot clears, arm a new cycle if the
    /// scheduler says so, and contribute this worker's stack counts.
    pub fn rendezvous(&self, worker: WorkerId) {
        // Checked before any early return: calling from a worker that never
        // attached (or already detached) is fatal no matter what the
        // scheduler thinks. The mirror keeps the check off the state lock.
        assert!(
            self.attached.read().contains(&worker),
            "rendezvous from unregistered worker {worker:?}"
        );
        if self.phase() == CyclePhase::Marking {
            return;
        }
        let triggered = self.scheduler.should_collect();
        if !triggered && self.phase() == CyclePhase::Idle {
            return;
        }

        let mut state = self.state.lock();
        debug_assert!(state.workers.contains(worker));
        if self.phase() == CyclePhase::Marking {
            // The mark began while this worker was acquiring the lock.
            return;
        }
        if self.phase() == CyclePhase::Releasing {
            self.drain_locked(&mut state);
            self.complete_cycle_locked(&mut state);
        }
        if self.phase() == CyclePhase::Idle && self.scheduler.arm() {
            self.begin_cycle_locked(&mut state);
        }
        if self.phase() == CyclePhase::Gathering {
            self.contribute_locked(&mut state, worker);
        }
    }

    /// Stop the collector thread, then flush whatever it left pending.
    ///
    /// Required before dropping the last handle: the background thread
    /// keeps the collector alive until it observes termination.
    pub fn shutdown(&self) {
        self.terminating.store(true, Ordering::Release);
        self.wake.notify_one();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        let mut state = self.state.lock();
        if state.collect_pending {
            // The last gather completed as termination was signalled; run
            // the mark here so the requested cycle still happens.
            state.collect_pending = false;
            self.mark_locked(&mut state);
        }
        if !state.queue.is_empty() {
            self.drain_locked(&mut state);
        }
        if self.phase() != CyclePhase::Idle {
            self.complete_cycle_locked(&mut state);
        }
        tracing::debug!(target: "marten::gc", cycles = state.stats.cycles_completed, "cycle collector stopped");
    }

    fn begin_cycle_locked(&self, state: &mut CycleState) {
        debug_assert!(state.queue.is_empty());
        debug_assert!(state.counts.is_empty());
        state.contributed.clear();
        state.snapshot = state.roots.snapshot();
        let counts = state
            .snapshot
            .iter()
            .map(|&cell| (cell, 0i64))
            .collect::<FxHashMap<_, _>>();
        state.counts = counts;
        state.stats.last_rootset = state.snapshot.len();
        state.stats.cycles_started += 1;
        self.phase
            .store(CyclePhase::Gathering as u8, Ordering::Release);
        tracing::debug!(
            target: "marten::gc",
            cells = state.snapshot.len(),
            workers = state.workers.alive(),
            "collection cycle armed"
        );
    }

    fn contribute_locked(&self, state: &mut CycleState, worker: WorkerId) {
        if !state.contributed.insert(worker) {
            // Second rendezvous in one cycle; the first one already counted.
            return;
        }
        let counts = &mut state.counts;
        self.host.walk_stack(worker, &mut |cell| {
            // Cells born after the snapshot are not part of this cycle.
            if let Some(inner) = counts.get_mut(&cell) {
                *inner -= 1;
            }
        });
        self.check_gather_complete_locked(state);
    }

    fn check_gather_complete_locked(&self, state: &mut CycleState) {
        if self.phase() != CyclePhase::Gathering {
            return;
        }
        debug_assert!(state.contributed.len() <= state.workers.alive());
        if state.contributed.len() == state.workers.alive() {
            state.collect_pending = true;
            self.wake.notify_one();
        }
    }

    fn drain_locked(&self, state: &mut CycleState) {
        let queue = std::mem::take(&mut state.queue);
        let mut dead: Vec<ObjPtr> = Vec::new();
        let cleared = queue.drain(&*self.host, &mut |cell| dead.push(cell));
        for cell in dead {
            state.roots.unregister(cell);
            debug_assert!(!state.counts.contains_key(&cell));
        }
        state.stats.slots_cleared += cleared as u64;
        tracing::debug!(target: "marten::gc", cleared, "release queue drained");
    }

    fn complete_cycle_locked(&self, state: &mut CycleState) {
        debug_assert!(state.queue.is_empty());
        state.snapshot.clear();
        state.counts.clear();
        state.contributed.clear();
        state.collect_pending = false;
        self.phase.store(CyclePhase::Idle as u8, Ordering::Release);
        self.scheduler.cycle_completed();
        state.stats.cycles_completed += 1;
    }

    /// Walk the cell graph and queue the releasable slots. Holds the lock
    /// for the whole mark; ends in either `Releasing` or a completed cycle.
    fn mark_locked(&self, state: &mut CycleState) {
        self.phase.store(CyclePhase::Marking as u8, Ordering::Release);

        let started = Instant::now();
        let snapshot = std::mem::take(&mut state.snapshot);
        let mut counts = std::mem::take(&mut state.counts);
        let outcome = marker::run(&*self.host, &snapshot, &mut counts);

        let queue = &mut state.queue;
        for &cell in &outcome.releasable {
            self.host.walk_ref_slots(cell, &mut |entry| {
                if !entry.target.is_null() {
                    queue.push(cell, entry.slot);
                }
            });
        }

        state.stats.cells_released += outcome.releasable.len() as u64;
        state.stats.last_visited = outcome.objects_visited;
        state.stats.last_mark_time = started.elapsed();
        tracing::debug!(
            target: "marten::gc",
            visited = outcome.objects_visited,
            releasable = outcome.releasable.len(),
            elapsed_us = state.stats.last_mark_time.as_micros() as u64,
            "mark walk finished"
        );

        if state.queue.is_empty() {
            self.complete_cycle_locked(state);
        } else {
            self.phase
                .store(CyclePhase::Releasing as u8, Ordering::Release);
        }
    }

    /// Body of the background thread: wait for a complete gather, mark
    /// under the lock, go back to sleep.
    fn run(&self) {
        loop {
            let mut state = self.state.lock();
            while !state.collect_pending && !self.terminating.load(Ordering::Acquire) {
                self.wake.wait(&mut state);
            }
            if self.terminating.load(Ordering::Acquire) {
                // A pending mark, if any, is finished by `shutdown`.
                return;
            }
            state.collect_pending = false;
            debug_assert_eq!(
                state.contributed.len(),
                state.workers.alive(),
                "mark may only start once every registered worker contributed"
            );
            self.mark_locked(&mut state);
        }
    }
}
