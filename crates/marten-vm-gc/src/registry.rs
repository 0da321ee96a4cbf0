//! Rootset and worker membership.

use rustc_hash::FxHashSet;

use crate::ptr::{ObjPtr, WorkerId};

/// The population of atomic reference cells currently alive in the process.
///
/// Cells announce themselves at birth and leave at destruction; membership
/// here is the collector's entire rootset. All access happens under the
/// collector's global lock.
#[derive(Default)]
pub(crate) struct RootRegistry {
    cells: FxHashSet<ObjPtr>,
}

impl RootRegistry {
    pub fn register(&mut self, cell: ObjPtr) {
        assert!(!cell.is_null(), "registered a null atomic cell");
        let inserted = self.cells.insert(cell);
        assert!(inserted, "atomic cell {cell:?} registered twice");
    }

    pub fn unregister(&mut self, cell: ObjPtr) {
        let removed = self.cells.remove(&cell);
        assert!(removed, "unregistered unknown atomic cell {cell:?}");
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Capture the current rootset. The caller holds the global lock, so
    /// the capture is consistent for as long as the lock is held.
    pub fn snapshot(&self) -> Vec<ObjPtr> {
        self.cells.iter().copied().collect()
    }
}

/// Registered mutator threads.
///
/// The first worker to attach is remembered as the primary. The host treats
/// it as the UI thread and can consult the designation to keep long-running
/// work off it; the designation never transfers, even if the primary
/// detaches.
#[derive(Default)]
pub(crate) struct WorkerRegistry {
    workers: FxHashSet<WorkerId>,
    primary: Option<WorkerId>,
}

impl WorkerRegistry {
    pub fn add(&mut self, id: WorkerId) {
        let inserted = self.workers.insert(id);
        assert!(inserted, "worker {id:?} registered twice");
        if self.primary.is_none() {
            self.primary = Some(id);
        }
    }

    pub fn remove(&mut self, id: WorkerId) {
        let removed = self.workers.remove(&id);
        assert!(removed, "removed unknown worker {id:?}");
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.workers.contains(&id)
    }

    pub fn alive(&self) -> usize {
        self.workers.len()
    }

    pub fn primary(&self) -> Option<WorkerId> {
        self.primary
    }
}
