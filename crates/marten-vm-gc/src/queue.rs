//! Deferred slot clearing.

use rustc_hash::FxHashSet;

use crate::host::HostRuntime;
use crate::ptr::{ObjPtr, SlotPtr};

/// A slot scheduled for zeroing, tagged with the cell it lives in so the
/// entry can be dropped if ordinary reference counting reclaims the cell
/// before the drain.
#[derive(Debug, Clone, Copy)]
struct PendingClear {
    cell: ObjPtr,
    slot: SlotPtr,
}

/// Slots of releasable cells, zeroed on the next rendezvous.
///
/// Single producer (the collector thread, at the end of a mark), single
/// drainer (whichever mutator reaches the next rendezvous). Mutual
/// exclusion comes from the collector's global lock; this type is only the
/// buffer and its bookkeeping.
#[derive(Default)]
pub(crate) struct ReleaseQueue {
    pending: Vec<PendingClear>,
}

impl ReleaseQueue {
    pub fn push(&mut self, cell: ObjPtr, slot: SlotPtr) {
        debug_assert!(
            !self.pending.iter().any(|p| p.slot == slot),
            "slot {slot:?} enqueued twice in one cycle"
        );
        self.pending.push(PendingClear { cell, slot });
    }

    /// Drop entries that live inside `cell`. Called when ordinary reference
    /// counting frees a cell between enqueue and drain; zeroing those slots
    /// afterwards would touch freed memory.
    pub fn purge_cell(&mut self, cell: ObjPtr) {
        self.pending.retain(|p| p.cell != cell);
    }

    /// Zero every pending slot through the host's write barrier, skipping
    /// slots whose cell was already destroyed by an earlier entry's release
    /// cascade. Returns the number of slots cleared; `on_dead` receives
    /// every cell the cascades destroy.
    pub fn drain(self, host: &dyn HostRuntime, on_dead: &mut dyn FnMut(ObjPtr)) -> usize {
        let mut dead: FxHashSet<ObjPtr> = FxHashSet::default();
        let mut cleared = 0;
        for p in self.pending {
            if dead.contains(&p.cell) {
                continue;
            }
            host.zero_slot(p.slot, &mut |cell| {
                dead.insert(cell);
                on_dead(cell);
            });
            cleared += 1;
        }
        cleared
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
