//! The interface the embedding runtime provides to the collector.

use crate::ptr::{ObjPtr, SlotPtr, WorkerId};

/// One reference-bearing slot of a heap object, with its current target.
#[derive(Debug, Clone, Copy)]
pub struct SlotEntry {
    /// Address of the slot itself.
    pub slot: SlotPtr,
    /// Target currently stored in the slot; may be null.
    pub target: ObjPtr,
}

/// Services the collector consumes from the embedding runtime.
///
/// Graph-inspecting methods (`walk_ref_slots`, `is_atomic_cell`,
/// `ref_count`) are only invoked while the collector holds its global lock,
/// so the cell graph is stable for the duration of a call. `walk_stack` is
/// invoked on the walked worker's own thread, also under the lock.
pub trait HostRuntime: Send + Sync + 'static {
    /// Invoke `visit` for every reference-bearing slot of `obj`, whether a
    /// fixed field or an array element. The type descriptor decides which
    /// slots qualify.
    fn walk_ref_slots(&self, obj: ObjPtr, visit: &mut dyn FnMut(SlotEntry));

    /// True if `obj`'s type descriptor carries the atomic-cell flag.
    fn is_atomic_cell(&self, obj: ObjPtr) -> bool;

    /// Current reference count of `obj`'s container.
    fn ref_count(&self, obj: ObjPtr) -> u32;

    /// Invoke `visit` for every atomic cell referenced from `worker`'s
    /// stack, once per stack slot: a cell held in two stack slots is
    /// reported twice, because each slot contributes to its refcount.
    fn walk_stack(&self, worker: WorkerId, visit: &mut dyn FnMut(ObjPtr));

    /// Clear `slot` through the runtime's write barrier, releasing whatever
    /// it referenced. Atomic cells destroyed by the resulting release
    /// cascade are reported through `dead` rather than unregistered through
    /// the public entry points: the caller already holds the collector's
    /// global lock, and the lock is not reentrant.
    fn zero_slot(&self, slot: SlotPtr, dead: &mut dyn FnMut(ObjPtr));
}
