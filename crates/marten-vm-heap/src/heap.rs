//! The shared frozen-object heap.

use std::ptr::null_mut;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use marten_vm_gc::{CycleCollector, HostRuntime, ObjPtr, SlotEntry, SlotPtr, WorkerId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::descriptor::{Layout, TypeDescriptor};
use crate::object::{HeapObject, Slot};
use crate::worker::ShadowStack;

/// An owning handle to a heap object.
///
/// Clone retains, drop releases through the normal cascade. A handle models
/// an "external" reference: one the collector can only see through the
/// object's refcount, never through the cell graph.
pub struct ObjRef {
    heap: Arc<SharedHeap>,
    ptr: *mut HeapObject,
}

impl ObjRef {
    /// The collector-facing address of this object.
    pub fn as_obj_ptr(&self) -> ObjPtr {
        ObjPtr::from_raw(self.ptr as *const ())
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.object().ref_count()
    }

    /// True if this handle refers to an atomic cell.
    pub fn is_atomic(&self) -> bool {
        self.object().descriptor().atomic
    }

    pub(crate) fn raw(&self) -> *mut HeapObject {
        self.ptr
    }

    pub(crate) fn object(&self) -> &HeapObject {
        // SAFETY: the handle holds one of the object's references, so the
        // refcount cannot reach zero while `self` exists.
        unsafe { &*self.ptr }
    }
}

impl Clone for ObjRef {
    fn clone(&self) -> Self {
        self.object().retain();
        Self {
            heap: self.heap.clone(),
            ptr: self.ptr,
        }
    }
}

impl Drop for ObjRef {
    fn drop(&mut self) {
        self.heap.release_ptr(self.ptr);
    }
}

// SAFETY: the pointee is either frozen or an atomic cell whose slot is
// written only under the collector's graph lock; the refcount is atomic.
unsafe impl Send for ObjRef {}
unsafe impl Sync for ObjRef {}

/// The process heap: allocation, reference counting and the host-runtime
/// services the cycle collector consumes.
pub struct SharedHeap {
    collector: OnceLock<Weak<CycleCollector>>,
    live: AtomicUsize,
    next_worker: AtomicU64,
    pub(crate) stacks: Mutex<FxHashMap<WorkerId, Arc<ShadowStack>>>,
}

impl SharedHeap {
    /// Create the heap and its collector, wired together. The returned
    /// collector handle must outlive every [`ObjRef`]; call
    /// [`CycleCollector::shutdown`] before dropping it.
    pub fn bootstrap() -> (Arc<SharedHeap>, Arc<CycleCollector>) {
        let heap = Arc::new(SharedHeap {
            collector: OnceLock::new(),
            live: AtomicUsize::new(0),
            next_worker: AtomicU64::new(1),
            stacks: Mutex::new(FxHashMap::default()),
        });
        let collector = CycleCollector::spawn(heap.clone());
        heap.collector
            .set(Arc::downgrade(&collector))
            .expect("heap bootstrapped twice");
        (heap, collector)
    }

    pub(crate) fn collector(&self) -> Arc<CycleCollector> {
        self.collector
            .get()
            .and_then(Weak::upgrade)
            .expect("the cycle collector is gone")
    }

    /// Number of live heap objects, cells included.
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    pub(crate) fn next_worker_id(&self) -> WorkerId {
        WorkerId::new(self.next_worker.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate a frozen object whose reference slots are `children`, in
    /// order. The slot count must agree with the descriptor's layout.
    pub fn alloc_frozen(
        self: &Arc<Self>,
        desc: Arc<TypeDescriptor>,
        children: &[&ObjRef],
    ) -> ObjRef {
        assert!(
            !desc.atomic,
            "atomic cells are allocated with alloc_atomic"
        );
        match desc.layout {
            Layout::Data => assert!(
                children.is_empty(),
                "{} carries no references",
                desc.name
            ),
            Layout::Fixed { ref_slots } => assert_eq!(
                children.len(),
                ref_slots as usize,
                "{} expects {ref_slots} reference fields",
                desc.name
            ),
            Layout::RefArray => {}
        }
        let targets = children
            .iter()
            .map(|child| {
                child.object().retain();
                child.raw()
            })
            .collect();
        self.finish_alloc(desc, targets)
    }

    /// Allocate an atomic cell holding `initial`, announcing it to the
    /// collector.
    pub fn alloc_atomic(self: &Arc<Self>, initial: Option<&ObjRef>) -> ObjRef {
        let target = match initial {
            Some(value) => {
                value.object().retain();
                value.raw()
            }
            None => null_mut(),
        };
        let cell = self.finish_alloc(TypeDescriptor::atomic_cell(), vec![target]);
        self.collector().add_atomic_root(cell.as_obj_ptr());
        cell
    }

    fn finish_alloc(self: &Arc<Self>, desc: Arc<TypeDescriptor>, targets: Vec<*mut HeapObject>) -> ObjRef {
        let ptr = Box::into_raw(HeapObject::boxed(desc, targets));
        self.live.fetch_add(1, Ordering::Relaxed);
        ObjRef {
            heap: self.clone(),
            ptr,
        }
    }

    /// Read an atomic cell's slot, retaining the result.
    pub fn atomic_load(self: &Arc<Self>, cell: &ObjRef) -> Option<ObjRef> {
        assert!(cell.is_atomic(), "atomic_load on a frozen object");
        let collector = self.collector();
        collector.with_graph(|| {
            let target = cell.object().slots()[0].load();
            if target.is_null() {
                None
            } else {
                // SAFETY: under the graph lock the slot's reference pins the
                // target; retaining it here keeps it pinned after unlock.
                unsafe { &*target }.retain();
                Some(ObjRef {
                    heap: self.clone(),
                    ptr: target,
                })
            }
        })
    }

    /// Store into an atomic cell's slot.
    pub fn atomic_store(&self, cell: &ObjRef, value: Option<&ObjRef>) {
        assert!(cell.is_atomic(), "atomic_store on a frozen object");
        let collector = self.collector();
        let old = collector.with_graph(|| {
            let next = match value {
                Some(value) => {
                    value.object().retain();
                    value.raw()
                }
                None => null_mut(),
            };
            cell.object().slots()[0].swap(next)
        });
        // Released outside the graph lock: a destruction cascade re-enters
        // the collector to unregister dead cells.
        if !old.is_null() {
            self.release_ptr(old);
        }
    }

    /// Drop one reference to `ptr`, destroying it (and everything its death
    /// releases) at zero. Mutator-side path; must not hold the graph lock.
    pub(crate) fn release_ptr(&self, ptr: *mut HeapObject) {
        // SAFETY: the caller owned one of the object's references.
        if unsafe { &*ptr }.release() == 0 {
            let collector = self.collector();
            self.destroy_cascade(ptr, &mut |cell| collector.remove_atomic_root(cell));
        }
    }

    /// Destroy `obj` and cascade through everything its death releases.
    /// `on_dead_cell` observes every atomic cell destroyed, before its
    /// memory is freed.
    fn destroy_cascade(&self, obj: *mut HeapObject, on_dead_cell: &mut dyn FnMut(ObjPtr)) {
        let mut worklist = vec![obj];
        while let Some(ptr) = worklist.pop() {
            {
                // SAFETY: refcount reached zero and nothing else can revive
                // it, so this is the sole remaining access.
                let object = unsafe { &*ptr };
                if object.descriptor().atomic {
                    on_dead_cell(ObjPtr::from_raw(ptr as *const ()));
                }
                for slot in object.slots() {
                    let target = slot.load();
                    // SAFETY: the slot still holds one of target's
                    // references until this release.
                    if !target.is_null() && unsafe { &*target }.release() == 0 {
                        worklist.push(target);
                    }
                }
            }
            // SAFETY: allocated by Box::into_raw in finish_alloc.
            drop(unsafe { Box::from_raw(ptr) });
            self.live.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl HostRuntime for SharedHeap {
    fn walk_ref_slots(&self, obj: ObjPtr, visit: &mut dyn FnMut(SlotEntry)) {
        // SAFETY: invoked under the graph lock on an object the collector
        // proved reachable from a registered cell.
        let object = unsafe { &*(obj.as_raw() as *const HeapObject) };
        for slot in object.slots() {
            visit(SlotEntry {
                slot: SlotPtr::from_raw(slot as *const Slot as *const ()),
                target: ObjPtr::from_raw(slot.load() as *const ()),
            });
        }
    }

    fn is_atomic_cell(&self, obj: ObjPtr) -> bool {
        // SAFETY: as in walk_ref_slots.
        unsafe { &*(obj.as_raw() as *const HeapObject) }
            .descriptor()
            .atomic
    }

    fn ref_count(&self, obj: ObjPtr) -> u32 {
        // SAFETY: as in walk_ref_slots.
        unsafe { &*(obj.as_raw() as *const HeapObject) }.ref_count()
    }

    fn walk_stack(&self, worker: WorkerId, visit: &mut dyn FnMut(ObjPtr)) {
        let stack = self.stacks.lock().get(&worker).cloned();
        if let Some(stack) = stack {
            stack.walk(visit);
        }
    }

    fn zero_slot(&self, slot: SlotPtr, dead: &mut dyn FnMut(ObjPtr)) {
        // SAFETY: the slot lives in a cell the collector judged releasable;
        // the queue's bookkeeping guarantees the cell is still allocated.
        let slot = unsafe { &*(slot.as_raw() as *const Slot) };
        let old = slot.swap(null_mut());
        // SAFETY: the displaced reference was the slot's own.
        if !old.is_null() && unsafe { &*old }.release() == 0 {
            self.destroy_cascade(old, dead);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_allocation_and_rc_round_trip() {
        let (heap, collector) = SharedHeap::bootstrap();
        let leaf = heap.alloc_frozen(Arc::new(TypeDescriptor::data("Leaf")), &[]);
        let pair = heap.alloc_frozen(
            Arc::new(TypeDescriptor::frozen("Pair", 2)),
            &[&leaf, &leaf],
        );
        assert_eq!(leaf.ref_count(), 3);
        assert_eq!(pair.ref_count(), 1);
        assert_eq!(heap.live_objects(), 2);

        drop(leaf);
        assert_eq!(heap.live_objects(), 2);
        drop(pair);
        assert_eq!(heap.live_objects(), 0);
        collector.shutdown();
    }

    #[test]
    fn atomic_cell_registers_and_unregisters() {
        let (heap, collector) = SharedHeap::bootstrap();
        let cell = heap.alloc_atomic(None);
        assert!(cell.is_atomic());
        assert_eq!(collector.registered_cells(), 1);
        assert!(cell.ref_count() >= 1);

        drop(cell);
        assert_eq!(collector.registered_cells(), 0);
        assert_eq!(heap.live_objects(), 0);
        collector.shutdown();
    }

    #[test]
    fn atomic_store_swaps_and_releases() {
        let (heap, collector) = SharedHeap::bootstrap();
        let first = heap.alloc_frozen(Arc::new(TypeDescriptor::data("Leaf")), &[]);
        let second = heap.alloc_frozen(Arc::new(TypeDescriptor::data("Leaf")), &[]);
        let cell = heap.alloc_atomic(Some(&first));
        assert_eq!(first.ref_count(), 2);

        heap.atomic_store(&cell, Some(&second));
        assert_eq!(first.ref_count(), 1);
        assert_eq!(second.ref_count(), 2);

        let loaded = heap.atomic_load(&cell).expect("cell holds a value");
        assert_eq!(loaded.as_obj_ptr(), second.as_obj_ptr());

        heap.atomic_store(&cell, None);
        assert!(heap.atomic_load(&cell).is_none());
        assert_eq!(second.ref_count(), 2); // loaded + handle

        drop(loaded);
        drop(first);
        drop(second);
        drop(cell);
        assert_eq!(heap.live_objects(), 0);
        collector.shutdown();
    }

    #[test]
    #[should_panic(expected = "alloc_atomic")]
    fn frozen_allocation_rejects_atomic_descriptor() {
        let (heap, _collector) = SharedHeap::bootstrap();
        let desc = Arc::new(TypeDescriptor {
            name: "Rogue",
            layout: Layout::Fixed { ref_slots: 1 },
            atomic: true,
        });
        let leaf = heap.alloc_frozen(Arc::new(TypeDescriptor::data("Leaf")), &[]);
        let _ = heap.alloc_frozen(desc, &[&leaf]);
    }
}
