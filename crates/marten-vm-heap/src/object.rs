//! Heap object layout.

use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crate::descriptor::TypeDescriptor;

/// A reference-bearing slot.
///
/// Slots of frozen objects are written once at construction; the slot of an
/// atomic cell is rewritten only under the collector's graph lock. Loads use
/// acquire ordering so a mark walk observes fully constructed targets.
pub(crate) struct Slot(AtomicPtr<HeapObject>);

impl Slot {
    pub(crate) fn new(target: *mut HeapObject) -> Self {
        Slot(AtomicPtr::new(target))
    }

    pub(crate) fn load(&self) -> *mut HeapObject {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn swap(&self, next: *mut HeapObject) -> *mut HeapObject {
        self.0.swap(next, Ordering::AcqRel)
    }
}

/// A heap object: type descriptor, refcount container and slot storage.
pub(crate) struct HeapObject {
    desc: Arc<TypeDescriptor>,
    rc: AtomicU32,
    slots: Box<[Slot]>,
}

impl HeapObject {
    /// Allocate with a refcount of one, owned by the returned box until the
    /// caller turns it into a raw heap pointer.
    pub(crate) fn boxed(desc: Arc<TypeDescriptor>, targets: Vec<*mut HeapObject>) -> Box<Self> {
        Box::new(Self {
            desc,
            rc: AtomicU32::new(1),
            slots: targets.into_iter().map(Slot::new).collect(),
        })
    }

    pub(crate) fn descriptor(&self) -> &TypeDescriptor {
        &self.desc
    }

    pub(crate) fn ref_count(&self) -> u32 {
        self.rc.load(Ordering::Acquire)
    }

    pub(crate) fn retain(&self) {
        self.rc.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one reference; returns the remaining count.
    pub(crate) fn release(&self) -> u32 {
        let prev = self.rc.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "released {} with refcount zero", self.desc.name);
        prev - 1
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }
}
