//! Mutator thread attachment and safe points.

use std::sync::Arc;

use marten_vm_gc::{CycleCollector, ObjPtr, WorkerId};
use parking_lot::Mutex;

use crate::heap::{ObjRef, SharedHeap};
use crate::object::HeapObject;

/// The shadow stack: references a worker currently holds "on its stack".
///
/// Each entry owns one reference to its object. At a rendezvous the
/// collector walks these entries (under its global lock) to subtract stack
/// references from the inner counts.
#[derive(Default)]
pub(crate) struct ShadowStack {
    entries: Mutex<Vec<*mut HeapObject>>,
}

impl ShadowStack {
    fn push(&self, ptr: *mut HeapObject) {
        self.entries.lock().push(ptr);
    }

    fn pop(&self) -> Option<*mut HeapObject> {
        self.entries.lock().pop()
    }

    /// Report every atomic cell on the stack, once per entry.
    pub(crate) fn walk(&self, visit: &mut dyn FnMut(ObjPtr)) {
        for &ptr in self.entries.lock().iter() {
            // SAFETY: each entry owns a reference, so the object is alive.
            if unsafe { &*ptr }.descriptor().atomic {
                visit(ObjPtr::from_raw(ptr as *const ()));
            }
        }
    }
}

// SAFETY: entries are reference-owning pointers behind a mutex; the pointees
// are frozen objects or lock-protected cells.
unsafe impl Send for ShadowStack {}
unsafe impl Sync for ShadowStack {}

/// A mutator thread attached to the runtime.
///
/// Detach (drop) unwinds the shadow stack and runs the final collection
/// handshake so an in-flight cycle is never stranded waiting for a worker
/// that no longer exists.
pub struct WorkerContext {
    heap: Arc<SharedHeap>,
    collector: Arc<CycleCollector>,
    id: WorkerId,
    stack: Arc<ShadowStack>,
}

impl SharedHeap {
    /// Attach a mutator thread to the runtime.
    pub fn attach_worker(self: &Arc<Self>) -> WorkerContext {
        let id = self.next_worker_id();
        let stack = Arc::new(ShadowStack::default());
        self.stacks.lock().insert(id, stack.clone());
        let collector = self.collector();
        collector.add_worker(id);
        WorkerContext {
            heap: self.clone(),
            collector,
            id,
            stack,
        }
    }
}

impl WorkerContext {
    /// This worker's identity.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Push a handle onto the shadow stack. The stack holds its own
    /// reference, so the handle may be dropped afterwards.
    pub fn push_root(&self, obj: &ObjRef) {
        obj.object().retain();
        self.stack.push(obj.raw());
    }

    /// Pop the newest shadow-stack entry, releasing its reference.
    pub fn pop_root(&self) {
        let ptr = self.stack.pop().expect("shadow stack underflow");
        self.heap.release_ptr(ptr);
    }

    /// Reach a safe point: contribute to and drive any pending collection.
    pub fn safepoint(&self) {
        self.collector.rendezvous(self.id);
    }
}

impl Drop for WorkerContext {
    fn drop(&mut self) {
        while let Some(ptr) = self.stack.pop() {
            self.heap.release_ptr(ptr);
        }
        self.collector.remove_worker(self.id);
        self.heap.stacks.lock().remove(&self.id);
    }
}
