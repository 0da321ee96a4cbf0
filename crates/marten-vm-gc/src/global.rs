//! The process-wide collector instance.
//!
//! The runtime's reference counting and type system are global, so the
//! embedded collector is one per process, with an explicit lifecycle. These
//! free functions mirror the entry points the host runtime calls from its
//! thread-attach, allocation and safe-point paths; they all delegate to the
//! installed [`CycleCollector`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::collector::CycleCollector;
use crate::host::HostRuntime;
use crate::ptr::{ObjPtr, WorkerId};

static INSTANCE: Mutex<Option<Arc<CycleCollector>>> = Mutex::new(None);

/// Install the process-wide collector and spawn its thread.
///
/// Panics if a collector is already installed.
pub fn init(host: Arc<dyn HostRuntime>) -> Arc<CycleCollector> {
    let mut slot = INSTANCE.lock();
    assert!(slot.is_none(), "cycle collector initialized twice");
    let collector = CycleCollector::spawn(host);
    *slot = Some(collector.clone());
    collector
}

/// Tear down the process-wide collector: stop its thread, flush pending
/// slot clears, uninstall.
///
/// Panics if no collector is installed.
pub fn shutdown() {
    let collector = INSTANCE
        .lock()
        .take()
        .expect("cycle collector shut down before init");
    collector.shutdown();
}

/// The installed collector.
///
/// Panics before [`init`] or after [`shutdown`].
pub fn instance() -> Arc<CycleCollector> {
    INSTANCE
        .lock()
        .clone()
        .expect("cycle collector not initialized")
}

/// Attach a mutator thread. See [`CycleCollector::add_worker`].
pub fn add_worker(id: WorkerId) {
    instance().add_worker(id);
}

/// Detach a mutator thread. See [`CycleCollector::remove_worker`].
pub fn remove_worker(id: WorkerId) {
    instance().remove_worker(id);
}

/// Register a newborn atomic cell. See [`CycleCollector::add_atomic_root`].
pub fn add_atomic_root(cell: ObjPtr) {
    instance().add_atomic_root(cell);
}

/// Remove a reclaimed atomic cell. See
/// [`CycleCollector::remove_atomic_root`].
pub fn remove_atomic_root(cell: ObjPtr) {
    instance().remove_atomic_root(cell);
}

/// Mutator safe point. See [`CycleCollector::rendezvous`].
pub fn rendezvous(id: WorkerId) {
    instance().rendezvous(id);
}

/// Ask for a collection at the next rendezvous. See
/// [`CycleCollector::request_collection`].
pub fn request_collection() {
    instance().request_collection();
}
