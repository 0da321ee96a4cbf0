//! Tiny in-memory host runtime used by unit tests.
//!
//! Objects are indices into an arena; refcounts are computed by [`seal`]
//! from inbound slot edges plus explicit external holds, which keeps the
//! graphs in tests declarative.
//!
//! [`seal`]: MockHeap::seal

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::host::{HostRuntime, SlotEntry};
use crate::ptr::{ObjPtr, SlotPtr, WorkerId};

struct MockObject {
    atomic: bool,
    rc: u32,
    /// Slot targets as 1-based object indices; zero is a null slot.
    slots: Vec<usize>,
    holds: u32,
    freed: bool,
}

#[derive(Default)]
pub(crate) struct MockHeap {
    objects: Mutex<Vec<MockObject>>,
    stacks: Mutex<FxHashMap<WorkerId, Vec<usize>>>,
}

impl MockHeap {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, atomic: bool, slots: usize) -> usize {
        let mut objects = self.objects.lock();
        objects.push(MockObject {
            atomic,
            rc: 0,
            slots: vec![0; slots],
            holds: 0,
            freed: false,
        });
        objects.len() - 1
    }

    /// Allocate an atomic cell with one reference slot.
    pub fn atomic_cell(&self) -> usize {
        self.push(true, 1)
    }

    /// Allocate a frozen object with `slots` reference slots.
    pub fn frozen(&self, slots: usize) -> usize {
        self.push(false, slots)
    }

    /// Point `obj`'s slot `slot` at `target`.
    pub fn link(&self, obj: usize, slot: usize, target: usize) {
        self.objects.lock()[obj].slots[slot] = target + 1;
    }

    /// Give `obj` `n` references from outside the cell graph (a stack slot
    /// or an ordinary heap reference).
    pub fn hold(&self, obj: usize, n: u32) {
        self.objects.lock()[obj].holds += n;
    }

    /// Recompute every refcount as inbound edges plus external holds.
    pub fn seal(&self) {
        let mut objects = self.objects.lock();
        let inbound: Vec<u32> = (0..objects.len())
            .map(|i| {
                objects
                    .iter()
                    .flat_map(|o| o.slots.iter())
                    .filter(|&&t| t == i + 1)
                    .count() as u32
            })
            .collect();
        for (obj, edges) in objects.iter_mut().zip(inbound) {
            obj.rc = edges + obj.holds;
        }
    }

    /// Put `cells` on `worker`'s stack for [`HostRuntime::walk_stack`].
    pub fn set_stack(&self, worker: WorkerId, cells: Vec<usize>) {
        self.stacks.lock().insert(worker, cells);
    }

    pub fn obj_ptr(&self, obj: usize) -> ObjPtr {
        ObjPtr::from_raw((obj + 1) as *const ())
    }

    pub fn slot_ptr(&self, obj: usize, slot: usize) -> SlotPtr {
        SlotPtr::from_raw((((obj + 1) << 8) | slot) as *const ())
    }

    fn index(ptr: ObjPtr) -> usize {
        ptr.as_raw() as usize - 1
    }

    pub fn is_freed(&self, obj: usize) -> bool {
        self.objects.lock()[obj].freed
    }

    pub fn rc_of(&self, obj: usize) -> u32 {
        self.objects.lock()[obj].rc
    }

    /// True if `obj`'s slot `slot` holds no reference.
    pub fn slot_is_clear(&self, obj: usize, slot: usize) -> bool {
        self.objects.lock()[obj].slots[slot] == 0
    }
}

impl HostRuntime for MockHeap {
    fn walk_ref_slots(&self, obj: ObjPtr, visit: &mut dyn FnMut(SlotEntry)) {
        let idx = Self::index(obj);
        // Copy out before visiting; the visitor calls back into the heap.
        let entries: Vec<SlotEntry> = {
            let objects = self.objects.lock();
            assert!(!objects[idx].freed, "walked a freed object");
            objects[idx]
                .slots
                .iter()
                .enumerate()
                .map(|(slot, &target)| SlotEntry {
                    slot: self.slot_ptr(idx, slot),
                    target: if target == 0 {
                        ObjPtr::null()
                    } else {
                        self.obj_ptr(target - 1)
                    },
                })
                .collect()
        };
        for entry in entries {
            visit(entry);
        }
    }

    fn is_atomic_cell(&self, obj: ObjPtr) -> bool {
        self.objects.lock()[Self::index(obj)].atomic
    }

    fn ref_count(&self, obj: ObjPtr) -> u32 {
        let objects = self.objects.lock();
        let object = &objects[Self::index(obj)];
        assert!(!object.freed, "read the refcount of a freed object");
        object.rc
    }

    fn walk_stack(&self, worker: WorkerId, visit: &mut dyn FnMut(ObjPtr)) {
        let cells = self.stacks.lock().get(&worker).cloned().unwrap_or_default();
        for cell in cells {
            if self.objects.lock()[cell].atomic {
                visit(self.obj_ptr(cell));
            }
        }
    }

    fn zero_slot(&self, slot: SlotPtr, dead: &mut dyn FnMut(ObjPtr)) {
        let raw = slot.as_raw() as usize;
        let (idx, slot_idx) = ((raw >> 8) - 1, raw & 0xff);
        let mut dead_cells = Vec::new();
        {
            let mut objects = self.objects.lock();
            assert!(!objects[idx].freed, "zeroed a slot of a freed object");
            let target = std::mem::replace(&mut objects[idx].slots[slot_idx], 0);
            if target != 0 {
                let mut worklist = vec![target - 1];
                while let Some(obj) = worklist.pop() {
                    let object = &mut objects[obj];
                    object.rc -= 1;
                    if object.rc > 0 {
                        continue;
                    }
                    object.freed = true;
                    if object.atomic {
                        dead_cells.push(obj);
                    }
                    let children = std::mem::take(&mut objects[obj].slots);
                    for child in children {
                        if child != 0 {
                            worklist.push(child - 1);
                        }
                    }
                }
            }
        }
        for cell in dead_cells {
            dead(self.obj_ptr(cell));
        }
    }
}
