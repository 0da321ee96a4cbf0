//! The mark walk and the release decision.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::host::HostRuntime;
use crate::ptr::ObjPtr;

/// Result of one mark pass.
#[derive(Debug, Default)]
pub(crate) struct MarkOutcome {
    /// Cells whose every inbound reference was accounted for and which are
    /// unreachable from any live cell. Their slots may be cleared.
    pub releasable: Vec<ObjPtr>,
    /// Objects visited by the closure walk.
    pub objects_visited: usize,
}

/// Compute the set of releasable cells.
///
/// `counts` arrives holding the stack contributions gathered at rendezvous
/// (zero or negative per cell); the closure walk adds one per edge into an
/// atomic cell. Runs entirely under the collector's global lock: the raw
/// object pointers in the deque and visited set never outlive the call, and
/// the walk never touches refcounts, since perturbing them would corrupt the
/// very quantity being measured.
pub(crate) fn run(
    host: &dyn HostRuntime,
    snapshot: &[ObjPtr],
    counts: &mut FxHashMap<ObjPtr, i64>,
) -> MarkOutcome {
    let mut visited: FxHashSet<ObjPtr> = FxHashSet::default();
    let mut deque: VecDeque<ObjPtr> = VecDeque::new();
    let mut objects_visited = 0usize;

    // Count edges into atomic cells over the transitive closure. Every edge
    // counts, including repeat encounters of an already-visited target; only
    // first encounters extend the walk.
    for &root in snapshot {
        if !counts.contains_key(&root) {
            // Unregistered mid-gather; ordinary RC already reclaimed it.
            continue;
        }
        if visited.insert(root) {
            deque.push_back(root);
        }
        while let Some(obj) = deque.pop_front() {
            objects_visited += 1;
            host.walk_ref_slots(obj, &mut |entry| {
                let target = entry.target;
                if target.is_null() {
                    return;
                }
                if host.is_atomic_cell(target) {
                    *counts.entry(target).or_insert(0) += 1;
                }
                if visited.insert(target) {
                    deque.push_back(target);
                }
            });
        }
    }
    debug_assert!(deque.is_empty());

    // Candidate cells: aggregate count matches the container refcount,
    // meaning every inbound reference was one of the edges above or a stack
    // slot subtracted at rendezvous. A negative aggregate just means stack
    // references outnumber closure edges (a cell held only from stacks);
    // an aggregate above the refcount cannot happen on a sane heap, since
    // each counted edge and stack slot is itself a live reference.
    let mut candidates: FxHashSet<ObjPtr> = FxHashSet::default();
    let mut live: Vec<ObjPtr> = Vec::new();
    for &root in snapshot {
        let Some(&inner) = counts.get(&root) else {
            continue;
        };
        let rc = i64::from(host.ref_count(root));
        assert!(
            inner <= rc,
            "inner count {inner} exceeds refcount {rc} for {root:?}: host heap is corrupt"
        );
        if inner == rc {
            candidates.insert(root);
        } else {
            live.push(root);
        }
    }

    // A candidate reachable from a live cell still has an inbound path from
    // outside the garbage set, so its slots must stay. Reachability is
    // transitive, which makes one walk from all live cells the fixpoint.
    if !candidates.is_empty() && !live.is_empty() {
        let mut seen: FxHashSet<ObjPtr> = FxHashSet::default();
        let mut work: VecDeque<ObjPtr> = VecDeque::new();
        for &root in &live {
            if seen.insert(root) {
                work.push_back(root);
            }
        }
        while let Some(obj) = work.pop_front() {
            host.walk_ref_slots(obj, &mut |entry| {
                let target = entry.target;
                if target.is_null() {
                    return;
                }
                candidates.remove(&target);
                if seen.insert(target) {
                    work.push_back(target);
                }
            });
        }
    }

    let releasable = snapshot
        .iter()
        .copied()
        .filter(|cell| candidates.contains(cell))
        .collect();
    MarkOutcome {
        releasable,
        objects_visited,
    }
}
