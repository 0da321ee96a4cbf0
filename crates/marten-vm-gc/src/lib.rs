//! # Marten cycle collector
//!
//! Incremental cyclic garbage collector for the marten runtime's shared
//! mutable state.
//!
//! ## Design
//!
//! The runtime reclaims ordinary objects by reference counting, which cannot
//! reclaim cycles. Shared mutability is confined to **atomic reference
//! cells**; every other object reachable from a cell is frozen at
//! construction, so every reclaimable cycle passes through at least one
//! cell. The collector therefore roots itself at the live cell population
//! and, for each cell, compares the number of inbound references found
//! inside that population's transitive closure against the cell's actual
//! reference count. A cell whose counts match (and which is unreachable from
//! any live cell) belongs to garbage; its outgoing slots are zeroed and the
//! ordinary reference counting cascade reclaims the rest.
//!
//! - **No stop-the-world**: mutators reach rendezvous points voluntarily and
//!   contribute their stack reference counts there.
//! - **One global lock**: the same mutex serializes atomic-cell slot writes,
//!   the rendezvous bookkeeping and the mark walk, so the cell graph is
//!   stable whenever the collector looks at it.
//! - **Background marking**: a dedicated thread runs the walk once every
//!   registered worker has contributed; mutators never block on the mark.
//! - **Deferred release**: the collector only queues slot addresses; the
//!   next mutator to reach a rendezvous zeroes them under the runtime's
//!   write barrier.
//!
//! The collector owns no object layout. Everything it knows about the heap
//! comes through the [`host::HostRuntime`] trait.

#![warn(clippy::all)]
#![warn(missing_docs)]

mod marker;
mod queue;
mod registry;
mod scheduler;
#[cfg(test)]
mod testutil;

pub mod collector;
pub mod global;
pub mod host;
pub mod ptr;

pub use collector::{CycleCollector, CyclePhase, CycleStats};
pub use host::{HostRuntime, SlotEntry};
pub use ptr::{ObjPtr, SlotPtr, WorkerId};
