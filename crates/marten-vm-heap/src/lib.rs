//! # Marten reference heap
//!
//! A miniature of the runtime the cycle collector is embedded in: a shared
//! heap of frozen objects reclaimed by eager reference counting, plus the
//! atomic reference cells that make cycles possible in the first place.
//!
//! ## Model
//!
//! - **Frozen objects** receive all of their references at construction and
//!   are never mutated afterwards. Reference counting alone reclaims them.
//! - **Atomic cells** carry one mutable reference slot. Every write goes
//!   through the collector's global graph lock, which is what lets the
//!   collector walk a stable graph during its mark.
//! - **Workers** are mutator threads with a shadow stack; the handles pushed
//!   there are what the collector's stack walk sees at a rendezvous.
//!
//! The heap implements [`marten_vm_gc::HostRuntime`], so the collector
//! drives reclamation of cell cycles end to end: it zeroes the slots of
//! unreachable cycles and the ordinary refcount cascade does the rest.

#![warn(clippy::all)]
#![warn(missing_docs)]

mod object;

pub mod descriptor;
pub mod heap;
pub mod worker;

pub use descriptor::{Layout, TypeDescriptor};
pub use heap::{ObjRef, SharedHeap};
pub use worker::WorkerContext;
