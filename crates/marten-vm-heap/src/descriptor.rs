//! Type descriptors.

use std::sync::{Arc, OnceLock};

/// How an object's reference-bearing storage is laid out.
///
/// The variant distinguishes reference arrays from fixed-shape objects, so
/// slot enumeration never needs sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// Inline data only; no references.
    Data,
    /// Fixed shape with `ref_slots` reference fields.
    Fixed {
        /// Number of reference fields.
        ref_slots: u32,
    },
    /// Array whose every element is a reference.
    RefArray,
}

/// Static description of a heap object's shape.
#[derive(Debug)]
pub struct TypeDescriptor {
    /// Diagnostic name.
    pub name: &'static str,
    /// Reference layout.
    pub layout: Layout,
    /// Marks atomic reference cells, the only objects whose slots may be
    /// mutated after construction.
    pub atomic: bool,
}

impl TypeDescriptor {
    /// Descriptor for a frozen object with `ref_slots` reference fields.
    pub fn frozen(name: &'static str, ref_slots: u32) -> Self {
        Self {
            name,
            layout: Layout::Fixed { ref_slots },
            atomic: false,
        }
    }

    /// Descriptor for a frozen reference array.
    pub fn ref_array(name: &'static str) -> Self {
        Self {
            name,
            layout: Layout::RefArray,
            atomic: false,
        }
    }

    /// Descriptor for a frozen object with no references.
    pub fn data(name: &'static str) -> Self {
        Self {
            name,
            layout: Layout::Data,
            atomic: false,
        }
    }

    /// The built-in atomic reference cell type: one mutable slot.
    pub(crate) fn atomic_cell() -> Arc<TypeDescriptor> {
        static CELL: OnceLock<Arc<TypeDescriptor>> = OnceLock::new();
        CELL.get_or_init(|| {
            Arc::new(TypeDescriptor {
                name: "AtomicCell",
                layout: Layout::Fixed { ref_slots: 1 },
                atomic: true,
            })
        })
        .clone()
    }
}
