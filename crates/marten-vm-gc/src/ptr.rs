//! Opaque tokens exchanged with the host runtime.

use std::fmt;

/// Address of a heap object.
///
/// The collector never dereferences these; it compares, hashes and hands
/// them back to the host through [`HostRuntime`](crate::host::HostRuntime)
/// callbacks.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjPtr(*const ());

impl ObjPtr {
    /// The null reference.
    pub fn null() -> Self {
        ObjPtr(std::ptr::null())
    }

    /// Wrap a raw host pointer.
    #[inline]
    pub fn from_raw(raw: *const ()) -> Self {
        ObjPtr(raw)
    }

    /// The raw host pointer.
    #[inline]
    pub fn as_raw(self) -> *const () {
        self.0
    }

    /// True for the null reference.
    #[inline]
    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Debug for ObjPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjPtr({:p})", self.0)
    }
}

// SAFETY: ObjPtr is an address token. All dereferencing happens in the host,
// under the collector's global lock, which keeps the object graph stable.
unsafe impl Send for ObjPtr {}
unsafe impl Sync for ObjPtr {}

/// Address of a reference-bearing slot inside a heap object.
///
/// Stable for the containing object's lifetime. Only the host reads or
/// writes through it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotPtr(*const ());

impl SlotPtr {
    /// Wrap a raw host slot address.
    #[inline]
    pub fn from_raw(raw: *const ()) -> Self {
        SlotPtr(raw)
    }

    /// The raw host slot address.
    #[inline]
    pub fn as_raw(self) -> *const () {
        self.0
    }
}

impl fmt::Debug for SlotPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotPtr({:p})", self.0)
    }
}

// SAFETY: SlotPtr is an address token, dereferenced only by the host under
// the collector's global lock.
unsafe impl Send for SlotPtr {}
unsafe impl Sync for SlotPtr {}

/// Identity of a mutator thread, assigned by the host at attach time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Wrap a host-assigned worker identity.
    pub const fn new(raw: u64) -> Self {
        WorkerId(raw)
    }

    /// The raw identity value.
    pub fn raw(self) -> u64 {
        self.0
    }
}
