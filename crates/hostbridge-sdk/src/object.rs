//! Native object identity

use std::fmt;

/// Pointer to an object living in the host's own object model.
///
/// The address is only meaningful to the host. Identity across the bridge is
/// keyed by [`ObjectId`], never by this address.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NativeObject(usize);

impl NativeObject {
    /// The null object
    pub const NULL: NativeObject = NativeObject(0);

    /// Create from a raw address
    pub const fn from_addr(addr: usize) -> Self {
        NativeObject(addr)
    }

    /// Get the raw address
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Check if this is the null object
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NativeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeObject({:#x})", self.0)
    }
}

/// Address-stable unique id of a native object, assigned by the host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
