//! Foreign handles and their lifetime
//!
//! A `Handle` is the owned form of a reference into the foreign runtime.
//! Disposal is routed through the `ForeignRuntime` callback table and must
//! name the module token of the unit that allocated it, because the foreign
//! side keeps per-module bookkeeping for collectible units.

use std::ffi::c_void;
use std::fmt;

use crate::runtime::ForeignRuntime;

// ============================================================================
// Foreign Pointer
// ============================================================================

/// Opaque pointer into the foreign runtime.
///
/// This is a plain address: copying it creates a logical alias of the same
/// foreign reference, never a new reference count. Ownership lives in
/// [`Handle`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ForeignPtr(usize);

impl ForeignPtr {
    /// The null pointer
    pub const NULL: ForeignPtr = ForeignPtr(0);

    /// Create from a raw address
    pub const fn from_addr(addr: usize) -> Self {
        ForeignPtr(addr)
    }

    /// Create from a raw C pointer
    pub fn from_raw(ptr: *mut c_void) -> Self {
        ForeignPtr(ptr as usize)
    }

    /// Get the raw address
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Get as a raw C pointer
    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// Check if this is the null pointer
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Convert to `None` when null
    pub fn non_null(self) -> Option<Self> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for ForeignPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignPtr({:#x})", self.0)
    }
}

impl fmt::Display for ForeignPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ============================================================================
// Handle Kind
// ============================================================================

/// Lifetime kind of a foreign reference
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum HandleKind {
    /// No reference held (null or disposed)
    #[default]
    None = 0,
    /// Keeps the foreign object alive
    Strong = 1,
    /// Observes the foreign object without keeping it alive
    Weak = 2,
}

impl HandleKind {
    /// Decode from the C ABI representation
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(HandleKind::None),
            1 => Some(HandleKind::Strong),
            2 => Some(HandleKind::Weak),
            _ => None,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owned reference to a foreign object, method, or type token.
///
/// Neither `Clone` nor `Copy`: exactly one table owns each
/// handle. Use [`Handle::pointer`] to obtain an alias for a call.
///
/// A disposed handle has a null pointer and kind [`HandleKind::None`] and is
/// indistinguishable from [`Handle::null`].
#[derive(Debug, PartialEq, Eq, Default)]
pub struct Handle {
    pointer: ForeignPtr,
    kind: HandleKind,
}

impl Handle {
    /// Wrap a foreign pointer.
    ///
    /// A null pointer or a `None` kind yields a null handle.
    pub fn new(pointer: ForeignPtr, kind: HandleKind) -> Self {
        if pointer.is_null() || kind == HandleKind::None {
            return Handle::null();
        }
        Handle { pointer, kind }
    }

    /// Create a strong handle
    pub fn strong(pointer: ForeignPtr) -> Self {
        Handle::new(pointer, HandleKind::Strong)
    }

    /// Create a weak handle
    pub fn weak(pointer: ForeignPtr) -> Self {
        Handle::new(pointer, HandleKind::Weak)
    }

    /// Create a null handle
    pub const fn null() -> Self {
        Handle {
            pointer: ForeignPtr::NULL,
            kind: HandleKind::None,
        }
    }

    /// Check if this handle holds nothing (never set or disposed)
    pub fn is_null(&self) -> bool {
        self.pointer.is_null()
    }

    /// Get the foreign pointer (null once disposed)
    pub fn pointer(&self) -> ForeignPtr {
        self.pointer
    }

    /// Get the lifetime kind
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Release the foreign reference.
    ///
    /// `module` is the module token of the owning unit. Pass `None` only for
    /// handles that need no per-module bookkeeping (the module token itself).
    /// Disposing a null or already disposed handle does nothing.
    ///
    /// Returns `true` if a foreign reference was actually released.
    pub fn dispose(&mut self, runtime: &dyn ForeignRuntime, module: Option<ForeignPtr>) -> bool {
        if self.is_null() {
            return false;
        }
        runtime.dispose(self.pointer, self.kind, module);
        *self = Handle::null();
        true
    }

    /// Move the reference out, leaving a null handle behind
    pub fn take(&mut self) -> Handle {
        std::mem::take(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
