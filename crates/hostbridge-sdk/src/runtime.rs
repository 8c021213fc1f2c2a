//! The foreign runtime callback table
//!
//! Every crossing into the foreign runtime goes through `ForeignRuntime`.
//! The table is exchanged once at startup; the C ABI version lives in the
//! `hostbridge-ffi` crate and adapts to this trait.
//!
//! All calls are same-process and synchronous: the calling thread is blocked
//! until the foreign side returns.

use std::path::Path;

use crate::handle::{ForeignPtr, HandleKind};
use crate::object::NativeObject;

/// Status code returned by invocation callbacks
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeStatus {
    /// The call returned normally
    Success = 0,
    /// The call raised an exception; a message may have been written
    Exception = 1,
}

impl InvokeStatus {
    /// Decode a C ABI status code (any non-zero code is an exception)
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            InvokeStatus::Success
        } else {
            InvokeStatus::Exception
        }
    }

    /// Check for success
    pub fn is_success(self) -> bool {
        self == InvokeStatus::Success
    }
}

/// Callbacks into the foreign runtime.
///
/// Methods take `&self`: implementations that record state use interior
/// mutability. The bridge only ever calls them from its owner thread.
pub trait ForeignRuntime {
    /// Load a module from `path`, returning its module token
    fn load_module(&self, path: &Path, collectible: bool) -> Option<ForeignPtr>;

    /// Unload the module loaded from `path`
    fn unload_module(&self, path: &Path) -> bool;

    /// Construct the foreign counterpart of `native` using `type_token`.
    ///
    /// `Err` carries the foreign error message. `Ok(ForeignPtr::NULL)` means
    /// the runtime produced nothing, which the bridge treats as an invariant
    /// violation.
    fn create_object(&self, native: NativeObject, type_token: ForeignPtr)
        -> Result<ForeignPtr, String>;

    /// Create a wrapper exposing `object` through an interface type
    fn create_interface_wrapper(&self, object: ForeignPtr, interface_type: ForeignPtr)
        -> ForeignPtr;

    /// Resolve a type token by fully qualified name within a module
    fn lookup_type(&self, module: ForeignPtr, full_name: &str) -> Option<ForeignPtr>;

    /// Resolve a method token by name within a type
    fn lookup_method(&self, type_token: ForeignPtr, method_name: &str) -> Option<ForeignPtr>;

    /// Invoke `method` on `object`.
    ///
    /// `args` is laid out according to the function's frame layout. The
    /// callee writes output parameters into `args`, the return value into
    /// `return_slot`, and on failure an exception message into `exception`.
    fn invoke_method(
        &self,
        object: ForeignPtr,
        method: ForeignPtr,
        args: &mut [u8],
        return_slot: &mut [u8],
        exception: &mut Option<String>,
    ) -> InvokeStatus;

    /// Invoke a bound foreign delegate
    fn invoke_delegate(&self, delegate: ForeignPtr) -> InvokeStatus;

    /// Release a foreign reference.
    ///
    /// `module` names the owning module token when per-module bookkeeping
    /// applies.
    fn dispose(&self, handle: ForeignPtr, kind: HandleKind, module: Option<ForeignPtr>);
}
