//! C ABI surface for HostBridge
//!
//! Two directions cross here:
//! - Outbound: the foreign runtime hands over a `ManagedCallbacks` table
//!   once at startup; `CallbackRuntime` adapts it to `ForeignRuntime` so a
//!   `BridgeContext` can drive it.
//! - Inbound: the foreign runtime posts type registrations and the host
//!   posts object deletions through opaque port handles. Posting is safe
//!   from any thread; the owner thread drains the queues.
//!
//! Entry points never unwind into the caller. They return `0` on success
//! and `-1` on failure, and record the failure for
//! `hostbridge_last_error()` on the calling thread.

#![warn(missing_docs)]

mod callbacks;

pub use callbacks::{
    CallbackRuntime, CreateInterfaceWrapperFn, CreateObjectFn, DisposeFn, FreeStringFn,
    InvokeDelegateFn, InvokeMethodFn, LoadModuleFn, LookupMethodFn, LookupTypeFn, ManagedCallbacks,
    UnloadModuleFn,
};

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use hostbridge_engine::{DeletionPort, RegistrationPort, TypeRegistration};
use hostbridge_sdk::{FieldName, ForeignPtr, MetadataError, ObjectId, TypeKind};
use log::warn;

// ============================================================================
// Errors
// ============================================================================

/// Errors reported across the C ABI
#[derive(Debug, thiserror::Error)]
pub enum FfiError {
    /// A callback table entry was null
    #[error("Callback table entry '{0}' is null")]
    MissingCallback(&'static str),

    /// A required pointer argument was null
    #[error("Argument '{0}' is null")]
    NullArgument(&'static str),

    /// A string argument was not valid UTF-8
    #[error("Argument '{0}' is not valid UTF-8")]
    InvalidUtf8(&'static str),

    /// The type kind code is unknown
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The bridge context behind a port is gone
    #[error("The bridge context behind this port has been dropped")]
    Disconnected,

    /// A panic was caught at the boundary
    #[error("Panic at the C boundary: {0}")]
    Panic(String),
}

thread_local! {
    /// Last failure on the calling thread
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(error: &FfiError) {
    warn!("[ffi] {}", error);
    let text = error.to_string().replace('\0', " ");
    if let Ok(message) = CString::new(text) {
        LAST_ERROR.with(|last| *last.borrow_mut() = Some(message));
    }
}

/// Run an entry point body, mapping errors and panics to `-1`
fn guard(body: impl FnOnce() -> Result<(), FfiError>) -> c_int {
    let result = catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(FfiError::Panic(message))
    });
    match result {
        Ok(()) => 0,
        Err(error) => {
            set_last_error(&error);
            -1
        }
    }
}

/// Borrow a required C string argument
///
/// # Safety
/// `value` must be NULL or a valid NUL-terminated string
unsafe fn c_str<'a>(value: *const c_char, name: &'static str) -> Result<&'a str, FfiError> {
    if value.is_null() {
        return Err(FfiError::NullArgument(name));
    }
    CStr::from_ptr(value)
        .to_str()
        .map_err(|_| FfiError::InvalidUtf8(name))
}

/// Copy the last error recorded on the calling thread into `buffer`
///
/// # Arguments
/// * `buffer` - Destination (may be NULL to query the length)
/// * `capacity` - Size of `buffer` in bytes
///
/// # Returns
/// * Length of the message in bytes, excluding the terminator
/// * 0 if no error has been recorded on this thread
///
/// # Safety
/// `buffer` must be NULL or point to at least `capacity` writable bytes.
/// The copy is truncated and always NUL-terminated when `capacity > 0`.
#[no_mangle]
pub unsafe extern "C" fn hostbridge_last_error(buffer: *mut c_char, capacity: usize) -> usize {
    LAST_ERROR.with(|last| {
        let last = last.borrow();
        let Some(message) = last.as_ref() else {
            return 0;
        };
        let bytes = message.as_bytes();
        if !buffer.is_null() && capacity > 0 {
            let len = bytes.len().min(capacity - 1);
            ptr::copy_nonoverlapping(bytes.as_ptr(), buffer as *mut u8, len);
            *buffer.add(len) = 0;
        }
        bytes.len()
    })
}

// ============================================================================
// Registration Port
// ============================================================================

/// Opaque handle to a registration port
#[repr(C)]
pub struct HostBridgeRegistrationPort {
    _private: [u8; 0],
}

/// Hand a registration port to C code.
///
/// The handle must be released with `hostbridge_registration_port_free()`.
pub fn registration_port_into_raw(port: RegistrationPort) -> *mut HostBridgeRegistrationPort {
    Box::into_raw(Box::new(port)) as *mut HostBridgeRegistrationPort
}

/// Post a type registration
///
/// # Arguments
/// * `port` - Port handle (must not be NULL)
/// * `assembly` - Name of the defining assembly
/// * `namespace`, `name` - Type identity
/// * `kind` - Type kind code (0 class, 1 struct, 2 enum, 3 interface,
///   4 delegate signature)
/// * `raw_metadata` - Serialized metadata entry for the type
/// * `type_token` - Current type token (may be NULL)
/// * `non_structural` - Non-zero when only the token changed
///
/// # Returns
/// * 0 on success
/// * -1 on failure (see `hostbridge_last_error()`)
///
/// # Safety
/// - `port` must come from `registration_port_into_raw()` and not be freed
/// - String arguments must be valid NUL-terminated strings
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn hostbridge_registration_port_post(
    port: *const HostBridgeRegistrationPort,
    assembly: *const c_char,
    namespace: *const c_char,
    name: *const c_char,
    kind: u8,
    raw_metadata: *const c_char,
    type_token: *mut c_void,
    non_structural: u8,
) -> c_int {
    guard(|| {
        if port.is_null() {
            return Err(FfiError::NullArgument("port"));
        }
        let port = &*(port as *const RegistrationPort);
        let field_name = FieldName::new(c_str(namespace, "namespace")?, c_str(name, "name")?);
        let kind = TypeKind::from_u8(kind)?;
        let mut registration = TypeRegistration::new(
            c_str(assembly, "assembly")?,
            field_name,
            kind,
            c_str(raw_metadata, "raw_metadata")?,
        )
        .with_token(ForeignPtr::from_addr(type_token as usize));
        if non_structural != 0 {
            registration = registration.non_structural();
        }
        if port.post(registration) {
            Ok(())
        } else {
            Err(FfiError::Disconnected)
        }
    })
}

/// Free a registration port
///
/// # Safety
/// `port` must be NULL or come from `registration_port_into_raw()`, and must
/// not be used after this call
#[no_mangle]
pub unsafe extern "C" fn hostbridge_registration_port_free(port: *mut HostBridgeRegistrationPort) {
    if port.is_null() {
        return;
    }
    drop(Box::from_raw(port as *mut RegistrationPort));
}

// ============================================================================
// Deletion Port
// ============================================================================

/// Opaque handle to a deletion port
#[repr(C)]
pub struct HostBridgeDeletionPort {
    _private: [u8; 0],
}

/// Hand a deletion port to C code.
///
/// The handle must be released with `hostbridge_deletion_port_free()`.
pub fn deletion_port_into_raw(port: DeletionPort) -> *mut HostBridgeDeletionPort {
    Box::into_raw(Box::new(port)) as *mut HostBridgeDeletionPort
}

/// Post a native object deletion
///
/// # Returns
/// * 0 on success
/// * -1 on failure (see `hostbridge_last_error()`)
///
/// # Safety
/// `port` must come from `deletion_port_into_raw()` and not be freed
#[no_mangle]
pub unsafe extern "C" fn hostbridge_deletion_port_post(
    port: *const HostBridgeDeletionPort,
    object_id: u64,
) -> c_int {
    guard(|| {
        if port.is_null() {
            return Err(FfiError::NullArgument("port"));
        }
        let port = &*(port as *const DeletionPort);
        if port.post(ObjectId(object_id)) {
            Ok(())
        } else {
            Err(FfiError::Disconnected)
        }
    })
}

/// Free a deletion port
///
/// # Safety
/// `port` must be NULL or come from `deletion_port_into_raw()`, and must not
/// be used after this call
#[no_mangle]
pub unsafe extern "C" fn hostbridge_deletion_port_free(port: *mut HostBridgeDeletionPort) {
    if port.is_null() {
        return;
    }
    drop(Box::from_raw(port as *mut DeletionPort));
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the bridge version string
///
/// # Safety
/// The returned string is static and must not be freed
#[no_mangle]
pub unsafe extern "C" fn hostbridge_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr() as *const c_char
}

// ============================================================================
// Tests
// ============================================================================
