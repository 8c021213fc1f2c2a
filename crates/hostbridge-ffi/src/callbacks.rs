//! Callback table exchanged with the foreign runtime
//!
//! The foreign side fills a `ManagedCallbacks` once at startup. Every entry
//! is checked when the table is adopted, so calls through
//! `CallbackRuntime` never meet a null function pointer.

use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr;

use hostbridge_sdk::{ForeignPtr, ForeignRuntime, HandleKind, InvokeStatus, NativeObject};
use log::warn;

use crate::FfiError;

// ============================================================================
// C Signatures
// ============================================================================

/// Load a module; returns its module token or NULL
pub type LoadModuleFn = unsafe extern "C" fn(path: *const c_char, collectible: u8) -> *mut c_void;

/// Unload a module; returns non-zero when a module was unloaded
pub type UnloadModuleFn = unsafe extern "C" fn(path: *const c_char) -> u8;

/// Construct a foreign object for a native one.
///
/// On failure returns NULL and may store a message allocated by the foreign
/// side in `error_out`.
pub type CreateObjectFn = unsafe extern "C" fn(
    native: *mut c_void,
    type_token: *mut c_void,
    error_out: *mut *mut c_char,
) -> *mut c_void;

/// Create an interface wrapper around a foreign object
pub type CreateInterfaceWrapperFn =
    unsafe extern "C" fn(object: *mut c_void, interface_type: *mut c_void) -> *mut c_void;

/// Resolve a type token by fully qualified name
pub type LookupTypeFn =
    unsafe extern "C" fn(module: *mut c_void, full_name: *const c_char) -> *mut c_void;

/// Resolve a method token by name
pub type LookupMethodFn =
    unsafe extern "C" fn(type_token: *mut c_void, method_name: *const c_char) -> *mut c_void;

/// Invoke a method; returns 0 on success
pub type InvokeMethodFn = unsafe extern "C" fn(
    object: *mut c_void,
    method: *mut c_void,
    args: *mut u8,
    args_len: usize,
    return_slot: *mut u8,
    return_len: usize,
    exception_out: *mut *mut c_char,
) -> c_int;

/// Invoke a bound delegate; returns 0 on success
pub type InvokeDelegateFn = unsafe extern "C" fn(delegate: *mut c_void) -> c_int;

/// Release a foreign reference (`module` may be NULL)
pub type DisposeFn = unsafe extern "C" fn(handle: *mut c_void, kind: u8, module: *mut c_void);

/// Free a string allocated by the foreign side
pub type FreeStringFn = unsafe extern "C" fn(message: *mut c_char);

/// The fixed callback table
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct ManagedCallbacks {
    /// Module load
    pub load_module: Option<LoadModuleFn>,
    /// Module unload
    pub unload_module: Option<UnloadModuleFn>,
    /// Object construction
    pub create_object: Option<CreateObjectFn>,
    /// Interface wrapper construction
    pub create_interface_wrapper: Option<CreateInterfaceWrapperFn>,
    /// Type lookup
    pub lookup_type: Option<LookupTypeFn>,
    /// Method lookup
    pub lookup_method: Option<LookupMethodFn>,
    /// Method invocation
    pub invoke_method: Option<InvokeMethodFn>,
    /// Delegate invocation
    pub invoke_delegate: Option<InvokeDelegateFn>,
    /// Reference release
    pub dispose: Option<DisposeFn>,
    /// Release of foreign-allocated messages
    pub free_string: Option<FreeStringFn>,
}

// ============================================================================
// Adapter
// ============================================================================

/// `ForeignRuntime` over a validated `ManagedCallbacks` table
#[derive(Debug, Clone, Copy)]
pub struct CallbackRuntime {
    load_module: LoadModuleFn,
    unload_module: UnloadModuleFn,
    create_object: CreateObjectFn,
    create_interface_wrapper: CreateInterfaceWrapperFn,
    lookup_type: LookupTypeFn,
    lookup_method: LookupMethodFn,
    invoke_method: InvokeMethodFn,
    invoke_delegate: InvokeDelegateFn,
    dispose: DisposeFn,
    free_string: FreeStringFn,
}

fn require<T>(entry: Option<T>, name: &'static str) -> Result<T, FfiError> {
    entry.ok_or(FfiError::MissingCallback(name))
}

impl CallbackRuntime {
    /// Adopt a callback table
    ///
    /// # Safety
    /// Every entry must stay callable with the documented contract for as
    /// long as the returned runtime (or any copy) is in use.
    pub unsafe fn new(table: &ManagedCallbacks) -> Result<Self, FfiError> {
        Ok(CallbackRuntime {
            load_module: require(table.load_module, "load_module")?,
            unload_module: require(table.unload_module, "unload_module")?,
            create_object: require(table.create_object, "create_object")?,
            create_interface_wrapper: require(table.create_interface_wrapper, "create_interface_wrapper")?,
            lookup_type: require(table.lookup_type, "lookup_type")?,
            lookup_method: require(table.lookup_method, "lookup_method")?,
            invoke_method: require(table.invoke_method, "invoke_method")?,
            invoke_delegate: require(table.invoke_delegate, "invoke_delegate")?,
            dispose: require(table.dispose, "dispose")?,
            free_string: require(table.free_string, "free_string")?,
        })
    }

    /// Copy a foreign-allocated message and hand it back for release
    fn take_message(&self, message: *mut c_char) -> Option<String> {
        if message.is_null() {
            return None;
        }
        // SAFETY: non-null messages are NUL-terminated strings owned by the
        // foreign side until `free_string`
        let text = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
        unsafe { (self.free_string)(message) };
        Some(text)
    }
}

fn raw(pointer: ForeignPtr) -> *mut c_void {
    pointer.addr() as *mut c_void
}

fn foreign(pointer: *mut c_void) -> ForeignPtr {
    ForeignPtr::from_addr(pointer as usize)
}

fn c_path(path: &Path) -> Option<CString> {
    let text = path.to_str()?;
    CString::new(text).ok()
}

impl ForeignRuntime for CallbackRuntime {
    fn load_module(&self, path: &Path, collectible: bool) -> Option<ForeignPtr> {
        let Some(c_path) = c_path(path) else {
            warn!("[ffi] module path {} is not representable as a C string", path.display());
            return None;
        };
        let token = unsafe { (self.load_module)(c_path.as_ptr(), u8::from(collectible)) };
        foreign(token).non_null()
    }

    fn unload_module(&self, path: &Path) -> bool {
        let Some(c_path) = c_path(path) else {
            return false;
        };
        unsafe { (self.unload_module)(c_path.as_ptr()) != 0 }
    }

    fn create_object(&self, native: NativeObject, type_token: ForeignPtr) -> Result<ForeignPtr, String> {
        let mut error: *mut c_char = ptr::null_mut();
        let object = unsafe { (self.create_object)(native.addr() as *mut c_void, raw(type_token), &mut error) };
        match self.take_message(error) {
            Some(message) if object.is_null() => Err(message),
            Some(message) => {
                warn!("[ffi] create_object succeeded but reported: {}", message);
                Ok(foreign(object))
            }
            None => Ok(foreign(object)),
        }
    }

    fn create_interface_wrapper(&self, object: ForeignPtr, interface_type: ForeignPtr) -> ForeignPtr {
        foreign(unsafe { (self.create_interface_wrapper)(raw(object), raw(interface_type)) })
    }

    fn lookup_type(&self, module: ForeignPtr, full_name: &str) -> Option<ForeignPtr> {
        let name = CString::new(full_name).ok()?;
        foreign(unsafe { (self.lookup_type)(raw(module), name.as_ptr()) }).non_null()
    }

    fn lookup_method(&self, type_token: ForeignPtr, method_name: &str) -> Option<ForeignPtr> {
        let name = CString::new(method_name).ok()?;
        foreign(unsafe { (self.lookup_method)(raw(type_token), name.as_ptr()) }).non_null()
    }

    fn invoke_method(
        &self,
        object: ForeignPtr,
        method: ForeignPtr,
        args: &mut [u8],
        return_slot: &mut [u8],
        exception: &mut Option<String>,
    ) -> InvokeStatus {
        let mut message: *mut c_char = ptr::null_mut();
        let code = unsafe {
            (self.invoke_method)(
                raw(object),
                raw(method),
                args.as_mut_ptr(),
                args.len(),
                return_slot.as_mut_ptr(),
                return_slot.len(),
                &mut message,
            )
        };
        let status = InvokeStatus::from_code(code);
        let text = self.take_message(message);
        if !status.is_success() {
            *exception = text;
        }
        status
    }

    fn invoke_delegate(&self, delegate: ForeignPtr) -> InvokeStatus {
        InvokeStatus::from_code(unsafe { (self.invoke_delegate)(raw(delegate)) })
    }

    fn dispose(&self, handle: ForeignPtr, kind: HandleKind, module: Option<ForeignPtr>) {
        let module = module.map_or(ptr::null_mut(), raw);
        unsafe { (self.dispose)(raw(handle), kind as u8, module) }
    }
}
