//! Fake foreign runtime

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hostbridge_sdk::{ForeignPtr, ForeignRuntime, HandleKind, InvokeStatus, NativeObject};

use crate::ranges;

/// Body of a fake foreign method: reads and writes the argument buffer and
/// return slot, or fails with an exception message
pub type InvokeHandler = Box<dyn FnMut(&mut [u8], &mut [u8]) -> Result<(), String>>;

/// One recorded callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `load_module`
    LoadModule {
        /// Module path
        path: PathBuf,
        /// Collectible flag
        collectible: bool,
    },
    /// `unload_module`
    UnloadModule {
        /// Module path
        path: PathBuf,
    },
    /// `create_object`
    CreateObject {
        /// Native object
        native: NativeObject,
        /// Type token used
        type_token: ForeignPtr,
    },
    /// `create_interface_wrapper`
    CreateInterfaceWrapper {
        /// Wrapped object
        object: ForeignPtr,
        /// Interface token
        interface: ForeignPtr,
    },
    /// `lookup_type`
    LookupType {
        /// Module token
        module: ForeignPtr,
        /// Fully qualified name
        name: String,
    },
    /// `lookup_method`
    LookupMethod {
        /// Type token
        type_token: ForeignPtr,
        /// Method name
        name: String,
    },
    /// `invoke_method`
    InvokeMethod {
        /// Receiver
        object: ForeignPtr,
        /// Method token
        method: ForeignPtr,
    },
    /// `invoke_delegate`
    InvokeDelegate {
        /// Delegate handle
        delegate: ForeignPtr,
    },
    /// `dispose`
    Dispose(Disposal),
}

/// One recorded disposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposal {
    /// Released pointer
    pub handle: ForeignPtr,
    /// Kind it was released as
    pub kind: HandleKind,
    /// Module token passed for bookkeeping
    pub module: Option<ForeignPtr>,
}

#[derive(Default)]
struct RuntimeState {
    counters: HashMap<usize, usize>,
    modules: HashMap<PathBuf, ForeignPtr>,
    type_names: HashMap<ForeignPtr, String>,
    method_names: HashMap<ForeignPtr, String>,
    objects: HashMap<ForeignPtr, NativeObject>,
    live: HashSet<ForeignPtr>,
    hidden_types: HashSet<String>,
    hidden_methods: HashSet<String>,
    failing_modules: HashSet<PathBuf>,
    failing_delegates: HashSet<ForeignPtr>,
    null_objects: bool,
    handlers: HashMap<String, InvokeHandler>,
    calls: Vec<RuntimeCall>,
    double_disposals: usize,
}

impl RuntimeState {
    fn allocate(&mut self, base: usize) -> ForeignPtr {
        let counter = self.counters.entry(base).or_insert(0);
        *counter += 1;
        let ptr = ForeignPtr::from_addr(base + *counter * 0x10);
        self.live.insert(ptr);
        ptr
    }
}

/// In-memory `ForeignRuntime`.
///
/// Every lookup hands out a fresh pointer, so every token the bridge holds
/// is an allocation that must be disposed exactly once.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Rc<RefCell<RuntimeState>>,
}

impl FakeRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Make `load_module` fail for `path`
    pub fn fail_module_load(&self, path: impl Into<PathBuf>) {
        self.state.borrow_mut().failing_modules.insert(path.into());
    }

    /// Make `create_object` return a null pointer
    pub fn return_null_objects(&self, enabled: bool) {
        self.state.borrow_mut().null_objects = enabled;
    }

    /// Make `lookup_type` fail for a fully qualified name
    pub fn hide_type(&self, full_name: &str) {
        self.state.borrow_mut().hidden_types.insert(full_name.to_string());
    }

    /// Make `lookup_method` fail for a method name
    pub fn hide_method(&self, name: &str) {
        self.state.borrow_mut().hidden_methods.insert(name.to_string());
    }

    /// Install the body of every method named `name`
    pub fn on_invoke(
        &self,
        name: &str,
        handler: impl FnMut(&mut [u8], &mut [u8]) -> Result<(), String> + 'static,
    ) {
        self.state
            .borrow_mut()
            .handlers
            .insert(name.to_string(), Box::new(handler));
    }

    /// Make every method named `name` raise `message`
    pub fn throw_on(&self, name: &str, message: &str) {
        let message = message.to_string();
        self.on_invoke(name, move |_, _| Err(message.clone()));
    }

    /// Allocate a delegate handle, optionally one whose invocation fails
    pub fn allocate_delegate(&self, failing: bool) -> ForeignPtr {
        let mut state = self.state.borrow_mut();
        let ptr = state.allocate(ranges::DELEGATES);
        if failing {
            state.failing_delegates.insert(ptr);
        }
        ptr
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Every callback made so far, in order
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.borrow().calls.clone()
    }

    /// Count callbacks matching `pred`
    pub fn count_calls(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state.borrow().calls.iter().filter(|c| pred(c)).count()
    }

    /// Every disposal made so far, in order
    pub fn disposals(&self) -> Vec<Disposal> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Dispose(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    /// Pointers allocated and not yet disposed
    pub fn live_handles(&self) -> HashSet<ForeignPtr> {
        self.state.borrow().live.clone()
    }

    /// Live pointers in the range starting at `base`
    pub fn live_in(&self, base: usize) -> usize {
        self.state
            .borrow()
            .live
            .iter()
            .filter(|p| ranges::contains(base, p.addr()))
            .count()
    }

    /// Disposals of pointers that were not live
    pub fn double_disposals(&self) -> usize {
        self.state.borrow().double_disposals
    }

    /// Module token currently bound to `path`
    pub fn module_token(&self, path: &Path) -> Option<ForeignPtr> {
        self.state.borrow().modules.get(path).copied()
    }

    /// Type name a type token was looked up by
    pub fn type_name(&self, token: ForeignPtr) -> Option<String> {
        self.state.borrow().type_names.get(&token).cloned()
    }

    /// Native object a foreign object was created for
    pub fn native_of(&self, object: ForeignPtr) -> Option<NativeObject> {
        self.state.borrow().objects.get(&object).copied()
    }

    /// Check whether `ptr` is allocated and not disposed
    pub fn is_live(&self, ptr: ForeignPtr) -> bool {
        self.state.borrow().live.contains(&ptr)
    }
}

impl ForeignRuntime for FakeRuntime {
    fn load_module(&self, path: &Path, collectible: bool) -> Option<ForeignPtr> {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::LoadModule {
            path: path.to_path_buf(),
            collectible,
        });
        if state.failing_modules.contains(path) {
            return None;
        }
        let token = state.allocate(ranges::MODULES);
        state.modules.insert(path.to_path_buf(), token);
        Some(token)
    }

    fn unload_module(&self, path: &Path) -> bool {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::UnloadModule {
            path: path.to_path_buf(),
        });
        state.modules.remove(path).is_some()
    }

    fn create_object(
        &self,
        native: NativeObject,
        type_token: ForeignPtr,
    ) -> Result<ForeignPtr, String> {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::CreateObject { native, type_token });
        if !state.live.contains(&type_token) {
            return Err(format!("type token {} is not live", type_token));
        }
        if state.null_objects {
            return Ok(ForeignPtr::NULL);
        }
        let object = state.allocate(ranges::OBJECTS);
        state.objects.insert(object, native);
        Ok(object)
    }

    fn create_interface_wrapper(&self, object: ForeignPtr, interface_type: ForeignPtr) -> ForeignPtr {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::CreateInterfaceWrapper {
            object,
            interface: interface_type,
        });
        if !state.live.contains(&object) {
            return ForeignPtr::NULL;
        }
        state.allocate(ranges::WRAPPERS)
    }

    fn lookup_type(&self, module: ForeignPtr, full_name: &str) -> Option<ForeignPtr> {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::LookupType {
            module,
            name: full_name.to_string(),
        });
        if state.hidden_types.contains(full_name) || !state.live.contains(&module) {
            return None;
        }
        let token = state.allocate(ranges::TYPES);
        state.type_names.insert(token, full_name.to_string());
        Some(token)
    }

    fn lookup_method(&self, type_token: ForeignPtr, method_name: &str) -> Option<ForeignPtr> {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::LookupMethod {
            type_token,
            name: method_name.to_string(),
        });
        if state.hidden_methods.contains(method_name) {
            return None;
        }
        let token = state.allocate(ranges::METHODS);
        state.method_names.insert(token, method_name.to_string());
        Some(token)
    }

    fn invoke_method(
        &self,
        object: ForeignPtr,
        method: ForeignPtr,
        args: &mut [u8],
        return_slot: &mut [u8],
        exception: &mut Option<String>,
    ) -> InvokeStatus {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::InvokeMethod { object, method });

        let Some(name) = state.method_names.get(&method).cloned() else {
            *exception = Some(format!("unknown method token {}", method));
            return InvokeStatus::Exception;
        };
        let Some(handler) = state.handlers.get_mut(&name) else {
            return InvokeStatus::Success;
        };
        match handler(args, return_slot) {
            Ok(()) => InvokeStatus::Success,
            Err(message) => {
                *exception = Some(message);
                InvokeStatus::Exception
            }
        }
    }

    fn invoke_delegate(&self, delegate: ForeignPtr) -> InvokeStatus {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::InvokeDelegate { delegate });
        if state.failing_delegates.contains(&delegate) {
            InvokeStatus::Exception
        } else {
            InvokeStatus::Success
        }
    }

    fn dispose(&self, handle: ForeignPtr, kind: HandleKind, module: Option<ForeignPtr>) {
        let mut state = self.state.borrow_mut();
        state.calls.push(RuntimeCall::Dispose(Disposal {
            handle,
            kind,
            module,
        }));
        if !state.live.remove(&handle) {
            state.double_disposals += 1;
        }
    }
}
