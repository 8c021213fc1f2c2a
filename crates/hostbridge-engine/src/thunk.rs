//! Function invocation thunk
//!
//! Every foreign-backed function is flagged `NATIVE`, so the host routes
//! calls on it here instead of to a native body. One call goes through:
//!
//! 1. Dispatch: compile the owning type, find the function and its
//!    precomputed `FrameLayout`, resolve the receiver and the method token
//! 2. Marshal in: copy inputs into a scratch argument buffer at their
//!    offsets; write-only outputs are left zeroed
//! 3. Invoke through the callback table
//! 4. Marshal out: copy outputs and the return value back to the caller's
//!    storage, or surface the foreign exception
//! 5. Cleanup: the scratch buffer is released on every path

use std::cell::Cell;

use log::{error, trace};

use hostbridge_sdk::{ForeignPtr, Handle, NativeObject};

use crate::assembly::DefinitionId;
use crate::config::ExceptionPolicy;
use crate::context::BridgeContext;
use crate::error::{fatal, BridgeResult, InvokeError};
use crate::types::{MarshalKind, ParamSlot, TypeOrigin};

// ============================================================================
// Call Frames
// ============================================================================

/// One caller-side argument
#[derive(Debug)]
pub enum FrameArg<'a> {
    /// By-value input
    In(&'a [u8]),
    /// Write-only output, filled after a successful call
    Out(&'a mut [u8]),
    /// By-reference parameter, copied in and back out
    InOut(&'a mut [u8]),
    /// Object reference, passed as its foreign counterpart
    Object(NativeObject),
}

impl FrameArg<'_> {
    fn describe(&self) -> &'static str {
        match self {
            FrameArg::In(_) => "input",
            FrameArg::Out(_) => "output",
            FrameArg::InOut(_) => "in-out reference",
            FrameArg::Object(_) => "object",
        }
    }
}

/// A call as seen from the native side
#[derive(Debug, Default)]
pub struct NativeFrame<'a> {
    /// Instance the function is called on (ignored for static functions)
    pub receiver: Option<NativeObject>,
    /// Arguments in declaration order
    pub args: Vec<FrameArg<'a>>,
    /// Storage for the return value, if the caller wants it
    pub return_value: Option<&'a mut [u8]>,
}

impl<'a> NativeFrame<'a> {
    /// Frame for a static call
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame for an instance call
    pub fn on(receiver: NativeObject) -> Self {
        NativeFrame {
            receiver: Some(receiver),
            ..Self::default()
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: FrameArg<'a>) -> Self {
        self.args.push(arg);
        self
    }

    /// Attach return value storage
    pub fn returning(mut self, storage: &'a mut [u8]) -> Self {
        self.return_value = Some(storage);
        self
    }
}

/// Result of a call that reached the thunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// The foreign call returned; outputs were copied back
    Completed,
    /// The foreign call raised; the exception went to the host and the
    /// caller's output storage is untouched
    ExceptionHandled {
        /// Foreign exception message
        message: String,
    },
    /// A hot reload was in progress; nothing was called
    SkippedDuringReload,
}

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of thunk counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThunkStats {
    /// Calls that reached the foreign runtime
    pub calls: u64,
    /// Calls that raised
    pub exceptions: u64,
    /// Calls skipped during hot reload
    pub skipped: u64,
    /// Scratch buffers allocated
    pub scratch_allocations: u64,
    /// Scratch buffers released
    pub scratch_releases: u64,
}

#[derive(Debug, Default)]
pub(crate) struct ThunkCounters {
    calls: Cell<u64>,
    exceptions: Cell<u64>,
    skipped: Cell<u64>,
    scratch_allocations: Cell<u64>,
    scratch_releases: Cell<u64>,
}

impl ThunkCounters {
    pub(crate) fn snapshot(&self) -> ThunkStats {
        ThunkStats {
            calls: self.calls.get(),
            exceptions: self.exceptions.get(),
            skipped: self.skipped.get(),
            scratch_allocations: self.scratch_allocations.get(),
            scratch_releases: self.scratch_releases.get(),
        }
    }
}

fn bump(counter: &Cell<u64>) {
    counter.set(counter.get() + 1);
}

/// Argument buffer and return slot of one call
struct ScratchBuffer<'c> {
    args: Vec<u8>,
    ret: Vec<u8>,
    releases: &'c Cell<u64>,
}

impl<'c> ScratchBuffer<'c> {
    fn new(args: usize, ret: usize, counters: &'c ThunkCounters) -> Self {
        bump(&counters.scratch_allocations);
        ScratchBuffer {
            args: vec![0; args],
            ret: vec![0; ret],
            releases: &counters.scratch_releases,
        }
    }

    fn slot(&self, slot: &ParamSlot) -> &[u8] {
        &self.args[slot.offset..slot.offset + slot.size]
    }

    fn slot_mut(&mut self, slot: &ParamSlot) -> &mut [u8] {
        &mut self.args[slot.offset..slot.offset + slot.size]
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        bump(self.releases);
    }
}

// ============================================================================
// Argument Checks
// ============================================================================

fn check_argument(function: &str, slot: &ParamSlot, arg: &FrameArg<'_>) -> Result<(), InvokeError> {
    let flags = slot.flags;
    let storage = match arg {
        FrameArg::Object(_) if slot.marshal == MarshalKind::ObjectRef && !flags.is_output() => return Ok(()),
        FrameArg::In(bytes) if !flags.is_output() && slot.marshal == MarshalKind::Blittable => bytes.len(),
        FrameArg::Out(bytes) if flags.is_write_only_out() => bytes.len(),
        FrameArg::InOut(bytes) if flags.is_output() && !flags.is_write_only_out() => bytes.len(),
        _ => {
            return Err(InvokeError::ArgumentKind {
                function: function.to_string(),
                parameter: slot.name.clone(),
                passed: arg.describe(),
            })
        }
    };
    if storage != slot.size {
        return Err(InvokeError::SizeMismatch {
            function: function.to_string(),
            parameter: slot.name.clone(),
            expected: slot.size,
            found: storage,
        });
    }
    Ok(())
}

fn write_pointer(dst: &mut [u8], pointer: ForeignPtr) {
    let bytes = (pointer.addr() as u64).to_le_bytes();
    let len = dst.len().min(bytes.len());
    dst[..len].copy_from_slice(&bytes[..len]);
}

// ============================================================================
// Invocation
// ============================================================================

impl BridgeContext {
    /// Call a foreign-backed function of a compiled type.
    ///
    /// Marshaling problems are returned before anything crosses the
    /// boundary. A foreign exception is raised on the host and then, per
    /// `exception_policy`, is fatal (strict) or reported as
    /// `InvokeOutcome::ExceptionHandled` (lenient).
    pub fn invoke(
        &mut self,
        def_id: DefinitionId,
        function: &str,
        frame: &mut NativeFrame<'_>,
    ) -> BridgeResult<InvokeOutcome> {
        self.check_alive()?;
        if self.is_hot_reloading() {
            bump(&self.thunk.skipped);
            trace!("[thunk] '{}' skipped during hot reload", function);
            return Ok(InvokeOutcome::SkippedDuringReload);
        }

        // Dispatch
        let type_id = self.compile_and_get_native_type(def_id)?;
        let ty = self.types.get(type_id);
        let type_name = ty.field_name.clone();
        if ty.origin == TypeOrigin::Native {
            return Err(InvokeError::NotForeign(type_name).into());
        }
        let Some(func) = ty.function(function) else {
            return Err(InvokeError::UnknownFunction {
                type_name,
                function: function.to_string(),
            }
            .into());
        };
        let func = func.clone();
        let layout = &func.layout;
        let receiver = if func.is_static() {
            ty.default_object
        } else {
            frame.receiver
        };

        if frame.args.len() != layout.params.len() {
            return Err(InvokeError::ArityMismatch {
                function: function.to_string(),
                expected: layout.params.len(),
                found: frame.args.len(),
            }
            .into());
        }
        for (slot, arg) in layout.params.iter().zip(&frame.args) {
            check_argument(function, slot, arg)?;
        }
        if let (Some(slot), Some(storage)) = (&layout.return_value, frame.return_value.as_deref()) {
            if storage.len() != slot.size {
                return Err(InvokeError::SizeMismatch {
                    function: function.to_string(),
                    parameter: slot.name.clone(),
                    expected: slot.size,
                    found: storage.len(),
                }
                .into());
            }
        }

        let Some(receiver) = receiver else {
            return Err(InvokeError::MissingReceiver {
                function: function.to_string(),
            }
            .into());
        };
        let target = self.find_or_create(receiver);
        if target.is_null() {
            return Err(InvokeError::UnresolvedReceiver {
                function: function.to_string(),
            }
            .into());
        }
        let mut objects = Vec::with_capacity(frame.args.len());
        for arg in &frame.args {
            objects.push(match arg {
                FrameArg::Object(object) => Some(self.find_or_create(*object)),
                _ => None,
            });
        }

        let Some(method) = self.resolve_method(def_id, function) else {
            fatal(format!(
                "compiled function {}.{} has no foreign method",
                type_name, function
            ));
        };

        // Marshal in
        bump(&self.thunk.calls);
        let mut scratch = ScratchBuffer::new(layout.size, layout.return_size(), &self.thunk);
        for ((slot, arg), object) in layout.params.iter().zip(&frame.args).zip(&objects) {
            match (arg, object) {
                (FrameArg::In(bytes), _) => scratch.slot_mut(slot).copy_from_slice(bytes),
                (FrameArg::InOut(bytes), _) => scratch.slot_mut(slot).copy_from_slice(bytes),
                (FrameArg::Object(_), Some(pointer)) => write_pointer(scratch.slot_mut(slot), *pointer),
                _ => {}
            }
        }

        // Invoke
        trace!("[thunk] {}.{} on {}", type_name, function, target);
        let mut exception = None;
        let status = {
            let ScratchBuffer { args, ret, .. } = &mut scratch;
            self.runtime.invoke_method(target, method, args, ret, &mut exception)
        };
        if !status.is_success() {
            let message = exception.unwrap_or_else(|| format!("{}.{} raised an exception", type_name, function));
            return Ok(self.raise(&format!("{}.{}", type_name, function), message));
        }

        // Marshal out
        for (slot, arg) in layout.params.iter().zip(frame.args.iter_mut()) {
            if let FrameArg::Out(storage) | FrameArg::InOut(storage) = arg {
                storage.copy_from_slice(scratch.slot(slot));
            }
        }
        if let (Some(slot), Some(storage)) = (&layout.return_value, frame.return_value.as_deref_mut()) {
            storage.copy_from_slice(&scratch.ret[..slot.size]);
        }
        Ok(InvokeOutcome::Completed)
    }

    /// Call a bound foreign delegate under the same exception policy as
    /// function calls
    pub fn invoke_delegate(&mut self, delegate: ForeignPtr) -> BridgeResult<InvokeOutcome> {
        self.check_alive()?;
        if delegate.is_null() {
            return Err(InvokeError::NullDelegate.into());
        }
        if self.is_hot_reloading() {
            bump(&self.thunk.skipped);
            return Ok(InvokeOutcome::SkippedDuringReload);
        }

        bump(&self.thunk.calls);
        trace!("[thunk] delegate {}", delegate);
        if self.runtime.invoke_delegate(delegate).is_success() {
            return Ok(InvokeOutcome::Completed);
        }
        let message = format!("delegate {} raised an exception", delegate);
        Ok(self.raise(&format!("delegate {}", delegate), message))
    }

    /// Snapshot of the invocation counters
    pub fn thunk_stats(&self) -> ThunkStats {
        self.thunk.snapshot()
    }

    fn raise(&self, callee: &str, message: String) -> InvokeOutcome {
        bump(&self.thunk.exceptions);
        self.host.raise_script_exception(&message);
        match self.config.exception_policy {
            ExceptionPolicy::Strict => fatal(format!("unhandled foreign exception in {}: {}", callee, message)),
            ExceptionPolicy::Lenient => {
                error!("[thunk] {} raised: {}", callee, message);
                InvokeOutcome::ExceptionHandled { message }
            }
        }
    }

    /// Method token for `function`, looked up once per definition and name
    fn resolve_method(&mut self, def_id: DefinitionId, function: &str) -> Option<ForeignPtr> {
        if let Some(method) = self
            .assemblies
            .get(def_id.assembly)?
            .cached_method(def_id.index, function)
        {
            return Some(method);
        }
        let type_token = self.ensure_type_token(def_id)?;
        let method = self
            .runtime
            .lookup_method(type_token, function)
            .and_then(ForeignPtr::non_null)?;
        self.assemblies
            .get_mut(def_id.assembly)?
            .cache_method(def_id.index, function, Handle::strong(method))
    }
}
