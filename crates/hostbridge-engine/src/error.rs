//! Error types for the bridge engine
//!
//! Every externally triggerable failure is one of the enums below and is
//! returned to the caller. Internal invariant violations never produce an
//! error value; they go through [`fatal`].

use std::fmt;
use std::path::PathBuf;

use hostbridge_sdk::{FieldName, MetadataError};
use thiserror::Error;

use crate::assembly::AssemblyId;
use crate::config::ConfigError;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Umbrella error for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Assembly lifecycle failure
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Type compilation failure
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Metadata parsing or attachment failure
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Configuration failure
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invocation marshaling failure
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// The context was shut down
    #[error("Bridge context has been shut down")]
    ShutDown,
}

/// Assembly load and unload errors
#[derive(Debug, Error)]
pub enum LoadError {
    /// Module file does not exist
    #[error("Assembly file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The foreign runtime refused to load the module
    #[error("Foreign runtime failed to load assembly '{assembly}' from {}", .path.display())]
    ModuleCallbackFailed {
        /// Assembly name
        assembly: String,
        /// Module path
        path: PathBuf,
    },

    /// No assembly with this id
    #[error("Unknown assembly id {0:?}")]
    UnknownAssembly(AssemblyId),

    /// No assembly with this name
    #[error("Unknown assembly '{0}'")]
    UnknownAssemblyName(String),

    /// An assembly with this name already exists
    #[error("Assembly '{0}' is already registered")]
    DuplicateAssembly(String),
}

/// Type compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// A dependency is not available yet; the definition stays queued
    #[error("Compilation of {type_name} deferred until {dependency} is available")]
    Deferred {
        /// Type being compiled
        type_name: FieldName,
        /// Missing dependency
        dependency: FieldName,
    },

    /// The definition is already being compiled further up the stack
    #[error("Dependency cycle detected at {type_name}")]
    Cycle {
        /// Type reached twice
        type_name: FieldName,
    },

    /// The owning assembly is not loaded
    #[error("Cannot compile {type_name}: assembly '{assembly}' is not loaded")]
    NotLoaded {
        /// Type being compiled
        type_name: FieldName,
        /// Owning assembly
        assembly: String,
    },

    /// The definition has no reflection data to compile from
    #[error("No reflection metadata attached to {0}")]
    MissingMetadata(FieldName),

    /// Neither a foreign definition nor a native type has this name
    #[error("Unknown type {0}")]
    UnknownType(FieldName),

    /// The definition id does not resolve
    #[error("Stale type definition reference")]
    StaleDefinition,

    /// The host refused to construct a class default object
    #[error("Host could not construct the default object of {0}")]
    DefaultObject(FieldName),
}

/// Invocation marshaling errors
#[derive(Debug, Error)]
pub enum InvokeError {
    /// The type has no function with this name
    #[error("{type_name} has no function '{function}'")]
    UnknownFunction {
        /// Owning type
        type_name: FieldName,
        /// Requested function
        function: String,
    },

    /// Wrong number of arguments
    #[error("'{function}' takes {expected} arguments, {found} supplied")]
    ArityMismatch {
        /// Function name
        function: String,
        /// Parameters in the frame layout
        expected: usize,
        /// Arguments supplied
        found: usize,
    },

    /// Argument storage does not match the parameter size
    #[error("'{function}' parameter '{parameter}' is {expected} bytes, storage is {found} bytes")]
    SizeMismatch {
        /// Function name
        function: String,
        /// Parameter name (`ReturnValue` for the return slot)
        parameter: String,
        /// Size from the frame layout
        expected: usize,
        /// Size supplied
        found: usize,
    },

    /// Argument passing mode does not match the parameter flags
    #[error("'{function}' parameter '{parameter}' was passed as {passed}")]
    ArgumentKind {
        /// Function name
        function: String,
        /// Parameter name
        parameter: String,
        /// How it was passed
        passed: &'static str,
    },

    /// Instance call without a receiver
    #[error("'{function}' is an instance function and needs a receiver")]
    MissingReceiver {
        /// Function name
        function: String,
    },

    /// The receiver has no foreign counterpart
    #[error("Receiver of '{function}' has no foreign counterpart")]
    UnresolvedReceiver {
        /// Function name
        function: String,
    },

    /// The type is native and has no foreign-backed functions
    #[error("{0} is a native type and has no foreign functions")]
    NotForeign(FieldName),

    /// Delegate invocation without a bound delegate
    #[error("Cannot invoke an unbound delegate")]
    NullDelegate,
}

/// Report an internal invariant violation and abort the current operation.
///
/// Logged at error level, then panics with a `fatal bridge error:` message.
pub fn fatal(message: impl fmt::Display) -> ! {
    log::error!("fatal bridge error: {}", message);
    panic!("fatal bridge error: {}", message)
}
