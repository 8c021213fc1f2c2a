//! HostBridge engine
//!
//! Couples a native host's object model with a foreign managed runtime:
//! - Handle slabs: every foreign reference is owned by the assembly that
//!   allocated it and released exactly once
//! - Object identity bridge: one foreign counterpart per live native object,
//!   replaced after reloads
//! - Assembly and type definition registry: lazily compiled definitions
//!   with deferral, cycle detection and dependent invalidation
//! - Type compiler dispatch: per-kind compilers producing native type
//!   objects with precomputed layouts
//! - Invocation thunk: marshals calls, outputs and exceptions across the
//!   boundary
//!
//! Everything hangs off an explicitly constructed [`BridgeContext`].

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod assembly;
pub mod compiler;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod handles;
pub mod identity;
pub mod thunk;
pub mod types;

pub use assembly::{
    Assembly, AssemblyId, AssemblyRegistry, AssemblyState, DefinitionId, DefinitionOrigin,
    DefinitionState, TypeDefinition,
};
pub use compiler::TypeCompiler;
pub use config::{BridgeConfig, ConfigError, ExceptionPolicy, EXCEPTION_POLICY_ENV};
pub use context::BridgeContext;
pub use error::{fatal, BridgeError, BridgeResult, CompileError, InvokeError, LoadError};
pub use events::{BridgeEvent, DeletionPort, RegistrationPort, TypeRegistration};
pub use handles::{HandlePurpose, HandleSlab, HandleSlot};
pub use identity::IdentityBridge;
pub use thunk::{FrameArg, InvokeOutcome, NativeFrame, ThunkStats};
pub use types::{
    FrameLayout, FunctionObject, MarshalKind, ParamSlot, PropertyObject, RecordLayout, TypeArena,
    TypeObject, TypeObjectId, TypeOrigin,
};
