//! HostBridge SDK - boundary contract for the dual-runtime bridge
//!
//! This crate holds the types every participant of the bridge agrees on
//! without depending on the engine itself:
//! - **Handles**: `ForeignPtr`, `HandleKind`, `Handle` (owned foreign references)
//! - **Objects**: `NativeObject`, `ObjectId` (host object identity)
//! - **Callbacks**: the `ForeignRuntime` trait (the fixed callback table)
//! - **Host**: the `NativeHost` trait (the host's object model)
//! - **Metadata**: the reflection metadata document and its normalized form
//!
//! # Example
//!
//! ```ignore
//! use hostbridge_sdk::{Handle, HandleKind, ForeignPtr};
//!
//! let mut handle = Handle::new(ForeignPtr::from_addr(0x1000), HandleKind::Strong);
//! handle.dispose(&runtime, None);
//! assert!(handle.is_null());
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod handle;
pub mod host;
pub mod metadata;
pub mod object;
pub mod runtime;

pub use error::{MetadataError, MetadataResult};
pub use handle::{ForeignPtr, Handle, HandleKind};
pub use host::{NativeHost, NativeTypeInfo, TypeSummary};
pub use metadata::{
    EnumItem, FieldName, FunctionDescriptor, FunctionFlags, FunctionMetaData, MetaDataEntry,
    MetadataDocument, PropertyDescriptor, PropertyFlags, PropertyMetaData, PropertyType,
    TypeDescriptor, TypeFlags, TypeKind, TypeMetaData, TypeRef,
};
pub use object::{NativeObject, ObjectId};
pub use runtime::{ForeignRuntime, InvokeStatus};
