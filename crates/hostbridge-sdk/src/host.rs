//! NativeHost trait - the host's object model as seen by the bridge
//!
//! The bridge never walks host memory itself. Everything it needs to know
//! about native objects and native types goes through this trait, and every
//! type the bridge compiles is announced back through `register_type`.

use crate::metadata::{FieldName, TypeKind};
use crate::object::{NativeObject, ObjectId};

/// Layout facts about a type that already exists on the native side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTypeInfo {
    /// Kind of the native type
    pub kind: TypeKind,
    /// Instance size in bytes
    pub size: usize,
    /// Instance alignment in bytes
    pub alignment: usize,
    /// Parent type, if any
    pub parent: Option<FieldName>,
    /// Host package the type lives in
    pub package: String,
}

/// Summary of a finished type, handed to the host's global lookup tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSummary {
    /// Type identity
    pub field_name: FieldName,
    /// Kind of type
    pub kind: TypeKind,
    /// Parent type, if any
    pub parent: Option<FieldName>,
    /// Instance size in bytes
    pub size: usize,
    /// Instance alignment in bytes
    pub alignment: usize,
    /// Number of properties
    pub property_count: usize,
    /// Number of functions
    pub function_count: usize,
    /// How many times the type object has been rebuilt in place
    pub generation: u32,
}

/// Abstract host object model.
///
/// The engine holds one boxed implementation. Methods take `&self`; the
/// bridge only calls them from the host's main thread.
pub trait NativeHost {
    // ========================================================================
    // Objects
    // ========================================================================

    /// Address-stable unique id of `object`, available even once destroyed
    fn object_id(&self, object: NativeObject) -> ObjectId;

    /// Check whether `object` is alive and usable
    fn is_valid(&self, object: NativeObject) -> bool;

    /// Concrete class of `object`
    fn class_of(&self, object: NativeObject) -> Option<FieldName>;

    // ========================================================================
    // Types
    // ========================================================================

    /// Parent of a class known to the host
    fn parent_class(&self, class: &FieldName) -> Option<FieldName>;

    /// Whether `class` is a dynamically generated intermediate type
    /// (neither foreign-defined nor part of the native bindings)
    fn is_generated_class(&self, class: &FieldName) -> bool;

    /// Describe a pre-existing native type
    fn describe_native_type(&self, name: &FieldName) -> Option<NativeTypeInfo>;

    /// Construct the default instance of a class compiled by the bridge
    fn construct_default_object(&self, class: &FieldName) -> Option<NativeObject>;

    /// Publish a finished type to the host's global type-lookup tables
    fn register_type(&self, summary: &TypeSummary);

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Surface a foreign exception through the host's script-exception channel
    fn raise_script_exception(&self, message: &str);
}
