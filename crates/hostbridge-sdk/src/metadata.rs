//! Reflection metadata model
//!
//! The foreign side describes its types with a JSON document produced by an
//! external generator. This module deserializes the fields the bridge
//! consumes (`MetadataDocument`, `TypeMetaData`) and normalizes each type
//! entry into a `TypeDescriptor`, which is what type definitions hold.
//!
//! Change detection is textual: a descriptor remembers the raw serialized
//! form it was built from, and a re-registration with byte-identical text is
//! structurally unchanged.

use std::collections::HashSet;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, MetadataResult};

// ============================================================================
// Type Identity
// ============================================================================

/// Identity of a type: its namespace plus its field name.
///
/// A type's identity cannot change in place; metadata for a different
/// `FieldName` is a different type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldName {
    namespace: String,
    name: String,
}

impl FieldName {
    /// Create a field name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        FieldName {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a fully qualified name, splitting at the last `.`
    pub fn parse(full_name: &str) -> Self {
        match full_name.rsplit_once('.') {
            Some((namespace, name)) => FieldName::new(namespace, name),
            None => FieldName::new("", full_name),
        }
    }

    /// Namespace part (may be empty)
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Unqualified name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully qualified name (`Namespace.Name`, or `Name` without namespace)
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// Kind of type a definition compiles into
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    /// Reference type with a default instance
    Class = 0,
    /// Value type
    Struct = 1,
    /// Enumeration
    Enum = 2,
    /// Interface
    Interface = 3,
    /// Delegate signature
    DelegateSignature = 4,
}

impl TypeKind {
    /// Decode from the C ABI representation
    pub fn from_u8(code: u8) -> MetadataResult<Self> {
        match code {
            0 => Ok(TypeKind::Class),
            1 => Ok(TypeKind::Struct),
            2 => Ok(TypeKind::Enum),
            3 => Ok(TypeKind::Interface),
            4 => Ok(TypeKind::DelegateSignature),
            other => Err(MetadataError::UnknownKind(other)),
        }
    }
}

// ============================================================================
// Flags
// ============================================================================

bitflags! {
    /// Type-level flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u64 {
        /// Cannot be instantiated directly
        const ABSTRACT = 1 << 0;
        /// Cannot be derived from
        const SEALED = 1 << 1;
        /// Scheduled for removal
        const DEPRECATED = 1 << 2;
        /// Usable as a variable type in the host's scripting layer
        const BLUEPRINT_TYPE = 1 << 3;
        /// Instances are never persisted
        const TRANSIENT = 1 << 4;
    }
}

bitflags! {
    /// Property and parameter flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PropertyFlags: u64 {
        /// Editable in the host editor
        const EDITABLE = 1 << 0;
        /// Read-only to scripts
        const READ_ONLY = 1 << 1;
        /// Never persisted
        const TRANSIENT = 1 << 2;
        /// Parameter is written by the callee
        const OUT_PARAM = 1 << 3;
        /// Parameter is passed by reference (read and written)
        const REF_PARAM = 1 << 4;
        /// Parameter is the return value
        const RETURN_PARAM = 1 << 5;
        /// Parameter is const
        const CONST_PARAM = 1 << 6;
    }
}

bitflags! {
    /// Function flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FunctionFlags: u64 {
        /// Publicly callable
        const PUBLIC = 1 << 0;
        /// Called without an instance
        const STATIC = 1 << 1;
        /// Does not mutate the instance
        const CONST = 1 << 2;
        /// Overridable event
        const EVENT = 1 << 3;
        /// Body is a native slot (set by the bridge on foreign-backed functions)
        const NATIVE = 1 << 4;
        /// Has at least one output parameter
        const HAS_OUT_PARAMS = 1 << 5;
        /// Callable from the host's scripting layer
        const BLUEPRINT_CALLABLE = 1 << 6;
    }
}

impl PropertyFlags {
    /// Output parameter that the caller does not pre-fill
    pub fn is_write_only_out(self) -> bool {
        self.contains(PropertyFlags::OUT_PARAM) && !self.contains(PropertyFlags::REF_PARAM)
    }

    /// Parameter whose value is copied back to the caller after the call
    pub fn is_output(self) -> bool {
        self.intersects(PropertyFlags::OUT_PARAM | PropertyFlags::REF_PARAM)
    }
}

// ============================================================================
// Wire Model
// ============================================================================

/// Reference to another type by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TypeRef {
    /// Type name
    pub name: String,
    /// Namespace
    #[serde(default)]
    pub namespace: String,
    /// Assembly the type lives in, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assembly_name: Option<String>,
}

impl TypeRef {
    /// Create a type reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeRef {
            name: name.into(),
            namespace: namespace.into(),
            assembly_name: None,
        }
    }

    /// Identity of the referenced type
    pub fn field_name(&self) -> FieldName {
        FieldName::new(self.namespace.clone(), self.name.clone())
    }
}

impl From<&FieldName> for TypeRef {
    fn from(name: &FieldName) -> Self {
        TypeRef::new(name.namespace(), name.name())
    }
}

/// Type of a property or parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "PropertyType")]
pub enum PropertyType {
    /// Boolean (1 byte)
    Bool,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    Byte,
    /// Unsigned 16-bit integer
    UInt16,
    /// Unsigned 32-bit integer
    UInt32,
    /// Unsigned 64-bit integer
    UInt64,
    /// 32-bit float
    Float,
    /// 64-bit float
    Double,
    /// Host string
    String,
    /// Host interned name
    Name,
    /// Reference to a native object
    Object {
        /// Class of the referenced object
        #[serde(rename = "InnerType")]
        inner: TypeRef,
    },
    /// Reference to an object through an interface
    Interface {
        /// Interface type
        #[serde(rename = "InnerType")]
        inner: TypeRef,
    },
    /// Struct stored by value
    Struct {
        /// Struct type
        #[serde(rename = "InnerType")]
        inner: TypeRef,
    },
    /// Enum stored by value
    Enum {
        /// Enum type
        #[serde(rename = "InnerType")]
        inner: TypeRef,
    },
    /// Delegate bound to a signature
    Delegate {
        /// Delegate signature type
        #[serde(rename = "InnerType")]
        inner: TypeRef,
    },
    /// Dynamic array
    Array {
        /// Element type
        #[serde(rename = "ElementType")]
        element: Box<PropertyType>,
    },
}

impl PropertyType {
    /// Type stored inline whose layout must be compiled before this one
    pub fn by_value_dependency(&self) -> Option<FieldName> {
        match self {
            PropertyType::Struct { inner } | PropertyType::Enum { inner } => {
                Some(inner.field_name())
            }
            _ => None,
        }
    }

    /// Whether values are references to native objects
    pub fn is_object_reference(&self) -> bool {
        matches!(
            self,
            PropertyType::Object { .. } | PropertyType::Interface { .. }
        )
    }
}

/// Property or parameter entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PropertyMetaData {
    /// Property name
    pub name: String,
    /// Property type
    #[serde(rename = "Type")]
    pub ty: PropertyType,
    /// Raw `PropertyFlags` bits
    #[serde(default)]
    pub flags: u64,
}

impl PropertyMetaData {
    /// Create a property entry
    pub fn new(name: impl Into<String>, ty: PropertyType) -> Self {
        PropertyMetaData {
            name: name.into(),
            ty,
            flags: 0,
        }
    }

    /// Set flags
    pub fn with_flags(mut self, flags: PropertyFlags) -> Self {
        self.flags = flags.bits();
        self
    }
}

/// Function entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FunctionMetaData {
    /// Function name
    pub name: String,
    /// Raw `FunctionFlags` bits
    #[serde(default)]
    pub flags: u64,
    /// Parameters in declaration order
    #[serde(default)]
    pub parameters: Vec<PropertyMetaData>,
    /// Return type, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<PropertyType>,
}

impl FunctionMetaData {
    /// Create a function entry with no parameters
    pub fn new(name: impl Into<String>) -> Self {
        FunctionMetaData {
            name: name.into(),
            flags: FunctionFlags::PUBLIC.bits(),
            parameters: Vec::new(),
            return_type: None,
        }
    }

    /// Set flags
    pub fn with_flags(mut self, flags: FunctionFlags) -> Self {
        self.flags = flags.bits();
        self
    }

    /// Append an input parameter
    pub fn param(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.parameters.push(PropertyMetaData::new(name, ty));
        self
    }

    /// Append a write-only output parameter
    pub fn out_param(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.parameters
            .push(PropertyMetaData::new(name, ty).with_flags(PropertyFlags::OUT_PARAM));
        self.flags |= FunctionFlags::HAS_OUT_PARAMS.bits();
        self
    }

    /// Append a by-reference parameter
    pub fn ref_param(mut self, name: impl Into<String>, ty: PropertyType) -> Self {
        self.parameters.push(
            PropertyMetaData::new(name, ty)
                .with_flags(PropertyFlags::OUT_PARAM | PropertyFlags::REF_PARAM),
        );
        self.flags |= FunctionFlags::HAS_OUT_PARAMS.bits();
        self
    }

    /// Set the return type
    pub fn returns(mut self, ty: PropertyType) -> Self {
        self.return_type = Some(ty);
        self
    }
}

/// Free-form annotation attached to a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetaDataEntry {
    /// Annotation key
    pub key: String,
    /// Annotation value
    #[serde(default)]
    pub value: String,
}

/// Enum item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumItem {
    /// Item name
    pub name: String,
    /// Item value
    pub value: i64,
}

/// Metadata for one type, as produced by the foreign side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TypeMetaData {
    /// Type name
    pub name: String,
    /// Namespace
    #[serde(default)]
    pub namespace: String,
    /// Parent type (classes, structs, interfaces)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ref: Option<TypeRef>,
    /// Implemented interfaces
    #[serde(default)]
    pub interfaces: Vec<TypeRef>,
    /// Properties in declaration order
    #[serde(default)]
    pub properties: Vec<PropertyMetaData>,
    /// Functions in declaration order
    #[serde(default)]
    pub functions: Vec<FunctionMetaData>,
    /// Annotations
    #[serde(default)]
    pub meta_data_entries: Vec<MetaDataEntry>,
    /// Raw `TypeFlags` bits
    #[serde(default)]
    pub flags: u64,
    /// Enum items
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<EnumItem>,
    /// Delegate signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<FunctionMetaData>,
    /// Type whose surface this type was generated to wrap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_for: Option<TypeRef>,
}

impl TypeMetaData {
    /// Create an empty entry
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TypeMetaData {
            name: name.into(),
            namespace: namespace.into(),
            parent_ref: None,
            interfaces: Vec::new(),
            properties: Vec::new(),
            functions: Vec::new(),
            meta_data_entries: Vec::new(),
            flags: 0,
            items: Vec::new(),
            signature: None,
            generated_for: None,
        }
    }

    /// Identity of the described type
    pub fn field_name(&self) -> FieldName {
        FieldName::new(self.namespace.clone(), self.name.clone())
    }

    /// Set the parent type
    pub fn with_parent(mut self, parent: TypeRef) -> Self {
        self.parent_ref = Some(parent);
        self
    }

    /// Add an implemented interface
    pub fn with_interface(mut self, interface: TypeRef) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Add a property
    pub fn with_property(mut self, property: PropertyMetaData) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a function
    pub fn with_function(mut self, function: FunctionMetaData) -> Self {
        self.functions.push(function);
        self
    }

    /// Add an enum item
    pub fn with_item(mut self, name: impl Into<String>, value: i64) -> Self {
        self.items.push(EnumItem {
            name: name.into(),
            value,
        });
        self
    }

    /// Set the delegate signature
    pub fn with_signature(mut self, signature: FunctionMetaData) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Add an annotation
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_data_entries.push(MetaDataEntry {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Set flags
    pub fn with_flags(mut self, flags: TypeFlags) -> Self {
        self.flags = flags.bits();
        self
    }

    /// Mark as generated to wrap another type's surface
    pub fn generated_for(mut self, owner: TypeRef) -> Self {
        self.generated_for = Some(owner);
        self
    }

    /// Serialize to the raw form used for change detection
    pub fn to_json(&self) -> MetadataResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Full metadata document for one assembly
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetadataDocument {
    /// Classes
    #[serde(default)]
    pub class_meta_data: Vec<TypeMetaData>,
    /// Structs
    #[serde(default)]
    pub struct_meta_data: Vec<TypeMetaData>,
    /// Enums
    #[serde(default)]
    pub enum_meta_data: Vec<TypeMetaData>,
    /// Interfaces
    #[serde(default)]
    pub interfaces_meta_data: Vec<TypeMetaData>,
    /// Delegate signatures
    #[serde(default)]
    pub delegate_meta_data: Vec<TypeMetaData>,
}

impl MetadataDocument {
    /// Parse a document
    pub fn from_json(json: &str) -> MetadataResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// All entries with their kind, structs and enums first
    pub fn entries(&self) -> impl Iterator<Item = (TypeKind, &TypeMetaData)> {
        fn tagged(
            kind: TypeKind,
            entries: &[TypeMetaData],
        ) -> impl Iterator<Item = (TypeKind, &TypeMetaData)> {
            entries.iter().map(move |entry| (kind, entry))
        }
        tagged(TypeKind::Enum, &self.enum_meta_data)
            .chain(tagged(TypeKind::Struct, &self.struct_meta_data))
            .chain(tagged(TypeKind::DelegateSignature, &self.delegate_meta_data))
            .chain(tagged(TypeKind::Interface, &self.interfaces_meta_data))
            .chain(tagged(TypeKind::Class, &self.class_meta_data))
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.class_meta_data.len()
            + self.struct_meta_data.len()
            + self.enum_meta_data.len()
            + self.interfaces_meta_data.len()
            + self.delegate_meta_data.len()
    }

    /// Check if the document has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Normalized Descriptor
// ============================================================================

/// Normalized property or parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDescriptor {
    /// Name
    pub name: String,
    /// Type
    pub ty: PropertyType,
    /// Flags
    pub flags: PropertyFlags,
}

/// Normalized function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    /// Name
    pub name: String,
    /// Flags
    pub flags: FunctionFlags,
    /// Parameters in declaration order
    pub parameters: Vec<PropertyDescriptor>,
    /// Return type, if any
    pub return_type: Option<PropertyType>,
}

impl FunctionDescriptor {
    fn from_metadata(meta: &FunctionMetaData) -> Self {
        FunctionDescriptor {
            name: meta.name.clone(),
            flags: FunctionFlags::from_bits_truncate(meta.flags),
            parameters: meta.parameters.iter().map(PropertyDescriptor::from_metadata).collect(),
            return_type: meta.return_type.clone(),
        }
    }

    /// Whether the function is called without an instance
    pub fn is_static(&self) -> bool {
        self.flags.contains(FunctionFlags::STATIC)
    }
}

impl PropertyDescriptor {
    fn from_metadata(meta: &PropertyMetaData) -> Self {
        PropertyDescriptor {
            name: meta.name.clone(),
            ty: meta.ty.clone(),
            flags: PropertyFlags::from_bits_truncate(meta.flags),
        }
    }
}

/// Normalized, immutable reflection metadata for one type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    /// Type identity
    pub field_name: FieldName,
    /// Kind of type
    pub kind: TypeKind,
    /// Parent type
    pub parent: Option<FieldName>,
    /// Implemented interfaces
    pub interfaces: Vec<FieldName>,
    /// Properties in declaration order
    pub properties: Vec<PropertyDescriptor>,
    /// Functions in declaration order (a delegate's signature is its only function)
    pub functions: Vec<FunctionDescriptor>,
    /// Enum items
    pub enum_items: Vec<EnumItem>,
    /// Flags
    pub flags: TypeFlags,
    /// Annotations in declaration order
    pub annotations: Vec<(String, String)>,
    /// Type whose surface this type wraps
    pub generated_for: Option<FieldName>,
    raw: String,
}

impl TypeDescriptor {
    /// Build from the raw JSON of one type entry, keeping the text verbatim
    /// for change detection
    pub fn from_json(kind: TypeKind, raw: &str) -> MetadataResult<Self> {
        let meta: TypeMetaData = serde_json::from_str(raw)?;
        Self::normalize(kind, &meta, raw.to_string())
    }

    /// Build from a deserialized entry; the raw form is its re-serialization
    pub fn from_metadata(kind: TypeKind, meta: &TypeMetaData) -> MetadataResult<Self> {
        let raw = meta.to_json()?;
        Self::normalize(kind, meta, raw)
    }

    fn normalize(kind: TypeKind, meta: &TypeMetaData, raw: String) -> MetadataResult<Self> {
        if meta.name.trim().is_empty() {
            return Err(MetadataError::MissingField {
                field: "Name",
                owner: format!("{:?} entry in namespace '{}'", kind, meta.namespace),
            });
        }
        let field_name = meta.field_name();

        check_unique("property", meta.properties.iter().map(|p| p.name.as_str()), &field_name)?;
        check_unique("function", meta.functions.iter().map(|f| f.name.as_str()), &field_name)?;
        check_unique("enum item", meta.items.iter().map(|i| i.name.as_str()), &field_name)?;

        let mut functions: Vec<FunctionDescriptor> =
            meta.functions.iter().map(FunctionDescriptor::from_metadata).collect();
        if kind == TypeKind::DelegateSignature {
            functions = match (&meta.signature, functions.len()) {
                (Some(signature), _) => vec![FunctionDescriptor::from_metadata(signature)],
                (None, 1) => functions,
                (None, _) => {
                    return Err(MetadataError::MissingField {
                        field: "Signature",
                        owner: field_name.to_string(),
                    })
                }
            };
        }

        Ok(TypeDescriptor {
            kind,
            parent: meta.parent_ref.as_ref().map(TypeRef::field_name),
            interfaces: meta.interfaces.iter().map(TypeRef::field_name).collect(),
            properties: meta.properties.iter().map(PropertyDescriptor::from_metadata).collect(),
            functions,
            enum_items: meta.items.clone(),
            flags: TypeFlags::from_bits_truncate(meta.flags),
            annotations: meta
                .meta_data_entries
                .iter()
                .map(|e| (e.key.clone(), e.value.clone()))
                .collect(),
            generated_for: meta.generated_for.as_ref().map(TypeRef::field_name),
            field_name,
            raw,
        })
    }

    /// Raw serialized form used for change detection
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Exact textual comparison against another raw form
    pub fn is_structurally_identical(&self, raw: &str) -> bool {
        self.raw == raw
    }

    /// Look up an annotation
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Find a function by name
    pub fn function(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Types this one structurally depends on: parent, interfaces, the type
    /// it was generated for, and every struct or enum stored by value in a
    /// property or signature. Self references are excluded.
    pub fn dependencies(&self) -> Vec<FieldName> {
        let mut seen = HashSet::new();
        let mut deps = Vec::new();
        let mut push = |name: FieldName| {
            if name != self.field_name && seen.insert(name.clone()) {
                deps.push(name);
            }
        };

        if let Some(parent) = &self.parent {
            push(parent.clone());
        }
        for interface in &self.interfaces {
            push(interface.clone());
        }
        if let Some(owner) = &self.generated_for {
            push(owner.clone());
        }
        for property in &self.properties {
            if let Some(dep) = property.ty.by_value_dependency() {
                push(dep);
            }
        }
        for function in &self.functions {
            let params = function.parameters.iter().map(|p| &p.ty);
            for ty in params.chain(function.return_type.iter()) {
                if let Some(dep) = ty.by_value_dependency() {
                    push(dep);
                }
            }
        }
        deps
    }
}

fn check_unique<'a>(
    member: &'static str,
    names: impl Iterator<Item = &'a str>,
    owner: &FieldName,
) -> MetadataResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(MetadataError::Duplicate {
                member,
                name: name.to_string(),
                owner: owner.clone(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
