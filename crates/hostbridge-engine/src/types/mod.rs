//! Native type objects
//!
//! A `TypeObject` is the live native type a definition compiles into. It is
//! created once and then purged and rebuilt in place on every recompile:
//! call sites and other types hold its `TypeObjectId`, which never changes.
//!
//! The `TypeArena` owns every type object, foreign-compiled and host-native
//! alike, and is the global lookup table for finished types.

pub mod layout;

use rustc_hash::FxHashMap;

use hostbridge_sdk::{
    EnumItem, FieldName, FunctionFlags, NativeObject, PropertyFlags, PropertyType, TypeFlags,
    TypeKind, TypeSummary,
};

use crate::assembly::DefinitionId;
pub use layout::{FrameLayout, MarshalKind, ParamSlot, RecordLayout};

/// Stable index of a type object in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeObjectId(u32);

/// Where a type object's structure comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOrigin {
    /// Compiled from foreign reflection metadata
    Foreign(DefinitionId),
    /// Pre-existing on the host
    Native,
}

/// A compiled property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyObject {
    /// Name
    pub name: String,
    /// Type
    pub ty: PropertyType,
    /// Flags
    pub flags: PropertyFlags,
    /// Offset in the instance
    pub offset: usize,
    /// Size in bytes
    pub size: usize,
}

/// A compiled function with its precomputed call frame
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionObject {
    /// Name
    pub name: String,
    /// Flags (`NATIVE` for foreign-backed functions)
    pub flags: FunctionFlags,
    /// Argument layout
    pub layout: FrameLayout,
}

impl FunctionObject {
    /// Whether the function is called without an instance
    pub fn is_static(&self) -> bool {
        self.flags.contains(FunctionFlags::STATIC)
    }
}

/// A live native type
#[derive(Debug, Clone)]
pub struct TypeObject {
    /// Type identity
    pub field_name: FieldName,
    /// Namespace-derived package that owns the type
    pub outer: String,
    /// Kind
    pub kind: TypeKind,
    /// Structure source
    pub origin: TypeOrigin,
    /// Parent type
    pub parent: Option<TypeObjectId>,
    /// Implemented interfaces
    pub interfaces: Vec<TypeObjectId>,
    /// Properties in declaration order
    pub properties: Vec<PropertyObject>,
    /// Functions in declaration order
    pub functions: Vec<FunctionObject>,
    /// Enum items
    pub enum_items: Vec<EnumItem>,
    /// Flags
    pub flags: TypeFlags,
    /// Annotations
    pub annotations: Vec<(String, String)>,
    /// Instance size
    pub size: usize,
    /// Instance alignment
    pub alignment: usize,
    /// Class default instance
    pub default_object: Option<NativeObject>,
    /// Number of completed builds
    pub generation: u32,
}

impl TypeObject {
    fn new(field_name: FieldName, kind: TypeKind, origin: TypeOrigin) -> Self {
        TypeObject {
            outer: package_for(&field_name),
            field_name,
            kind,
            origin,
            parent: None,
            interfaces: Vec::new(),
            properties: Vec::new(),
            functions: Vec::new(),
            enum_items: Vec::new(),
            flags: TypeFlags::empty(),
            annotations: Vec::new(),
            size: 0,
            alignment: 1,
            default_object: None,
            generation: 0,
        }
    }

    /// Release every child and reset the layout; identity and generation stay
    pub fn purge(&mut self) {
        self.parent = None;
        self.interfaces.clear();
        self.properties.clear();
        self.functions.clear();
        self.enum_items.clear();
        self.flags = TypeFlags::empty();
        self.annotations.clear();
        self.size = 0;
        self.alignment = 1;
        self.default_object = None;
    }

    /// Object path (`/Script/Namespace.Name`)
    pub fn path(&self) -> String {
        format!("{}.{}", self.outer, self.field_name.name())
    }

    /// Find a function by name
    pub fn function(&self, name: &str) -> Option<&FunctionObject> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Find a property by name
    pub fn property(&self, name: &str) -> Option<&PropertyObject> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Summary for the host's lookup tables
    pub fn summary(&self, parent: Option<FieldName>) -> TypeSummary {
        TypeSummary {
            field_name: self.field_name.clone(),
            kind: self.kind,
            parent,
            size: self.size,
            alignment: self.alignment,
            property_count: self.properties.len(),
            function_count: self.functions.len(),
            generation: self.generation,
        }
    }
}

/// Package path derived from a namespace
pub fn package_for(name: &FieldName) -> String {
    if name.namespace().is_empty() {
        "/Script".to_string()
    } else {
        format!("/Script/{}", name.namespace())
    }
}

/// Owner of every native type object
#[derive(Debug, Default)]
pub struct TypeArena {
    types: Vec<TypeObject>,
    by_name: FxHashMap<FieldName, TypeObjectId>,
    by_path: FxHashMap<String, TypeObjectId>,
}

impl TypeArena {
    /// Create an empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a type object, or return the existing one for `field_name`
    pub fn create(&mut self, field_name: FieldName, kind: TypeKind, origin: TypeOrigin) -> TypeObjectId {
        if let Some(&id) = self.by_name.get(&field_name) {
            let existing = &mut self.types[id.0 as usize];
            existing.kind = kind;
            existing.origin = origin;
            return id;
        }
        let id = TypeObjectId(self.types.len() as u32);
        self.by_name.insert(field_name.clone(), id);
        self.types.push(TypeObject::new(field_name, kind, origin));
        id
    }

    /// Get a type object
    pub fn get(&self, id: TypeObjectId) -> &TypeObject {
        &self.types[id.0 as usize]
    }

    /// Get a type object mutably
    pub fn get_mut(&mut self, id: TypeObjectId) -> &mut TypeObject {
        &mut self.types[id.0 as usize]
    }

    /// Find a type object by identity, published or not
    pub fn find_by_name(&self, name: &FieldName) -> Option<TypeObjectId> {
        self.by_name.get(name).copied()
    }

    /// Publish a finished type under its object path
    pub fn publish(&mut self, id: TypeObjectId) {
        let path = self.get(id).path();
        self.by_path.insert(path, id);
    }

    /// Check whether a type has been published
    pub fn is_published(&self, id: TypeObjectId) -> bool {
        self.by_path.get(&self.get(id).path()) == Some(&id)
    }

    /// Look up a published type by object path
    pub fn find_type(&self, path: &str) -> Option<&TypeObject> {
        self.by_path.get(path).map(|&id| self.get(id))
    }

    /// Whether `id` is `ancestor` or derives from it
    pub fn is_child_of(&self, id: TypeObjectId, ancestor: TypeObjectId) -> bool {
        let mut current = Some(id);
        while let Some(ty) = current {
            if ty == ancestor {
                return true;
            }
            current = self.get(ty).parent;
        }
        false
    }

    /// Number of type objects
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if the arena is empty
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
