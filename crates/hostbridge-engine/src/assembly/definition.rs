//! Type definitions and their compilation state

use std::fmt;

use hostbridge_sdk::{FieldName, MetadataError, MetadataResult, TypeDescriptor, TypeKind};

use super::AssemblyId;
use crate::types::TypeObjectId;

/// Stable reference to a definition: owning assembly plus arena index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefinitionId {
    /// Owning assembly
    pub assembly: AssemblyId,
    /// Index in the assembly's definition arena
    pub index: u32,
}

/// Compilation state of a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefinitionState {
    /// The native type matches the attached metadata
    UpToDate,
    /// Metadata changed; a structural rebuild is required
    NeedsRebuild,
    /// Only the foreign token bindings need refreshing
    NeedsUpdate,
    /// Being compiled further up the stack
    CurrentlyBuilding,
}

impl fmt::Display for DefinitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DefinitionState::UpToDate => "up to date",
            DefinitionState::NeedsRebuild => "needs rebuild",
            DefinitionState::NeedsUpdate => "needs update",
            DefinitionState::CurrentlyBuilding => "currently building",
        };
        f.write_str(name)
    }
}

/// Where a definition's type comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionOrigin {
    /// Defined by foreign metadata
    Foreign,
    /// Wraps a pre-existing native type
    Native,
}

/// Live binding between reflection metadata and a native type object
#[derive(Debug)]
pub struct TypeDefinition {
    id: DefinitionId,
    field_name: FieldName,
    kind: TypeKind,
    origin: DefinitionOrigin,
    state: DefinitionState,
    descriptor: Option<TypeDescriptor>,
    native_type: TypeObjectId,
}

impl TypeDefinition {
    /// Definition created from foreign metadata; starts in `NeedsRebuild`
    pub fn foreign(id: DefinitionId, descriptor: TypeDescriptor, native_type: TypeObjectId) -> Self {
        TypeDefinition {
            id,
            field_name: descriptor.field_name.clone(),
            kind: descriptor.kind,
            origin: DefinitionOrigin::Foreign,
            state: DefinitionState::NeedsRebuild,
            descriptor: Some(descriptor),
            native_type,
        }
    }

    /// Definition wrapping a native type; starts `UpToDate` with no metadata
    pub fn native(
        id: DefinitionId,
        field_name: FieldName,
        kind: TypeKind,
        native_type: TypeObjectId,
    ) -> Self {
        TypeDefinition {
            id,
            field_name,
            kind,
            origin: DefinitionOrigin::Native,
            state: DefinitionState::UpToDate,
            descriptor: None,
            native_type,
        }
    }

    /// Definition id
    pub fn id(&self) -> DefinitionId {
        self.id
    }

    /// Type identity
    pub fn field_name(&self) -> &FieldName {
        &self.field_name
    }

    /// Kind
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Origin
    pub fn origin(&self) -> DefinitionOrigin {
        self.origin
    }

    /// Compilation state
    pub fn state(&self) -> DefinitionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: DefinitionState) {
        self.state = state;
    }

    /// Attached metadata
    pub fn descriptor(&self) -> Option<&TypeDescriptor> {
        self.descriptor.as_ref()
    }

    /// Compiled native type object
    pub fn native_type(&self) -> TypeObjectId {
        self.native_type
    }

    /// Replace the attached metadata.
    ///
    /// The new metadata must describe the same type with the same kind; a
    /// type's identity cannot be renamed in place.
    pub fn set_reflection_data(&mut self, descriptor: TypeDescriptor) -> MetadataResult<()> {
        if descriptor.field_name != self.field_name {
            return Err(MetadataError::NameMismatch {
                expected: self.field_name.clone(),
                found: descriptor.field_name,
            });
        }
        if descriptor.kind != self.kind {
            return Err(MetadataError::KindChanged {
                name: self.field_name.clone(),
                previous: self.kind,
                requested: descriptor.kind,
            });
        }
        self.descriptor = Some(descriptor);
        self.origin = DefinitionOrigin::Foreign;
        Ok(())
    }

    /// Whether `raw` matches the attached metadata byte for byte
    pub fn is_structurally_identical(&self, raw: &str) -> bool {
        self.descriptor
            .as_ref()
            .map(|d| d.is_structurally_identical(raw))
            .unwrap_or(false)
    }
}
