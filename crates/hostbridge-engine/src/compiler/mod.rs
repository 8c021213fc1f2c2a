//! Type compiler dispatch
//!
//! Turns a definition's reflection metadata into its live native type
//! object. One compiler per type kind, selected by `TypeCompiler::for_kind`:
//!
//! - `create_field` allocates the type object the first time a definition
//!   is seen, before any structure is known
//! - `recompile` rebuilds the structure in place from the metadata
//!
//! `BridgeContext::compile_and_get_native_type` is the only entry point and
//! drives the definition state machine around the per-kind compilers.

mod class;
mod delegate;
mod enums;
mod interface;
mod structs;

use log::{debug, trace};
use rustc_hash::FxHashMap;

use hostbridge_sdk::{
    FieldName, FunctionDescriptor, FunctionFlags, PropertyDescriptor, TypeDescriptor, TypeKind,
};

use crate::assembly::{DefinitionId, DefinitionState};
use crate::context::BridgeContext;
use crate::error::CompileError;
use crate::events::BridgeEvent;
use crate::types::{
    FrameLayout, FunctionObject, PropertyObject, RecordLayout, TypeArena, TypeObject,
    TypeObjectId, TypeOrigin,
};

/// Per-kind compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCompiler {
    /// Classes: inherited layout, functions, default object
    Class,
    /// Structs: value layout
    Struct,
    /// Enums: items and storage size
    Enum,
    /// Interfaces: function signatures
    Interface,
    /// Delegate signatures: a single function signature
    DelegateSignature,
}

impl TypeCompiler {
    /// Compiler responsible for `kind`
    pub fn for_kind(kind: TypeKind) -> Self {
        match kind {
            TypeKind::Class => TypeCompiler::Class,
            TypeKind::Struct => TypeCompiler::Struct,
            TypeKind::Enum => TypeCompiler::Enum,
            TypeKind::Interface => TypeCompiler::Interface,
            TypeKind::DelegateSignature => TypeCompiler::DelegateSignature,
        }
    }

    /// Kind this compiler builds
    pub fn kind(self) -> TypeKind {
        match self {
            TypeCompiler::Class => TypeKind::Class,
            TypeCompiler::Struct => TypeKind::Struct,
            TypeCompiler::Enum => TypeKind::Enum,
            TypeCompiler::Interface => TypeKind::Interface,
            TypeCompiler::DelegateSignature => TypeKind::DelegateSignature,
        }
    }

    /// Allocate the native type object for a newly seen definition
    pub fn create_field(self, types: &mut TypeArena, name: &FieldName, origin: TypeOrigin) -> TypeObjectId {
        types.create(name.clone(), self.kind(), origin)
    }

    /// Rebuild the native type of `def_id` in place
    pub(crate) fn recompile(
        self,
        ctx: &mut BridgeContext,
        def_id: DefinitionId,
        descriptor: &TypeDescriptor,
        deps: &ResolvedTypes,
    ) -> Result<(), CompileError> {
        let type_id = ctx.native_type_of(def_id)?;
        match self {
            TypeCompiler::Class => class::recompile(ctx, type_id, descriptor, deps),
            TypeCompiler::Struct => structs::recompile(ctx, type_id, descriptor, deps),
            TypeCompiler::Enum => enums::recompile(ctx, type_id, descriptor),
            TypeCompiler::Interface => interface::recompile(ctx, type_id, descriptor, deps),
            TypeCompiler::DelegateSignature => delegate::recompile(ctx, type_id, descriptor, deps),
        }
    }
}

// ============================================================================
// Resolved Dependencies
// ============================================================================

/// Compiled type objects of a definition's dependencies
#[derive(Debug, Default)]
pub(crate) struct ResolvedTypes {
    types: FxHashMap<FieldName, TypeObjectId>,
}

impl ResolvedTypes {
    fn insert(&mut self, name: FieldName, id: TypeObjectId) {
        self.types.insert(name, id);
    }

    /// Type object of a dependency that must have been resolved
    pub(crate) fn require(&self, name: &FieldName, owner: &FieldName) -> Result<TypeObjectId, CompileError> {
        self.types.get(name).copied().ok_or_else(|| CompileError::Deferred {
            type_name: owner.clone(),
            dependency: name.clone(),
        })
    }

    fn value_layout(&self, types: &TypeArena, name: &FieldName) -> Option<(usize, usize)> {
        self.types.get(name).map(|&id| {
            let ty = types.get(id);
            (ty.size, ty.alignment)
        })
    }
}

// ============================================================================
// Shared Building Blocks
// ============================================================================

/// Lay out properties after an inherited prefix
pub(crate) fn build_properties(
    types: &TypeArena,
    deps: &ResolvedTypes,
    owner: &FieldName,
    properties: &[PropertyDescriptor],
    base: (usize, usize),
) -> Result<(Vec<PropertyObject>, RecordLayout), CompileError> {
    let resolve = |name: &FieldName| deps.value_layout(types, name);
    let layout = RecordLayout::build(base.0, base.1, properties, &resolve).map_err(|dependency| {
        CompileError::Deferred {
            type_name: owner.clone(),
            dependency,
        }
    })?;

    let objects = properties
        .iter()
        .zip(&layout.fields)
        .map(|(property, placement)| PropertyObject {
            name: property.name.clone(),
            ty: property.ty.clone(),
            flags: property.flags,
            offset: placement.offset,
            size: placement.size,
        })
        .collect();
    Ok((objects, layout))
}

/// Build foreign-backed functions with their frame layouts.
///
/// Every function is flagged `NATIVE` so the host routes calls into the
/// invocation thunk.
pub(crate) fn build_functions(
    types: &TypeArena,
    deps: &ResolvedTypes,
    owner: &FieldName,
    functions: &[FunctionDescriptor],
) -> Result<Vec<FunctionObject>, CompileError> {
    let resolve = |name: &FieldName| deps.value_layout(types, name);
    functions
        .iter()
        .map(|function| {
            let layout = FrameLayout::build(&function.parameters, function.return_type.as_ref(), &resolve)
                .map_err(|dependency| CompileError::Deferred {
                    type_name: owner.clone(),
                    dependency,
                })?;
            let mut flags = function.flags | FunctionFlags::NATIVE;
            if function.parameters.iter().any(|p| p.flags.is_output()) {
                flags |= FunctionFlags::HAS_OUT_PARAMS;
            }
            Ok(FunctionObject {
                name: function.name.clone(),
                flags,
                layout,
            })
        })
        .collect()
}

/// Copy flags and annotations onto a purged type
pub(crate) fn apply_metadata(ty: &mut TypeObject, descriptor: &TypeDescriptor) {
    ty.flags = descriptor.flags;
    ty.annotations = descriptor.annotations.clone();
}

/// Publish a rebuilt type and announce it to the host
pub(crate) fn finish(ctx: &mut BridgeContext, type_id: TypeObjectId) {
    let parent = ctx
        .types
        .get(type_id)
        .parent
        .map(|p| ctx.types.get(p).field_name.clone());
    let ty = ctx.types.get_mut(type_id);
    ty.generation += 1;
    let summary = ty.summary(parent);

    ctx.types.publish(type_id);
    ctx.host.register_type(&summary);
    trace!(
        "[compiler] published {} (size {}, generation {})",
        summary.field_name, summary.size, summary.generation
    );
}

// ============================================================================
// State Machine
// ============================================================================

impl BridgeContext {
    /// Compile a definition if needed and return its native type.
    ///
    /// - `UpToDate`: returned as is
    /// - `NeedsUpdate`: foreign bindings refreshed, structure untouched
    /// - `NeedsRebuild`: rebuilt in place through the kind's compiler
    /// - `CurrentlyBuilding`: reached again through a dependency cycle,
    ///   reported as `CompileError::Cycle`
    ///
    /// On failure the definition is left in `NeedsRebuild`.
    pub fn compile_and_get_native_type(&mut self, def_id: DefinitionId) -> Result<TypeObjectId, CompileError> {
        let definition = self
            .assemblies
            .definition(def_id)
            .ok_or(CompileError::StaleDefinition)?;
        let native_type = definition.native_type();
        let type_name = definition.field_name().clone();

        match definition.state() {
            DefinitionState::UpToDate => Ok(native_type),
            DefinitionState::CurrentlyBuilding => Err(CompileError::Cycle { type_name }),
            DefinitionState::NeedsUpdate => {
                self.update_bindings(def_id);
                Ok(native_type)
            }
            DefinitionState::NeedsRebuild => self.rebuild(def_id, type_name).map(|_| native_type),
        }
    }

    pub(crate) fn native_type_of(&self, def_id: DefinitionId) -> Result<TypeObjectId, CompileError> {
        self.assemblies
            .definition(def_id)
            .map(|d| d.native_type())
            .ok_or(CompileError::StaleDefinition)
    }

    fn set_definition_state(&mut self, def_id: DefinitionId, state: DefinitionState) {
        if let Some(definition) = self.assemblies.definition_mut(def_id) {
            definition.set_state(state);
        }
    }

    fn rebuild(&mut self, def_id: DefinitionId, type_name: FieldName) -> Result<(), CompileError> {
        let assembly = self
            .assemblies
            .get(def_id.assembly)
            .ok_or(CompileError::StaleDefinition)?;
        if !assembly.is_loaded() {
            return Err(CompileError::NotLoaded {
                type_name,
                assembly: assembly.name().to_string(),
            });
        }
        let definition = assembly
            .definition(def_id.index)
            .ok_or(CompileError::StaleDefinition)?;
        let descriptor = definition
            .descriptor()
            .cloned()
            .ok_or_else(|| CompileError::MissingMetadata(type_name.clone()))?;
        let compiler = TypeCompiler::for_kind(definition.kind());

        self.set_definition_state(def_id, DefinitionState::CurrentlyBuilding);
        debug!("[compiler] building {} as {:?}", type_name, compiler.kind());

        let result = match self.resolve_dependencies(&descriptor) {
            Ok(deps) => compiler.recompile(self, def_id, &descriptor, &deps),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.set_definition_state(def_id, DefinitionState::UpToDate);
                let generation = self
                    .native_type_of(def_id)
                    .map(|id| self.types.get(id).generation)
                    .unwrap_or_default();
                self.emit(BridgeEvent::TypeCompiled {
                    type_name,
                    generation,
                });
                Ok(())
            }
            Err(e) => {
                self.set_definition_state(def_id, DefinitionState::NeedsRebuild);
                if let CompileError::Deferred { dependency, .. } = &e {
                    debug!("[compiler] {} deferred until {} is available", type_name, dependency);
                    self.emit(BridgeEvent::TypeDeferred {
                        type_name,
                        dependency: dependency.clone(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Compile every dependency first; nothing of the dependent is touched
    /// until all of them resolve
    fn resolve_dependencies(&mut self, descriptor: &TypeDescriptor) -> Result<ResolvedTypes, CompileError> {
        let owner = &descriptor.field_name;
        let mut resolved = ResolvedTypes::default();

        for dependency in descriptor.dependencies() {
            let deferred = || CompileError::Deferred {
                type_name: owner.clone(),
                dependency: dependency.clone(),
            };
            let def_id = match self.find_or_add_type_definition(&dependency) {
                Ok(def_id) => def_id,
                Err(_) => return Err(deferred()),
            };
            let type_id = match self.compile_and_get_native_type(def_id) {
                Ok(type_id) => type_id,
                Err(CompileError::Deferred { .. })
                | Err(CompileError::NotLoaded { .. })
                | Err(CompileError::MissingMetadata(_)) => return Err(deferred()),
                Err(e) => return Err(e),
            };
            resolved.insert(dependency.clone(), type_id);
        }
        Ok(resolved)
    }

    /// Lightweight update: drop cached method tokens, re-resolve the type
    /// token and re-bind a class default object
    fn update_bindings(&mut self, def_id: DefinitionId) {
        if let Some(assembly) = self.assemblies.get_mut(def_id.assembly) {
            assembly.invalidate_methods(self.runtime.as_ref(), def_id.index);
        }
        if self.ensure_type_token(def_id).is_none() {
            return;
        }

        let default_object = self
            .native_type_of(def_id)
            .ok()
            .and_then(|id| self.types.get(id).default_object);
        if let Some(object) = default_object {
            self.find_or_create(object);
        }
        self.set_definition_state(def_id, DefinitionState::UpToDate);
    }
}
