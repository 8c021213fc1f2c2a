//! Assembly registry and lifecycle
//!
//! The `AssemblyRegistry` is a plain table of assemblies plus a global
//! index from type identity to definition. Everything that crosses into the
//! foreign runtime is implemented on `BridgeContext` below.

use std::collections::VecDeque;
use std::path::PathBuf;

use log::{debug, error, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};

use hostbridge_sdk::{FieldName, ForeignPtr, Handle, MetadataDocument, MetadataError, TypeDescriptor};

use super::{Assembly, AssemblyId, AssemblyState, DefinitionId, DefinitionOrigin, DefinitionState, TypeDefinition};
use crate::compiler::TypeCompiler;
use crate::context::BridgeContext;
use crate::error::{fatal, BridgeResult, CompileError, LoadError};
use crate::events::{BridgeEvent, TypeRegistration};
use crate::types::TypeOrigin;

/// Table of every assembly known to a bridge context
#[derive(Debug, Default)]
pub struct AssemblyRegistry {
    assemblies: FxHashMap<AssemblyId, Assembly>,
    by_name: FxHashMap<String, AssemblyId>,
    order: Vec<AssemblyId>,
    load_order: Vec<AssemblyId>,
    type_index: FxHashMap<FieldName, (DefinitionId, DefinitionOrigin)>,
    next_id: u32,
}

impl AssemblyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an unloaded assembly
    pub fn add(&mut self, name: &str, path: PathBuf, required: bool) -> Result<AssemblyId, LoadError> {
        if self.by_name.contains_key(name) {
            return Err(LoadError::DuplicateAssembly(name.to_string()));
        }
        let id = AssemblyId(self.next_id);
        self.next_id += 1;
        self.assemblies
            .insert(id, Assembly::new(id, name.to_string(), path, required));
        self.by_name.insert(name.to_string(), id);
        self.order.push(id);
        Ok(id)
    }

    /// Remove an assembly and its index entries
    pub fn remove(&mut self, id: AssemblyId) -> Option<Assembly> {
        let assembly = self.assemblies.remove(&id)?;
        self.by_name.remove(assembly.name());
        self.order.retain(|&other| other != id);
        self.load_order.retain(|&other| other != id);
        self.type_index.retain(|_, (def, _)| def.assembly != id);
        Some(assembly)
    }

    /// Get an assembly
    pub fn get(&self, id: AssemblyId) -> Option<&Assembly> {
        self.assemblies.get(&id)
    }

    /// Get an assembly mutably
    pub fn get_mut(&mut self, id: AssemblyId) -> Option<&mut Assembly> {
        self.assemblies.get_mut(&id)
    }

    /// Find an assembly by name
    pub fn find(&self, name: &str) -> Option<AssemblyId> {
        self.by_name.get(name).copied()
    }

    /// Every assembly id, in registration order
    pub fn ids(&self) -> Vec<AssemblyId> {
        self.order.clone()
    }

    /// Loaded assembly ids, in load order
    pub fn loaded_ids(&self) -> Vec<AssemblyId> {
        self.load_order.clone()
    }

    pub(crate) fn mark_loaded(&mut self, id: AssemblyId) {
        if !self.load_order.contains(&id) {
            self.load_order.push(id);
        }
    }

    pub(crate) fn mark_unloaded(&mut self, id: AssemblyId) {
        self.load_order.retain(|&other| other != id);
    }

    /// Number of assemblies
    pub fn len(&self) -> usize {
        self.assemblies.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.assemblies.is_empty()
    }

    /// Find the definition of a type in any assembly.
    ///
    /// Foreign definitions shadow native ones of the same name.
    pub fn locate(&self, name: &FieldName) -> Option<DefinitionId> {
        self.type_index.get(name).map(|(id, _)| *id)
    }

    pub(crate) fn index_definition(&mut self, name: FieldName, id: DefinitionId, origin: DefinitionOrigin) {
        if let Some((_, DefinitionOrigin::Foreign)) = self.type_index.get(&name) {
            if origin == DefinitionOrigin::Native {
                return;
            }
        }
        self.type_index.insert(name, (id, origin));
    }

    /// Get a definition
    pub fn definition(&self, id: DefinitionId) -> Option<&TypeDefinition> {
        self.get(id.assembly)?.definition(id.index)
    }

    pub(crate) fn definition_mut(&mut self, id: DefinitionId) -> Option<&mut TypeDefinition> {
        self.get_mut(id.assembly)?.definition_mut(id.index)
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl BridgeContext {
    /// Register an unloaded assembly.
    ///
    /// A `required` assembly that fails to load is fatal.
    pub fn add_assembly(&mut self, name: &str, path: impl Into<PathBuf>, required: bool) -> BridgeResult<AssemblyId> {
        self.check_alive()?;
        let id = self.assemblies.add(name, path.into(), required)?;
        debug!("[assembly] registered '{}' as {:?}", name, id);
        Ok(id)
    }

    /// Load an assembly and flush its pending rebuilds.
    ///
    /// Loading a loaded assembly is a successful no-op.
    pub fn load(&mut self, id: AssemblyId) -> BridgeResult<()> {
        self.check_alive()?;
        let collectible = self.config.collectible_assemblies;
        let assembly = self.assemblies.get_mut(id).ok_or(LoadError::UnknownAssembly(id))?;
        if assembly.state() != AssemblyState::Unloaded {
            return Ok(());
        }
        let path = assembly.path().to_path_buf();
        if !path.exists() {
            return Err(LoadError::FileNotFound(path).into());
        }

        info!("[assembly] loading '{}' from {}", assembly.name(), path.display());
        assembly.begin_loading();
        let token = self
            .runtime
            .load_module(&path, collectible)
            .and_then(ForeignPtr::non_null);
        let Some(token) = token else {
            assembly.abort_loading();
            let name = assembly.name().to_string();
            if assembly.is_required() {
                fatal(format!(
                    "required assembly '{}' failed to load from {}",
                    name,
                    path.display()
                ));
            }
            error!("[assembly] foreign runtime failed to load '{}'", name);
            return Err(LoadError::ModuleCallbackFailed { assembly: name, path }.into());
        };

        assembly.bind_module(token);
        let name = assembly.name().to_string();
        self.assemblies.mark_loaded(id);

        // Types the foreign side defined while its module was loading
        self.drain_registrations();
        let compiled = self.process_pending();
        self.resolve_type_tokens(id);

        info!("[assembly] loaded '{}' ({} types compiled)", name, compiled);
        self.emit(BridgeEvent::AssemblyLoaded { assembly: id, name });
        Ok(())
    }

    /// Unload an assembly: dispose every handle it allocated through its
    /// module token, then release the module itself.
    ///
    /// Unloading an unloaded assembly is a no-op. Never allocates foreign
    /// resources, so it is safe on destruction paths.
    pub fn unload(&mut self, id: AssemblyId) -> BridgeResult<()> {
        let assembly = self.assemblies.get_mut(id).ok_or(LoadError::UnknownAssembly(id))?;
        if assembly.state() == AssemblyState::Unloaded {
            return Ok(());
        }

        let (released, mut module) = assembly.release_handles(self.runtime.as_ref());
        let name = assembly.name().to_string();
        let path = assembly.path().to_path_buf();

        if !self.runtime.unload_module(&path) {
            warn!("[assembly] foreign runtime had no module loaded for '{}'", name);
        }
        module.dispose(self.runtime.as_ref(), None);
        self.assemblies.mark_unloaded(id);

        info!("[assembly] unloaded '{}' ({} handles released)", name, released);
        self.emit(BridgeEvent::AssemblyUnloaded { assembly: id, name });
        Ok(())
    }

    /// Unload then load again under the same identity
    pub fn reload(&mut self, id: AssemblyId) -> BridgeResult<()> {
        self.unload(id)?;
        self.load(id)
    }

    /// Unload an assembly and forget it
    pub fn remove_assembly(&mut self, id: AssemblyId) -> BridgeResult<()> {
        self.unload(id)?;
        if let Some(assembly) = self.assemblies.remove(id) {
            debug!("[assembly] removed '{}'", assembly.name());
        }
        Ok(())
    }

    // ========================================================================
    // Type Registration
    // ========================================================================

    /// Define or redefine a type on behalf of the foreign side.
    ///
    /// Byte-identical metadata only refreshes the token. Anything else
    /// replaces the metadata, marks the definition and everything that
    /// structurally depends on it for rebuild, and compiles right away if
    /// the assembly is loaded.
    pub fn register_type(&mut self, registration: TypeRegistration) -> BridgeResult<DefinitionId> {
        self.check_alive()?;
        let TypeRegistration {
            assembly: assembly_name,
            field_name,
            kind,
            type_token,
            raw_metadata,
            non_structural_change,
        } = registration;

        let assembly_id = self
            .assemblies
            .find(&assembly_name)
            .ok_or_else(|| LoadError::UnknownAssemblyName(assembly_name.clone()))?;
        let assembly = self
            .assemblies
            .get_mut(assembly_id)
            .ok_or(LoadError::UnknownAssembly(assembly_id))?;

        let def_id = match assembly.find_definition(&field_name) {
            Some(def_id) => {
                let definition = assembly
                    .definition_mut(def_id.index)
                    .ok_or(CompileError::StaleDefinition)?;
                if definition.kind() != kind {
                    return Err(MetadataError::KindChanged {
                        name: field_name,
                        previous: definition.kind(),
                        requested: kind,
                    }
                    .into());
                }

                if definition.is_structurally_identical(&raw_metadata) {
                    if !non_structural_change {
                        debug!("[assembly] {} unchanged", field_name);
                        return Ok(def_id);
                    }
                    if definition.state() == DefinitionState::UpToDate {
                        definition.set_state(DefinitionState::NeedsUpdate);
                    }
                    if !type_token.is_null() {
                        assembly.set_type_token(self.runtime.as_ref(), &field_name, Handle::strong(type_token));
                    }
                    debug!("[assembly] {} unchanged, token refreshed", field_name);
                    return Ok(def_id);
                }

                definition.set_reflection_data(TypeDescriptor::from_json(kind, &raw_metadata)?)?;
                definition.set_state(DefinitionState::NeedsRebuild);
                def_id
            }
            None => {
                let descriptor = TypeDescriptor::from_json(kind, &raw_metadata)?;
                if descriptor.field_name != field_name {
                    return Err(MetadataError::NameMismatch {
                        expected: field_name,
                        found: descriptor.field_name,
                    }
                    .into());
                }
                let def_id = assembly.next_definition_id();
                let native_type = TypeCompiler::for_kind(kind).create_field(
                    &mut self.types,
                    &field_name,
                    TypeOrigin::Foreign(def_id),
                );
                assembly.add_definition(TypeDefinition::foreign(def_id, descriptor, native_type));
                self.assemblies
                    .index_definition(field_name.clone(), def_id, DefinitionOrigin::Foreign);
                def_id
            }
        };

        let assembly = self
            .assemblies
            .get_mut(assembly_id)
            .ok_or(LoadError::UnknownAssembly(assembly_id))?;
        let dependencies = assembly
            .definition(def_id.index)
            .and_then(TypeDefinition::descriptor)
            .map(TypeDescriptor::dependencies)
            .unwrap_or_default();
        assembly.forget_dependencies(def_id.index);
        for dependency in dependencies {
            assembly.record_dependency(dependency, def_id.index);
        }
        if !type_token.is_null() {
            assembly.set_type_token(self.runtime.as_ref(), &field_name, Handle::strong(type_token));
        }
        assembly.enqueue_rebuild(def_id.index);
        let loaded = assembly.is_loaded();

        let invalidated = self.propagate_rebuild(assembly_id, &field_name);
        debug!(
            "[assembly] {} registered for rebuild ({} dependents invalidated)",
            field_name, invalidated
        );

        if loaded {
            self.process_pending();
        }
        Ok(def_id)
    }

    /// Mark every definition that transitively depends on `changed` for
    /// rebuild and queue it
    fn propagate_rebuild(&mut self, assembly_id: AssemblyId, changed: &FieldName) -> usize {
        let Some(assembly) = self.assemblies.get_mut(assembly_id) else {
            return 0;
        };
        let mut visited = FxHashSet::default();
        let mut worklist = VecDeque::from([changed.clone()]);
        let mut invalidated = 0;

        while let Some(name) = worklist.pop_front() {
            for index in assembly.dependents_of(&name) {
                if !visited.insert(index) {
                    continue;
                }
                let Some(dependent) = assembly.definition_mut(index) else {
                    continue;
                };
                if dependent.state() == DefinitionState::CurrentlyBuilding {
                    continue;
                }
                dependent.set_state(DefinitionState::NeedsRebuild);
                worklist.push_back(dependent.field_name().clone());
                assembly.enqueue_rebuild(index);
                invalidated += 1;
            }
        }
        invalidated
    }

    /// Register every entry of a metadata document.
    ///
    /// Each entry's re-serialized JSON is its change-detection form; tokens
    /// are resolved by name once the assembly is loaded.
    pub fn register_metadata(&mut self, assembly: AssemblyId, json: &str) -> BridgeResult<Vec<DefinitionId>> {
        let name = self
            .assemblies
            .get(assembly)
            .ok_or(LoadError::UnknownAssembly(assembly))?
            .name()
            .to_string();
        let document = MetadataDocument::from_json(json)?;

        let mut ids = Vec::with_capacity(document.len());
        for (kind, entry) in document.entries() {
            let registration = TypeRegistration::new(name.clone(), entry.field_name(), kind, entry.to_json()?);
            ids.push(self.register_type(registration)?);
        }
        self.resolve_type_tokens(assembly);
        info!("[assembly] registered {} types from metadata for '{}'", ids.len(), name);
        Ok(ids)
    }

    /// Look up the type token of every foreign definition of a loaded
    /// assembly that has none yet. Returns the number resolved.
    fn resolve_type_tokens(&mut self, id: AssemblyId) -> usize {
        let Some(assembly) = self.assemblies.get(id) else {
            return 0;
        };
        if !assembly.is_loaded() {
            return 0;
        }
        let unresolved: Vec<DefinitionId> = assembly
            .definitions()
            .iter()
            .filter(|d| d.origin() == DefinitionOrigin::Foreign && assembly.type_token(d.field_name()).is_none())
            .map(TypeDefinition::id)
            .collect();
        unresolved
            .into_iter()
            .filter(|&def_id| self.ensure_type_token(def_id).is_some())
            .count()
    }

    /// Apply queued registrations. Rejected registrations are logged.
    pub fn drain_registrations(&mut self) -> usize {
        let queued = self.registrations.drain();
        let count = queued.len();
        for registration in queued {
            let name = registration.field_name.clone();
            if let Err(e) = self.register_type(registration) {
                warn!("[assembly] rejected registration of {}: {}", name, e);
            }
        }
        count
    }

    /// Compile every queued definition of every loaded assembly.
    ///
    /// Deferred definitions and classes whose default object the host
    /// refused are re-queued, and the queues are retried until a pass makes
    /// no progress. Returns the number of definitions compiled.
    pub fn process_pending(&mut self) -> usize {
        let mut compiled = 0;
        loop {
            let mut progress = false;
            for assembly_id in self.assemblies.loaded_ids() {
                let pending = match self.assemblies.get_mut(assembly_id) {
                    Some(assembly) => assembly.take_pending(),
                    None => continue,
                };
                for index in pending {
                    let def_id = DefinitionId {
                        assembly: assembly_id,
                        index,
                    };
                    match self.compile_and_get_native_type(def_id) {
                        Ok(_) => {
                            compiled += 1;
                            progress = true;
                        }
                        Err(CompileError::Deferred { .. }) | Err(CompileError::NotLoaded { .. }) => {
                            if let Some(assembly) = self.assemblies.get_mut(assembly_id) {
                                assembly.enqueue_rebuild(index);
                            }
                        }
                        Err(e @ CompileError::DefaultObject(_)) => {
                            warn!("[compiler] {}, will retry", e);
                            if let Some(assembly) = self.assemblies.get_mut(assembly_id) {
                                assembly.enqueue_rebuild(index);
                            }
                        }
                        Err(e) => error!("[compiler] {}", e),
                    }
                }
            }
            if !progress {
                break;
            }
        }
        compiled
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// Find the definition of a type, synthesizing one for a native type
    /// that has no foreign counterpart.
    ///
    /// Native definitions are placed in the assembly that owns bindings for
    /// the type's package and start `UpToDate` with no metadata.
    pub fn find_or_add_type_definition(&mut self, name: &FieldName) -> BridgeResult<DefinitionId> {
        if let Some(id) = self.assemblies.locate(name) {
            return Ok(id);
        }
        let info = self
            .host
            .describe_native_type(name)
            .ok_or_else(|| CompileError::UnknownType(name.clone()))?;
        let assembly_name = self.config.assembly_for_package(&info.package).to_string();
        let assembly_id = self
            .assemblies
            .find(&assembly_name)
            .ok_or(LoadError::UnknownAssemblyName(assembly_name))?;

        let parent = match &info.parent {
            Some(parent) => match self.find_or_add_type_definition(parent) {
                Ok(parent_def) => self.assemblies.definition(parent_def).map(|d| d.native_type()),
                Err(e) => {
                    warn!("[assembly] parent of native type {} unresolved: {}", name, e);
                    None
                }
            },
            None => None,
        };

        let assembly = self
            .assemblies
            .get_mut(assembly_id)
            .ok_or(LoadError::UnknownAssembly(assembly_id))?;
        let def_id = assembly.next_definition_id();
        let native_type = self.types.create(name.clone(), info.kind, TypeOrigin::Native);
        {
            let ty = self.types.get_mut(native_type);
            ty.size = info.size;
            ty.alignment = info.alignment.max(1);
            ty.parent = parent;
        }
        self.types.publish(native_type);
        assembly.add_definition(TypeDefinition::native(def_id, name.clone(), info.kind, native_type));
        debug!("[assembly] synthesized native definition for {} in '{}'", name, assembly.name());

        self.assemblies
            .index_definition(name.clone(), def_id, DefinitionOrigin::Native);
        Ok(def_id)
    }

    /// Foreign type token of a definition, looked up by name on first use
    pub(crate) fn ensure_type_token(&mut self, def_id: DefinitionId) -> Option<ForeignPtr> {
        let assembly = self.assemblies.get_mut(def_id.assembly)?;
        let name = assembly.definition(def_id.index)?.field_name().clone();
        if let Some(token) = assembly.type_token(&name) {
            return Some(token);
        }
        let Some(module) = assembly.module_token() else {
            warn!("[assembly] cannot resolve {}: '{}' is not loaded", name, assembly.name());
            return None;
        };
        match self
            .runtime
            .lookup_type(module, &name.full_name())
            .and_then(ForeignPtr::non_null)
        {
            Some(token) => {
                assembly.set_type_token(self.runtime.as_ref(), &name, Handle::strong(token));
                Some(token)
            }
            None => {
                warn!("[assembly] type {} not found in '{}'", name, assembly.name());
                None
            }
        }
    }
}
