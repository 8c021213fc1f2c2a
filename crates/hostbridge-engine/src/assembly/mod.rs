//! Assemblies: independently loadable units of foreign types
//!
//! An `Assembly` owns its type definitions (an arena indexed by
//! `DefinitionId::index`), every handle it allocated (its `HandleSlab`), its
//! resolved type tokens and method tokens, and the queue of definitions
//! waiting to be rebuilt.
//!
//! Lifecycle orchestration (load, unload, registration) needs the foreign
//! runtime and the other bridge tables, so it lives on `BridgeContext` in
//! `registry.rs`.

mod definition;
mod registry;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};

use hostbridge_sdk::{FieldName, ForeignPtr, ForeignRuntime, Handle};

use crate::handles::{HandlePurpose, HandleSlab, HandleSlot};

pub use definition::{DefinitionId, DefinitionOrigin, DefinitionState, TypeDefinition};
pub use registry::AssemblyRegistry;

/// Stable id of an assembly within one bridge context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssemblyId(pub(crate) u32);

/// Lifecycle state of an assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// No module token bound
    Unloaded,
    /// Inside `load_module`
    Loading,
    /// Module token bound
    Loaded,
}

/// A loaded, independently unloadable unit of foreign types
#[derive(Debug)]
pub struct Assembly {
    id: AssemblyId,
    name: String,
    path: PathBuf,
    required: bool,
    state: AssemblyState,
    module_token: Handle,
    load_epoch: u32,
    definitions: Vec<TypeDefinition>,
    by_name: FxHashMap<FieldName, u32>,
    type_tokens: FxHashMap<FieldName, HandleSlot>,
    method_cache: FxHashMap<(u32, String), HandleSlot>,
    handles: HandleSlab,
    pending_rebuild: VecDeque<u32>,
    dependents: FxHashMap<FieldName, FxHashSet<u32>>,
}

impl Assembly {
    pub(crate) fn new(id: AssemblyId, name: String, path: PathBuf, required: bool) -> Self {
        Assembly {
            id,
            name,
            path,
            required,
            state: AssemblyState::Unloaded,
            module_token: Handle::null(),
            load_epoch: 0,
            definitions: Vec::new(),
            by_name: FxHashMap::default(),
            type_tokens: FxHashMap::default(),
            method_cache: FxHashMap::default(),
            handles: HandleSlab::new(),
            pending_rebuild: VecDeque::new(),
            dependents: FxHashMap::default(),
        }
    }

    // ========================================================================
    // Identity and State
    // ========================================================================

    /// Assembly id
    pub fn id(&self) -> AssemblyId {
        self.id
    }

    /// Assembly name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether failing to load this assembly is fatal
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Lifecycle state
    pub fn state(&self) -> AssemblyState {
        self.state
    }

    /// Check whether the module token is bound
    pub fn is_loaded(&self) -> bool {
        self.state == AssemblyState::Loaded
    }

    /// Module token, if loaded
    pub fn module_token(&self) -> Option<ForeignPtr> {
        self.module_token.pointer().non_null()
    }

    /// Number of completed loads
    pub fn load_epoch(&self) -> u32 {
        self.load_epoch
    }

    // ========================================================================
    // Definitions
    // ========================================================================

    /// All definitions in creation order
    pub fn definitions(&self) -> &[TypeDefinition] {
        &self.definitions
    }

    /// Definition by arena index
    pub fn definition(&self, index: u32) -> Option<&TypeDefinition> {
        self.definitions.get(index as usize)
    }

    pub(crate) fn definition_mut(&mut self, index: u32) -> Option<&mut TypeDefinition> {
        self.definitions.get_mut(index as usize)
    }

    /// Find a definition by type identity
    pub fn find_definition(&self, name: &FieldName) -> Option<DefinitionId> {
        self.by_name.get(name).map(|&index| DefinitionId {
            assembly: self.id,
            index,
        })
    }

    /// Id the next added definition will get
    pub(crate) fn next_definition_id(&self) -> DefinitionId {
        DefinitionId {
            assembly: self.id,
            index: self.definitions.len() as u32,
        }
    }

    pub(crate) fn add_definition(&mut self, definition: TypeDefinition) -> DefinitionId {
        let id = definition.id();
        debug_assert_eq!(id, self.next_definition_id());
        self.by_name.insert(definition.field_name().clone(), id.index);
        self.definitions.push(definition);
        id
    }

    /// Record that `dependent` must be rebuilt whenever `dependency` changes
    pub(crate) fn record_dependency(&mut self, dependency: FieldName, dependent: u32) {
        self.dependents.entry(dependency).or_default().insert(dependent);
    }

    /// Drop every edge recorded for `dependent`, before its new metadata
    /// records its current dependencies
    pub(crate) fn forget_dependencies(&mut self, dependent: u32) {
        self.dependents.retain(|_, dependents| {
            dependents.remove(&dependent);
            !dependents.is_empty()
        });
    }

    /// Definitions recorded as depending on `name`
    pub fn dependents_of(&self, name: &FieldName) -> Vec<u32> {
        let mut indices: Vec<u32> = self
            .dependents
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        indices.sort_unstable();
        indices
    }

    // ========================================================================
    // Pending Rebuild Queue
    // ========================================================================

    pub(crate) fn enqueue_rebuild(&mut self, index: u32) {
        if !self.pending_rebuild.contains(&index) {
            self.pending_rebuild.push_back(index);
        }
    }

    pub(crate) fn take_pending(&mut self) -> Vec<u32> {
        self.pending_rebuild.drain(..).collect()
    }

    /// Definitions waiting to be rebuilt, in queue order
    pub fn pending_rebuild(&self) -> Vec<u32> {
        self.pending_rebuild.iter().copied().collect()
    }

    // ========================================================================
    // Handles
    // ========================================================================

    /// Handle slab of this assembly
    pub fn handles(&self) -> &HandleSlab {
        &self.handles
    }

    pub(crate) fn handles_mut(&mut self) -> &mut HandleSlab {
        &mut self.handles
    }

    /// Resolved type token for `name`
    pub fn type_token(&self, name: &FieldName) -> Option<ForeignPtr> {
        self.type_tokens
            .get(name)
            .and_then(|&slot| self.handles.pointer(slot))
    }

    /// Number of resolved type tokens
    pub fn type_token_count(&self) -> usize {
        self.type_tokens.len()
    }

    /// Bind a type token, disposing any previous token for `name`
    pub(crate) fn set_type_token(&mut self, runtime: &dyn ForeignRuntime, name: &FieldName, token: Handle) {
        if self.type_token(name) == token.pointer().non_null() {
            return;
        }
        let module = self.module_token();
        if let Some(old) = self.type_tokens.remove(name) {
            self.handles.dispose(old, runtime, module);
        }
        if !token.is_null() {
            let slot = self.handles.allocate(token, HandlePurpose::TypeToken);
            self.type_tokens.insert(name.clone(), slot);
        }
    }

    /// Cached method token
    pub(crate) fn cached_method(&self, definition: u32, name: &str) -> Option<ForeignPtr> {
        self.method_cache
            .get(&(definition, name.to_string()))
            .and_then(|&slot| self.handles.pointer(slot))
    }

    pub(crate) fn cache_method(&mut self, definition: u32, name: &str, token: Handle) -> Option<ForeignPtr> {
        let pointer = token.pointer().non_null();
        let slot = self.handles.allocate(token, HandlePurpose::Method);
        self.method_cache.insert((definition, name.to_string()), slot);
        pointer
    }

    /// Drop every cached method token of one definition
    pub(crate) fn invalidate_methods(&mut self, runtime: &dyn ForeignRuntime, definition: u32) {
        let module = self.module_token();
        let stale: Vec<(u32, String)> = self
            .method_cache
            .keys()
            .filter(|(def, _)| *def == definition)
            .cloned()
            .collect();
        for key in stale {
            if let Some(slot) = self.method_cache.remove(&key) {
                self.handles.dispose(slot, runtime, module);
            }
        }
    }

    /// Number of cached method tokens
    pub fn method_cache_len(&self) -> usize {
        self.method_cache.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub(crate) fn begin_loading(&mut self) {
        self.state = AssemblyState::Loading;
    }

    pub(crate) fn bind_module(&mut self, token: ForeignPtr) {
        self.module_token = Handle::strong(token);
        self.load_epoch += 1;
        self.state = AssemblyState::Loaded;
    }

    pub(crate) fn abort_loading(&mut self) {
        self.state = AssemblyState::Unloaded;
    }

    /// Dispose every handle through the module token and clear the handle
    /// maps. Returns the module token, still owned, for the caller to
    /// release after `unload_module`.
    pub(crate) fn release_handles(&mut self, runtime: &dyn ForeignRuntime) -> (usize, Handle) {
        let module = self.module_token();
        let released = self.handles.dispose_all(runtime, module);
        self.type_tokens.clear();
        self.method_cache.clear();

        // Compiled types survive; their foreign bindings must be re-resolved
        for definition in &mut self.definitions {
            if definition.state() == DefinitionState::UpToDate
                && definition.origin() == DefinitionOrigin::Foreign
            {
                definition.set_state(DefinitionState::NeedsUpdate);
            }
        }

        self.state = AssemblyState::Unloaded;
        (released, self.module_token.take())
    }
}
