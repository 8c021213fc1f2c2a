//! Object identity bridge
//!
//! Maps a native object's stable id to the strong handle of its foreign
//! counterpart. The handle itself lives in the owning assembly's slab; the
//! bridge only keeps the slot.
//!
//! Identity by id is not enough across a reload: a mapping created before
//! the last full reload, or before its assembly was reloaded, is stale even
//! if the native object is still alive. Staleness is tracked explicitly with
//! the reload generation and the slab epoch, never inferred from nullness.

use log::{debug, error, trace, warn};
use rustc_hash::FxHashMap;

use hostbridge_sdk::{FieldName, ForeignPtr, Handle, NativeObject, ObjectId};

use crate::assembly::{AssemblyId, DefinitionId};
use crate::context::BridgeContext;
use crate::error::fatal;
use crate::handles::{HandlePurpose, HandleSlot};

#[derive(Debug)]
struct IdentityEntry {
    assembly: AssemblyId,
    slot: HandleSlot,
    generation: u64,
    load_epoch: u32,
    interfaces: Vec<(FieldName, HandleSlot)>,
}

/// Native object id -> foreign handle table
#[derive(Debug, Default)]
pub struct IdentityBridge {
    entries: FxHashMap<ObjectId, IdentityEntry>,
    reload_generation: u64,
}

impl IdentityBridge {
    /// Create an empty bridge
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of full reloads observed
    pub fn reload_generation(&self) -> u64 {
        self.reload_generation
    }

    pub(crate) fn bump_generation(&mut self) -> u64 {
        self.reload_generation += 1;
        self.reload_generation
    }

    /// Check whether an object has a mapping (live or stale)
    pub fn contains(&self, id: ObjectId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Assembly owning an object's handle
    pub fn owner_of(&self, id: ObjectId) -> Option<AssemblyId> {
        self.entries.get(&id).map(|e| e.assembly)
    }

    /// Number of interface wrappers held for an object
    pub fn interface_count(&self, id: ObjectId) -> usize {
        self.entries.get(&id).map(|e| e.interfaces.len()).unwrap_or(0)
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no mappings
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

impl BridgeContext {
    /// Foreign counterpart of `object`, created on first access.
    ///
    /// Returns a non-owning alias of the handle; the owning assembly keeps
    /// the handle itself. Returns null for an invalid object or when the
    /// object's type cannot be resolved to a foreign type token.
    pub fn find_or_create(&mut self, object: NativeObject) -> ForeignPtr {
        if object.is_null() {
            return ForeignPtr::NULL;
        }
        let id = self.host.object_id(object);
        if !self.host.is_valid(object) {
            self.release_identity(id, false);
            return ForeignPtr::NULL;
        }
        if let Some(pointer) = self.live_pointer(id) {
            return pointer;
        }
        if self.identity.contains(id) {
            debug!("[identity] replacing stale handle of object {}", id);
            self.release_identity(id, false);
        }

        let Some(class) = self.host.class_of(object) else {
            warn!("[identity] object {} has no class", id);
            return ForeignPtr::NULL;
        };
        let Some(def_id) = self.owning_definition(&class) else {
            warn!("[identity] no assembly owns class {} or any of its ancestors", class);
            return ForeignPtr::NULL;
        };
        let Some(type_token) = self.ensure_type_token(def_id) else {
            return ForeignPtr::NULL;
        };

        let pointer = match self.runtime.create_object(object, type_token) {
            Ok(pointer) if !pointer.is_null() => pointer,
            Ok(_) => fatal(format!(
                "foreign runtime constructed a null object for {} of class {}",
                id, class
            )),
            Err(message) => fatal(format!(
                "foreign runtime failed to construct {} of class {}: {}",
                id, class, message
            )),
        };

        let Some(assembly) = self.assemblies.get_mut(def_id.assembly) else {
            fatal(format!("owning assembly of {} vanished during construction", class));
        };
        let load_epoch = assembly.load_epoch();
        let slot = assembly
            .handles_mut()
            .allocate(Handle::strong(pointer), HandlePurpose::Object);
        self.identity.entries.insert(
            id,
            IdentityEntry {
                assembly: def_id.assembly,
                slot,
                generation: self.identity.reload_generation,
                load_epoch,
                interfaces: Vec::new(),
            },
        );
        trace!("[identity] object {} -> {}", id, pointer);
        pointer
    }

    /// Foreign wrapper exposing `object` through `interface`, created on
    /// first access and released together with the object's handle
    pub fn find_or_create_interface(&mut self, object: NativeObject, interface: &FieldName) -> ForeignPtr {
        let primary = self.find_or_create(object);
        if primary.is_null() {
            return ForeignPtr::NULL;
        }
        let id = self.host.object_id(object);
        if let Some(wrapper) = self.live_interface(id, interface) {
            return wrapper;
        }

        let interface_def = match self.find_or_add_type_definition(interface) {
            Ok(def_id) => def_id,
            Err(e) => {
                warn!("[identity] interface {} unresolved: {}", interface, e);
                return ForeignPtr::NULL;
            }
        };
        let Some(interface_token) = self.ensure_type_token(interface_def) else {
            return ForeignPtr::NULL;
        };
        let wrapper = self.runtime.create_interface_wrapper(primary, interface_token);
        if wrapper.is_null() {
            warn!("[identity] foreign runtime could not expose object {} as {}", id, interface);
            return ForeignPtr::NULL;
        }

        let Some(entry) = self.identity.entries.get_mut(&id) else {
            return ForeignPtr::NULL;
        };
        let Some(assembly) = self.assemblies.get_mut(entry.assembly) else {
            return ForeignPtr::NULL;
        };
        let slot = assembly
            .handles_mut()
            .allocate(Handle::strong(wrapper), HandlePurpose::InterfaceWrapper);
        entry.interfaces.retain(|(name, _)| name != interface);
        entry.interfaces.push((interface.clone(), slot));
        wrapper
    }

    /// Release the handles of a destroyed native object.
    ///
    /// Returns `true` if a foreign handle was released. A mapping whose
    /// owning assembly no longer exists is logged as a leak.
    pub fn notify_object_deleted(&mut self, id: ObjectId) -> bool {
        self.release_identity(id, true)
    }

    /// Apply queued deletion notifications; returns how many were queued
    pub fn drain_deletions(&mut self) -> usize {
        let queued = self.deletions.drain();
        for id in &queued {
            self.notify_object_deleted(*id);
        }
        queued.len()
    }

    fn live_pointer(&self, id: ObjectId) -> Option<ForeignPtr> {
        let entry = self.identity.entries.get(&id)?;
        if entry.generation != self.identity.reload_generation {
            return None;
        }
        let assembly = self.assemblies.get(entry.assembly)?;
        if !assembly.is_loaded() || assembly.load_epoch() != entry.load_epoch {
            return None;
        }
        assembly.handles().pointer(entry.slot)
    }

    fn live_interface(&self, id: ObjectId, interface: &FieldName) -> Option<ForeignPtr> {
        let entry = self.identity.entries.get(&id)?;
        let (_, slot) = entry.interfaces.iter().find(|(name, _)| name == interface)?;
        self.assemblies.get(entry.assembly)?.handles().pointer(*slot)
    }

    fn release_identity(&mut self, id: ObjectId, report_leak: bool) -> bool {
        let Some(entry) = self.identity.entries.remove(&id) else {
            return false;
        };
        let Some(assembly) = self.assemblies.get_mut(entry.assembly) else {
            if report_leak {
                error!(
                    "[identity] object {} destroyed but its owning assembly {:?} is gone; foreign handle leaked",
                    id, entry.assembly
                );
            }
            return false;
        };

        let module = assembly.module_token();
        let runtime = self.runtime.as_ref();
        for (_, slot) in &entry.interfaces {
            assembly.handles_mut().dispose(*slot, runtime, module);
        }
        let released = assembly.handles_mut().dispose(entry.slot, runtime, module);
        trace!("[identity] released object {} (handle live: {})", id, released);
        released
    }

    /// Walk from `class` up to the nearest type that has (or can get) a
    /// definition, skipping dynamically generated intermediates
    fn owning_definition(&mut self, class: &FieldName) -> Option<DefinitionId> {
        let mut current = Some(class.clone());
        while let Some(name) = current {
            if !self.host.is_generated_class(&name) {
                match self.find_or_add_type_definition(&name) {
                    Ok(def_id) => return Some(def_id),
                    Err(e) => trace!("[identity] {} has no definition: {}", name, e),
                }
            }
            current = self.host.parent_class(&name);
        }
        None
    }
}
