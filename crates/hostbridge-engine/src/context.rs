//! The bridge context
//!
//! One `BridgeContext` owns every bridge table: assemblies and their handle
//! slabs, the identity bridge, the type arena and the inbound queues. It is
//! constructed explicitly by the host, passed by reference to whatever needs
//! it, and torn down with `shutdown`.
//!
//! The context is not `Send`: all mutation happens on the thread that owns
//! it. Other threads reach it only through `RegistrationPort` and
//! `DeletionPort`.

use log::{info, warn};

use hostbridge_sdk::{FieldName, ForeignRuntime, NativeHost, ObjectId};

use crate::assembly::{Assembly, AssemblyId, AssemblyRegistry, DefinitionId, TypeDefinition};
use crate::config::{BridgeConfig, ConfigError};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, DeletionPort, InboundQueue, RegistrationPort, TypeRegistration};
use crate::identity::IdentityBridge;
use crate::thunk::ThunkCounters;
use crate::types::{TypeArena, TypeObject};

type Listener = Box<dyn FnMut(&BridgeEvent)>;

/// Owner of all bridge state
pub struct BridgeContext {
    pub(crate) config: BridgeConfig,
    pub(crate) runtime: Box<dyn ForeignRuntime>,
    pub(crate) host: Box<dyn NativeHost>,
    pub(crate) assemblies: AssemblyRegistry,
    pub(crate) identity: IdentityBridge,
    pub(crate) types: TypeArena,
    pub(crate) thunk: ThunkCounters,
    pub(crate) registrations: InboundQueue<TypeRegistration>,
    pub(crate) deletions: InboundQueue<ObjectId>,
    listeners: Vec<Listener>,
    hot_reload: bool,
    shut_down: bool,
}

impl BridgeContext {
    /// Create a context over a foreign runtime and a native host
    pub fn new(
        config: BridgeConfig,
        runtime: impl ForeignRuntime + 'static,
        host: impl NativeHost + 'static,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "[context] bridge created (exception policy {:?}, editor {})",
            config.exception_policy, config.editor
        );
        Ok(BridgeContext {
            config,
            runtime: Box::new(runtime),
            host: Box::new(host),
            assemblies: AssemblyRegistry::new(),
            identity: IdentityBridge::new(),
            types: TypeArena::new(),
            thunk: ThunkCounters::default(),
            registrations: InboundQueue::new(),
            deletions: InboundQueue::new(),
            listeners: Vec::new(),
            hot_reload: false,
            shut_down: false,
        })
    }

    pub(crate) fn check_alive(&self) -> BridgeResult<()> {
        if self.shut_down {
            Err(BridgeError::ShutDown)
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Events and Queues
    // ========================================================================

    /// Register a listener for bridge events
    pub fn subscribe(&mut self, listener: impl FnMut(&BridgeEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub(crate) fn emit(&mut self, event: BridgeEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    /// Port for posting type registrations from any thread
    pub fn registration_port(&self) -> RegistrationPort {
        RegistrationPort::new(self.registrations.sender())
    }

    /// Port for posting native object deletions from any thread
    pub fn deletion_port(&self) -> DeletionPort {
        DeletionPort::new(self.deletions.sender())
    }

    /// Registrations waiting to be drained
    pub fn pending_registrations(&self) -> usize {
        self.registrations.len()
    }

    /// Deletions waiting to be drained
    pub fn pending_deletions(&self) -> usize {
        self.deletions.len()
    }

    // ========================================================================
    // Reload Signaling
    // ========================================================================

    /// Declare every foreign handle created so far stale.
    ///
    /// Existing mappings are replaced on their next `find_or_create`.
    pub fn notify_full_reload(&mut self) -> u64 {
        let generation = self.identity.bump_generation();
        info!("[context] full reload, generation {}", generation);
        self.emit(BridgeEvent::FullReload { generation });
        generation
    }

    /// Enter the hot reload window (editor only).
    ///
    /// Invocations inside the window are skipped.
    pub fn begin_hot_reload(&mut self) {
        if !self.config.editor {
            warn!("[context] hot reload requested outside the editor, ignored");
            return;
        }
        self.hot_reload = true;
    }

    /// Leave the hot reload window; counts as a full reload
    pub fn end_hot_reload(&mut self) {
        if !self.hot_reload {
            return;
        }
        self.hot_reload = false;
        self.notify_full_reload();
    }

    /// Check whether invocations are currently skipped
    pub fn is_hot_reloading(&self) -> bool {
        self.hot_reload && self.config.editor
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Unload every assembly in reverse load order.
    ///
    /// Queued deletions are applied first. Calling it again does nothing;
    /// every other mutating operation fails with `BridgeError::ShutDown`
    /// afterwards.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.drain_deletions();
        for id in self.assemblies.loaded_ids().into_iter().rev() {
            if let Err(e) = self.unload(id) {
                warn!("[context] unload during shutdown failed: {}", e);
            }
        }
        self.identity.clear();
        self.shut_down = true;
        info!("[context] bridge shut down");
    }

    /// Check whether `shutdown` ran
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Every native type object
    pub fn types(&self) -> &TypeArena {
        &self.types
    }

    /// Find a published type by path (`/Script/Namespace.Name`)
    pub fn find_type(&self, path: &str) -> Option<&TypeObject> {
        self.types.find_type(path)
    }

    /// Object identity table
    pub fn identity(&self) -> &IdentityBridge {
        &self.identity
    }

    /// Assembly table
    pub fn assemblies(&self) -> &AssemblyRegistry {
        &self.assemblies
    }

    /// Get an assembly
    pub fn assembly(&self, id: AssemblyId) -> Option<&Assembly> {
        self.assemblies.get(id)
    }

    /// Find an assembly by name
    pub fn find_assembly(&self, name: &str) -> Option<AssemblyId> {
        self.assemblies.find(name)
    }

    /// Find the definition of a type in any assembly
    pub fn find_definition(&self, name: &FieldName) -> Option<DefinitionId> {
        self.assemblies.locate(name)
    }

    /// Get a definition
    pub fn definition(&self, id: DefinitionId) -> Option<&TypeDefinition> {
        self.assemblies.definition(id)
    }

    /// Native type object of a definition, compiled or not
    pub fn type_object(&self, id: DefinitionId) -> Option<&TypeObject> {
        self.assemblies
            .definition(id)
            .map(|d| self.types.get(d.native_type()))
    }
}

impl Drop for BridgeContext {
    fn drop(&mut self) {
        let loaded = self.assemblies.loaded_ids().len();
        if !self.shut_down && loaded > 0 {
            warn!(
                "[context] bridge dropped without shutdown; {} assemblies still loaded",
                loaded
            );
        }
    }
}
