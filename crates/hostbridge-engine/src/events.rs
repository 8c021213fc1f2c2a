//! Bridge events and inbound queues
//!
//! Outbound: `BridgeEvent`s are delivered synchronously to subscribed
//! listeners.
//!
//! Inbound: type registrations and object deletions may be reported from
//! inside a foreign call or from another thread. They are posted to
//! channels and drained on the owner thread, so no bridge table is ever
//! touched re-entrantly.

use crossbeam::channel::{self, Receiver, Sender};

use hostbridge_sdk::{FieldName, ForeignPtr, ObjectId, TypeKind};

use crate::assembly::AssemblyId;

/// Notification delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// An assembly finished loading and flushed its pending rebuilds
    AssemblyLoaded {
        /// Assembly id
        assembly: AssemblyId,
        /// Assembly name
        name: String,
    },
    /// An assembly released all its handles and its module token
    AssemblyUnloaded {
        /// Assembly id
        assembly: AssemblyId,
        /// Assembly name
        name: String,
    },
    /// A type was (re)built
    TypeCompiled {
        /// Type identity
        type_name: FieldName,
        /// Build count of the type object
        generation: u32,
    },
    /// A type could not be built yet and stays queued
    TypeDeferred {
        /// Type identity
        type_name: FieldName,
        /// Missing dependency
        dependency: FieldName,
    },
    /// Every previously created foreign handle must be treated as stale
    FullReload {
        /// New reload generation
        generation: u64,
    },
}

/// A type definition or redefinition reported by the foreign side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRegistration {
    /// Name of the defining assembly
    pub assembly: String,
    /// Type identity
    pub field_name: FieldName,
    /// Kind
    pub kind: TypeKind,
    /// Foreign type token (null to resolve by name later)
    pub type_token: ForeignPtr,
    /// Serialized metadata of the type, compared verbatim for changes
    pub raw_metadata: String,
    /// Token refresh without structural change
    pub non_structural_change: bool,
}

impl TypeRegistration {
    /// Registration without a pre-resolved token
    pub fn new(
        assembly: impl Into<String>,
        field_name: FieldName,
        kind: TypeKind,
        raw_metadata: impl Into<String>,
    ) -> Self {
        TypeRegistration {
            assembly: assembly.into(),
            field_name,
            kind,
            type_token: ForeignPtr::NULL,
            raw_metadata: raw_metadata.into(),
            non_structural_change: false,
        }
    }

    /// Attach the foreign type token
    pub fn with_token(mut self, token: ForeignPtr) -> Self {
        self.type_token = token;
        self
    }

    /// Flag a token refresh without structural change
    pub fn non_structural(mut self) -> Self {
        self.non_structural_change = true;
        self
    }
}

// ============================================================================
// Queues
// ============================================================================

/// Unbounded inbound queue drained on the owner thread
#[derive(Debug)]
pub(crate) struct InboundQueue<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> InboundQueue<T> {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        InboundQueue { sender, receiver }
    }

    pub(crate) fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    pub(crate) fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}

/// Posts type registrations to a bridge context
#[derive(Debug, Clone)]
pub struct RegistrationPort {
    sender: Sender<TypeRegistration>,
}

impl RegistrationPort {
    pub(crate) fn new(sender: Sender<TypeRegistration>) -> Self {
        RegistrationPort { sender }
    }

    /// Queue a registration; `false` once the context is gone
    pub fn post(&self, registration: TypeRegistration) -> bool {
        self.sender.send(registration).is_ok()
    }
}

/// Posts native object deletions to a bridge context
#[derive(Debug, Clone)]
pub struct DeletionPort {
    sender: Sender<ObjectId>,
}

impl DeletionPort {
    pub(crate) fn new(sender: Sender<ObjectId>) -> Self {
        DeletionPort { sender }
    }

    /// Queue a deletion notification; `false` once the context is gone
    pub fn post(&self, object: ObjectId) -> bool {
        self.sender.send(object).is_ok()
    }
}
