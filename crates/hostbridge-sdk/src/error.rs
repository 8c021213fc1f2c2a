//! Error types for reflection metadata handling

use crate::metadata::{FieldName, TypeKind};

/// Result type for metadata operations
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Metadata error types
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The document or a type entry is not valid JSON for the metadata model
    #[error("Malformed metadata: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A required field is empty or absent
    #[error("Missing required field '{field}' in metadata for {owner}")]
    MissingField {
        /// Field that was expected
        field: &'static str,
        /// Type (or document part) that lacked it
        owner: String,
    },

    /// Two members of one type share a name
    #[error("Duplicate {member} '{name}' in {owner}")]
    Duplicate {
        /// Member category ("property", "function", "enum item")
        member: &'static str,
        /// Duplicated name
        name: String,
        /// Owning type
        owner: FieldName,
    },

    /// Attempt to attach metadata describing a different type
    #[error("Metadata for {found} cannot be attached to type definition {expected}")]
    NameMismatch {
        /// Name of the definition being updated
        expected: FieldName,
        /// Name carried by the new metadata
        found: FieldName,
    },

    /// A type was redefined with a different kind
    #[error("Type {name} was registered as {previous:?} and cannot become {requested:?}")]
    KindChanged {
        /// Type name
        name: FieldName,
        /// Kind recorded on the existing definition
        previous: TypeKind,
        /// Kind requested by the new registration
        requested: TypeKind,
    },

    /// Unknown type kind code received over the C ABI
    #[error("Unknown type kind code: {0}")]
    UnknownKind(u8),
}
