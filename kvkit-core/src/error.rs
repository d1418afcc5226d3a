//! Error types and result types for document operations.
//!
//! This module provides error handling for every layer of the crate. Definition-time
//! problems (bad schemas) are reported as [`SchemaError`]; everything that can go wrong
//! while working with documents is a [`DocumentError`]. Use [`DocumentResult<T>`] as the
//! return type for fallible operations.

use bson::Bson;
use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Errors raised while a schema is being defined.
///
/// These are programming mistakes rather than runtime conditions: they surface once,
/// when a type is registered, and never while documents are being read or written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A field name collides with the key field or an internal bookkeeping name.
    #[error("Field name '{0}' is reserved (declared on '{1}')")]
    ReservedName(String, String),
    /// A property was marked `indexed` but its kind cannot be indexed.
    #[error("Property '{0}' on '{1}' cannot be indexed: only string, number, boolean, list and reference properties are indexable")]
    UnindexableProperty(String, String),
    /// A type with this name has already been registered.
    #[error("Schema '{0}' is already defined")]
    DuplicateSchema(String),
    /// A declared parent type has not been registered.
    #[error("Schema '{0}' extends unknown schema '{1}'")]
    UnknownParent(String, String),
}

/// Represents all possible errors that can occur when working with documents.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// A field value failed its property's validation.
    #[error("'{value}' doesn't pass validation for property '{field}'")]
    Validation {
        /// The offending field.
        field: String,
        /// The value that was rejected.
        value: Bson,
    },
    /// The schema only allows declared fields and an undeclared one is present.
    #[error("Property '{0}' is not defined and '{1}' only allows defined properties")]
    UndefinedProperty(String, String),
    /// An attribute that is neither declared nor set was read.
    #[error("Attribute '{0}' not found on '{1}'")]
    UnknownField(String, String),
    /// The requested document was not found.
    /// The first argument is the document key, the second is the type name.
    #[error("Document {0} not found in {1}")]
    NotFound(String, String),
    /// An index query named a field that is not declared as indexed.
    #[error("Field '{0}' is not indexed on '{1}'")]
    NotIndexed(String, String),
    /// The schema definition is invalid.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
    /// Conversion between the in-memory and encoded record forms failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error reported by the storage backend. Never interpreted by this crate.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl DocumentError {
    /// Returns `true` for errors raised by local validation, before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DocumentError::Validation { .. } | DocumentError::UndefinedProperty(..)
        )
    }

    pub(crate) fn validation(field: impl Into<String>, value: Bson) -> Self {
        DocumentError::Validation {
            field: field.into(),
            value,
        }
    }
}

/// A specialized `Result` type for document operations.
pub type DocumentResult<T> = Result<T, DocumentError>;

impl From<BsonError> for DocumentError {
    fn from(err: BsonError) -> Self {
        DocumentError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentError::Serialization(err.to_string())
    }
}
