//! Convenient re-exports of commonly used types from kvkit.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use kvkit::prelude::*;
//! ```
//!
//! This provides access to:
//! - Properties, schemas and the schema registry
//! - Documents and embedded records
//! - Store backends and builders
//! - Collections and the document store
//! - Error types

pub use kvkit_core::{
    backend::{Backend, BackendBuilder, Fetched, IndexUpdate},
    collection::Collection,
    document::{Document, DocumentState},
    emdocument::EmDocument,
    error::{DocumentError, DocumentResult, SchemaError},
    index::{IndexRange, IndexValue, KeyRange},
    property::{Converter, Property, PropertyKind},
    schema::{Schema, SchemaDef, SchemaRegistry},
    store::DocumentStore,
};
