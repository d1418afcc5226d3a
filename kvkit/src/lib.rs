//! Main kvkit crate: schema-typed documents over pluggable key-value stores.
//!
//! This crate is the primary entry point for users of kvkit. It re-exports the core types
//! from `kvkit-core` and provides access to the bundled storage backends.
//!
//! # Features
//!
//! - **Schema-typed documents** - Declare fields with types, defaults, validators and indexes
//! - **Validation before I/O** - A document that fails validation never reaches the backend
//! - **Secondary indexes** - Exact and range lookups, kept consistent on every save and delete
//! - **Pluggable backends** - Implement [`backend::Backend`] for any ordered key-value store
//!
//! # Quick Start
//!
//! ```ignore
//! use kvkit::{prelude::*, bson::{bson, doc}, memory::MemoryBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = SchemaRegistry::new();
//!     let player = registry.define(
//!         SchemaDef::new("Player")
//!             .field("name", Property::string().required().indexed())
//!             .field("score", Property::number().default(0.0).indexed())
//!             .field("tags", Property::list().indexed()),
//!     )?;
//!
//!     let store = DocumentStore::new(MemoryBackend::builder().build().await?);
//!     let players = store.collection(&player).await?;
//!
//!     let mut alice = players.document_with("alice", doc! { "name": "Alice", "score": 12 });
//!     alice.save().await?;
//!
//!     // exact match
//!     let named = players.index_keys_only("name", "Alice", None).await?;
//!     // inclusive range
//!     let scored = players.index("score", 10, Some(bson!(20))).await?;
//!     // every key of the type
//!     let all = players.index_keys_only("$bucket", "", None).await?;
//!
//!     alice.delete().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing

pub mod prelude;

pub use kvkit_core::{
    backend, collection, document, emdocument, error, index, property, reconcile, schema, store,
};

// Re-export BSON types for convenience
pub use bson;

// Backends implement `backend::Backend` with this attribute.
pub use async_trait::async_trait;

/// In-memory storage backend implementations.
pub mod memory {
    pub use kvkit_memory::{MemoryBackend, MemoryBackendBuilder};
}
