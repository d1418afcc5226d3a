//! A schema-driven object-document mapping layer over pluggable key-value stores.
//!
//! This crate is the core of the kvkit project and provides:
//!
//! - **Properties** ([`property`]) - Field types, defaults, validators and storage conversion
//! - **Schemas** ([`schema`]) - Per-type field sets merged across ancestors
//! - **Embedded records** ([`emdocument`]) - Validation and (de)serialization of one record
//! - **Documents** ([`document`]) - Key-addressed records that save, load and delete themselves
//! - **Index values** ([`index`]) - Ordered index values, snapshots and query ranges
//! - **Reconciliation** ([`reconcile`]) - The minimal index mutations between two snapshots
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Collections and stores** ([`collection`], [`store`]) - Per-type entry points
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use kvkit::{
//!     bson::{bson, doc},
//!     memory::MemoryBackend,
//!     property::Property,
//!     schema::{SchemaDef, SchemaRegistry},
//!     store::DocumentStore,
//! };
//!
//! let mut registry = SchemaRegistry::new();
//! let player = registry.define(
//!     SchemaDef::new("Player")
//!         .field("name", Property::string().indexed())
//!         .field("score", Property::number().indexed()),
//! )?;
//!
//! let store = DocumentStore::new(MemoryBackend::new());
//! let players = store.collection(&player).await?;
//!
//! players.document_with("a", doc! { "name": "x", "score": 1 }).save().await?;
//! let keys = players.index_keys_only("score", 0, Some(bson!(5))).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as kvkit_core;

pub mod backend;
pub mod collection;
pub mod document;
pub mod emdocument;
pub mod error;
pub mod index;
pub mod property;
pub mod reconcile;
pub mod schema;
pub mod store;
