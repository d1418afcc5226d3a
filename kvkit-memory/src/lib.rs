//! In-memory storage backend for kvkit.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Backend` trait,
//! secondary indexes included. It uses async-aware read-write locks for concurrent access
//! and is meant for development, testing, and small deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Atomic writes** - A record and its index batch are applied under one lock
//! - **Ordered keys and index rows** - Range queries over keys and indexed values
//! - **Snapshot verification** - Stale index snapshots are re-diffed against storage
//!
//! # Quick Start
//!
//! ```ignore
//! use kvkit::{backend::BackendBuilder, memory::MemoryBackend, store::DocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!     let players = store.collection(&player_schema).await?;
//!
//!     let mut player = players.document_with_key("a");
//!     player.set("name", "x");
//!     player.save().await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as kvkit_memory;

pub mod store;

pub use store::{MemoryBackend, MemoryBackendBuilder};
