//! Main document store interface.
//!
//! A [`DocumentStore`] owns a backend and hands out a [`Collection`] per schema. Opening
//! the first collection of a type runs the backend's [`Backend::init_class`] hook; later
//! calls for the same type reuse that setup.
//!
//! # Example
//!
//! ```ignore
//! use kvkit::{memory::MemoryBackend, store::DocumentStore};
//!
//! let store = DocumentStore::new(MemoryBackend::new());
//! let players = store.collection(&player_schema).await?;
//! let mut player = players.document_with_key("a");
//! ```

use mea::rwlock::RwLock;
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

use crate::{
    backend::Backend,
    collection::Collection,
    error::DocumentResult,
    schema::Schema,
};

/// A document store bound to one backend.
///
/// Clones share the backend and the set of initialized types.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    backend: Arc<dyn Backend>,
    initialized: Arc<RwLock<HashSet<String>>>,
}

impl DocumentStore {
    /// Creates a new document store with the given backend.
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Creates a document store over a shared backend.
    pub fn from_arc(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            initialized: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Gets the collection for `schema`, initializing the type in the backend on first use.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if `init_class` fails; the type is then retried on the
    /// next call.
    pub async fn collection(&self, schema: &Arc<Schema>) -> DocumentResult<Collection> {
        if !self.initialized.read().await.contains(schema.name()) {
            let mut initialized = self.initialized.write().await;

            if !initialized.contains(schema.name()) {
                debug!(schema = schema.name(), "initializing type");
                self.backend.init_class(schema).await?;
                initialized.insert(schema.name().to_string());
            }
        }

        Ok(Collection::new(Arc::clone(schema), Arc::clone(&self.backend)))
    }
}
