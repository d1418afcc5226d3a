//! Persistable, key-addressed documents.
//!
//! A [`Document`] is an [`EmDocument`] with a key, a backend, and the indexed snapshot it
//! last read from or wrote to that backend. Field access goes through `Deref` to the
//! embedded record; the methods defined here are the ones that touch storage.
//!
//! Saving serializes the record (failing validation never reaches the backend), diffs the
//! record's indexed fields against the snapshot, and hands record and index batch to the
//! backend as one write. The snapshot only moves forward once the backend reports success.
//!
//! Documents are created through a [`Collection`](crate::collection::Collection).
//!
//! # Example
//!
//! ```ignore
//! let mut post = posts.document_with_key("hello");
//! post.set("title", "Hello").set("tags", bson!(["intro"]));
//! post.save().await?;
//!
//! let loaded = posts.get("hello").await?;
//! assert_eq!(loaded, post);
//! ```

use bson::{Bson, Document as Record};
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    backend::{Backend, IndexUpdate, NativeHandle},
    emdocument::EmDocument,
    error::DocumentResult,
    index::IndexSnapshot,
    reconcile::reconcile,
    schema::{KEY_FIELD, Schema},
};

/// Where a document instance stands relative to its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    /// Constructed and never loaded or saved.
    New,
    /// Loaded from, or saved to, the backend.
    Saved,
    /// Deleted; fields reset to `Null`.
    Cleared,
}

/// A schema-typed record stored under a key.
#[derive(Debug)]
pub struct Document {
    em: EmDocument,
    key: String,
    snapshot: Option<IndexSnapshot>,
    state: DocumentState,
    handle: Option<NativeHandle>,
    backend: Arc<dyn Backend>,
}

impl Document {
    pub(crate) fn new(
        schema: Arc<Schema>,
        backend: Arc<dyn Backend>,
        key: Option<String>,
        data: Record,
    ) -> Self {
        let mut document = Self {
            em: EmDocument::with_data(schema, data),
            key: key.unwrap_or_else(generate_key),
            snapshot: None,
            state: DocumentState::New,
            handle: None,
            backend: Arc::clone(&backend),
        };

        backend.init_document(&mut document);
        document
    }

    pub(crate) fn fetched(
        schema: Arc<Schema>,
        backend: Arc<dyn Backend>,
        key: String,
        stored: Record,
        handle: Option<NativeHandle>,
    ) -> DocumentResult<Self> {
        let mut document = Self::new(schema, backend, Some(key), Record::new());
        document.load(stored, handle)?;
        Ok(document)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Moves the document to another key.
    ///
    /// The document no longer describes anything stored, so it goes back to
    /// [`DocumentState::New`] and forgets its indexed snapshot.
    pub fn set_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.key = key.into();
        self.snapshot = None;
        self.state = DocumentState::New;
        self
    }

    pub fn state(&self) -> DocumentState {
        self.state
    }

    pub fn em(&self) -> &EmDocument {
        &self.em
    }

    /// The indexed fields as last loaded or saved, or `None` if the document never was.
    pub fn index_snapshot(&self) -> Option<&IndexSnapshot> {
        self.snapshot.as_ref()
    }

    /// Replaces the indexed snapshot. Backends call this from
    /// [`Backend::post_deserialize`].
    pub fn set_index_snapshot(&mut self, snapshot: IndexSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn handle(&self) -> Option<&NativeHandle> {
        self.handle.as_ref()
    }

    pub fn set_handle(&mut self, handle: NativeHandle) {
        self.handle = Some(handle);
    }

    pub fn take_handle(&mut self) -> Option<NativeHandle> {
        self.handle.take()
    }

    /// Re-reads the document from the backend, replacing every field.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotFound`](crate::error::DocumentError::NotFound) if the key
    /// is not stored.
    pub async fn reload(&mut self) -> DocumentResult<&mut Self> {
        let schema = Arc::clone(self.em.schema());
        let fetched = self.backend.get(&schema, &self.key).await?;

        self.load(fetched.record, fetched.handle)?;
        debug!(schema = schema.name(), key = %self.key, "loaded document");

        Ok(self)
    }

    /// Validates and writes the document together with its index changes.
    ///
    /// # Errors
    ///
    /// Validation errors are raised before the backend is called. On a backend error the
    /// indexed snapshot is left as it was, so the next save diffs against the last state
    /// known to be stored.
    pub async fn save(&mut self) -> DocumentResult<&mut Self> {
        let record = self.em.serialize(&[])?;
        let schema = Arc::clone(self.em.schema());

        let previous = self.snapshot.clone().unwrap_or_default();
        let current = schema.index_snapshot(&record);
        let batch = reconcile(&previous, &current, &self.key);

        debug!(
            schema = schema.name(),
            key = %self.key,
            additions = batch.additions(),
            removals = batch.removals(),
            "saving document"
        );

        let update = IndexUpdate {
            previous,
            current: current.clone(),
            batch,
        };
        self.backend
            .save(&schema, &self.key, record, update)
            .await?;

        self.snapshot = Some(current);
        self.state = DocumentState::Saved;
        Ok(self)
    }

    /// Deletes the document from the backend and resets every field to `Null`.
    ///
    /// A document that was never loaded or saved lets the backend work out which index
    /// entries to drop. Deleting a key that is not stored is not an error.
    pub async fn delete(&mut self) -> DocumentResult<&mut Self> {
        let schema = Arc::clone(self.em.schema());
        let update = self.snapshot.as_ref().map(|previous| IndexUpdate {
            previous: previous.clone(),
            current: IndexSnapshot::new(),
            batch: reconcile(previous, &IndexSnapshot::new(), &self.key),
        });

        debug!(
            schema = schema.name(),
            key = %self.key,
            removals = update.as_ref().map_or(0, |update| update.batch.removals()),
            "deleting document"
        );

        self.backend
            .delete(&schema, &self.key, update)
            .await?;

        self.clear(false);
        self.snapshot = Some(IndexSnapshot::new());
        self.state = DocumentState::Cleared;
        Ok(self)
    }

    /// Resets the fields (see [`EmDocument::clear`]) and runs the backend's
    /// [`Backend::clear_document`] hook. The key and indexed snapshot are kept.
    pub fn clear(&mut self, to_default: bool) -> &mut Self {
        self.em.clear(to_default);

        let backend = Arc::clone(&self.backend);
        backend.clear_document(self);
        self
    }

    /// Serializes the record with the key included under [`KEY_FIELD`].
    pub fn serialize_with_key(&self, exclude: &[&str]) -> DocumentResult<Record> {
        let mut record = Record::new();
        record.insert(KEY_FIELD, Bson::String(self.key.clone()));
        for (name, value) in self.em.serialize(exclude)? {
            // an undeclared field can carry the reserved name
            if name != KEY_FIELD {
                record.insert(name, value);
            }
        }
        Ok(record)
    }

    fn load(&mut self, stored: Record, handle: Option<NativeHandle>) -> DocumentResult<()> {
        self.em = EmDocument::load(Arc::clone(self.em.schema()), stored.clone())?;
        self.handle = handle;
        self.state = DocumentState::Saved;

        let backend = Arc::clone(&self.backend);
        backend.post_deserialize(self, &stored);
        Ok(())
    }
}

impl Deref for Document {
    type Target = EmDocument;

    fn deref(&self) -> &Self::Target {
        &self.em
    }
}

impl DerefMut for Document {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.em
    }
}

/// Documents are equal when they share a type and a key, whatever their contents.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.em.schema().name() == other.em.schema().name()
    }
}

impl Eq for Document {}

fn generate_key() -> String {
    Uuid::new_v4().simple().to_string()
}
