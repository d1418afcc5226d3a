//! Storage backend abstraction.
//!
//! This module defines the contract a storage engine implements to persist documents. The
//! document layer owns schemas, validation and index reconciliation; a backend only stores
//! encoded records under `(type, key)` and keeps its index rows in step with the
//! [`IndexBatch`](crate::reconcile::IndexBatch) it is handed.
//!
//! # Overview
//!
//! The [`Backend`] trait provides an async interface for record access by key, index
//! lookups, key enumeration, and a handful of lifecycle hooks invoked around documents.
//! Implementations are required to be thread-safe (`Send + Sync`) and support concurrent
//! access.
//!
//! # Atomicity
//!
//! `save` and `delete` must apply the record write and the index batch as one unit: a reader
//! sees both or neither. Nothing is guaranteed across the batches of different documents.
//!
//! # Traits
//!
//! - [`Backend`]: The core trait for storage backends
//! - [`BackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use kvkit::{backend::Backend, index::IndexRange, memory::MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! let keys = backend
//!     .index_keys_only(&schema, "name", &IndexRange::exact(IndexValue::String("x".into())))
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::Document as Record;
use std::{any::Any, fmt::Debug, sync::Arc};

use crate::{
    document::Document,
    error::DocumentResult,
    index::{IndexRange, IndexSnapshot, KeyRange},
    reconcile::IndexBatch,
    schema::Schema,
};

/// A backend-specific object attached to a loaded document, such as a native record
/// handle. Opaque to the document layer.
pub type NativeHandle = Box<dyn Any + Send + Sync>;

/// A record read from a backend.
#[derive(Debug)]
pub struct Fetched {
    pub key: String,
    /// The record in its stored form.
    pub record: Record,
    pub handle: Option<NativeHandle>,
}

impl Fetched {
    pub fn new(key: impl Into<String>, record: Record) -> Self {
        Self {
            key: key.into(),
            record,
            handle: None,
        }
    }

    pub fn with_handle(mut self, handle: NativeHandle) -> Self {
        self.handle = Some(handle);
        self
    }
}

/// The index side of a write: the indexed snapshot the caller believes is stored, the one
/// being written, and the batch that moves the index from the first to the second.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexUpdate {
    pub previous: IndexSnapshot,
    pub current: IndexSnapshot,
    pub batch: IndexBatch,
}

/// Abstract interface for document storage backends.
///
/// Every operation is scoped by a [`Schema`]: backends keep types apart by
/// [`Schema::name`], and use [`Schema::indexed_fields`] to know which fields can be queried.
///
/// # Error Handling
///
/// Engine failures are reported as [`DocumentError::Backend`](crate::error::DocumentError::Backend)
/// and are surfaced to the caller unchanged. The document layer never retries.
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Called once per type, when a collection is first opened for it.
    ///
    /// The default implementation does nothing.
    async fn init_class(&self, _schema: &Schema) -> DocumentResult<()> {
        Ok(())
    }

    /// Called right after a document instance is constructed.
    fn init_document(&self, _document: &mut Document) {}

    /// Called after a document is cleared. The default implementation drops the native
    /// handle the document carries.
    fn clear_document(&self, document: &mut Document) {
        document.take_handle();
    }

    /// Called after a document is loaded from `stored`. The default implementation rebuilds
    /// the document's indexed snapshot from the stored record.
    fn post_deserialize(&self, document: &mut Document, stored: &Record) {
        let snapshot = document
            .schema()
            .index_snapshot(stored);
        document.set_index_snapshot(snapshot);
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotFound`](crate::error::DocumentError::NotFound) if no
    /// record is stored under `key`.
    async fn get(&self, schema: &Schema, key: &str) -> DocumentResult<Fetched>;

    /// Writes a record and applies the index update in the same atomic unit.
    ///
    /// # Arguments
    ///
    /// * `schema` - The type the record belongs to
    /// * `key` - The document key
    /// * `record` - The serialized record
    /// * `update` - The index mutations computed by the caller
    async fn save(
        &self,
        schema: &Schema,
        key: &str,
        record: Record,
        update: IndexUpdate,
    ) -> DocumentResult<()>;

    /// Removes a record and its index entries. Deleting a missing key is a no-op.
    ///
    /// `update` is the removal batch computed by a document instance; when it is `None` the
    /// backend derives the removals from the stored record.
    async fn delete(
        &self,
        schema: &Schema,
        key: &str,
        update: Option<IndexUpdate>,
    ) -> DocumentResult<()>;

    /// Reads the records whose indexed `field` holds a value in `range`.
    ///
    /// Each record appears once even if several of its values match. Results are ordered
    /// by the smallest matching value, then by key.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotIndexed`](crate::error::DocumentError::NotIndexed) if
    /// `field` is not an indexed field of `schema`.
    async fn index(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<Fetched>>;

    /// Like [`Backend::index`], returning keys only.
    async fn index_keys_only(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<String>>;

    /// Reads every record whose key is in `range`, ordered by key.
    async fn list_all(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<Fetched>>;

    /// Lists every key in `range`, in order.
    async fn list_all_keys(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<String>>;
}

#[async_trait]
impl<B> Backend for Arc<B>
where
    B: Backend + ?Sized,
{
    async fn init_class(&self, schema: &Schema) -> DocumentResult<()> {
        (**self).init_class(schema).await
    }

    fn init_document(&self, document: &mut Document) {
        (**self).init_document(document)
    }

    fn clear_document(&self, document: &mut Document) {
        (**self).clear_document(document)
    }

    fn post_deserialize(&self, document: &mut Document, stored: &Record) {
        (**self).post_deserialize(document, stored)
    }

    async fn get(&self, schema: &Schema, key: &str) -> DocumentResult<Fetched> {
        (**self).get(schema, key).await
    }

    async fn save(
        &self,
        schema: &Schema,
        key: &str,
        record: Record,
        update: IndexUpdate,
    ) -> DocumentResult<()> {
        (**self)
            .save(schema, key, record, update)
            .await
    }

    async fn delete(
        &self,
        schema: &Schema,
        key: &str,
        update: Option<IndexUpdate>,
    ) -> DocumentResult<()> {
        (**self)
            .delete(schema, key, update)
            .await
    }

    async fn index(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<Fetched>> {
        (**self)
            .index(schema, field, range)
            .await
    }

    async fn index_keys_only(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<String>> {
        (**self)
            .index_keys_only(schema, field, range)
            .await
    }

    async fn list_all(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<Fetched>> {
        (**self).list_all(schema, range).await
    }

    async fn list_all_keys(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<String>> {
        (**self).list_all_keys(schema, range).await
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait BackendBuilder {
    type Backend: Backend;

    async fn build(self) -> DocumentResult<Self::Backend>;
}
