//! Per-type entry points for creating, loading and querying documents.
//!
//! A [`Collection`] binds one [`Schema`] to a backend. It is cheap to clone and is the only
//! way to construct [`Document`]s, so every document carries the backend it was created
//! with.
//!
//! # Index queries
//!
//! [`Collection::index`] and [`Collection::index_keys_only`] look up documents by the value
//! of an indexed field. With only a start value the match is exact; with an end value the
//! range is inclusive on both ends. Two pseudo fields are always available:
//!
//! - [`ALL_KEYS_FIELD`] (`"$bucket"`) matches every document of the type, ignoring bounds.
//! - [`KEY_RANGE_FIELD`] (`"$key"`) matches documents whose key is within the bounds.
//!
//! # Example
//!
//! ```ignore
//! use kvkit::bson::bson;
//!
//! let scores = players.index_keys_only("score", 1, Some(bson!(2))).await?;
//! let named = players.index("name", "x", None).await?;
//! let every = players.index_keys_only("$bucket", "", None).await?;
//! ```

use bson::{Bson, Document as Record};
use std::sync::Arc;
use tracing::debug;

use crate::{
    backend::{Backend, Fetched},
    document::Document,
    error::{DocumentError, DocumentResult},
    index::{IndexRange, IndexValue, KeyRange},
    property::Property,
    schema::{ALL_KEYS_FIELD, KEY_RANGE_FIELD, Schema},
};

/// A document type bound to a backend.
#[derive(Debug, Clone)]
pub struct Collection {
    schema: Arc<Schema>,
    backend: Arc<dyn Backend>,
}

impl Collection {
    pub(crate) fn new(schema: Arc<Schema>, backend: Arc<dyn Backend>) -> Self {
        Self { schema, backend }
    }

    /// Returns the type name of this collection.
    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// A new document with a generated key and default values.
    pub fn new_document(&self) -> Document {
        self.build(None, Record::new())
    }

    /// A new document with a generated key and `data` merged over the defaults.
    pub fn new_document_with(&self, data: Record) -> Document {
        self.build(None, data)
    }

    /// A new, unsaved document with the given key.
    pub fn document_with_key(&self, key: impl Into<String>) -> Document {
        self.build(Some(key.into()), Record::new())
    }

    /// A new, unsaved document with the given key and `data` merged over the defaults.
    pub fn document_with(&self, key: impl Into<String>, data: Record) -> Document {
        self.build(Some(key.into()), data)
    }

    /// Loads the document stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotFound`] if the key is not stored.
    pub async fn get(&self, key: impl Into<String>) -> DocumentResult<Document> {
        let mut document = self.document_with_key(key);
        document.reload().await?;
        Ok(document)
    }

    /// Loads the document stored under `key`, or returns a new unsaved one if there is none.
    ///
    /// The new document is neither populated nor saved.
    pub async fn get_or_new(&self, key: impl Into<String>) -> DocumentResult<Document> {
        let key = key.into();
        match self.get(key.as_str()).await {
            Ok(document) => Ok(document),
            Err(DocumentError::NotFound(..)) => Ok(self.document_with_key(key)),
            Err(err) => Err(err),
        }
    }

    /// Deletes the document stored under `key` without loading it.
    ///
    /// The backend derives the index removals from what it has stored. Deleting a key that
    /// is not stored is a no-op.
    pub async fn delete_key(&self, key: &str) -> DocumentResult<()> {
        debug!(schema = self.name(), key, "deleting key");
        self.backend
            .delete(&self.schema, key, None)
            .await
    }

    /// Loads the documents whose `field` matches `start` exactly, or lies within
    /// `start..=end` when `end` is given.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotIndexed`] if `field` is neither a pseudo field nor an
    /// indexed field, and [`DocumentError::Validation`] if a bound cannot be indexed.
    pub async fn index(
        &self,
        field: &str,
        start: impl Into<Bson>,
        end: Option<Bson>,
    ) -> DocumentResult<Vec<Document>> {
        let fetched = match field {
            ALL_KEYS_FIELD => {
                self.backend
                    .list_all(&self.schema, &KeyRange::All)
                    .await?
            }
            KEY_RANGE_FIELD => {
                let range = self.key_range(start.into(), end)?;
                self.backend
                    .list_all(&self.schema, &range)
                    .await?
            }
            _ => {
                let range = self.index_range(field, start.into(), end)?;
                debug!(schema = self.name(), field, start = %range.start, end = %range.end, "index query");
                self.backend
                    .index(&self.schema, field, &range)
                    .await?
            }
        };

        self.documents(fetched)
    }

    /// Like [`Collection::index`], returning keys only.
    pub async fn index_keys_only(
        &self,
        field: &str,
        start: impl Into<Bson>,
        end: Option<Bson>,
    ) -> DocumentResult<Vec<String>> {
        match field {
            ALL_KEYS_FIELD => {
                self.backend
                    .list_all_keys(&self.schema, &KeyRange::All)
                    .await
            }
            KEY_RANGE_FIELD => {
                let range = self.key_range(start.into(), end)?;
                self.backend
                    .list_all_keys(&self.schema, &range)
                    .await
            }
            _ => {
                let range = self.index_range(field, start.into(), end)?;
                debug!(schema = self.name(), field, start = %range.start, end = %range.end, "index query");
                self.backend
                    .index_keys_only(&self.schema, field, &range)
                    .await
            }
        }
    }

    /// Loads every document whose key is in the range built from `start` and `end`, see
    /// [`KeyRange::from_bounds`].
    pub async fn list_all(&self, start: Option<&str>, end: Option<&str>) -> DocumentResult<Vec<Document>> {
        let fetched = self
            .backend
            .list_all(&self.schema, &KeyRange::from_bounds(start, end))
            .await?;

        self.documents(fetched)
    }

    /// Lists every key in the range built from `start` and `end`, in order.
    pub async fn list_all_keys(&self, start: Option<&str>, end: Option<&str>) -> DocumentResult<Vec<String>> {
        self.backend
            .list_all_keys(&self.schema, &KeyRange::from_bounds(start, end))
            .await
    }

    fn build(&self, key: Option<String>, data: Record) -> Document {
        Document::new(Arc::clone(&self.schema), Arc::clone(&self.backend), key, data)
    }

    fn documents(&self, fetched: Vec<Fetched>) -> DocumentResult<Vec<Document>> {
        fetched
            .into_iter()
            .map(|fetched| {
                Document::fetched(
                    Arc::clone(&self.schema),
                    Arc::clone(&self.backend),
                    fetched.key,
                    fetched.record,
                    fetched.handle,
                )
            })
            .collect()
    }

    fn key_range(&self, start: Bson, end: Option<Bson>) -> DocumentResult<KeyRange> {
        let start = key_bound(start)?;
        let end = end.map(key_bound).transpose()?;
        Ok(KeyRange::from_bounds(Some(start.as_str()), end.as_deref()))
    }

    fn index_range(&self, field: &str, start: Bson, end: Option<Bson>) -> DocumentResult<IndexRange> {
        let property = self
            .schema
            .field(field)
            .filter(|_| self.schema.is_indexed(field))
            .ok_or_else(|| DocumentError::NotIndexed(field.to_string(), self.name().to_string()))?;

        let start = index_bound(field, property, start)?;
        let range = match end {
            Some(end) => IndexRange::between(start, index_bound(field, property, end)?),
            None => IndexRange::exact(start),
        };

        Ok(range)
    }
}

fn key_bound(value: Bson) -> DocumentResult<String> {
    match value {
        Bson::String(key) => Ok(key),
        other => Err(DocumentError::validation(KEY_RANGE_FIELD, other)),
    }
}

// Numeric fields accept numeric strings, so `"4"` finds a stored `4.0`.
fn index_bound(field: &str, property: &Property, value: Bson) -> DocumentResult<IndexValue> {
    let value = match value {
        Bson::String(s) if property.kind().is_numeric() => {
            let trimmed = s.trim();
            match (trimmed.parse::<i64>(), trimmed.parse::<f64>()) {
                (Ok(n), _) => Bson::Int64(n),
                (_, Ok(n)) => Bson::Double(n),
                _ => Bson::String(s),
            }
        }
        other => other,
    };

    IndexValue::from_bson(&value).ok_or_else(|| DocumentError::validation(field, value))
}
