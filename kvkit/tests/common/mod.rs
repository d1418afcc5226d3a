#![allow(dead_code)]

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use kvkit::{
    async_trait,
    backend::{Backend, Fetched, IndexUpdate},
    bson::Document as Record,
    error::{DocumentError, DocumentResult},
    index::{IndexRange, KeyRange},
    memory::MemoryBackend,
    property::Property,
    schema::{Schema, SchemaDef, SchemaRegistry},
};

/// Player: `name` and `score` indexed, `tags` an indexed list, `note` plain.
pub fn player_schema() -> Arc<Schema> {
    SchemaRegistry::new()
        .define(
            SchemaDef::new("Player")
                .field("name", Property::string().indexed())
                .field("score", Property::number().indexed())
                .field("tags", Property::list().indexed())
                .field("note", Property::string()),
        )
        .unwrap()
}

/// A memory backend that counts calls and can be told to fail writes.
#[derive(Debug, Clone, Default)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
    inits: Arc<AtomicUsize>,
}

impl FlakyBackend {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Calls to `save` and `delete`, failed ones included.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    fn write(&self) -> DocumentResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DocumentError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for FlakyBackend {
    async fn init_class(&self, schema: &Schema) -> DocumentResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        self.inner.init_class(schema).await
    }

    async fn get(&self, schema: &Schema, key: &str) -> DocumentResult<Fetched> {
        self.inner.get(schema, key).await
    }

    async fn save(
        &self,
        schema: &Schema,
        key: &str,
        record: Record,
        update: IndexUpdate,
    ) -> DocumentResult<()> {
        self.write()?;
        self.inner.save(schema, key, record, update).await
    }

    async fn delete(
        &self,
        schema: &Schema,
        key: &str,
        update: Option<IndexUpdate>,
    ) -> DocumentResult<()> {
        self.write()?;
        self.inner.delete(schema, key, update).await
    }

    async fn index(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<Fetched>> {
        self.inner.index(schema, field, range).await
    }

    async fn index_keys_only(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<String>> {
        self.inner.index_keys_only(schema, field, range).await
    }

    async fn list_all(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<Fetched>> {
        self.inner.list_all(schema, range).await
    }

    async fn list_all_keys(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<String>> {
        self.inner.list_all_keys(schema, range).await
    }
}
