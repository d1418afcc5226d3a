//! In-memory storage implementation for kvkit.
//!
//! Records are kept BSON-encoded in ordered maps, one bucket per document type, next to
//! that type's index rows. Every write takes the store's write lock once and applies the
//! record and its index batch under it, so readers never observe half a batch.

use async_trait::async_trait;
use bson::Document as Record;
use mea::rwlock::RwLock;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, warn};

use kvkit_core::{
    backend::{Backend, BackendBuilder, Fetched, IndexUpdate},
    error::{DocumentError, DocumentResult},
    index::{IndexRange, IndexSnapshot, IndexValue, KeyRange},
    reconcile::{IndexBatch, IndexOp, reconcile},
    schema::Schema,
};

/// type name -> bucket
type BucketMap = HashMap<String, Bucket>;

#[derive(Debug)]
struct StoredRecord {
    bytes: Vec<u8>,
    /// The indexed fields as of this write.
    indexed: IndexSnapshot,
}

#[derive(Debug)]
struct IndexRow {
    value: IndexValue,
    keys: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Bucket {
    records: BTreeMap<String, StoredRecord>,
    /// Keyed by [`row_key`], so one field's rows are contiguous and in value order.
    index: BTreeMap<Vec<u8>, IndexRow>,
}

impl Bucket {
    fn apply(&mut self, batch: &IndexBatch) {
        let key = batch.key();

        for op in batch.ops() {
            let row = row_key(op.field(), op.value());

            match op {
                IndexOp::Add { value, .. } => {
                    self.index
                        .entry(row)
                        .or_insert_with(|| IndexRow {
                            value: value.clone(),
                            keys: BTreeSet::new(),
                        })
                        .keys
                        .insert(key.to_string());
                }
                IndexOp::Remove { .. } => {
                    if let Some(row) = self.index.get_mut(&row) {
                        row.keys.remove(key);
                    }
                }
                IndexOp::Prune { .. } => {
                    if self.index.get(&row).is_some_and(|row| row.keys.is_empty()) {
                        self.index.remove(&row);
                    }
                }
            }
        }
    }

    /// Keys with a value of `field` in `range`, each once, by smallest matching value.
    fn matching_keys(&self, field: &str, range: &IndexRange) -> Vec<String> {
        if range.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for row in self
            .index
            .range(row_key(field, &range.start)..=row_key(field, &range.end))
            .map(|(_, row)| row)
        {
            for key in &row.keys {
                if seen.insert(key.as_str()) {
                    keys.push(key.clone());
                }
            }
        }

        keys
    }

    fn keys_in(&self, range: &KeyRange) -> Vec<String> {
        match range.bounds() {
            Some(bounds) => self
                .records
                .range::<str, _>(bounds)
                .map(|(key, _)| key.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn fetch(&self, key: &str) -> DocumentResult<Option<Fetched>> {
        match self.records.get(key) {
            Some(stored) => Ok(Some(Fetched::new(key, decode(&stored.bytes)?))),
            None => Ok(None),
        }
    }
}

/// `field`, a NUL separator, then the value's order-preserving encoding. Field names never
/// contain NUL, so no field's rows run into another's.
fn row_key(field: &str, value: &IndexValue) -> Vec<u8> {
    let mut key = Vec::with_capacity(field.len() + 16);
    key.extend_from_slice(field.as_bytes());
    key.push(0);
    key.extend_from_slice(&value.sort_key());
    key
}

fn decode(bytes: &[u8]) -> DocumentResult<Record> {
    Ok(bson::de::deserialize_from_slice(bytes)?)
}

fn check_indexed(schema: &Schema, field: &str) -> DocumentResult<()> {
    if schema.is_indexed(field) {
        Ok(())
    } else {
        Err(DocumentError::NotIndexed(
            field.to_string(),
            schema.name().to_string(),
        ))
    }
}

/// Thread-safe in-memory storage backend.
///
/// This struct implements the [`Backend`] trait to provide a complete store, including
/// secondary indexes, that operates entirely in memory using async-aware read-write locks.
///
/// # Thread Safety
///
/// `MemoryBackend` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// safely shared across async tasks. Multiple clones of the same instance share the same
/// underlying data; separate instances share nothing.
///
/// # Stale snapshots
///
/// With snapshot verification on (the default), a write whose `previous` snapshot does not
/// match what is stored for the key is re-diffed against the stored snapshot before it is
/// applied, so index rows always follow the stored records even when two document
/// instances for one key race.
///
/// # Example
///
/// ```ignore
/// use kvkit_memory::MemoryBackend;
/// use kvkit::store::DocumentStore;
///
/// let backend = MemoryBackend::builder()
///     .verify_snapshots(true)
///     .build()
///     .await?;
/// let store = DocumentStore::new(backend);
/// ```
#[derive(Clone, Debug)]
pub struct MemoryBackend {
    buckets: Arc<RwLock<BucketMap>>,
    verify_snapshots: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a new empty in-memory backend with snapshot verification on.
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(RwLock::new(BucketMap::new())),
            verify_snapshots: true,
        }
    }

    /// Creates a builder for constructing a `MemoryBackend` with custom options.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let backend = MemoryBackend::builder().verify_snapshots(false).build().await?;
    /// ```
    pub fn builder() -> MemoryBackendBuilder {
        MemoryBackendBuilder::default()
    }

    /// The index rows of `field` for the type `type_name`, in value order, with their keys.
    ///
    /// Meant for inspection and tests.
    pub async fn index_rows(&self, type_name: &str, field: &str) -> Vec<(IndexValue, Vec<String>)> {
        let buckets = self.buckets.read().await;
        let Some(bucket) = buckets.get(type_name) else {
            return Vec::new();
        };

        let mut prefix = field.as_bytes().to_vec();
        prefix.push(0);

        bucket
            .index
            .range(prefix.clone()..)
            .take_while(|(row, _)| row.starts_with(&prefix))
            .map(|(_, row)| (row.value.clone(), row.keys.iter().cloned().collect()))
            .collect()
    }

    /// The number of records stored for the type `type_name`.
    pub async fn len(&self, type_name: &str) -> usize {
        self.buckets
            .read()
            .await
            .get(type_name)
            .map_or(0, |bucket| bucket.records.len())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get(&self, schema: &Schema, key: &str) -> DocumentResult<Fetched> {
        let buckets = self.buckets.read().await;

        buckets
            .get(schema.name())
            .map(|bucket| bucket.fetch(key))
            .transpose()?
            .flatten()
            .ok_or_else(|| DocumentError::NotFound(key.to_string(), schema.name().to_string()))
    }

    async fn save(
        &self,
        schema: &Schema,
        key: &str,
        record: Record,
        update: IndexUpdate,
    ) -> DocumentResult<()> {
        let bytes = bson::ser::serialize_to_vec(&record)?;

        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(schema.name().to_string())
            .or_default();

        let stored = bucket
            .records
            .get(key)
            .map(|stored| stored.indexed.clone())
            .unwrap_or_default();

        let batch = if self.verify_snapshots && stored != update.previous {
            warn!(
                schema = schema.name(),
                key,
                "stale index snapshot on save, reconciling against stored record"
            );
            reconcile(&stored, &update.current, key)
        } else {
            update.batch
        };

        bucket.apply(&batch);
        bucket.records.insert(
            key.to_string(),
            StoredRecord {
                bytes,
                indexed: update.current,
            },
        );

        debug!(schema = schema.name(), key, ops = batch.len(), "saved record");
        Ok(())
    }

    async fn delete(
        &self,
        schema: &Schema,
        key: &str,
        update: Option<IndexUpdate>,
    ) -> DocumentResult<()> {
        let mut buckets = self.buckets.write().await;

        let Some(bucket) = buckets.get_mut(schema.name()) else {
            return Ok(());
        };
        let Some(stored) = bucket.records.remove(key) else {
            return Ok(());
        };

        let batch = match update {
            Some(update) if !self.verify_snapshots || update.previous == stored.indexed => update.batch,
            Some(_) => {
                warn!(
                    schema = schema.name(),
                    key,
                    "stale index snapshot on delete, reconciling against stored record"
                );
                reconcile(&stored.indexed, &IndexSnapshot::new(), key)
            }
            None => reconcile(&stored.indexed, &IndexSnapshot::new(), key),
        };

        bucket.apply(&batch);

        debug!(schema = schema.name(), key, ops = batch.len(), "deleted record");
        Ok(())
    }

    async fn index(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<Fetched>> {
        check_indexed(schema, field)?;

        let buckets = self.buckets.read().await;
        let Some(bucket) = buckets.get(schema.name()) else {
            return Ok(Vec::new());
        };

        let mut fetched = Vec::new();
        for key in bucket.matching_keys(field, range) {
            fetched.extend(bucket.fetch(&key)?);
        }

        Ok(fetched)
    }

    async fn index_keys_only(
        &self,
        schema: &Schema,
        field: &str,
        range: &IndexRange,
    ) -> DocumentResult<Vec<String>> {
        check_indexed(schema, field)?;

        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(schema.name())
            .map(|bucket| bucket.matching_keys(field, range))
            .unwrap_or_default())
    }

    async fn list_all(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<Fetched>> {
        let buckets = self.buckets.read().await;
        let Some(bucket) = buckets.get(schema.name()) else {
            return Ok(Vec::new());
        };

        let mut fetched = Vec::new();
        for key in bucket.keys_in(range) {
            fetched.extend(bucket.fetch(&key)?);
        }

        Ok(fetched)
    }

    async fn list_all_keys(&self, schema: &Schema, range: &KeyRange) -> DocumentResult<Vec<String>> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .get(schema.name())
            .map(|bucket| bucket.keys_in(range))
            .unwrap_or_default())
    }
}

/// Builder for constructing [`MemoryBackend`] instances.
///
/// # Example
///
/// ```ignore
/// use kvkit_memory::MemoryBackend;
/// use kvkit::backend::BackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let backend = MemoryBackend::builder().build().await.unwrap();
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackendBuilder {
    verify_snapshots: bool,
}

impl Default for MemoryBackendBuilder {
    fn default() -> Self {
        Self {
            verify_snapshots: true,
        }
    }
}

impl MemoryBackendBuilder {
    /// Whether writes carrying a stale `previous` snapshot are re-diffed against the stored
    /// record. When off, the caller's batch is applied as given.
    pub fn verify_snapshots(mut self, verify: bool) -> Self {
        self.verify_snapshots = verify;
        self
    }
}

#[async_trait]
impl BackendBuilder for MemoryBackendBuilder {
    type Backend = MemoryBackend;

    async fn build(self) -> DocumentResult<Self::Backend> {
        Ok(MemoryBackend {
            verify_snapshots: self.verify_snapshots,
            ..MemoryBackend::new()
        })
    }
}
