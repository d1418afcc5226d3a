//! Index reconciliation.
//!
//! [`reconcile`] compares the indexed fields a document had when it was last written with the
//! fields it is about to be written with, and produces the smallest [`IndexBatch`] that moves
//! the backend's index rows from the first state to the second. The computation is pure: it
//! never fails and never touches storage, so it is safe to run concurrently for unrelated
//! documents.
//!
//! A batch lists every removal and addition, followed by one [`IndexOp::Prune`] per removed
//! `(field, value)` pair asking the backend to drop the row if no key is left in it. Backends
//! apply a batch as one unit together with the record write it belongs to.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::index::{IndexSnapshot, IndexValue, index_values};

/// A single index mutation for one document key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexOp {
    /// Add the key to the `(field, value)` row, creating the row if needed.
    Add { field: String, value: IndexValue },
    /// Remove the key from the `(field, value)` row.
    Remove { field: String, value: IndexValue },
    /// Drop the `(field, value)` row if its key set is empty.
    Prune { field: String, value: IndexValue },
}

impl IndexOp {
    pub fn field(&self) -> &str {
        match self {
            IndexOp::Add { field, .. } | IndexOp::Remove { field, .. } | IndexOp::Prune { field, .. } => field,
        }
    }

    pub fn value(&self) -> &IndexValue {
        match self {
            IndexOp::Add { value, .. } | IndexOp::Remove { value, .. } | IndexOp::Prune { value, .. } => value,
        }
    }
}

/// The index mutations of one save or delete, applied atomically by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexBatch {
    key: String,
    ops: Vec<IndexOp>,
}

impl IndexBatch {
    /// An empty batch for `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ops: Vec::new(),
        }
    }

    /// The document key every operation refers to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ops(&self) -> &[IndexOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<IndexOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn additions(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, IndexOp::Add { .. }))
            .count()
    }

    pub fn removals(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, IndexOp::Remove { .. }))
            .count()
    }
}

/// Computes the index mutations that turn `old` into `new` for the document `key`.
///
/// Scalars and lists are handled alike: each field value is reduced to its set of distinct
/// indexable values, so duplicated list elements produce one operation, values present on
/// both sides produce none, and `Null` contributes nothing.
pub fn reconcile(old: &IndexSnapshot, new: &IndexSnapshot, key: &str) -> IndexBatch {
    let mut batch = IndexBatch::new(key);
    let mut prunes = Vec::new();

    let fields: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    for field in fields {
        let before = old.get(field).map(index_values).unwrap_or_default();
        let after = new.get(field).map(index_values).unwrap_or_default();

        for value in before.difference(&after) {
            batch.ops.push(IndexOp::Remove {
                field: field.clone(),
                value: value.clone(),
            });
            prunes.push(IndexOp::Prune {
                field: field.clone(),
                value: value.clone(),
            });
        }

        for value in after.difference(&before) {
            batch.ops.push(IndexOp::Add {
                field: field.clone(),
                value: value.clone(),
            });
        }
    }

    batch.ops.extend(prunes);
    batch
}
