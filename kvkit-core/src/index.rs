//! Index values, snapshots and query ranges.
//!
//! Backends mirror indexed fields into rows keyed by `(field, value)`, each holding the set of
//! document keys that currently carry that value. [`IndexValue`] is the totally ordered form a
//! field value takes inside such a row. Scalars map to one value and lists to one value per
//! distinct element; `Null` and values that have no ordering (documents, binaries, ...) are
//! never indexed.

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt,
    ops::Bound,
};

/// The indexed fields of one document as they were last written, keyed by field name.
pub type IndexSnapshot = BTreeMap<String, Bson>;

/// A single indexable value.
///
/// Values of different types order as booleans, then numbers, then strings. Integers and
/// reals share one number domain, so `1`, `1_i64` and `1.0` are the same value, and mixed
/// comparisons are exact over the whole `i64` range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    String(String),
}

impl IndexValue {
    /// Projects a scalar BSON value, or returns `None` if it cannot be indexed.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Boolean(b) => Some(IndexValue::Bool(*b)),
            Bson::Int32(n) => Some(IndexValue::Integer(i64::from(*n))),
            Bson::Int64(n) => Some(IndexValue::Integer(*n)),
            Bson::Double(n) if n.is_nan() => None,
            // -0.0 and 0.0 must share a row
            Bson::Double(n) if *n == 0.0 => Some(IndexValue::Number(0.0)),
            Bson::Double(n) => Some(IndexValue::Number(*n)),
            Bson::String(s) => Some(IndexValue::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_bson(&self) -> Bson {
        match self {
            IndexValue::Bool(b) => Bson::Boolean(*b),
            IndexValue::Integer(n) => Bson::Int64(*n),
            IndexValue::Number(n) => Bson::Double(*n),
            IndexValue::String(s) => Bson::String(s.clone()),
        }
    }

    /// An order-preserving byte encoding: comparing two encodings bytewise gives the same
    /// result as comparing the values.
    pub fn sort_key(&self) -> Vec<u8> {
        let mut key = vec![self.rank()];

        match self {
            IndexValue::Bool(b) => key.push(u8::from(*b)),
            IndexValue::Integer(_) | IndexValue::Number(_) => {
                let (approx, residual) = self.numeric_parts();
                let bits = approx.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
                key.extend_from_slice(&ordered.to_be_bytes());
                key.extend_from_slice(&((residual as u64) ^ (1 << 63)).to_be_bytes());
            }
            IndexValue::String(s) => key.extend_from_slice(s.as_bytes()),
        }

        key
    }

    fn rank(&self) -> u8 {
        match self {
            IndexValue::Bool(_) => 1,
            IndexValue::Integer(_) | IndexValue::Number(_) => 2,
            IndexValue::String(_) => 3,
        }
    }

    /// A number as its nearest `f64` plus the exact integer distance from it.
    ///
    /// Rounding to nearest is monotonic, so ordering by `(approx, residual)` is exact. A real
    /// always has a residual of zero; an integer that rounds onto an integral real carries
    /// the difference, which is small enough for `i64`.
    fn numeric_parts(&self) -> (f64, i64) {
        match self {
            IndexValue::Integer(n) => {
                let approx = *n as f64;
                (approx, (i128::from(*n) - approx as i128) as i64)
            }
            IndexValue::Number(n) => (*n, 0),
            _ => (0.0, 0),
        }
    }
}

impl PartialEq for IndexValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexValue {}

impl PartialOrd for IndexValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexValue::Bool(a), IndexValue::Bool(b)) => a.cmp(b),
            (IndexValue::Integer(a), IndexValue::Integer(b)) => a.cmp(b),
            (IndexValue::String(a), IndexValue::String(b)) => a.cmp(b),
            (
                IndexValue::Integer(_) | IndexValue::Number(_),
                IndexValue::Integer(_) | IndexValue::Number(_),
            ) => {
                let (a, a_rest) = self.numeric_parts();
                let (b, b_rest) = other.numeric_parts();
                a.total_cmp(&b).then(a_rest.cmp(&b_rest))
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl fmt::Display for IndexValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexValue::Bool(b) => write!(f, "{b}"),
            IndexValue::Integer(n) => write!(f, "{n}"),
            IndexValue::Number(n) => write!(f, "{n}"),
            IndexValue::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// The distinct indexable values carried by a field value.
///
/// A list contributes each distinct indexable element; a scalar contributes itself.
pub fn index_values(value: &Bson) -> BTreeSet<IndexValue> {
    match value {
        Bson::Array(items) => items
            .iter()
            .filter_map(IndexValue::from_bson)
            .collect(),
        scalar => IndexValue::from_bson(scalar)
            .into_iter()
            .collect(),
    }
}

/// An inclusive range of index values. An exact match is a range whose ends are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRange {
    pub start: IndexValue,
    pub end: IndexValue,
}

impl IndexRange {
    pub fn exact(value: IndexValue) -> Self {
        Self {
            start: value.clone(),
            end: value,
        }
    }

    pub fn between(start: IndexValue, end: IndexValue) -> Self {
        Self { start, end }
    }

    /// `true` when no value can satisfy `start <= v <= end`.
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, value: &IndexValue) -> bool {
        &self.start <= value && value <= &self.end
    }
}

/// A selection over the key space of one document type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRange {
    /// Every key.
    All,
    /// Exactly one key.
    Exact(String),
    /// Keys `k` with `start <= k <= end`.
    Between(String, String),
    /// Keys `k` with `k <= end`.
    UpTo(String),
}

impl KeyRange {
    /// Builds a range from optional bounds: no bounds select everything, a lone start is
    /// an exact match, and both bounds form an inclusive range.
    pub fn from_bounds(start: Option<&str>, end: Option<&str>) -> Self {
        match (start, end) {
            (None, None) => KeyRange::All,
            (Some(start), None) => KeyRange::Exact(start.to_string()),
            (Some(start), Some(end)) => KeyRange::Between(start.to_string(), end.to_string()),
            (None, Some(end)) => KeyRange::UpTo(end.to_string()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Exact(exact) => key == exact.as_str(),
            KeyRange::Between(start, end) => start.as_str() <= key && key <= end.as_str(),
            KeyRange::UpTo(end) => key <= end.as_str(),
        }
    }

    /// Bounds suitable for `BTreeMap::range`, or `None` if the range is empty.
    pub fn bounds(&self) -> Option<(Bound<&str>, Bound<&str>)> {
        match self {
            KeyRange::All => Some((Bound::Unbounded, Bound::Unbounded)),
            KeyRange::Exact(key) => Some((Bound::Included(key.as_str()), Bound::Included(key.as_str()))),
            KeyRange::Between(start, end) if start > end => None,
            KeyRange::Between(start, end) => {
                Some((Bound::Included(start.as_str()), Bound::Included(end.as_str())))
            }
            KeyRange::UpTo(end) => Some((Bound::Unbounded, Bound::Included(end.as_str()))),
        }
    }
}
