//! Schema-aware in-memory records.
//!
//! An [`EmDocument`] holds the current values of one record of a schema together with the
//! set of fields whose stored form has not been converted yet. It is the part of a document
//! that knows nothing about keys or backends: defaults, merging, validation, and conversion
//! to and from the stored record.
//!
//! Values arrive through two doors:
//!
//! - [`EmDocument::merge`] and [`EmDocument::set`] take application data. Declared fields go
//!   through the property's `on_set` hook and numeric normalization, nothing is validated.
//! - [`EmDocument::deserialize`] takes a stored record and runs `from_storage`, except for
//!   `load_on_demand` fields, which stay in stored form until [`EmDocument::get`] reads them.
//!
//! Validation happens once, on the way out, in [`EmDocument::serialize`].
//!
//! # Example
//!
//! ```ignore
//! use kvkit::{bson::doc, emdocument::EmDocument};
//!
//! let mut em = EmDocument::with_data(schema, doc! { "name": "x" });
//! em.set("score", 3);
//!
//! assert!(em.is_valid());
//! let stored = em.serialize(&[])?;
//! ```

use bson::{Bson, Document as Record};
use std::{collections::BTreeSet, sync::Arc};
use tracing::trace;

use crate::{
    error::{DocumentError, DocumentResult},
    schema::{EXTRA_FIELDS, Schema},
};

/// An embeddable, schema-typed record without a key.
#[derive(Debug, Clone)]
pub struct EmDocument {
    schema: Arc<Schema>,
    values: Record,
    pending_load: BTreeSet<String>,
}

impl EmDocument {
    /// Creates a record holding the default value of every declared field.
    pub fn new(schema: Arc<Schema>) -> Self {
        let mut em = Self {
            schema,
            values: Record::new(),
            pending_load: BTreeSet::new(),
        };
        em.clear(true);
        em
    }

    /// Creates a record with defaults, then merges application data into it.
    pub fn with_data(schema: Arc<Schema>, data: Record) -> Self {
        let mut em = Self::new(schema);
        em.merge(data, false);
        em
    }

    /// Creates a record with defaults, then deserializes a stored record into it.
    pub fn load(schema: Arc<Schema>, stored: Record) -> DocumentResult<Self> {
        let mut em = Self::new(schema);
        em.deserialize(stored)?;
        Ok(em)
    }

    /// Defaults overlaid with `values` as they are, skipping every hook.
    pub(crate) fn from_values(schema: Arc<Schema>, values: Record) -> Self {
        let mut em = Self::new(schema);
        for (name, value) in values {
            em.values.insert(name, value);
        }
        em
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The current values. Fields still pending conversion are in their stored form.
    pub fn values(&self) -> &Record {
        &self.values
    }

    /// Resets every declared field to its default (or to `Null` when `to_default` is
    /// `false`) and drops undeclared fields and pending conversions.
    pub fn clear(&mut self, to_default: bool) -> &mut Self {
        self.values = Record::new();
        self.pending_load.clear();

        for (name, property) in self.schema.fields() {
            let value = if to_default {
                property.default_value()
            } else {
                Bson::Null
            };
            self.values.insert(name.clone(), value);
        }

        self
    }

    /// Merges application data.
    ///
    /// A `Null` for a declared field is skipped unless `merge_none` is set, so the field
    /// keeps its current value. Undeclared fields are stored as they are; a strict schema
    /// reports them when the record is serialized.
    pub fn merge(&mut self, data: Record, merge_none: bool) -> &mut Self {
        for (name, value) in data {
            if !merge_none && matches!(value, Bson::Null) && self.schema.field(&name).is_some() {
                continue;
            }
            self.set(name, value);
        }
        self
    }

    /// Merges a JSON object, see [`EmDocument::merge`].
    pub fn merge_json(&mut self, json: &str, merge_none: bool) -> DocumentResult<&mut Self> {
        let data: Record = serde_json::from_str(json)?;
        Ok(self.merge(data, merge_none))
    }

    /// Writes one field, running the property's `on_set` hook for declared fields.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Bson>) -> &mut Self {
        let name = name.into();
        let value = match self.schema.field(&name) {
            Some(property) => property.prepare(value.into()),
            None => value.into(),
        };

        self.pending_load.remove(&name);
        self.values.insert(name, value);
        self
    }

    /// Reads one field, converting it from its stored form first if it was loaded lazily.
    ///
    /// The conversion runs once; a failed conversion leaves the field pending.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::UnknownField`] if the field is neither declared nor set.
    pub fn get(&mut self, name: &str) -> DocumentResult<&Bson> {
        if self.pending_load.contains(name) {
            let schema = Arc::clone(&self.schema);
            let stored = self.values.get(name).cloned();
            if let (Some(property), Some(stored)) = (schema.field(name), stored) {
                let value = property.from_storage(stored)?;
                trace!(schema = schema.name(), field = name, "converted lazily loaded field");
                self.values.insert(name, value);
            }
            self.pending_load.remove(name);
        }

        self.values
            .get(name)
            .ok_or_else(|| DocumentError::UnknownField(name.to_string(), self.schema.name().to_string()))
    }

    /// Unsets a field. Declared fields become `Null`; undeclared fields are dropped.
    pub fn remove(&mut self, name: &str) -> DocumentResult<()> {
        if !self.values.contains_key(name) {
            return Err(DocumentError::UnknownField(
                name.to_string(),
                self.schema.name().to_string(),
            ));
        }

        self.pending_load.remove(name);
        if self.schema.field(name).is_some() {
            self.values.insert(name, Bson::Null);
        } else {
            self.values.remove(name);
        }

        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns whether a lazily loaded field is still in its stored form.
    pub fn is_pending(&self, name: &str) -> bool {
        self.pending_load.contains(name)
    }

    /// Loads a stored record.
    ///
    /// Every field is converted before anything is written, so a failing conversion leaves
    /// the record untouched. Fields absent from `stored` keep their current values.
    pub fn deserialize(&mut self, stored: Record) -> DocumentResult<&mut Self> {
        let mut converted = Record::new();
        let mut pending = BTreeSet::new();

        for (name, value) in stored {
            let value = match self.schema.field(&name) {
                Some(property) if property.is_load_on_demand() => {
                    pending.insert(name.clone());
                    value
                }
                Some(property) => property.from_storage(value)?,
                None => value,
            };
            converted.insert(name, value);
        }

        for (name, value) in converted {
            self.pending_load.remove(&name);
            self.values.insert(name, value);
        }
        self.pending_load.extend(pending);

        Ok(self)
    }

    /// Validates and converts the record into its stored form, leaving out `exclude`.
    ///
    /// Fields still pending conversion are emitted in the stored form they were loaded in.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Validation`] for the first field that fails validation and
    /// [`DocumentError::UndefinedProperty`] for an undeclared field on a strict schema.
    pub fn serialize(&self, exclude: &[&str]) -> DocumentResult<Record> {
        let mut stored = Record::new();

        for (name, value) in &self.values {
            if exclude.contains(&name.as_str()) {
                continue;
            }

            let value = match self.schema.field(name) {
                Some(_) if self.pending_load.contains(name) => value.clone(),
                Some(property) => {
                    if !property.validate(value) {
                        return Err(DocumentError::validation(name.as_str(), value.clone()));
                    }
                    property.to_storage(value.clone())?
                }
                None if self.schema.defined_fields_only() => {
                    return Err(DocumentError::UndefinedProperty(
                        name.clone(),
                        self.schema.name().to_string(),
                    ));
                }
                None => value.clone(),
            };

            stored.insert(name.clone(), value);
        }

        Ok(stored)
    }

    /// Serializes the record to a JSON object.
    pub fn serialize_json(&self, exclude: &[&str]) -> DocumentResult<String> {
        Ok(serde_json::to_string(&self.serialize(exclude)?)?)
    }

    /// `true` iff [`EmDocument::serialize`] would succeed validation.
    pub fn is_valid(&self) -> bool {
        self.invalids().is_empty()
    }

    /// Every declared field whose value fails validation, followed by
    /// [`EXTRA_FIELDS`] if a strict schema holds undeclared fields.
    pub fn invalids(&self) -> Vec<String> {
        let mut invalid: Vec<String> = self
            .schema
            .fields()
            .iter()
            .filter(|(name, _)| !self.pending_load.contains(name.as_str()))
            .filter(|(name, property)| !property.validate(self.values.get(name.as_str()).unwrap_or(&Bson::Null)))
            .map(|(name, _)| name.clone())
            .collect();

        if self.schema.defined_fields_only()
            && self
                .values
                .keys()
                .any(|name| self.schema.field(name).is_none())
        {
            invalid.push(EXTRA_FIELDS.to_string());
        }

        invalid
    }

    /// Consumes the record, converting every pending field, and returns its values.
    pub fn into_values(mut self) -> DocumentResult<Record> {
        let pending: Vec<String> = self.pending_load.iter().cloned().collect();
        for name in pending {
            self.get(&name)?;
        }
        Ok(self.values)
    }
}
