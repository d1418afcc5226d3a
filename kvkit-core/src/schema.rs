//! Schema definitions and the per-type schema registry.
//!
//! A schema is defined once, from a [`SchemaDef`], through a [`SchemaRegistry`]. The registry
//! resolves the declared parents, merges every ancestor's fields (the nearest ancestor wins a
//! name collision, and the type's own fields win over all ancestors), unions the indexed field
//! names, and hands back an immutable `Arc<Schema>` that is safe to share across threads.
//!
//! # Example
//!
//! ```ignore
//! use kvkit::{property::Property, schema::{SchemaDef, SchemaRegistry}};
//!
//! let mut registry = SchemaRegistry::new();
//! let base = registry.define(SchemaDef::new("Base").field("created_by", Property::string()))?;
//! let post = registry.define(
//!     SchemaDef::new("Post")
//!         .extends("Base")
//!         .field("title", Property::string().required().indexed())
//!         .field("tags", Property::list().indexed()),
//! )?;
//!
//! assert!(post.field("created_by").is_some());
//! assert!(post.is_indexed("tags"));
//! ```

use bson::{Bson, Document as Record};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::{error::SchemaError, index::IndexSnapshot, property::Property};

/// The name under which a document's key is exposed. Cannot be used as a field name.
pub const KEY_FIELD: &str = "key";

/// Reported by `invalids()` when a strict schema holds undeclared fields.
pub const EXTRA_FIELDS: &str = "_extra_props";

/// Pseudo field matching every key of a type in index queries.
pub const ALL_KEYS_FIELD: &str = "$bucket";

/// Pseudo field matching a literal key range in index queries.
pub const KEY_RANGE_FIELD: &str = "$key";

/// The declaration of a document type, consumed by [`SchemaRegistry::define`].
#[derive(Debug, Clone)]
pub struct SchemaDef {
    name: String,
    parents: Vec<String>,
    fields: Vec<(String, Property)>,
    defined_fields_only: Option<bool>,
}

impl SchemaDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: Vec::new(),
            fields: Vec::new(),
            defined_fields_only: None,
        }
    }

    /// Adds a direct parent. Parents are listed in priority order: earlier parents win
    /// over later ones when both declare the same field.
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parents.push(parent.into());
        self
    }

    /// Declares a field. Declaring the same name twice keeps the last declaration.
    pub fn field(mut self, name: impl Into<String>, property: Property) -> Self {
        self.fields.push((name.into(), property));
        self
    }

    /// Rejects undeclared fields at serialization time.
    ///
    /// When not set, the setting is inherited from the nearest ancestor that sets it.
    pub fn defined_fields_only(mut self, strict: bool) -> Self {
        self.defined_fields_only = Some(strict);
        self
    }
}

/// The merged, immutable metadata of a document type.
#[derive(Debug)]
pub struct Schema {
    name: String,
    parents: Vec<Arc<Schema>>,
    declared: BTreeMap<String, Property>,
    declared_strict: Option<bool>,
    fields: BTreeMap<String, Property>,
    indexed_fields: BTreeSet<String>,
    defined_fields_only: bool,
}

impl Schema {
    /// The type name. Backends use it to keep types apart.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct parents, in declaration order.
    pub fn parents(&self) -> &[Arc<Schema>] {
        &self.parents
    }

    /// Every field of the type, including inherited ones.
    pub fn fields(&self) -> &BTreeMap<String, Property> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Property> {
        self.fields.get(name)
    }

    /// Names of the fields mirrored into secondary indexes.
    pub fn indexed_fields(&self) -> &BTreeSet<String> {
        &self.indexed_fields
    }

    pub fn is_indexed(&self, name: &str) -> bool {
        self.indexed_fields.contains(name)
    }

    pub fn defined_fields_only(&self) -> bool {
        self.defined_fields_only
    }

    /// Extracts the indexed fields of a serialized record. `Null` values are left out.
    pub fn index_snapshot(&self, record: &Record) -> IndexSnapshot {
        self.indexed_fields
            .iter()
            .filter_map(|name| match record.get(name) {
                None | Some(Bson::Null) => None,
                Some(value) => Some((name.clone(), value.clone())),
            })
            .collect()
    }

    /// Collects every ancestor breadth-first, nearest first, each type once.
    fn ancestors(parents: &[Arc<Schema>]) -> Vec<Arc<Schema>> {
        let mut all: Vec<Arc<Schema>> = Vec::new();
        let mut frontier = parents.to_vec();

        while !frontier.is_empty() {
            let mut next = Vec::new();

            for schema in frontier {
                if all.iter().any(|seen| seen.name == schema.name) {
                    continue;
                }

                next.extend(schema.parents.iter().cloned());
                all.push(schema);
            }

            frontier = next;
        }

        all
    }
}

/// Returns whether `name` is reserved for the key or internal bookkeeping.
pub fn is_reserved_name(name: &str) -> bool {
    name.is_empty()
        || name == KEY_FIELD
        || name.starts_with('_')
        || name.starts_with('$')
        || name.contains('\0')
}

/// An arena of schemas keyed by type name.
///
/// Parents named in a [`SchemaDef`] must be defined before their children. Once defined,
/// a schema never changes.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, Arc<Schema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves, validates and registers a type.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] if the name is taken, a parent is unknown, a field name is
    /// reserved, or an unindexable property is marked `indexed`.
    pub fn define(&mut self, def: SchemaDef) -> Result<Arc<Schema>, SchemaError> {
        if self.schemas.contains_key(&def.name) {
            return Err(SchemaError::DuplicateSchema(def.name));
        }

        let parents = def
            .parents
            .iter()
            .map(|parent| {
                self.schemas
                    .get(parent)
                    .cloned()
                    .ok_or_else(|| SchemaError::UnknownParent(def.name.clone(), parent.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut declared = BTreeMap::new();
        for (name, property) in def.fields {
            if is_reserved_name(&name) {
                return Err(SchemaError::ReservedName(name, def.name));
            }
            if property.is_indexed() && !property.kind().is_indexable() {
                return Err(SchemaError::UnindexableProperty(name, def.name));
            }
            declared.insert(name, property);
        }

        let ancestors = Schema::ancestors(&parents);

        let mut fields = BTreeMap::new();
        let mut indexed_fields = BTreeSet::new();
        for schema in ancestors.iter().rev() {
            merge_declared(&schema.declared, &mut fields, &mut indexed_fields);
        }
        merge_declared(&declared, &mut fields, &mut indexed_fields);

        // an inherited index survives an override, so the overriding kind must support it
        if let Some(name) = indexed_fields
            .iter()
            .find(|name| fields.get(*name).is_some_and(|property| !property.kind().is_indexable()))
        {
            return Err(SchemaError::UnindexableProperty(name.clone(), def.name));
        }

        let defined_fields_only = def
            .defined_fields_only
            .or_else(|| ancestors.iter().find_map(|schema| schema.declared_strict))
            .unwrap_or(false);

        let schema = Arc::new(Schema {
            name: def.name,
            parents,
            declared,
            declared_strict: def.defined_fields_only,
            fields,
            indexed_fields,
            defined_fields_only,
        });

        self.schemas
            .insert(schema.name.clone(), Arc::clone(&schema));

        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn merge_declared(
    declared: &BTreeMap<String, Property>,
    fields: &mut BTreeMap<String, Property>,
    indexed_fields: &mut BTreeSet<String>,
) {
    for (name, property) in declared {
        if property.is_indexed() {
            indexed_fields.insert(name.clone());
        }
        fields.insert(name.clone(), property.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyKind;
    use bson::doc;

    #[test]
    fn merges_ancestors_breadth_first() {
        let mut registry = SchemaRegistry::new();
        registry
            .define(
                SchemaDef::new("Root")
                    .field("a", Property::string())
                    .field("shared", Property::string()),
            )
            .unwrap();
        registry
            .define(
                SchemaDef::new("Middle")
                    .extends("Root")
                    .field("b", Property::string().indexed())
                    .field("shared", Property::integer()),
            )
            .unwrap();
        let leaf = registry
            .define(
                SchemaDef::new("Leaf")
                    .extends("Middle")
                    .field("c", Property::number().indexed()),
            )
            .unwrap();

        let names: Vec<_> = leaf.fields().keys().cloned().collect();
        assert_eq!(names, vec!["a", "b", "c", "shared"]);
        assert!(matches!(
            leaf.field("shared").unwrap().kind(),
            PropertyKind::Number(_)
        ));
        assert_eq!(
            leaf.indexed_fields().iter().cloned().collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[test]
    fn own_fields_override_ancestors() {
        let mut registry = SchemaRegistry::new();
        registry
            .define(SchemaDef::new("Base").field("x", Property::string()))
            .unwrap();
        let child = registry
            .define(SchemaDef::new("Child").extends("Base").field("x", Property::boolean()))
            .unwrap();

        assert!(matches!(child.field("x").unwrap().kind(), PropertyKind::Boolean));
    }

    #[test]
    fn earlier_parent_wins_and_diamonds_are_walked_once() {
        let mut registry = SchemaRegistry::new();
        registry
            .define(SchemaDef::new("Top").field("v", Property::string()))
            .unwrap();
        registry
            .define(SchemaDef::new("Left").extends("Top").field("v", Property::integer()))
            .unwrap();
        registry
            .define(SchemaDef::new("Right").extends("Top").field("v", Property::boolean()))
            .unwrap();
        let bottom = registry
            .define(SchemaDef::new("Bottom").extends("Left").extends("Right"))
            .unwrap();

        assert!(matches!(
            bottom.field("v").unwrap().kind(),
            PropertyKind::Number(_)
        ));
        assert_eq!(Schema::ancestors(bottom.parents()).len(), 3);
    }

    #[test]
    fn strict_mode_is_inherited() {
        let mut registry = SchemaRegistry::new();
        registry
            .define(SchemaDef::new("Strict").defined_fields_only(true))
            .unwrap();
        let child = registry
            .define(SchemaDef::new("Child").extends("Strict"))
            .unwrap();
        let relaxed = registry
            .define(SchemaDef::new("Relaxed").extends("Strict").defined_fields_only(false))
            .unwrap();

        assert!(child.defined_fields_only());
        assert!(!relaxed.defined_fields_only());
    }

    #[test]
    fn rejects_reserved_names() {
        let mut registry = SchemaRegistry::new();
        for name in ["key", "_hidden", "$bucket", ""] {
            let err = registry
                .define(SchemaDef::new(format!("T{name}")).field(name, Property::string()))
                .unwrap_err();
            assert!(matches!(err, SchemaError::ReservedName(..)));
        }
    }

    #[test]
    fn rejects_indexes_on_unsupported_kinds() {
        let mut registry = SchemaRegistry::new();
        let err = registry
            .define(SchemaDef::new("T").field("meta", Property::dict().indexed()))
            .unwrap_err();

        assert_eq!(
            err,
            SchemaError::UnindexableProperty("meta".into(), "T".into())
        );
        assert!(registry.get("T").is_none());
    }

    #[test]
    fn rejects_overrides_that_drop_index_support() {
        let mut registry = SchemaRegistry::new();
        registry
            .define(SchemaDef::new("Base").field("tag", Property::string().indexed()))
            .unwrap();

        let err = registry
            .define(SchemaDef::new("Child").extends("Base").field("tag", Property::dict()))
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnindexableProperty("tag".into(), "Child".into())
        );

        let child = registry
            .define(SchemaDef::new("Other").extends("Base").field("tag", Property::integer()))
            .unwrap();
        assert!(child.is_indexed("tag"));
    }

    #[test]
    fn rejects_unknown_parents_and_duplicates() {
        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.define(SchemaDef::new("Orphan").extends("Missing")),
            Err(SchemaError::UnknownParent(..))
        ));

        registry.define(SchemaDef::new("Once")).unwrap();
        assert!(matches!(
            registry.define(SchemaDef::new("Once")),
            Err(SchemaError::DuplicateSchema(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_skips_nulls_and_unindexed_fields() {
        let mut registry = SchemaRegistry::new();
        let schema = registry
            .define(
                SchemaDef::new("T")
                    .field("name", Property::string().indexed())
                    .field("tags", Property::list().indexed())
                    .field("note", Property::string()),
            )
            .unwrap();

        let snapshot = schema.index_snapshot(&doc! { "name": null, "tags": ["a"], "note": "x" });
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("tags"), Some(&Bson::Array(vec![Bson::String("a".into())])));
    }
}
