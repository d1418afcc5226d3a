//! Field declarations: types, defaults, validation and storage conversion.
//!
//! A [`Property`] describes one field of a schema. It knows whether the field is required,
//! how to produce its default value, which custom validators it must pass, whether it is
//! converted lazily on first read, and whether it is mirrored into a secondary index.
//!
//! Every property converts values in two directions:
//!
//! - [`Property::to_storage`] turns an in-memory value into the storage form written to a
//!   backend.
//! - [`Property::from_storage`] turns a stored value back into its in-memory form.
//!
//! For every value accepted by [`Property::validate`] the two are exact inverses, and `Null`
//! maps to `Null` in both directions. Custom properties may opt out of the `Null` rule
//! through [`Converter::handles_null`].
//!
//! # Example
//!
//! ```ignore
//! use kvkit::property::Property;
//!
//! let name = Property::string().required().indexed();
//! let score = Property::number().default(0.0).validator(|v| v.as_f64().is_some_and(|n| n >= 0.0));
//! let tags = Property::list().indexed();
//! ```

use bson::{Bson, Document as Record};
use std::{fmt, sync::Arc};

use crate::{emdocument::EmDocument, error::DocumentResult, schema::Schema};

/// A custom validation predicate. All validators of a property must pass.
pub type Validator = Arc<dyn Fn(&Bson) -> bool + Send + Sync>;

/// A value transformer applied whenever a field is written through `merge` or `set`.
pub type SetHook = Arc<dyn Fn(Bson) -> Bson + Send + Sync>;

/// A property's default: a static value, or a factory invoked for every new document.
#[derive(Clone)]
pub enum DefaultValue {
    /// Cloned into every new document.
    Static(Bson),
    /// Called once per document.
    Factory(Arc<dyn Fn() -> Bson + Send + Sync>),
}

impl DefaultValue {
    fn resolve(&self) -> Bson {
        match self {
            DefaultValue::Static(value) => value.clone(),
            DefaultValue::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// How a numeric property is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberKind {
    /// Stored as a double. Integers are widened.
    Real,
    /// Stored as a 64-bit integer. Doubles without a fractional part are accepted.
    Integer,
}

/// Type-specific behaviour for properties that are not covered by the built-in kinds.
///
/// `to_storage` and `from_storage` must be inverses for every value `validate` accepts.
pub trait Converter: Send + Sync + fmt::Debug {
    /// Type check applied after the common required/validator checks.
    fn validate(&self, _value: &Bson) -> bool {
        true
    }

    /// Converts an in-memory value to its storage form.
    fn to_storage(&self, value: Bson) -> DocumentResult<Bson>;

    /// Converts a stored value back to its in-memory form.
    fn from_storage(&self, value: Bson) -> DocumentResult<Bson>;

    /// When `true`, `Null` is passed to the conversions instead of short-circuiting to `Null`.
    fn handles_null(&self) -> bool {
        false
    }
}

/// The type of a property.
#[derive(Clone)]
pub enum PropertyKind {
    /// Any value, stored as is.
    Any,
    /// A UTF-8 string.
    String,
    /// A number, see [`NumberKind`].
    Number(NumberKind),
    /// A boolean.
    Boolean,
    /// A nested mapping, stored as is.
    Dict,
    /// A list of values.
    List,
    /// A nested document validated and converted with its own schema.
    Embedded(Arc<Schema>),
    /// A list of nested documents sharing one schema. Elements may be `Null`.
    EmbeddedList(Arc<Schema>),
    /// The key of a document of the named type.
    Reference(String),
    /// User-supplied conversions.
    Custom(Arc<dyn Converter>),
}

impl PropertyKind {
    /// Returns whether values of this kind may be mirrored into a secondary index.
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            PropertyKind::String
                | PropertyKind::Number(_)
                | PropertyKind::Boolean
                | PropertyKind::List
                | PropertyKind::Reference(_)
        )
    }

    /// Returns whether this kind stores numbers.
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyKind::Number(_))
    }

    /// A short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            PropertyKind::Any => "any",
            PropertyKind::String => "string",
            PropertyKind::Number(NumberKind::Real) => "number",
            PropertyKind::Number(NumberKind::Integer) => "integer",
            PropertyKind::Boolean => "boolean",
            PropertyKind::Dict => "dict",
            PropertyKind::List => "list",
            PropertyKind::Embedded(_) => "embedded",
            PropertyKind::EmbeddedList(_) => "embedded_list",
            PropertyKind::Reference(_) => "reference",
            PropertyKind::Custom(_) => "custom",
        }
    }

    fn accepts(&self, value: &Bson) -> bool {
        match self {
            PropertyKind::Any => true,
            PropertyKind::String => matches!(value, Bson::String(_)),
            PropertyKind::Number(NumberKind::Real) => as_f64(value).is_some_and(|n| !n.is_nan()),
            PropertyKind::Number(NumberKind::Integer) => as_i64(value).is_some(),
            PropertyKind::Boolean => matches!(value, Bson::Boolean(_)),
            PropertyKind::Dict => matches!(value, Bson::Document(_)),
            PropertyKind::List => matches!(value, Bson::Array(_)),
            PropertyKind::Embedded(schema) => match value {
                Bson::Document(values) => embedded_is_valid(schema, values),
                _ => false,
            },
            PropertyKind::EmbeddedList(schema) => match value {
                Bson::Array(items) => items.iter().all(|item| match item {
                    Bson::Null => true,
                    Bson::Document(values) => embedded_is_valid(schema, values),
                    _ => false,
                }),
                _ => false,
            },
            PropertyKind::Reference(_) => matches!(value, Bson::String(key) if !key.is_empty()),
            PropertyKind::Custom(converter) => converter.validate(value),
        }
    }

    fn default_value(&self) -> Bson {
        match self {
            PropertyKind::Dict => Bson::Document(Record::new()),
            PropertyKind::List | PropertyKind::EmbeddedList(_) => Bson::Array(Vec::new()),
            _ => Bson::Null,
        }
    }
}

impl fmt::Debug for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyKind::Embedded(schema) | PropertyKind::EmbeddedList(schema) => {
                write!(f, "{}({})", self.name(), schema.name())
            }
            PropertyKind::Reference(target) => write!(f, "reference({target})"),
            PropertyKind::Custom(converter) => write!(f, "custom({converter:?})"),
            _ => f.write_str(self.name()),
        }
    }
}

/// The declaration of a single field.
///
/// Properties are built with a kind constructor followed by modifiers, and are immutable
/// once they are part of a [`Schema`].
#[derive(Clone)]
pub struct Property {
    kind: PropertyKind,
    required: bool,
    default: Option<DefaultValue>,
    validators: Vec<Validator>,
    on_set: Option<SetHook>,
    load_on_demand: bool,
    indexed: bool,
}

impl Property {
    /// Creates a property of the given kind with no modifiers.
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            required: false,
            default: None,
            validators: Vec::new(),
            on_set: None,
            load_on_demand: false,
            indexed: false,
        }
    }

    /// A property accepting any value.
    pub fn any() -> Self {
        Self::new(PropertyKind::Any)
    }

    /// A string property.
    pub fn string() -> Self {
        Self::new(PropertyKind::String)
    }

    /// A real-valued number property, stored as a double.
    pub fn number() -> Self {
        Self::new(PropertyKind::Number(NumberKind::Real))
    }

    /// An integer property, stored as a 64-bit integer.
    pub fn integer() -> Self {
        Self::new(PropertyKind::Number(NumberKind::Integer))
    }

    /// A boolean property.
    pub fn boolean() -> Self {
        Self::new(PropertyKind::Boolean)
    }

    /// A nested mapping. Defaults to an empty mapping.
    pub fn dict() -> Self {
        Self::new(PropertyKind::Dict)
    }

    /// A list. Defaults to an empty list.
    pub fn list() -> Self {
        Self::new(PropertyKind::List)
    }

    /// A nested document of the given schema.
    pub fn embedded(schema: &Arc<Schema>) -> Self {
        Self::new(PropertyKind::Embedded(Arc::clone(schema)))
    }

    /// A list of nested documents of the given schema. Defaults to an empty list.
    pub fn embedded_list(schema: &Arc<Schema>) -> Self {
        Self::new(PropertyKind::EmbeddedList(Arc::clone(schema)))
    }

    /// The key of a document of the named type.
    pub fn reference(target: impl Into<String>) -> Self {
        Self::new(PropertyKind::Reference(target.into()))
    }

    /// A property with user-supplied conversions.
    pub fn custom(converter: impl Converter + 'static) -> Self {
        Self::new(PropertyKind::Custom(Arc::new(converter)))
    }

    /// Rejects `Null`.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Uses a static default value.
    pub fn default(mut self, value: impl Into<Bson>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    /// Generates the default value per document.
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Bson + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    /// Adds a validator. Validators run in declaration order and all must pass.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Bson) -> bool + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    /// Transforms values written through `merge` or `set`.
    pub fn on_set<F>(mut self, hook: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        self.on_set = Some(Arc::new(hook));
        self
    }

    /// Defers `from_storage` until the field is first read.
    pub fn load_on_demand(mut self) -> Self {
        self.load_on_demand = true;
        self
    }

    /// Mirrors the field into a secondary index.
    ///
    /// Only valid on indexable kinds; the schema rejects anything else when it is defined.
    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_indexed(&self) -> bool {
        self.indexed
    }

    pub fn is_load_on_demand(&self) -> bool {
        self.load_on_demand
    }

    /// Resolves the default value for a new document.
    pub fn default_value(&self) -> Bson {
        match &self.default {
            Some(default) => default.resolve(),
            None => self.kind.default_value(),
        }
    }

    /// Checks a value against this property.
    ///
    /// `Null` is valid iff the property is not required. Any other value must pass every
    /// custom validator and the kind's own type check.
    pub fn validate(&self, value: &Bson) -> bool {
        if matches!(value, Bson::Null) {
            return !self.required;
        }

        self.validators
            .iter()
            .all(|validator| validator(value))
            && self.kind.accepts(value)
    }

    /// Converts an in-memory value to its storage form.
    pub fn to_storage(&self, value: Bson) -> DocumentResult<Bson> {
        if matches!(value, Bson::Null) && !self.handles_null() {
            return Ok(Bson::Null);
        }

        Ok(match &self.kind {
            PropertyKind::Number(kind) => normalize_number(*kind, value),
            PropertyKind::Embedded(schema) => match value {
                Bson::Document(values) => Bson::Document(embedded_to_storage(schema, values)?),
                other => other,
            },
            PropertyKind::EmbeddedList(schema) => match value {
                Bson::Array(items) => Bson::Array(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Bson::Document(values) => {
                                Ok(Bson::Document(embedded_to_storage(schema, values)?))
                            }
                            other => Ok(other),
                        })
                        .collect::<DocumentResult<Vec<_>>>()?,
                ),
                other => other,
            },
            PropertyKind::Custom(converter) => converter.to_storage(value)?,
            _ => value,
        })
    }

    /// Converts a stored value back to its in-memory form.
    pub fn from_storage(&self, value: Bson) -> DocumentResult<Bson> {
        if matches!(value, Bson::Null) && !self.handles_null() {
            return Ok(Bson::Null);
        }

        Ok(match &self.kind {
            PropertyKind::Number(kind) => normalize_number(*kind, value),
            PropertyKind::Embedded(schema) => match value {
                Bson::Document(stored) => Bson::Document(embedded_from_storage(schema, stored)?),
                other => other,
            },
            PropertyKind::EmbeddedList(schema) => match value {
                Bson::Array(items) => Bson::Array(
                    items
                        .into_iter()
                        .map(|item| match item {
                            Bson::Document(stored) => {
                                Ok(Bson::Document(embedded_from_storage(schema, stored)?))
                            }
                            other => Ok(other),
                        })
                        .collect::<DocumentResult<Vec<_>>>()?,
                ),
                other => other,
            },
            PropertyKind::Custom(converter) => converter.from_storage(value)?,
            _ => value,
        })
    }

    /// Prepares a value written by application code: runs the `on_set` hook, then brings
    /// numbers into their canonical stored type.
    pub(crate) fn prepare(&self, value: Bson) -> Bson {
        let value = match &self.on_set {
            Some(hook) => hook(value),
            None => value,
        };

        match &self.kind {
            PropertyKind::Number(kind) => normalize_number(*kind, value),
            _ => value,
        }
    }

    fn handles_null(&self) -> bool {
        match &self.kind {
            PropertyKind::Custom(converter) => converter.handles_null(),
            _ => false,
        }
    }
}

/// Validates and converts an embedded record. Defaults stand in for absent fields during
/// validation only, so the stored record carries the same fields as the value.
fn embedded_to_storage(schema: &Arc<Schema>, values: Record) -> DocumentResult<Record> {
    let present: Vec<String> = values.keys().cloned().collect();
    let stored = EmDocument::from_values(Arc::clone(schema), values).serialize(&[])?;
    Ok(only_fields(present, stored))
}

fn embedded_from_storage(schema: &Arc<Schema>, stored: Record) -> DocumentResult<Record> {
    let present: Vec<String> = stored.keys().cloned().collect();
    let values = EmDocument::load(Arc::clone(schema), stored)?.into_values()?;
    Ok(only_fields(present, values))
}

fn only_fields(names: Vec<String>, mut record: Record) -> Record {
    names
        .into_iter()
        .filter_map(|name| record.remove(&name).map(|value| (name, value)))
        .collect()
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("validators", &self.validators.len())
            .field("on_set", &self.on_set.is_some())
            .field("load_on_demand", &self.load_on_demand)
            .field("indexed", &self.indexed)
            .finish()
    }
}

fn embedded_is_valid(schema: &Arc<Schema>, values: &Record) -> bool {
    EmDocument::from_values(Arc::clone(schema), values.clone()).is_valid()
}

/// Reads any BSON number as a double.
pub(crate) fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Reads a BSON number as an integer when it has no fractional part.
pub(crate) fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n)
            if n.is_finite() && n.fract() == 0.0 && *n >= i64::MIN as f64 && *n < i64::MAX as f64 =>
        {
            Some(*n as i64)
        }
        _ => None,
    }
}

// Values that are not numbers are left alone so validation can report them.
fn normalize_number(kind: NumberKind, value: Bson) -> Bson {
    match kind {
        NumberKind::Real => match as_f64(&value) {
            Some(n) => Bson::Double(n),
            None => value,
        },
        NumberKind::Integer => match as_i64(&value) {
            Some(n) => Bson::Int64(n),
            None => value,
        },
    }
}
