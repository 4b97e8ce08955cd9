//! Typed primitive values and concatenated labels.
//!
//! A node label is either a plain string or a *concatenated value*: a
//! sequence of literal strings, typed primitives, and property references
//! that is resolved against schema metadata and rendered by the configured
//! value formatter. Concatenated values survive JSON round-trips because the
//! row reader receives them serialized inside the `DisplayLabel` column.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed primitive value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum PrimitiveValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    /// An instance id rendered in its canonical (hex) form.
    Id(String),
    Point2d { x: f64, y: f64 },
    Point3d { x: f64, y: f64, z: f64 },
}

impl PrimitiveValue {
    /// Name of the carried type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PrimitiveValue::String(_) => "String",
            PrimitiveValue::Integer(_) => "Integer",
            PrimitiveValue::Double(_) => "Double",
            PrimitiveValue::Boolean(_) => "Boolean",
            PrimitiveValue::DateTime(_) => "DateTime",
            PrimitiveValue::Id(_) => "Id",
            PrimitiveValue::Point2d { .. } => "Point2d",
            PrimitiveValue::Point3d { .. } => "Point3d",
        }
    }
}

/// A primitive value together with the formatting hints attached to the
/// property it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(flatten)]
    pub value: PrimitiveValue,

    /// Extended type name of the source property, if any (e.g. `Json`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_type: Option<String>,

    /// Full name of the kind-of-quantity governing unit formatting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind_of_quantity: Option<String>,
}

impl TypedValue {
    pub fn new(value: PrimitiveValue) -> Self {
        TypedValue {
            value,
            extended_type: None,
            kind_of_quantity: None,
        }
    }
}

impl From<PrimitiveValue> for TypedValue {
    fn from(value: PrimitiveValue) -> Self {
        TypedValue::new(value)
    }
}

/// One part of a concatenated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConcatenatedValuePart {
    /// A literal string, appended to the label verbatim.
    String { value: String },

    /// A typed primitive, rendered by the value formatter.
    Primitive {
        #[serde(flatten)]
        value: TypedValue,
    },

    /// A reference to a property value; primitive type, extended type and
    /// kind-of-quantity are looked up in schema metadata before formatting.
    Property {
        class_name: String,
        property_name: String,
        value: serde_json::Value,
    },
}

/// A label expressed as a sequence of parts.
pub type ConcatenatedValue = Vec<ConcatenatedValuePart>;

/// A node label as produced by a hierarchy definition or the row reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Text(String),
    Concatenated(ConcatenatedValue),
}

impl Label {
    /// Attempt to interpret a raw label string as a serialized concatenated
    /// value. Row labels that are plain text stay plain text.
    pub fn from_raw(raw: &str) -> Label {
        if raw.starts_with('[') {
            if let Ok(parts) = serde_json::from_str::<ConcatenatedValue>(raw) {
                return Label::Concatenated(parts);
            }
        }
        Label::Text(raw.to_string())
    }
}

impl From<&str> for Label {
    fn from(text: &str) -> Self {
        Label::Text(text.to_string())
    }
}

impl From<String> for Label {
    fn from(text: String) -> Self {
        Label::Text(text)
    }
}

impl Default for Label {
    fn default() -> Self {
        Label::Text(String::new())
    }
}
