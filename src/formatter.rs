//! Value formatting and label resolution.
//!
//! Labels arrive either as plain strings or as concatenated values. Plain
//! strings still travel through the formatter (as String-typed primitives)
//! so a caller-supplied formatter sees every label. Property references are
//! resolved against schema metadata first: the property's primitive type,
//! extended type and kind-of-quantity are attached to the value before
//! formatting.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{HierarchyError, HierarchyResult};
use crate::schema::{PrimitiveType, SchemaProvider};
use crate::values::{ConcatenatedValuePart, Label, PrimitiveValue, TypedValue};

/// Formats typed primitive values into display strings.
#[async_trait]
pub trait ValueFormatter: Send + Sync {
    async fn format(&self, value: &TypedValue) -> HierarchyResult<String>;
}

/// Formatter used when the provider is configured without one. Renders
/// values in plain, locale-independent form.
#[derive(Debug, Default)]
pub struct DefaultValueFormatter;

#[async_trait]
impl ValueFormatter for DefaultValueFormatter {
    async fn format(&self, value: &TypedValue) -> HierarchyResult<String> {
        Ok(match &value.value {
            PrimitiveValue::String(text) => text.clone(),
            PrimitiveValue::Integer(number) => number.to_string(),
            PrimitiveValue::Double(number) => number.to_string(),
            PrimitiveValue::Boolean(flag) => flag.to_string(),
            PrimitiveValue::DateTime(stamp) => stamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            PrimitiveValue::Id(id) => id.clone(),
            PrimitiveValue::Point2d { x, y } => format!("({x}, {y})"),
            PrimitiveValue::Point3d { x, y, z } => format!("({x}, {y}, {z})"),
        })
    }
}

/// Resolve and format a node label.
pub async fn format_node_label(
    label: &Label,
    schema: &Arc<dyn SchemaProvider>,
    formatter: &dyn ValueFormatter,
) -> HierarchyResult<String> {
    match label {
        Label::Text(text) => {
            formatter
                .format(&TypedValue::new(PrimitiveValue::String(text.clone())))
                .await
        }
        Label::Concatenated(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    ConcatenatedValuePart::String { value } => out.push_str(value),
                    ConcatenatedValuePart::Primitive { value } => {
                        out.push_str(&formatter.format(value).await?);
                    }
                    ConcatenatedValuePart::Property {
                        class_name,
                        property_name,
                        value,
                    } => {
                        out.push_str(
                            &format_property_part(class_name, property_name, value, schema, formatter)
                                .await?,
                        );
                    }
                }
            }
            Ok(out)
        }
    }
}

async fn format_property_part(
    class_name: &str,
    property_name: &str,
    value: &serde_json::Value,
    schema: &Arc<dyn SchemaProvider>,
    formatter: &dyn ValueFormatter,
) -> HierarchyResult<String> {
    let class = schema.get_class(class_name).await?;
    let property =
        class
            .property(property_name)
            .ok_or_else(|| HierarchyError::MissingProperty {
                class_name: class.full_name().to_string(),
                property_name: property_name.to_string(),
            })?;

    let primitive_type = property.primitive_type();
    if !primitive_type.is_formattable() {
        return Err(HierarchyError::UnsupportedPrimitiveType {
            class_name: class.full_name().to_string(),
            property_name: property_name.to_string(),
            type_name: primitive_type.name().to_string(),
        });
    }
    if value.is_null() {
        return Ok(String::new());
    }

    let primitive = primitive_from_json(primitive_type, value).ok_or_else(|| {
        HierarchyError::invalid_definition(format!(
            "value of property '{class_name}.{property_name}' does not match its {} type",
            primitive_type.name()
        ))
    })?;
    formatter
        .format(&TypedValue {
            value: primitive,
            extended_type: property.extended_type(),
            kind_of_quantity: property.kind_of_quantity(),
        })
        .await
}

/// Interpret a raw JSON column value as a primitive of the given type.
pub fn primitive_from_json(
    primitive_type: PrimitiveType,
    value: &serde_json::Value,
) -> Option<PrimitiveValue> {
    match primitive_type {
        PrimitiveType::Boolean => value.as_bool().map(PrimitiveValue::Boolean),
        PrimitiveType::String => value.as_str().map(|text| PrimitiveValue::String(text.to_string())),
        PrimitiveType::Integer | PrimitiveType::Long => {
            value.as_i64().map(PrimitiveValue::Integer)
        }
        PrimitiveType::Double => value.as_f64().map(PrimitiveValue::Double),
        PrimitiveType::DateTime => value
            .as_str()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|stamp| PrimitiveValue::DateTime(stamp.with_timezone(&Utc))),
        PrimitiveType::Id => value.as_str().map(|id| PrimitiveValue::Id(id.to_string())),
        PrimitiveType::Point2d => Some(PrimitiveValue::Point2d {
            x: value.get("x")?.as_f64()?,
            y: value.get("y")?.as_f64()?,
        }),
        PrimitiveType::Point3d => Some(PrimitiveValue::Point3d {
            x: value.get("x")?.as_f64()?,
            y: value.get("y")?.as_f64()?,
            z: value.get("z")?.as_f64()?,
        }),
        PrimitiveType::Geometry | PrimitiveType::Binary => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_default_formatter_renders_primitives() {
        let formatter = DefaultValueFormatter;
        let cases = vec![
            (PrimitiveValue::String("a".into()), "a"),
            (PrimitiveValue::Integer(42), "42"),
            (PrimitiveValue::Double(1.5), "1.5"),
            (PrimitiveValue::Boolean(true), "true"),
            (PrimitiveValue::Id("0x1c".into()), "0x1c"),
            (PrimitiveValue::Point2d { x: 1.0, y: 2.5 }, "(1, 2.5)"),
        ];
        for (value, expected) in cases {
            assert_eq!(
                formatter.format(&TypedValue::new(value)).await.unwrap(),
                expected
            );
        }
    }

    #[test]
    fn test_primitive_from_json_respects_type() {
        assert_eq!(
            primitive_from_json(PrimitiveType::Integer, &json!(4)),
            Some(PrimitiveValue::Integer(4))
        );
        assert_eq!(primitive_from_json(PrimitiveType::Integer, &json!("4")), None);
        assert_eq!(primitive_from_json(PrimitiveType::Geometry, &json!("x")), None);
        assert_eq!(
            primitive_from_json(PrimitiveType::Point2d, &json!({"x": 1.0, "y": 2.0})),
            Some(PrimitiveValue::Point2d { x: 1.0, y: 2.0 })
        );
    }
}
