//! Schema metadata collaborator contracts.
//!
//! The engine never inspects the relational store directly; class derivation
//! checks and property lookups go through a caller-supplied
//! [`SchemaProvider`]. Lookups are async because implementations typically
//! back them with the same connection the query executor uses.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HierarchyResult;

/// Kind of a schema class. Only entity and relationship classes participate
/// in base-class grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Entity,
    Relationship,
    Struct,
    CustomAttribute,
    Mixin,
}

/// Primitive type of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Boolean,
    String,
    Integer,
    Long,
    Double,
    DateTime,
    Id,
    Point2d,
    Point3d,
    /// Geometry blobs cannot be rendered into labels.
    Geometry,
    /// Binary blobs cannot be rendered into labels.
    Binary,
}

impl PrimitiveType {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "Boolean",
            PrimitiveType::String => "String",
            PrimitiveType::Integer => "Integer",
            PrimitiveType::Long => "Long",
            PrimitiveType::Double => "Double",
            PrimitiveType::DateTime => "DateTime",
            PrimitiveType::Id => "Id",
            PrimitiveType::Point2d => "Point2d",
            PrimitiveType::Point3d => "Point3d",
            PrimitiveType::Geometry => "IGeometry",
            PrimitiveType::Binary => "Binary",
        }
    }

    /// Whether values of this type can appear in a concatenated label.
    pub fn is_formattable(&self) -> bool {
        !matches!(self, PrimitiveType::Geometry | PrimitiveType::Binary)
    }
}

/// A property of a schema class.
pub trait PropertyInfo: Send + Sync {
    fn name(&self) -> &str;
    fn primitive_type(&self) -> PrimitiveType;
    fn extended_type(&self) -> Option<String> {
        None
    }
    fn kind_of_quantity(&self) -> Option<String> {
        None
    }
}

/// A schema class.
#[async_trait]
pub trait ClassInfo: Send + Sync {
    /// Full class name in normalized `Schema.Class` form.
    fn full_name(&self) -> &str;

    /// Display label; falls back to the class name when absent.
    fn display_label(&self) -> Option<&str> {
        None
    }

    fn kind(&self) -> ClassKind;

    /// Whether this class is, or derives from, the given class. Reflexive
    /// and transitive.
    async fn is(&self, other_full_class_name: &str) -> HierarchyResult<bool>;

    fn property(&self, name: &str) -> Option<Arc<dyn PropertyInfo>>;
}

/// Provider of schema metadata.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn get_class(&self, full_class_name: &str) -> HierarchyResult<Arc<dyn ClassInfo>>;

    /// Key identifying the data source this schema describes. Filter paths
    /// whose identifiers name a different source are ignored.
    fn source_key(&self) -> Option<String> {
        None
    }
}

/// Display label of a class: its declared label, or the class-name tail when
/// no label is set.
pub fn class_display_label(class: &dyn ClassInfo) -> String {
    if let Some(label) = class.display_label() {
        return label.to_string();
    }
    let full_name = class.full_name();
    full_name
        .rsplit('.')
        .next()
        .unwrap_or(full_name)
        .to_string()
}

/// Whether two classes are in a subclass/superclass relation, in either
/// direction.
pub async fn classes_related(
    schema: &Arc<dyn SchemaProvider>,
    a: &str,
    b: &str,
) -> HierarchyResult<bool> {
    if a == b {
        return Ok(true);
    }
    let class = schema.get_class(a).await?;
    if class.is(b).await? {
        return Ok(true);
    }
    let other = schema.get_class(b).await?;
    other.is(a).await
}
