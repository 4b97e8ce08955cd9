//! Node identity.
//!
//! Every node the engine emits is identified by a [`NodeKey`]: a generic key
//! (opaque string id), an instances key (one or more `(class, id)` tuples
//! from the relational source), or a grouping key synthesized by the grouping
//! subsystem. Instance keys have a deterministic total order so merged key
//! lists can be deduplicated and compared independently of query row order.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Normalize a full class name to `Schema.Class` form. Inputs may use `:` as
/// the schema/class separator.
pub fn normalize_full_class_name(name: &str) -> String {
    name.replacen(':', ".", 1)
}

/// Key of a single instance in the relational source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    /// Full class name in normalized `Schema.Class` form.
    pub class_name: String,
    /// Instance id, opaque to the engine.
    pub id: String,
    /// Optional key of the data source the instance comes from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl InstanceKey {
    pub fn new(class_name: impl AsRef<str>, id: impl Into<String>) -> Self {
        InstanceKey {
            class_name: normalize_full_class_name(class_name.as_ref()),
            id: id.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class_name, self.id)
    }
}

/// Key of a statically declared (generic) node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenericNodeKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl GenericNodeKey {
    pub fn new(id: impl Into<String>) -> Self {
        GenericNodeKey {
            id: id.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Reference to a property used by property-grouping keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    pub class_name: String,
    pub property_name: String,
}

/// A range bound carried inside a grouping key.
///
/// Wraps `f64` with bit-level equality and hashing so grouping keys stay
/// usable as cache-map keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RangeBound(pub f64);

impl PartialEq for RangeBound {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for RangeBound {}

impl Hash for RangeBound {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.to_bits());
    }
}

impl From<f64> for RangeBound {
    fn from(value: f64) -> Self {
        RangeBound(value)
    }
}

impl fmt::Display for RangeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a node synthesized by the grouping subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum GroupingNodeKey {
    /// Grouped by exact class.
    Class {
        class_name: String,
        class_label: String,
    },
    /// Grouped by a declared base class. Structurally identical to `Class`
    /// but produced by a different pipeline stage.
    BaseClass {
        class_name: String,
        class_label: String,
    },
    /// Grouped by display label.
    Label {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<String>,
    },
    /// Grouped by formatted property value.
    PropertyValue {
        property_class_name: String,
        property_name: String,
        formatted_value: String,
    },
    /// Grouped by a declared property value range.
    PropertyRange {
        property_class_name: String,
        property_name: String,
        from_value: RangeBound,
        to_value: RangeBound,
    },
    /// Bucket for values that matched no declared range.
    PropertyOther { properties: Vec<PropertyRef> },
}

/// Identity of a node anywhere in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeKey {
    Generic(GenericNodeKey),
    Instances(Vec<InstanceKey>),
    Grouping(GroupingNodeKey),
}

impl NodeKey {
    pub fn generic(id: impl Into<String>) -> Self {
        NodeKey::Generic(GenericNodeKey::new(id))
    }

    pub fn instances(keys: impl IntoIterator<Item = InstanceKey>) -> Self {
        NodeKey::Instances(keys.into_iter().collect())
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, NodeKey::Grouping(_))
    }

    /// Instance keys carried by this key, if it is an instances key.
    pub fn instance_keys(&self) -> Option<&[InstanceKey]> {
        match self {
            NodeKey::Instances(keys) => Some(keys),
            _ => None,
        }
    }
}

impl From<GenericNodeKey> for NodeKey {
    fn from(key: GenericNodeKey) -> Self {
        NodeKey::Generic(key)
    }
}

impl From<GroupingNodeKey> for NodeKey {
    fn from(key: GroupingNodeKey) -> Self {
        NodeKey::Grouping(key)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Generic(key) => write!(f, "{}", key.id),
            NodeKey::Instances(keys) => {
                write!(f, "[")?;
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}")?;
                }
                write!(f, "]")
            }
            NodeKey::Grouping(key) => match key {
                GroupingNodeKey::Class { class_label, .. }
                | GroupingNodeKey::BaseClass { class_label, .. } => write!(f, "{class_label}"),
                GroupingNodeKey::Label { label, .. } => write!(f, "{label}"),
                GroupingNodeKey::PropertyValue {
                    formatted_value, ..
                } => write!(f, "{formatted_value}"),
                GroupingNodeKey::PropertyRange {
                    from_value,
                    to_value,
                    ..
                } => write!(f, "{from_value} - {to_value}"),
                GroupingNodeKey::PropertyOther { .. } => write!(f, "<other>"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name_is_normalized() {
        let key = InstanceKey::new("BisCore:Subject", "0x1");
        assert_eq!(key.class_name, "BisCore.Subject");

        // Already-normalized names pass through unchanged.
        let key = InstanceKey::new("BisCore.Subject", "0x1");
        assert_eq!(key.class_name, "BisCore.Subject");
    }

    #[test]
    fn test_instance_key_equality_includes_source() {
        let plain = InstanceKey::new("S.C", "0x1");
        let sourced = InstanceKey::new("S.C", "0x1").with_source("model-a");
        assert_ne!(plain, sourced);
        assert_eq!(plain, InstanceKey::new("S:C", "0x1"));
    }

    #[test]
    fn test_instance_key_total_order() {
        let mut keys = vec![
            InstanceKey::new("S.B", "0x2"),
            InstanceKey::new("S.A", "0x9"),
            InstanceKey::new("S.B", "0x1"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                InstanceKey::new("S.A", "0x9"),
                InstanceKey::new("S.B", "0x1"),
                InstanceKey::new("S.B", "0x2"),
            ]
        );
    }

    #[test]
    fn test_range_bound_is_hashable() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(RangeBound(1.5));
        set.insert(RangeBound(1.5));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_node_key_display() {
        let key = NodeKey::instances(vec![InstanceKey::new("S.C", "0x1")]);
        assert_eq!(key.to_string(), "[S.C:0x1]");
        assert_eq!(NodeKey::generic("custom").to_string(), "custom");
    }
}
