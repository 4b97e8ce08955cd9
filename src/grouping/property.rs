//! Grouping by property values and ranges.
//!
//! One handler per declared `(property class, property name)` pair, in
//! first-appearance order. A participating node goes to a value-grouping
//! node (formatted-value equality), a range-grouping node (value inside a
//! declared range), or the shared "other" bucket when it declares ranges
//! that none match. Instances without a value go to the "unspecified"
//! bucket when requested. Nodes that do not carry `by_properties` for the
//! handler's pair pass through ungrouped.

use crate::error::{HierarchyError, HierarchyResult};
use crate::formatter::primitive_from_json;
use crate::keys::{normalize_full_class_name, GroupingNodeKey, NodeKey, PropertyRef};
use crate::nodes::{ChildrenState, ProcessedNode, PropertyGroup, PropertyGroupingParams};
use crate::values::TypedValue;

use super::{build_groups, Assignment, GroupingContext, ScopeResult};

/// Collect `(property class, property name)` handler inputs from the level,
/// in first-appearance order, descending into grouping nodes.
pub(super) fn collect_handler_properties(level: &[ProcessedNode]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    collect_into(level, &mut pairs);
    pairs
}

fn collect_into(scope: &[ProcessedNode], pairs: &mut Vec<(String, String)>) {
    for node in scope {
        if let Some(params) = property_params(node) {
            let class_name = normalize_full_class_name(&params.property_class_name);
            for group in &params.property_groups {
                let pair = (class_name.clone(), group.property_name.clone());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
        if let ChildrenState::Grouped(children) = &node.children {
            collect_into(children, pairs);
        }
    }
}

fn property_params(node: &ProcessedNode) -> Option<&PropertyGroupingParams> {
    node.processing.grouping.as_ref()?.by_properties.as_ref()
}

pub(super) async fn group_scope(
    scope: Vec<ProcessedNode>,
    class_name: &str,
    property_name: &str,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<ScopeResult> {
    let mut assignments = Vec::with_capacity(scope.len());
    for node in &scope {
        assignments.push(assign(node, class_name, property_name, ctx).await?);
    }
    let result = build_groups(scope, assignments);
    Ok(merge_other_buckets(result))
}

async fn assign(
    node: &ProcessedNode,
    class_name: &str,
    property_name: &str,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<Option<Assignment>> {
    if !matches!(node.key, NodeKey::Instances(_)) {
        return Ok(None);
    }
    let Some(params) = property_params(node) else {
        return Ok(None);
    };
    if normalize_full_class_name(&params.property_class_name) != class_name {
        return Ok(None);
    }
    let Some(group) = params
        .property_groups
        .iter()
        .find(|group| group.property_name == property_name)
    else {
        return Ok(None);
    };

    // The property class must apply to the node's concrete class.
    let Some(node_class_name) = node.grouping_class_name() else {
        return Ok(None);
    };
    let node_class = ctx.schema.get_class(node_class_name).await?;
    if !node_class.is(class_name).await? {
        return Ok(None);
    }

    let value = group
        .property_value
        .as_ref()
        .filter(|value| !value.is_null());
    let Some(value) = value else {
        if params.create_group_for_unspecified_values {
            let label = ctx.localized.unspecified.clone();
            return Ok(Some(Assignment {
                key: GroupingNodeKey::PropertyValue {
                    property_class_name: class_name.to_string(),
                    property_name: property_name.to_string(),
                    formatted_value: label.clone(),
                },
                label,
            }));
        }
        return Ok(None);
    };

    if let Some(ranges) = &group.ranges {
        let numeric = value.as_f64();
        let matched = numeric.and_then(|v| {
            ranges
                .iter()
                .find(|range| range.from <= v && v <= range.to)
        });
        if let Some(range) = matched {
            let label = range
                .label
                .clone()
                .unwrap_or_else(|| format!("{} - {}", range.from, range.to));
            return Ok(Some(Assignment {
                key: GroupingNodeKey::PropertyRange {
                    property_class_name: class_name.to_string(),
                    property_name: property_name.to_string(),
                    from_value: range.from.into(),
                    to_value: range.to.into(),
                },
                label,
            }));
        }
        if params.create_group_for_out_of_range_values {
            return Ok(Some(Assignment {
                key: GroupingNodeKey::PropertyOther {
                    properties: vec![PropertyRef {
                        class_name: class_name.to_string(),
                        property_name: property_name.to_string(),
                    }],
                },
                label: ctx.localized.other.clone(),
            }));
        }
        return Ok(None);
    }

    let formatted = format_property_value(class_name, property_name, group, value, ctx).await?;
    Ok(Some(Assignment {
        key: GroupingNodeKey::PropertyValue {
            property_class_name: class_name.to_string(),
            property_name: property_name.to_string(),
            formatted_value: formatted.clone(),
        },
        label: formatted,
    }))
}

async fn format_property_value(
    class_name: &str,
    property_name: &str,
    group: &PropertyGroup,
    value: &serde_json::Value,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<String> {
    let class = ctx.schema.get_class(class_name).await?;
    let property = class
        .property(&group.property_name)
        .ok_or_else(|| HierarchyError::MissingProperty {
            class_name: class.full_name().to_string(),
            property_name: property_name.to_string(),
        })?;
    let primitive = primitive_from_json(property.primitive_type(), value).ok_or_else(|| {
        HierarchyError::invalid_definition(format!(
            "grouping value of property '{class_name}.{property_name}' does not match its {} type",
            property.primitive_type().name()
        ))
    })?;
    ctx.formatter
        .format(&TypedValue {
            value: primitive,
            extended_type: property.extended_type(),
            kind_of_quantity: property.kind_of_quantity(),
        })
        .await
}

/// Successive property handlers each produce their own out-of-range bucket;
/// collapse them into one "other" node per scope, with the union of the
/// bucketed properties on its key.
fn merge_other_buckets(result: ScopeResult) -> ScopeResult {
    let ScopeResult { nodes, mut created } = result;

    let other_count = nodes
        .iter()
        .filter(|node| matches!(node.key, NodeKey::Grouping(GroupingNodeKey::PropertyOther { .. })))
        .count();
    if other_count <= 1 {
        return ScopeResult { nodes, created };
    }

    let mut merged_properties: Vec<PropertyRef> = Vec::new();
    let mut merged_members: Vec<ProcessedNode> = Vec::new();
    let mut output: Vec<ProcessedNode> = Vec::new();
    let mut insert_at: Option<usize> = None;
    let mut label = String::new();
    let mut base_keys = Vec::new();

    for node in nodes {
        match node.key.clone() {
            NodeKey::Grouping(GroupingNodeKey::PropertyOther { properties }) => {
                created.retain(|key| !matches!(key, GroupingNodeKey::PropertyOther { .. }));
                for property in properties {
                    if !merged_properties.contains(&property) {
                        merged_properties.push(property);
                    }
                }
                if insert_at.is_none() {
                    insert_at = Some(output.len());
                    label = node.label.clone();
                    base_keys = node.parent_keys.clone();
                }
                if let ChildrenState::Grouped(children) = node.children {
                    merged_members.extend(children);
                }
            }
            _ => output.push(node),
        }
    }

    let key = GroupingNodeKey::PropertyOther {
        properties: merged_properties,
    };
    created.push(key.clone());
    let merged = super::make_grouping_node(key, label, base_keys, merged_members);
    output.insert(insert_at.unwrap_or(output.len()), merged);
    ScopeResult {
        nodes: output,
        created,
    }
}
