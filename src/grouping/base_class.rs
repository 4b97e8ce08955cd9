//! Grouping by declared base classes.
//!
//! Every distinct base class referenced by any node's
//! `grouping.by_base_classes.full_class_names` gets its own handler. Handler
//! order is derived-first: if `A` is an ancestor of `B`, the handler for `B`
//! runs before the handler for `A`, so `B`'s grouping nodes end up nested
//! within `A`'s. Only entity and relationship classes participate.

use crate::error::HierarchyResult;
use crate::keys::{normalize_full_class_name, GroupingNodeKey, NodeKey};
use crate::nodes::{BaseClassGroupingParams, ChildrenState, ProcessedNode};
use crate::schema::{class_display_label, ClassKind};

use super::{build_groups, Assignment, GroupingContext, ScopeResult};

/// Collect `(class name, class label)` handler inputs from the level, in
/// derived-first order.
pub(super) async fn collect_handler_classes(
    level: &[ProcessedNode],
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<Vec<(String, String)>> {
    let mut names: Vec<String> = Vec::new();
    for node in level {
        let Some(params) = base_class_params(node) else {
            continue;
        };
        for name in &params.full_class_names {
            let name = normalize_full_class_name(name);
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    let mut ordered: Vec<(String, String)> = Vec::new();
    for name in names {
        let class = ctx.schema.get_class(&name).await?;
        if !matches!(class.kind(), ClassKind::Entity | ClassKind::Relationship) {
            continue;
        }
        // Insert before the first already-collected ancestor of this class
        // so derived classes are handled first.
        let mut position = ordered.len();
        for (index, (other, _)) in ordered.iter().enumerate() {
            if class.is(other).await? {
                position = index;
                break;
            }
        }
        ordered.insert(position, (name, class_display_label(class.as_ref())));
    }
    Ok(ordered)
}

/// Whether the node is, or nests, a grouping node for the given base class.
fn contains_base_class_group(node: &ProcessedNode, class_name: &str) -> bool {
    if let NodeKey::Grouping(GroupingNodeKey::BaseClass {
        class_name: existing,
        ..
    }) = &node.key
    {
        if existing == class_name {
            return true;
        }
    }
    match &node.children {
        ChildrenState::Grouped(children) => children
            .iter()
            .any(|child| contains_base_class_group(child, class_name)),
        _ => false,
    }
}

/// The base-class params governing a node: its own, or those of its first
/// grouped descendant when the node is a grouping node.
fn base_class_params(node: &ProcessedNode) -> Option<&BaseClassGroupingParams> {
    if let Some(grouping) = node.processing.grouping.as_ref() {
        if let Some(params) = grouping.by_base_classes.as_ref() {
            return Some(params);
        }
    }
    match &node.children {
        ChildrenState::Grouped(children) => children.first().and_then(base_class_params),
        _ => None,
    }
}

/// Group one scope by a single base class. Previously created grouping
/// nodes participate as units, which is what nests derived-class groups
/// inside ancestor-class groups.
pub(super) async fn group_scope(
    scope: Vec<ProcessedNode>,
    class_name: &str,
    class_label: &str,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<ScopeResult> {
    let mut assignments = Vec::with_capacity(scope.len());
    for node in &scope {
        assignments.push(assign(node, class_name, class_label, ctx).await?);
    }
    Ok(build_groups(scope, assignments))
}

async fn assign(
    node: &ProcessedNode,
    class_name: &str,
    class_label: &str,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<Option<Assignment>> {
    // A node already grouped under this base class (re-grouping an already
    // grouped level) stays where it is.
    if contains_base_class_group(node, class_name) {
        return Ok(None);
    }
    let Some(params) = base_class_params(node) else {
        return Ok(None);
    };
    let declares = params
        .full_class_names
        .iter()
        .any(|name| normalize_full_class_name(name) == class_name);
    if !declares {
        return Ok(None);
    }
    let Some(node_class_name) = node.grouping_class_name() else {
        return Ok(None);
    };
    let node_class = ctx.schema.get_class(node_class_name).await?;
    if !node_class.is(class_name).await? {
        return Ok(None);
    }
    Ok(Some(Assignment {
        key: GroupingNodeKey::BaseClass {
            class_name: class_name.to_string(),
            class_label: class_label.to_string(),
        },
        label: class_label.to_string(),
    }))
}
