//! Grouping by exact class.
//!
//! A single handler groups every instance node whose params set `by_class`,
//! keyed by the node's concrete class. The class label comes from schema
//! metadata.

use crate::error::HierarchyResult;
use crate::keys::{GroupingNodeKey, NodeKey};
use crate::nodes::ProcessedNode;
use crate::schema::class_display_label;

use super::{build_groups, Assignment, GroupingContext, ScopeResult};

pub(super) async fn group_scope(
    scope: Vec<ProcessedNode>,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<ScopeResult> {
    let mut assignments = Vec::with_capacity(scope.len());
    for node in &scope {
        assignments.push(assign(node, ctx).await?);
    }
    Ok(build_groups(scope, assignments))
}

async fn assign(
    node: &ProcessedNode,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<Option<Assignment>> {
    if !matches!(node.key, NodeKey::Instances(_)) {
        return Ok(None);
    }
    let wants_grouping = node
        .processing
        .grouping
        .as_ref()
        .is_some_and(|grouping| grouping.by_class.is_some());
    if !wants_grouping {
        return Ok(None);
    }
    let Some(class_name) = node.grouping_class_name() else {
        return Ok(None);
    };
    let class = ctx.schema.get_class(class_name).await?;
    let class_label = class_display_label(class.as_ref());
    Ok(Some(Assignment {
        key: GroupingNodeKey::Class {
            class_name: class.full_name().to_string(),
            class_label: class_label.clone(),
        },
        label: class_label,
    }))
}
