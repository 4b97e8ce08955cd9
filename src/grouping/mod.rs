//! Grouping subsystem.
//!
//! Grouping runs on the full materialized level as a sequence of
//! independent handlers:
//!
//! 1. by base class: one handler per referenced base class, ordered
//!    derived-first so a derived class's grouping nodes end up nested within
//!    its ancestor's;
//! 2. by class: a single handler;
//! 3. by property: one handler per `(class, property)` in first-appearance
//!    order;
//! 4. by label: grouping and merging.
//!
//! Base-class handlers see the whole top-level scope and treat previously
//! created grouping nodes as units. Later handlers descend into grouping
//! nodes and group within each scope, which nests class groups inside base
//! class groups, property groups inside class groups, and so on.
//!
//! After every handler the per-handler policies run: hide-if-no-siblings,
//! hide-if-one-grouped-node, and auto-expand (including the filter-target
//! grouping-aware rules). After all handlers every scope is re-sorted by
//! label.

mod base_class;
mod class;
mod label;
mod property;

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::HierarchyResult;
use crate::formatter::ValueFormatter;
use crate::keys::{GroupingNodeKey, NodeKey};
use crate::nodes::{
    AutoExpandMode, ChildrenState, FilterTargetAutoExpand, GroupingPolicies, ProcessedNode,
};
use crate::pipeline::sort::sort_level;
use crate::provider::LocalizedStrings;
use crate::schema::SchemaProvider;

/// Shared collaborators the handlers need.
pub(crate) struct GroupingContext<'a> {
    pub schema: &'a Arc<dyn SchemaProvider>,
    pub formatter: &'a Arc<dyn ValueFormatter>,
    pub localized: &'a LocalizedStrings,
}

/// Which handler family produced a grouping node; selects the policy record
/// read from grouped nodes' params.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GroupingKind {
    BaseClass,
    Class,
    Property,
    Label,
}

/// A node's target group as decided by one handler.
pub(crate) struct Assignment {
    pub key: GroupingNodeKey,
    pub label: String,
}

/// Result of applying one handler to one scope.
pub(crate) struct ScopeResult {
    pub nodes: Vec<ProcessedNode>,
    /// Keys of grouping nodes the handler created in this scope.
    pub created: Vec<GroupingNodeKey>,
}

enum HandlerSpec {
    BaseClass { class_name: String, class_label: String },
    Class,
    Property { class_name: String, property_name: String },
    Label,
}

impl HandlerSpec {
    fn kind(&self) -> GroupingKind {
        match self {
            HandlerSpec::BaseClass { .. } => GroupingKind::BaseClass,
            HandlerSpec::Class => GroupingKind::Class,
            HandlerSpec::Property { .. } => GroupingKind::Property,
            HandlerSpec::Label => GroupingKind::Label,
        }
    }
}

/// Run the full grouping stage over a sorted level.
pub(crate) async fn apply_grouping(
    mut level: Vec<ProcessedNode>,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<Vec<ProcessedNode>> {
    // Base-class handlers operate on the top scope only; they run first, so
    // no nested scopes exist yet.
    for (class_name, class_label) in base_class::collect_handler_classes(&level, ctx).await? {
        let spec = HandlerSpec::BaseClass {
            class_name,
            class_label,
        };
        let result = group_one_scope(level, &spec, ctx).await?;
        level = apply_policies(result, GroupingKind::BaseClass, ctx).await?;
    }

    level = run_scoped(level, &HandlerSpec::Class, ctx, false).await?;

    for (class_name, property_name) in property::collect_handler_properties(&level) {
        let spec = HandlerSpec::Property {
            class_name,
            property_name,
        };
        level = run_scoped(level, &spec, ctx, false).await?;
    }

    level = run_scoped(level, &HandlerSpec::Label, ctx, false).await?;

    sort_scopes(&mut level);
    Ok(level)
}

/// Apply a handler to a scope and, recursively, to the children of every
/// grouping node in it. `suppressed` is set once the recursion enters a
/// grouping node this handler itself would produce; from there down the
/// handler only descends, keeping a second grouping pass over already
/// grouped input from re-nesting its own groups.
fn run_scoped<'a>(
    scope: Vec<ProcessedNode>,
    spec: &'a HandlerSpec,
    ctx: &'a GroupingContext<'a>,
    suppressed: bool,
) -> BoxFuture<'a, HierarchyResult<Vec<ProcessedNode>>> {
    Box::pin(async move {
        let mut descended = Vec::with_capacity(scope.len());
        for mut node in scope {
            if let ChildrenState::Grouped(children) = node.children {
                let child_suppressed = suppressed || owns_handler_scope(spec, &node.key);
                let children = run_scoped(children, spec, ctx, child_suppressed).await?;
                node.children = ChildrenState::Grouped(children);
            }
            descended.push(node);
        }
        if suppressed {
            return Ok(descended);
        }
        let result = group_one_scope(descended, spec, ctx).await?;
        apply_policies(result, spec.kind(), ctx).await
    })
}

/// Whether a grouping node is one the given handler produces, making its
/// children a scope the handler must not group again.
fn owns_handler_scope(spec: &HandlerSpec, key: &NodeKey) -> bool {
    let NodeKey::Grouping(key) = key else {
        return false;
    };
    match (spec, key) {
        (HandlerSpec::Class, GroupingNodeKey::Class { .. }) => true,
        (HandlerSpec::Label, GroupingNodeKey::Label { .. }) => true,
        (
            HandlerSpec::Property {
                class_name,
                property_name,
            },
            GroupingNodeKey::PropertyValue {
                property_class_name,
                property_name: grouped_property,
                ..
            }
            | GroupingNodeKey::PropertyRange {
                property_class_name,
                property_name: grouped_property,
                ..
            },
        ) => property_class_name == class_name && grouped_property == property_name,
        (
            HandlerSpec::Property {
                class_name,
                property_name,
            },
            GroupingNodeKey::PropertyOther { properties },
        ) => properties.iter().any(|property| {
            property.class_name == *class_name && property.property_name == *property_name
        }),
        _ => false,
    }
}

async fn group_one_scope(
    scope: Vec<ProcessedNode>,
    spec: &HandlerSpec,
    ctx: &GroupingContext<'_>,
) -> HierarchyResult<ScopeResult> {
    match spec {
        HandlerSpec::BaseClass {
            class_name,
            class_label,
        } => base_class::group_scope(scope, class_name, class_label, ctx).await,
        HandlerSpec::Class => class::group_scope(scope, ctx).await,
        HandlerSpec::Property {
            class_name,
            property_name,
        } => property::group_scope(scope, class_name, property_name, ctx).await,
        HandlerSpec::Label => Ok(label::group_scope(scope)),
    }
}

/// Build grouping nodes from per-node assignments. A grouping node takes the
/// position of its first member; members are re-parented under it.
pub(crate) fn build_groups(
    nodes: Vec<ProcessedNode>,
    assignments: Vec<Option<Assignment>>,
) -> ScopeResult {
    debug_assert_eq!(nodes.len(), assignments.len());

    enum Entry {
        Node(ProcessedNode),
        Group {
            key: GroupingNodeKey,
            label: String,
            members: Vec<ProcessedNode>,
        },
    }

    let mut entries: Vec<Entry> = Vec::with_capacity(nodes.len());
    for (node, assignment) in nodes.into_iter().zip(assignments) {
        match assignment {
            None => entries.push(Entry::Node(node)),
            Some(assignment) => {
                let position = entries.iter().position(|entry| {
                    matches!(entry, Entry::Group { key, .. } if *key == assignment.key)
                });
                match position {
                    Some(position) => {
                        if let Entry::Group { members, .. } = &mut entries[position] {
                            members.push(node);
                        }
                    }
                    None => entries.push(Entry::Group {
                        key: assignment.key,
                        label: assignment.label,
                        members: vec![node],
                    }),
                }
            }
        }
    }

    let mut created = Vec::new();
    let nodes = entries
        .into_iter()
        .map(|entry| match entry {
            Entry::Node(node) => node,
            Entry::Group {
                key,
                label,
                members,
            } => {
                created.push(key.clone());
                let parent_keys = members
                    .first()
                    .map(|member| member.parent_keys.clone())
                    .unwrap_or_default();
                make_grouping_node(key, label, parent_keys, members)
            }
        })
        .collect();
    ScopeResult { nodes, created }
}

/// Materialize a grouping node around its members.
pub(crate) fn make_grouping_node(
    key: GroupingNodeKey,
    label: String,
    parent_keys: Vec<NodeKey>,
    mut members: Vec<ProcessedNode>,
) -> ProcessedNode {
    let node_key = NodeKey::Grouping(key);

    let mut child_keys = parent_keys.clone();
    child_keys.push(node_key.clone());
    for member in &mut members {
        reparent(member, child_keys.clone());
    }

    ProcessedNode {
        key: node_key,
        parent_keys,
        label,
        children: ChildrenState::Grouped(members),
        auto_expand: false,
        supports_filtering: false,
        extended_data: None,
        processing: Default::default(),
        filtering: None,
    }
}

/// Move a node (and, recursively, its materialized children) under a new
/// parent chain.
pub(crate) fn reparent(node: &mut ProcessedNode, parent_keys: Vec<NodeKey>) {
    node.parent_keys = parent_keys;
    if let ChildrenState::Grouped(children) = &mut node.children {
        let mut child_keys = node.parent_keys.clone();
        child_keys.push(node.key.clone());
        for child in children {
            reparent(child, child_keys.clone());
        }
    }
}

/// The policy record a node carries for a grouping kind.
pub(crate) fn policies_for(node: &ProcessedNode, kind: GroupingKind) -> Option<&GroupingPolicies> {
    let grouping = node.processing.grouping.as_ref()?;
    match kind {
        GroupingKind::BaseClass => grouping.by_base_classes.as_ref().map(|p| &p.policies),
        GroupingKind::Class => grouping.by_class.as_ref().map(|p| &p.policies),
        GroupingKind::Property => grouping.by_properties.as_ref().map(|p| &p.policies),
        GroupingKind::Label => grouping.by_label.as_ref().map(|p| &p.policies),
    }
}

fn any_descendant(node: &ProcessedNode, f: &mut impl FnMut(&ProcessedNode) -> bool) -> bool {
    if let ChildrenState::Grouped(children) = &node.children {
        for child in children {
            if f(child) || any_descendant(child, f) {
                return true;
            }
        }
    }
    false
}

/// Apply the per-handler policies to the grouping nodes one handler just
/// created in a scope.
async fn apply_policies(
    result: ScopeResult,
    kind: GroupingKind,
    _ctx: &GroupingContext<'_>,
) -> HierarchyResult<Vec<ProcessedNode>> {
    let ScopeResult { mut nodes, created } = result;

    // Hide-if-no-siblings: a created grouping node that is the only entry in
    // the scope dissolves into its children.
    let dissolve_lone_group = nodes.len() == 1
        && match &nodes[0].key {
            NodeKey::Grouping(key) => {
                created.contains(key)
                    && any_descendant(&nodes[0], &mut |node| {
                        policies_for(node, kind).is_some_and(|p| p.hide_if_no_siblings)
                    })
            }
            _ => false,
        };
    if dissolve_lone_group {
        let group = nodes.remove(0);
        let parent_keys = group.parent_keys;
        if let ChildrenState::Grouped(children) = group.children {
            for mut child in children {
                reparent(&mut child, parent_keys.clone());
                nodes.push(child);
            }
        }
        return Ok(nodes);
    }

    // Hide-if-one-grouped-node: a created grouping node with exactly one
    // child dissolves into it.
    let mut resolved = Vec::with_capacity(nodes.len());
    for node in nodes {
        let dissolve = match (&node.key, &node.children) {
            (NodeKey::Grouping(key), ChildrenState::Grouped(children)) => {
                created.contains(key)
                    && children.len() == 1
                    && any_descendant(&node, &mut |n| {
                        policies_for(n, kind).is_some_and(|p| p.hide_if_one_grouped_node)
                    })
            }
            _ => false,
        };
        if dissolve {
            let parent_keys = node.parent_keys;
            if let ChildrenState::Grouped(children) = node.children {
                for mut child in children {
                    reparent(&mut child, parent_keys.clone());
                    resolved.push(child);
                }
            }
        } else {
            resolved.push(node);
        }
    }

    // Auto-expand the surviving created grouping nodes.
    for node in &mut resolved {
        let NodeKey::Grouping(key) = node.key.clone() else {
            continue;
        };
        if !created.contains(&key) {
            continue;
        }
        if should_auto_expand(node, &key, kind) {
            node.auto_expand = true;
        }
    }
    Ok(resolved)
}

fn should_auto_expand(node: &ProcessedNode, key: &GroupingNodeKey, kind: GroupingKind) -> bool {
    let child_count = match &node.children {
        ChildrenState::Grouped(children) => children.len(),
        _ => 0,
    };

    // Params-driven expansion declared by the grouped nodes.
    let params_expand = any_descendant(node, &mut |n| {
        match policies_for(n, kind).and_then(|p| p.auto_expand) {
            Some(AutoExpandMode::Always) => true,
            Some(AutoExpandMode::SingleChild) => child_count == 1,
            None => false,
        }
    });
    if params_expand {
        return true;
    }

    // Filter-target-driven expansion: descendants whose filter path ends at
    // (or below) a grouping node tell ancestors to open up.
    let depth = node.parent_keys.len();
    any_descendant(node, &mut |n| {
        let Some(info) = &n.filtering else {
            return false;
        };
        if !info.is_filter_target {
            return false;
        }
        match info
            .filter_target_options
            .as_ref()
            .and_then(|options| options.auto_expand.as_ref())
        {
            Some(FilterTargetAutoExpand::Enabled(enabled)) => *enabled,
            Some(FilterTargetAutoExpand::UntilGrouping {
                key: target_key,
                depth: target_depth,
            }) => depth < *target_depth || (depth == *target_depth && target_key != key),
            None => false,
        }
    })
}

/// Re-sort every scope by label: the level itself and, recursively, the
/// children of every grouping node.
fn sort_scopes(scope: &mut Vec<ProcessedNode>) {
    sort_level(scope);
    for node in scope {
        if let ChildrenState::Grouped(children) = &mut node.children {
            sort_scopes(children);
        }
    }
}
