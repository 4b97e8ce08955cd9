//! Grouping and merging by label.
//!
//! Nodes with equal labels and equal group ids either merge into a single
//! instances node (key = order-preserving union of the merged keys) or
//! become children of a label grouping node, per the declared action.
//! Differing labels or group ids never combine.

use crate::keys::{GroupingNodeKey, InstanceKey, NodeKey};
use crate::nodes::{
    ChildrenState, FilteringInfo, LabelGroupingAction, ProcessedNode,
};

use super::{make_grouping_node, ScopeResult};

enum Entry {
    Plain(ProcessedNode),
    Combine {
        action: LabelGroupingAction,
        label: String,
        group_id: Option<String>,
        members: Vec<ProcessedNode>,
    },
}

pub(super) fn group_scope(scope: Vec<ProcessedNode>) -> ScopeResult {
    let mut entries: Vec<Entry> = Vec::with_capacity(scope.len());

    for node in scope {
        let Some(action_and_id) = label_action(&node) else {
            entries.push(Entry::Plain(node));
            continue;
        };
        let (action, group_id) = action_and_id;
        let position = entries.iter().position(|entry| {
            matches!(
                entry,
                Entry::Combine {
                    action: entry_action,
                    label,
                    group_id: entry_group_id,
                    ..
                } if *entry_action == action
                    && *label == node.label
                    && *entry_group_id == group_id
            )
        });
        match position {
            Some(position) => {
                if let Entry::Combine { members, .. } = &mut entries[position] {
                    members.push(node);
                }
            }
            None => entries.push(Entry::Combine {
                action,
                label: node.label.clone(),
                group_id,
                members: vec![node],
            }),
        }
    }

    let mut created = Vec::new();
    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Entry::Plain(node) => nodes.push(node),
            Entry::Combine {
                action: LabelGroupingAction::Merge,
                members,
                ..
            } => nodes.extend(merge_nodes(members)),
            Entry::Combine {
                action: LabelGroupingAction::Group,
                label,
                group_id,
                members,
            } => {
                let key = GroupingNodeKey::Label {
                    label: label.clone(),
                    group_id,
                };
                created.push(key.clone());
                let parent_keys = members
                    .first()
                    .map(|member| member.parent_keys.clone())
                    .unwrap_or_default();
                nodes.push(make_grouping_node(key, label, parent_keys, members));
            }
        }
    }
    ScopeResult { nodes, created }
}

/// Whether (and how) a node participates in label grouping. Merging needs
/// instance keys; grouping accepts generic nodes too.
fn label_action(node: &ProcessedNode) -> Option<(LabelGroupingAction, Option<String>)> {
    let params = node.processing.grouping.as_ref()?.by_label.as_ref()?;
    match (params.action, &node.key) {
        (LabelGroupingAction::Merge, NodeKey::Instances(_)) => {
            Some((params.action, params.group_id.clone()))
        }
        (LabelGroupingAction::Merge, _) => None,
        (LabelGroupingAction::Group, NodeKey::Grouping(_)) => None,
        (LabelGroupingAction::Group, _) => Some((params.action, params.group_id.clone())),
    }
}

/// Merge same-label nodes into one instances node.
fn merge_nodes(members: Vec<ProcessedNode>) -> Option<ProcessedNode> {
    let mut members = members.into_iter();
    let mut merged = members.next()?;

    let mut keys: Vec<InstanceKey> = match merged.key {
        NodeKey::Instances(keys) => keys,
        // Only instances nodes enter merge buckets.
        other => {
            merged.key = other;
            return Some(merged);
        }
    };
    for member in members {
        if let NodeKey::Instances(member_keys) = member.key {
            for key in member_keys {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        merged.children = merge_children(&merged.children, &member.children);
        merged.auto_expand |= member.auto_expand;
        merged.supports_filtering |= member.supports_filtering;
        if merged.extended_data.is_none() {
            merged.extended_data = member.extended_data;
        }
        merged.filtering = merge_filtering(merged.filtering.take(), member.filtering);
    }
    merged.key = NodeKey::Instances(keys);
    Some(merged)
}

fn merge_children(a: &ChildrenState, b: &ChildrenState) -> ChildrenState {
    match (a, b) {
        (ChildrenState::Known(true), _) | (_, ChildrenState::Known(true)) => {
            ChildrenState::Known(true)
        }
        (ChildrenState::Unknown, _) | (_, ChildrenState::Unknown) => ChildrenState::Unknown,
        _ => ChildrenState::Known(false),
    }
}

fn merge_filtering(
    a: Option<FilteringInfo>,
    b: Option<FilteringInfo>,
) -> Option<FilteringInfo> {
    match (a, b) {
        (None, None) => None,
        (Some(info), None) | (None, Some(info)) => Some(info),
        (Some(mut a), Some(b)) => {
            let mut paths = a.filtered_children_identifier_paths.unwrap_or_default();
            paths.extend(b.filtered_children_identifier_paths.unwrap_or_default());
            a.filtered_children_identifier_paths =
                if paths.is_empty() { None } else { Some(paths) };
            a.is_filter_target |= b.is_filter_target;
            a.has_filter_target_ancestor |= b.has_filter_target_ancestor;
            if a.filter_target_options.is_none() {
                a.filter_target_options = b.filter_target_options;
            }
            Some(a)
        }
    }
}
