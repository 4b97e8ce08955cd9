//! Node shapes and processing parameters.
//!
//! A node passes through three shapes on its way to the consumer:
//!
//! ```text
//! SourceNode          (definition / row reader; label may be concatenated,
//!     ↓                children unknown, carries processing params)
//! ProcessedNode       (pipeline; formatted label, parent keys assigned)
//!     ↓
//! HierarchyNode       (final; children flag resolved, params stripped)
//! ```
//!
//! `ProcessingParams` carry the instructions the pipeline consumes: hiding
//! flags and the grouping sub-record. `FilteringInfo` carries the state the
//! filtering wrapper needs to keep restricting deeper levels.

use serde::{Deserialize, Serialize};

use crate::keys::{GenericNodeKey, GroupingNodeKey, InstanceKey, NodeKey};
use crate::values::Label;

/// JSON object attached to nodes as `extended_data`.
pub type ExtendedData = serde_json::Map<String, serde_json::Value>;

/// Key of a node as produced by a hierarchy definition: grouping keys only
/// exist after the grouping stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceNodeKey {
    Generic(GenericNodeKey),
    Instances(Vec<InstanceKey>),
}

impl From<SourceNodeKey> for NodeKey {
    fn from(key: SourceNodeKey) -> Self {
        match key {
            SourceNodeKey::Generic(key) => NodeKey::Generic(key),
            SourceNodeKey::Instances(keys) => NodeKey::Instances(keys),
        }
    }
}

/// How eagerly a grouping node auto-expands in the consumer UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoExpandMode {
    /// Expand the grouping node unconditionally.
    Always,
    /// Expand the grouping node only when it has a single child.
    SingleChild,
}

/// Policies shared by all grouping kinds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupingPolicies {
    /// Dissolve the grouping node when it ends up the only entry in the level.
    pub hide_if_no_siblings: bool,
    /// Dissolve the grouping node when it groups a single node.
    pub hide_if_one_grouped_node: bool,
    /// Auto-expand request propagated to the created grouping node.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<AutoExpandMode>,
}

/// Grouping by declared base classes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseClassGroupingParams {
    /// Full names of base classes to group by, in normalized or `:` form.
    pub full_class_names: Vec<String>,
    #[serde(flatten)]
    pub policies: GroupingPolicies,
}

/// Grouping by the node's exact class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassGroupingParams {
    #[serde(flatten)]
    pub policies: GroupingPolicies,
}

/// What to do with nodes that share a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LabelGroupingAction {
    /// Create a label grouping node containing the original nodes.
    Group,
    /// Merge the nodes into a single instances node.
    Merge,
}

/// Grouping or merging by display label.
///
/// The action is an explicit tagged variant; there is no boolean shorthand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelGroupingParams {
    pub action: LabelGroupingAction,
    /// Nodes only group/merge with nodes carrying the same group id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(flatten)]
    pub policies: GroupingPolicies,
}

/// A declared property value range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRangeParams {
    pub from: f64,
    pub to: f64,
    /// Range label; defaults to `"<from> - <to>"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// One property this node wants to be grouped by, together with the raw
/// value selected for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroup {
    pub property_name: String,
    /// Raw property value as selected by the level query; `None` when the
    /// instance has no value for the property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_value: Option<serde_json::Value>,
    /// When present, group into ranges instead of distinct values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranges: Option<Vec<PropertyRangeParams>>,
}

/// Grouping by property values or ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyGroupingParams {
    /// Class that declares the grouped properties; nodes of unrelated
    /// classes pass through ungrouped.
    pub property_class_name: String,
    pub property_groups: Vec<PropertyGroup>,
    /// Collect values matching no declared range into an "other" bucket.
    #[serde(default)]
    pub create_group_for_out_of_range_values: bool,
    /// Collect instances without a value into an "unspecified" bucket.
    #[serde(default)]
    pub create_group_for_unspecified_values: bool,
    #[serde(flatten)]
    pub policies: GroupingPolicies,
}

/// The grouping sub-record of a node's processing params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_base_classes: Option<BaseClassGroupingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_class: Option<ClassGroupingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_label: Option<LabelGroupingParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_properties: Option<PropertyGroupingParams>,
}

impl GroupingParams {
    pub fn is_empty(&self) -> bool {
        self.by_base_classes.is_none()
            && self.by_class.is_none()
            && self.by_label.is_none()
            && self.by_properties.is_none()
    }
}

/// Instructions consumed by the processing pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingParams {
    /// Always hide this node, splicing its children into its place.
    pub hide_in_hierarchy: bool,
    /// Hide this node when its child level is empty.
    pub hide_if_no_children: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grouping: Option<GroupingParams>,
}

impl ProcessingParams {
    pub fn is_default(&self) -> bool {
        !self.hide_in_hierarchy
            && !self.hide_if_no_children
            && self.grouping.as_ref().is_none_or(GroupingParams::is_empty)
    }
}

/// One identifier on a filter path: either an instance key or a generic
/// node key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeIdentifier {
    Instance(InstanceKey),
    Generic(GenericNodeKey),
}

impl NodeIdentifier {
    pub fn source(&self) -> Option<&str> {
        match self {
            NodeIdentifier::Instance(key) => key.source.as_deref(),
            NodeIdentifier::Generic(key) => key.source.as_deref(),
        }
    }
}

impl From<InstanceKey> for NodeIdentifier {
    fn from(key: InstanceKey) -> Self {
        NodeIdentifier::Instance(key)
    }
}

impl From<GenericNodeKey> for NodeIdentifier {
    fn from(key: GenericNodeKey) -> Self {
        NodeIdentifier::Generic(key)
    }
}

/// Auto-expand behavior requested for a filter target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterTargetAutoExpand {
    /// Expand every ancestor of the target.
    Enabled(bool),
    /// Expand ancestors up to the grouping node identified by key and depth.
    UntilGrouping {
        key: GroupingNodeKey,
        depth: usize,
    },
}

/// Options attached to the terminal identifier of a filter path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterTargetOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_expand: Option<FilterTargetAutoExpand>,
}

impl FilterTargetOptions {
    /// Whether plain (non-grouping-aware) auto-expansion is requested.
    pub fn wants_plain_auto_expand(&self) -> bool {
        matches!(self.auto_expand, Some(FilterTargetAutoExpand::Enabled(true)))
    }
}

/// A root-to-node identifier path restricting hierarchy levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteringPath {
    pub identifiers: Vec<NodeIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<FilterTargetOptions>,
}

impl FilteringPath {
    pub fn new(identifiers: impl IntoIterator<Item = NodeIdentifier>) -> Self {
        FilteringPath {
            identifiers: identifiers.into_iter().collect(),
            options: None,
        }
    }

    pub fn with_options(mut self, options: FilterTargetOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Filtering state attached to a node by the filtering wrapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilteringInfo {
    /// Path suffixes to keep restricting this node's children with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered_children_identifier_paths: Option<Vec<FilteringPath>>,
    /// This node's identifier terminates at least one filter path.
    pub is_filter_target: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_target_options: Option<FilterTargetOptions>,
    /// Some ancestor of this node is a filter target.
    pub has_filter_target_ancestor: bool,
}

impl FilteringInfo {
    /// Child paths, empty when none were attached.
    pub fn child_paths(&self) -> &[FilteringPath] {
        self.filtered_children_identifier_paths
            .as_deref()
            .unwrap_or(&[])
    }
}

/// A node as produced by a hierarchy definition or parsed from a query row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceNode {
    pub key: SourceNodeKey,
    pub label: Label,
    /// `None` = unknown (determined by probing the child level);
    /// `Some(false)` = declared leaf; `Some(true)` = declared non-leaf.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<bool>,
    #[serde(default)]
    pub auto_expand: bool,
    #[serde(default)]
    pub supports_filtering: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<ExtendedData>,
    #[serde(default, skip_serializing_if = "ProcessingParams::is_default")]
    pub processing: ProcessingParams,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtering: Option<FilteringInfo>,
}

impl SourceNode {
    /// A generic node with the given id and label.
    pub fn generic(id: impl Into<String>, label: impl Into<Label>) -> Self {
        SourceNode {
            key: SourceNodeKey::Generic(GenericNodeKey::new(id)),
            label: label.into(),
            children: None,
            auto_expand: false,
            supports_filtering: false,
            extended_data: None,
            processing: ProcessingParams::default(),
            filtering: None,
        }
    }

    /// An instances node for a single instance key.
    pub fn instance(key: InstanceKey, label: impl Into<Label>) -> Self {
        SourceNode {
            key: SourceNodeKey::Instances(vec![key]),
            label: label.into(),
            children: None,
            auto_expand: false,
            supports_filtering: false,
            extended_data: None,
            processing: ProcessingParams::default(),
            filtering: None,
        }
    }

    pub fn with_children(mut self, children: bool) -> Self {
        self.children = Some(children);
        self
    }

    pub fn with_processing(mut self, processing: ProcessingParams) -> Self {
        self.processing = processing;
        self
    }
}

/// Children knowledge of a node inside the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildrenState {
    /// Not known yet; resolved by the determine-children stage.
    Unknown,
    Known(bool),
    /// Materialized children of a grouping node.
    Grouped(Vec<ProcessedNode>),
}

impl ChildrenState {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(value) => ChildrenState::Known(value),
            None => ChildrenState::Unknown,
        }
    }
}

/// A node inside the processing pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedNode {
    pub key: NodeKey,
    /// Keys of ancestors, root first. Length equals depth.
    pub parent_keys: Vec<NodeKey>,
    /// Formatted display label.
    pub label: String,
    pub children: ChildrenState,
    pub auto_expand: bool,
    pub supports_filtering: bool,
    pub extended_data: Option<ExtendedData>,
    pub processing: ProcessingParams,
    pub filtering: Option<FilteringInfo>,
}

impl ProcessedNode {
    /// Instance keys of this node, if it is an instances node.
    pub fn instance_keys(&self) -> Option<&[InstanceKey]> {
        self.key.instance_keys()
    }

    /// Class of the node for grouping purposes: the class of its first
    /// instance key, descending through grouping children.
    pub fn grouping_class_name(&self) -> Option<&str> {
        match &self.key {
            NodeKey::Instances(keys) => keys.first().map(|key| key.class_name.as_str()),
            NodeKey::Grouping(_) => match &self.children {
                ChildrenState::Grouped(children) => {
                    children.first().and_then(ProcessedNode::grouping_class_name)
                }
                _ => None,
            },
            NodeKey::Generic(_) => None,
        }
    }

    /// Whether this node is a filter target without a filter-target
    /// ancestor. Such targets terminate their path and ignore hiding only
    /// when an ancestor target exists.
    pub fn is_standalone_filter_target(&self) -> bool {
        self.filtering
            .as_ref()
            .is_some_and(|info| info.is_filter_target && !info.has_filter_target_ancestor)
    }

    /// Full key path of this node, root first, ending with its own key.
    pub fn key_path(&self) -> Vec<NodeKey> {
        let mut path = self.parent_keys.clone();
        path.push(self.key.clone());
        path
    }

    /// View of this node usable as the parent of a child-level request. The
    /// children flag is a placeholder; level definitions never read it.
    pub fn to_parent_view(&self) -> HierarchyNode {
        HierarchyNode {
            key: self.key.clone(),
            parent_keys: self.parent_keys.clone(),
            label: self.label.clone(),
            children: true,
            auto_expand: self.auto_expand,
            supports_filtering: self.supports_filtering,
            extended_data: self.extended_data.clone(),
            filtering: self.filtering.clone(),
        }
    }
}

/// A finalized node, as yielded to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub key: NodeKey,
    /// Keys of ancestors, root first. Length equals depth.
    pub parent_keys: Vec<NodeKey>,
    pub label: String,
    /// Whether the node has children; always resolved.
    pub children: bool,
    #[serde(default)]
    pub auto_expand: bool,
    #[serde(default)]
    pub supports_filtering: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<ExtendedData>,
    /// Retained so child requests can keep restricting deeper levels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtering: Option<FilteringInfo>,
}

impl HierarchyNode {
    /// Full key path of this node, root first, ending with its own key.
    pub fn key_path(&self) -> Vec<NodeKey> {
        let mut path = self.parent_keys.clone();
        path.push(self.key.clone());
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouping_params_json_shape() {
        let params = GroupingParams {
            by_class: Some(ClassGroupingParams {
                policies: GroupingPolicies {
                    hide_if_one_grouped_node: true,
                    ..GroupingPolicies::default()
                },
            }),
            ..GroupingParams::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "byClass": { "hideIfNoSiblings": false, "hideIfOneGroupedNode": true }
            })
        );
    }

    #[test]
    fn test_by_label_rejects_boolean() {
        // A bare boolean is not a valid label grouping declaration.
        let result = serde_json::from_value::<GroupingParams>(serde_json::json!({
            "byLabel": true
        }));
        assert!(result.is_err());

        let parsed = serde_json::from_value::<GroupingParams>(serde_json::json!({
            "byLabel": { "action": "merge" }
        }))
        .unwrap();
        assert_eq!(
            parsed.by_label.unwrap().action,
            LabelGroupingAction::Merge
        );
    }

    #[test]
    fn test_processing_params_default_detection() {
        assert!(ProcessingParams::default().is_default());
        assert!(ProcessingParams {
            grouping: Some(GroupingParams::default()),
            ..ProcessingParams::default()
        }
        .is_default());
        assert!(!ProcessingParams {
            hide_in_hierarchy: true,
            ..ProcessingParams::default()
        }
        .is_default());
    }

    #[test]
    fn test_grouping_class_descends_into_grouped_children() {
        let child = ProcessedNode {
            key: NodeKey::instances(vec![InstanceKey::new("S.C", "0x1")]),
            parent_keys: vec![],
            label: "child".to_string(),
            children: ChildrenState::Known(false),
            auto_expand: false,
            supports_filtering: false,
            extended_data: None,
            processing: ProcessingParams::default(),
            filtering: None,
        };
        let group = ProcessedNode {
            key: NodeKey::Grouping(GroupingNodeKey::Class {
                class_name: "S.C".to_string(),
                class_label: "C".to_string(),
            }),
            parent_keys: vec![],
            label: "group".to_string(),
            children: ChildrenState::Grouped(vec![child]),
            auto_expand: false,
            supports_filtering: false,
            extended_data: None,
            processing: ProcessingParams::default(),
            filtering: None,
        };
        assert_eq!(group.grouping_class_name(), Some("S.C"));
    }
}
