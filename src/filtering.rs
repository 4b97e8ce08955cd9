//! Hierarchy filtering.
//!
//! Wraps a hierarchy definition so each level only produces nodes that lie
//! on caller-supplied identifier paths, propagating path suffixes to child
//! levels:
//!
//! - generic-node definitions are retained only when a path names the node
//!   at the current depth;
//! - instance-query definitions are retained only when a path names an
//!   instance of a class polymorphically related to the query's class; the
//!   query is rewritten to join a CTE of the matching ids and to emit the
//!   synthetic `HasFilterTargetAncestor` / `FilterECInstanceId` /
//!   `FilterClassName` columns the filtering-aware parser consumes;
//! - a node whose identifier terminates a path becomes a *filter target*:
//!   its whole native subtree stays reachable (all child definitions are
//!   returned, marked as having a target ancestor).
//!
//! Path identifiers carrying a `source` that differs from the schema
//! provider's source key are dropped.

use std::sync::Arc;

use async_trait::async_trait;

use crate::definition::{
    HierarchyDefinition, InstanceFilter, InstanceQueryDefinition, LevelDefinition, NodeDefinition,
};
use crate::error::HierarchyResult;
use crate::executor::{InstanceQuery, Row};
use crate::keys::normalize_full_class_name;
use crate::nodes::{
    FilteringInfo, FilteringPath, HierarchyNode, NodeIdentifier, ProcessedNode, SourceNode,
    SourceNodeKey,
};
use crate::reader::{columns, parse_row};
use crate::schema::{classes_related, SchemaProvider};

/// Name of the CTE a rewritten query joins against.
pub const FILTERING_CTE_NAME: &str = "FilteredNodeIdentifiers";

enum LevelContext {
    /// Filtering does not restrict this level.
    PassThrough,
    /// No path reaches this level; it is empty.
    Empty,
    /// The parent is a filter target (or below one): every definition is
    /// returned, with remaining paths still annotating matching children.
    Unrestricted { paths: Vec<FilteringPath> },
    /// Only definitions matching a path survive.
    Restricted { paths: Vec<FilteringPath> },
}

/// A [`HierarchyDefinition`] decorator restricting levels to filter paths.
pub struct FilteringHierarchyDefinition {
    inner: Arc<dyn HierarchyDefinition>,
    schema: Arc<dyn SchemaProvider>,
    root_paths: Vec<FilteringPath>,
}

impl FilteringHierarchyDefinition {
    pub fn new(
        inner: Arc<dyn HierarchyDefinition>,
        schema: Arc<dyn SchemaProvider>,
        paths: Vec<FilteringPath>,
    ) -> Self {
        let source_key = schema.source_key();
        let root_paths = paths
            .into_iter()
            .filter(|path| !path.identifiers.is_empty())
            .filter(|path| {
                path.identifiers
                    .iter()
                    .all(|identifier| source_matches(identifier, source_key.as_deref()))
            })
            .collect();
        FilteringHierarchyDefinition {
            inner,
            schema,
            root_paths,
        }
    }

    fn level_context(&self, parent: Option<&HierarchyNode>) -> LevelContext {
        let Some(parent) = parent else {
            if self.root_paths.is_empty() {
                return LevelContext::Empty;
            }
            return LevelContext::Restricted {
                paths: self.root_paths.clone(),
            };
        };
        let Some(info) = &parent.filtering else {
            return LevelContext::PassThrough;
        };
        let paths: Vec<FilteringPath> = info
            .child_paths()
            .iter()
            .filter(|path| !path.identifiers.is_empty())
            .cloned()
            .collect();
        // A target parent opens its whole native subtree; so does a parent
        // inside such a subtree (on-path ancestor, no paths left to follow).
        if info.is_filter_target || (info.has_filter_target_ancestor && paths.is_empty()) {
            LevelContext::Unrestricted { paths }
        } else if paths.is_empty() {
            LevelContext::Empty
        } else {
            LevelContext::Restricted { paths }
        }
    }

    /// Paths whose first identifier names the given generic node.
    fn matching_generic_paths<'a>(
        &self,
        paths: &'a [FilteringPath],
        node: &SourceNode,
    ) -> Vec<&'a FilteringPath> {
        let SourceNodeKey::Generic(key) = &node.key else {
            return Vec::new();
        };
        paths
            .iter()
            .filter(|path| match path.identifiers.first() {
                Some(NodeIdentifier::Generic(identifier)) => identifier.id == key.id,
                _ => false,
            })
            .collect()
    }

    /// Paths whose first identifier is an instance of a class related to the
    /// query's declared class.
    async fn matching_instance_paths<'a>(
        &self,
        paths: &'a [FilteringPath],
        query_class_name: &str,
    ) -> HierarchyResult<Vec<&'a FilteringPath>> {
        let query_class_name = normalize_full_class_name(query_class_name);
        let mut matching = Vec::new();
        for path in paths {
            let Some(NodeIdentifier::Instance(key)) = path.identifiers.first() else {
                continue;
            };
            if classes_related(&self.schema, &key.class_name, &query_class_name).await? {
                matching.push(path);
            }
        }
        Ok(matching)
    }

    fn rewrite_query(
        &self,
        definition: InstanceQueryDefinition,
        matching: &[&FilteringPath],
        ancestor: bool,
    ) -> InstanceQueryDefinition {
        let mut values: Vec<String> = Vec::new();
        for path in matching {
            if let Some(NodeIdentifier::Instance(key)) = path.identifiers.first() {
                let row = format!(
                    "('{}', '{}', {})",
                    key.id.replace('\'', "''"),
                    key.class_name.replace('\'', "''"),
                    i32::from(ancestor)
                );
                if !values.contains(&row) {
                    values.push(row);
                }
            }
        }
        let cte = format!(
            "{FILTERING_CTE_NAME}({}, {}, {}) AS (VALUES {})",
            columns::FILTER_ECINSTANCE_ID,
            columns::FILTER_CLASS_NAME,
            columns::HAS_FILTER_TARGET_ANCESTOR,
            values.join(", ")
        );

        let InstanceQueryDefinition {
            full_class_name,
            query,
        } = definition;
        let mut ctes = query.ctes.unwrap_or_default();
        ctes.push(cte);
        let sql = format!(
            "SELECT q.*, f.{id}, f.{class}, f.{ancestor} \
             FROM ({sql}) q \
             JOIN {FILTERING_CTE_NAME} f ON f.{id} = q.{instance_id}",
            id = columns::FILTER_ECINSTANCE_ID,
            class = columns::FILTER_CLASS_NAME,
            ancestor = columns::HAS_FILTER_TARGET_ANCESTOR,
            sql = query.sql,
            instance_id = columns::ECINSTANCE_ID,
        );
        InstanceQueryDefinition {
            full_class_name,
            query: InstanceQuery {
                ctes: Some(ctes),
                sql,
                bindings: query.bindings,
            },
        }
    }

    /// Attach filtering state to a generic node at definition time (generic
    /// nodes never pass through the row parser).
    fn annotate_generic_node(
        &self,
        mut node: SourceNode,
        matching: &[&FilteringPath],
        ancestor: bool,
    ) -> SourceNode {
        let info = build_filtering_info(matching, ancestor, &mut node.auto_expand);
        node.filtering = Some(info);
        node
    }
}

/// Attach the level's paths to an elided (hidden) node without consuming an
/// identifier; the node's spliced-in children consume them instead.
fn pass_paths_through(
    mut node: SourceNode,
    paths: &[FilteringPath],
    ancestor: bool,
) -> SourceNode {
    node.filtering = Some(FilteringInfo {
        filtered_children_identifier_paths: Some(paths.to_vec()),
        is_filter_target: false,
        filter_target_options: None,
        has_filter_target_ancestor: ancestor,
    });
    node
}

fn source_matches(identifier: &NodeIdentifier, source_key: Option<&str>) -> bool {
    match identifier.source() {
        None => true,
        Some(source) => source_key == Some(source),
    }
}

/// Consume the first identifier of every matching path and fold the result
/// into a `FilteringInfo`: empty suffixes make the node a filter target,
/// non-empty suffixes keep restricting its children, and a non-empty suffix
/// requesting auto-expansion expands this (ancestor) node.
fn build_filtering_info(
    matching: &[&FilteringPath],
    ancestor: bool,
    auto_expand: &mut bool,
) -> FilteringInfo {
    let mut info = FilteringInfo {
        has_filter_target_ancestor: ancestor,
        ..FilteringInfo::default()
    };
    let mut child_paths = Vec::new();
    for path in matching {
        if path.identifiers.len() == 1 {
            info.is_filter_target = true;
            if info.filter_target_options.is_none() {
                info.filter_target_options = path.options.clone();
            }
        } else {
            if path
                .options
                .as_ref()
                .is_some_and(|options| options.wants_plain_auto_expand())
            {
                *auto_expand = true;
            }
            child_paths.push(FilteringPath {
                identifiers: path.identifiers[1..].to_vec(),
                options: path.options.clone(),
            });
        }
    }
    if !child_paths.is_empty() {
        info.filtered_children_identifier_paths = Some(child_paths);
    }
    info
}

#[async_trait]
impl HierarchyDefinition for FilteringHierarchyDefinition {
    async fn define_level(
        &self,
        parent: Option<&HierarchyNode>,
        instance_filter: Option<&InstanceFilter>,
    ) -> HierarchyResult<LevelDefinition> {
        let context = self.level_context(parent);
        let level = self.inner.define_level(parent, instance_filter).await?;

        match context {
            LevelContext::PassThrough => Ok(level),
            LevelContext::Empty => Ok(Vec::new()),
            LevelContext::Unrestricted { paths } => {
                // The parent is a target (or below one): keep everything,
                // annotating generic nodes that continue a path.
                let mut filtered = Vec::with_capacity(level.len());
                for definition in level {
                    match definition {
                        NodeDefinition::Generic(node) => {
                            let matching = self.matching_generic_paths(&paths, &node);
                            filtered.push(NodeDefinition::Generic(
                                self.annotate_generic_node(node, &matching, true),
                            ));
                        }
                        NodeDefinition::InstanceQuery(definition) => {
                            filtered.push(NodeDefinition::InstanceQuery(definition));
                        }
                    }
                }
                Ok(filtered)
            }
            LevelContext::Restricted { paths } => {
                // Whether the paths were handed down by an on-path parent
                // (only the root level gets them straight from the config).
                let from_parent = parent.is_some();
                let mut filtered = Vec::new();
                for definition in level {
                    match definition {
                        NodeDefinition::Generic(node) => {
                            let matching = self.matching_generic_paths(&paths, &node);
                            if matching.is_empty() {
                                // Hidden generic nodes are elided from the
                                // visible tree; paths pass through to their
                                // children without consuming an identifier.
                                if node.processing.hide_in_hierarchy {
                                    filtered.push(NodeDefinition::Generic(
                                        pass_paths_through(node, &paths, from_parent),
                                    ));
                                }
                                continue;
                            }
                            filtered.push(NodeDefinition::Generic(
                                self.annotate_generic_node(node, &matching, from_parent),
                            ));
                        }
                        NodeDefinition::InstanceQuery(definition) => {
                            let matching = self
                                .matching_instance_paths(&paths, &definition.full_class_name)
                                .await?;
                            if matching.is_empty() {
                                continue;
                            }
                            filtered.push(NodeDefinition::InstanceQuery(
                                self.rewrite_query(definition, &matching, from_parent),
                            ));
                        }
                    }
                }
                Ok(filtered)
            }
        }
    }

    async fn parse_node(
        &self,
        row: &Row,
        parent: Option<&HierarchyNode>,
    ) -> Option<HierarchyResult<SourceNode>> {
        let node = match self.inner.parse_node(row, parent).await {
            Some(Ok(node)) => node,
            Some(Err(err)) => return Some(Err(err)),
            None => match parse_row(row) {
                Ok(node) => node,
                Err(err) => return Some(Err(err)),
            },
        };
        Some(self.attach_filtering(node, row, parent).await)
    }

    async fn pre_process_node(
        &self,
        node: ProcessedNode,
    ) -> HierarchyResult<Option<ProcessedNode>> {
        self.inner.pre_process_node(node).await
    }

    async fn post_process_node(&self, node: ProcessedNode) -> HierarchyResult<ProcessedNode> {
        self.inner.post_process_node(node).await
    }
}

impl FilteringHierarchyDefinition {
    /// Reconstruct `FilteringInfo` for a parsed instance node: find the
    /// paths it matches among the level's paths, honoring the synthetic
    /// filter columns when the query was rewritten and the node's own key
    /// otherwise. Suffixes only propagate when the identifier's class is
    /// polymorphically related to the node's concrete class.
    async fn attach_filtering(
        &self,
        mut node: SourceNode,
        row: &Row,
        parent: Option<&HierarchyNode>,
    ) -> HierarchyResult<SourceNode> {
        // A parent is "on the path" when it was matched (paths attached),
        // is a target, or sits below one; its children then carry the
        // ancestor flag.
        let (paths, ancestor_context) = match parent {
            None => (self.root_paths.clone(), false),
            Some(parent) => match &parent.filtering {
                Some(info) => (
                    info.child_paths().to_vec(),
                    info.is_filter_target
                        || info.has_filter_target_ancestor
                        || !info.child_paths().is_empty(),
                ),
                None => return Ok(node),
            },
        };

        let SourceNodeKey::Instances(instance_keys) = &node.key else {
            return Ok(node);
        };
        let Some(concrete) = instance_keys.first() else {
            return Ok(node);
        };
        let concrete_class = concrete.class_name.clone();
        let concrete_id = concrete.id.clone();

        // The identifier the row matched, when the query was rewritten.
        let filter_id = row.string(columns::FILTER_ECINSTANCE_ID).map(str::to_string);
        let row_ancestor = row
            .flag(columns::HAS_FILTER_TARGET_ANCESTOR)
            .unwrap_or(false);

        let mut matching: Vec<&FilteringPath> = Vec::new();
        for path in &paths {
            let Some(NodeIdentifier::Instance(identifier)) = path.identifiers.first() else {
                continue;
            };
            let id_matches = match &filter_id {
                Some(filter_id) => identifier.id == *filter_id,
                None => identifier.id == concrete_id,
            };
            if !id_matches {
                continue;
            }
            if classes_related(&self.schema, &identifier.class_name, &concrete_class).await? {
                matching.push(path);
            }
        }

        if matching.is_empty() && !ancestor_context && !row_ancestor {
            if paths.is_empty() {
                return Ok(node);
            }
            // The node slipped past the rewritten query without matching a
            // path; close its subtree off.
            node.filtering = Some(FilteringInfo::default());
            return Ok(node);
        }

        let mut info =
            build_filtering_info(&matching, ancestor_context || row_ancestor, &mut node.auto_expand);
        info.has_filter_target_ancestor = ancestor_context || row_ancestor;
        node.filtering = Some(info);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{GenericNodeKey, InstanceKey};
    use crate::nodes::FilterTargetOptions;

    #[test]
    fn test_build_filtering_info_consumes_one_level() {
        let target = FilteringPath::new(vec![NodeIdentifier::Generic(GenericNodeKey::new("a"))]);
        let deeper = FilteringPath::new(vec![
            NodeIdentifier::Generic(GenericNodeKey::new("a")),
            NodeIdentifier::Instance(InstanceKey::new("S.C", "0x1")),
        ]);
        let mut auto_expand = false;
        let info = build_filtering_info(&[&target, &deeper], false, &mut auto_expand);

        assert!(info.is_filter_target);
        assert!(!info.has_filter_target_ancestor);
        assert!(!auto_expand);
        let suffixes = info.child_paths();
        assert_eq!(suffixes.len(), 1);
        assert_eq!(
            suffixes[0].identifiers,
            vec![NodeIdentifier::Instance(InstanceKey::new("S.C", "0x1"))]
        );
    }

    #[test]
    fn test_deeper_path_with_auto_expand_expands_ancestor() {
        let deeper = FilteringPath::new(vec![
            NodeIdentifier::Generic(GenericNodeKey::new("a")),
            NodeIdentifier::Generic(GenericNodeKey::new("b")),
        ])
        .with_options(FilterTargetOptions {
            auto_expand: Some(crate::nodes::FilterTargetAutoExpand::Enabled(true)),
        });
        let mut auto_expand = false;
        let info = build_filtering_info(&[&deeper], false, &mut auto_expand);
        assert!(auto_expand);
        assert!(!info.is_filter_target);
    }

    #[test]
    fn test_source_mismatch_is_dropped() {
        let foreign = NodeIdentifier::Instance(
            InstanceKey::new("S.C", "0x1").with_source("other-model"),
        );
        assert!(!source_matches(&foreign, Some("this-model")));
        assert!(source_matches(&foreign, Some("other-model")));
        let local = NodeIdentifier::Instance(InstanceKey::new("S.C", "0x1"));
        assert!(source_matches(&local, Some("this-model")));
        assert!(source_matches(&local, None));
    }
}
