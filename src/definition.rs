//! Hierarchy definitions.
//!
//! A hierarchy definition is the caller's description of how each level of
//! the tree is produced: an ordered sequence of node definitions, each
//! either a statically declared node or an instance query. The engine calls
//! [`HierarchyDefinition::define_level`] once per parent and feeds the
//! result to the level resolver.
//!
//! [`ClassBasedHierarchyDefinition`] assembles a definition from per-class
//! child levels, matching levels to parents polymorphically through schema
//! metadata.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::error::HierarchyResult;
use crate::executor::{InstanceQuery, Row};
use crate::keys::NodeKey;
use crate::nodes::{HierarchyNode, ProcessedNode, SourceNode};
use crate::schema::SchemaProvider;

/// Caller-supplied restriction on a hierarchy level's instances. Opaque to
/// the engine: it is passed through to the definition and participates in
/// cache keying.
pub type InstanceFilter = serde_json::Value;

/// Definition of an instance-query level contribution.
#[derive(Debug, Clone)]
pub struct InstanceQueryDefinition {
    /// Full name of the class the query selects from.
    pub full_class_name: String,
    pub query: InstanceQuery,
}

/// One entry of a level definition.
#[derive(Debug, Clone)]
pub enum NodeDefinition {
    /// A statically declared node, emitted as-is.
    Generic(SourceNode),
    /// Rows of an instance query, parsed into nodes by the row reader.
    InstanceQuery(InstanceQueryDefinition),
}

/// Ordered sequence of node definitions producing one hierarchy level.
pub type LevelDefinition = Vec<NodeDefinition>;

/// Caller-supplied factory producing per-level node definitions.
#[async_trait]
pub trait HierarchyDefinition: Send + Sync {
    /// Define the level under `parent` (`None` for the root level).
    async fn define_level(
        &self,
        parent: Option<&HierarchyNode>,
        instance_filter: Option<&InstanceFilter>,
    ) -> HierarchyResult<LevelDefinition>;

    /// Custom row parser. Return `None` to fall back to the default parser.
    /// The raw row is passed unchanged; `parent` is the node whose level the
    /// row belongs to.
    async fn parse_node(
        &self,
        _row: &Row,
        _parent: Option<&HierarchyNode>,
    ) -> Option<HierarchyResult<SourceNode>> {
        None
    }

    /// Hook invoked before the hiding stages. May drop a node by returning
    /// `Ok(None)`.
    async fn pre_process_node(
        &self,
        node: ProcessedNode,
    ) -> HierarchyResult<Option<ProcessedNode>> {
        Ok(Some(node))
    }

    /// Hook invoked after children are determined, before params are
    /// stripped.
    async fn post_process_node(&self, node: ProcessedNode) -> HierarchyResult<ProcessedNode> {
        Ok(node)
    }
}

/// Request handed to a child-level factory of
/// [`ClassBasedHierarchyDefinition`].
#[derive(Debug, Clone)]
pub struct ChildLevelRequest {
    pub parent: HierarchyNode,
    /// Deduplicated ids of the parent node's instances; empty for generic
    /// parents.
    pub parent_instance_ids: Vec<String>,
    pub instance_filter: Option<InstanceFilter>,
}

/// Request handed to the root-level factory.
#[derive(Debug, Clone)]
pub struct RootLevelRequest {
    pub instance_filter: Option<InstanceFilter>,
}

type RootLevelFactory =
    Arc<dyn Fn(RootLevelRequest) -> BoxFuture<'static, HierarchyResult<LevelDefinition>> + Send + Sync>;
type ChildLevelFactory = Arc<
    dyn Fn(ChildLevelRequest) -> BoxFuture<'static, HierarchyResult<LevelDefinition>> + Send + Sync,
>;

enum ChildLevelMatcher {
    /// Matches instances parents whose class is, or derives from, the named
    /// class.
    ParentClass(String),
    /// Matches generic parents with the given key id.
    CustomParentNodeKey(String),
}

struct ChildLevelEntry {
    matcher: ChildLevelMatcher,
    factory: ChildLevelFactory,
}

/// A hierarchy definition assembled from a root level and per-parent-class
/// child levels.
///
/// A child level of an instances parent is the declared-order union of every
/// entry whose class is a base of (or equal to) any of the parent's instance
/// classes, plus every entry whose custom parent key matches a generic
/// parent.
pub struct ClassBasedHierarchyDefinition {
    schema: Arc<dyn SchemaProvider>,
    root: RootLevelFactory,
    child_levels: Vec<ChildLevelEntry>,
}

impl ClassBasedHierarchyDefinition {
    pub fn builder(schema: Arc<dyn SchemaProvider>) -> ClassBasedHierarchyDefinitionBuilder {
        ClassBasedHierarchyDefinitionBuilder {
            schema,
            root: None,
            child_levels: Vec::new(),
        }
    }
}

pub struct ClassBasedHierarchyDefinitionBuilder {
    schema: Arc<dyn SchemaProvider>,
    root: Option<RootLevelFactory>,
    child_levels: Vec<ChildLevelEntry>,
}

impl ClassBasedHierarchyDefinitionBuilder {
    pub fn root<F, Fut>(mut self, factory: F) -> Self
    where
        F: Fn(RootLevelRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HierarchyResult<LevelDefinition>> + Send + 'static,
    {
        self.root = Some(Arc::new(move |request| Box::pin(factory(request))));
        self
    }

    /// Child level for instances parents of the given class (or any of its
    /// subclasses).
    pub fn child_level_for_class<F, Fut>(mut self, parent_class: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ChildLevelRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HierarchyResult<LevelDefinition>> + Send + 'static,
    {
        self.child_levels.push(ChildLevelEntry {
            matcher: ChildLevelMatcher::ParentClass(crate::keys::normalize_full_class_name(
                &parent_class.into(),
            )),
            factory: Arc::new(move |request| Box::pin(factory(request))),
        });
        self
    }

    /// Child level for the generic parent with the given key id.
    pub fn child_level_for_custom_node<F, Fut>(mut self, key_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn(ChildLevelRequest) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HierarchyResult<LevelDefinition>> + Send + 'static,
    {
        self.child_levels.push(ChildLevelEntry {
            matcher: ChildLevelMatcher::CustomParentNodeKey(key_id.into()),
            factory: Arc::new(move |request| Box::pin(factory(request))),
        });
        self
    }

    pub fn build(self) -> ClassBasedHierarchyDefinition {
        ClassBasedHierarchyDefinition {
            schema: self.schema,
            root: self
                .root
                .unwrap_or_else(|| Arc::new(|_| Box::pin(async { Ok(Vec::new()) }))),
            child_levels: self.child_levels,
        }
    }
}

#[async_trait]
impl HierarchyDefinition for ClassBasedHierarchyDefinition {
    async fn define_level(
        &self,
        parent: Option<&HierarchyNode>,
        instance_filter: Option<&InstanceFilter>,
    ) -> HierarchyResult<LevelDefinition> {
        let Some(parent) = parent else {
            return (self.root)(RootLevelRequest {
                instance_filter: instance_filter.cloned(),
            })
            .await;
        };

        let mut level = Vec::new();
        match &parent.key {
            NodeKey::Generic(key) => {
                for entry in &self.child_levels {
                    if let ChildLevelMatcher::CustomParentNodeKey(id) = &entry.matcher {
                        if *id == key.id {
                            level.extend(
                                (entry.factory)(ChildLevelRequest {
                                    parent: parent.clone(),
                                    parent_instance_ids: Vec::new(),
                                    instance_filter: instance_filter.cloned(),
                                })
                                .await?,
                            );
                        }
                    }
                }
            }
            NodeKey::Instances(instance_keys) => {
                let mut parent_ids = Vec::new();
                for key in instance_keys {
                    if !parent_ids.contains(&key.id) {
                        parent_ids.push(key.id.clone());
                    }
                }
                for entry in &self.child_levels {
                    let ChildLevelMatcher::ParentClass(level_class) = &entry.matcher else {
                        continue;
                    };
                    if self
                        .matches_any_parent_class(instance_keys, level_class)
                        .await?
                    {
                        level.extend(
                            (entry.factory)(ChildLevelRequest {
                                parent: parent.clone(),
                                parent_instance_ids: parent_ids.clone(),
                                instance_filter: instance_filter.cloned(),
                            })
                            .await?,
                        );
                    }
                }
            }
            // Grouping parents are served from materialized children and
            // never reach the definition.
            NodeKey::Grouping(_) => {}
        }
        Ok(level)
    }
}

impl ClassBasedHierarchyDefinition {
    async fn matches_any_parent_class(
        &self,
        instance_keys: &[crate::keys::InstanceKey],
        level_class: &str,
    ) -> HierarchyResult<bool> {
        let mut checked: Vec<&str> = Vec::new();
        for key in instance_keys {
            if checked.contains(&key.class_name.as_str()) {
                continue;
            }
            checked.push(&key.class_name);
            let parent_class = self.schema.get_class(&key.class_name).await?;
            if parent_class.is(level_class).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
