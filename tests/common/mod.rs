//! Shared fixtures: a static in-memory schema provider, a scripted query
//! executor, and a closure-driven hierarchy definition.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::json;

use canopy::{
    ClassInfo, ClassKind, GetNodesRequest, HierarchyDefinition, HierarchyError, HierarchyNode,
    HierarchyProvider, HierarchyResult, InstanceFilter, InstanceQuery, InstanceQueryDefinition,
    LevelDefinition, NodeDefinition, NodeKey, PrimitiveType, PropertyInfo, ProviderConfig,
    QueryExecutor, QueryReaderConfig, Row, RowStream, RowsLimit, SchemaProvider, SourceNode,
};

// ============================================================================
// Static schema provider
// ============================================================================

pub struct StaticProperty {
    pub name: String,
    pub primitive_type: PrimitiveType,
    pub extended_type: Option<String>,
    pub kind_of_quantity: Option<String>,
}

impl PropertyInfo for StaticProperty {
    fn name(&self) -> &str {
        &self.name
    }

    fn primitive_type(&self) -> PrimitiveType {
        self.primitive_type
    }

    fn extended_type(&self) -> Option<String> {
        self.extended_type.clone()
    }

    fn kind_of_quantity(&self) -> Option<String> {
        self.kind_of_quantity.clone()
    }
}

pub struct StaticClass {
    full_name: String,
    label: Option<String>,
    kind: ClassKind,
    /// Full names of all (transitive) base classes.
    bases: Vec<String>,
    properties: HashMap<String, Arc<StaticProperty>>,
}

#[async_trait]
impl ClassInfo for StaticClass {
    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn display_label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    fn kind(&self) -> ClassKind {
        self.kind
    }

    async fn is(&self, other_full_class_name: &str) -> HierarchyResult<bool> {
        Ok(self.full_name == other_full_class_name
            || self.bases.iter().any(|base| base == other_full_class_name))
    }

    fn property(&self, name: &str) -> Option<Arc<dyn PropertyInfo>> {
        self.properties
            .get(name)
            .map(|property| Arc::clone(property) as Arc<dyn PropertyInfo>)
    }
}

#[derive(Default)]
pub struct StaticSchema {
    classes: HashMap<String, Arc<StaticClass>>,
    source_key: Option<String>,
}

impl StaticSchema {
    pub fn new() -> Self {
        StaticSchema::default()
    }

    pub fn with_source_key(mut self, key: &str) -> Self {
        self.source_key = Some(key.to_string());
        self
    }

    pub fn entity(self, full_name: &str) -> Self {
        self.class(full_name, ClassKind::Entity, &[])
    }

    pub fn entity_with_bases(self, full_name: &str, bases: &[&str]) -> Self {
        self.class(full_name, ClassKind::Entity, bases)
    }

    pub fn class(mut self, full_name: &str, kind: ClassKind, bases: &[&str]) -> Self {
        self.classes.insert(
            full_name.to_string(),
            Arc::new(StaticClass {
                full_name: full_name.to_string(),
                label: None,
                kind,
                bases: bases.iter().map(|base| base.to_string()).collect(),
                properties: HashMap::new(),
            }),
        );
        self
    }

    pub fn with_label(mut self, full_name: &str, label: &str) -> Self {
        if let Some(class) = self.classes.get(full_name) {
            let updated = StaticClass {
                full_name: class.full_name.clone(),
                label: Some(label.to_string()),
                kind: class.kind,
                bases: class.bases.clone(),
                properties: class.properties.clone(),
            };
            self.classes.insert(full_name.to_string(), Arc::new(updated));
        }
        self
    }

    pub fn with_property(mut self, full_name: &str, property: &str, ty: PrimitiveType) -> Self {
        if let Some(class) = self.classes.get(full_name) {
            let mut properties = class.properties.clone();
            properties.insert(
                property.to_string(),
                Arc::new(StaticProperty {
                    name: property.to_string(),
                    primitive_type: ty,
                    extended_type: None,
                    kind_of_quantity: None,
                }),
            );
            let updated = StaticClass {
                full_name: class.full_name.clone(),
                label: class.label.clone(),
                kind: class.kind,
                bases: class.bases.clone(),
                properties,
            };
            self.classes.insert(full_name.to_string(), Arc::new(updated));
        }
        self
    }
}

#[async_trait]
impl SchemaProvider for StaticSchema {
    async fn get_class(&self, full_class_name: &str) -> HierarchyResult<Arc<dyn ClassInfo>> {
        self.classes
            .get(full_class_name)
            .map(|class| Arc::clone(class) as Arc<dyn ClassInfo>)
            .ok_or_else(|| {
                HierarchyError::invalid_definition(format!("unknown class '{full_class_name}'"))
            })
    }

    fn source_key(&self) -> Option<String> {
        self.source_key.clone()
    }
}

// ============================================================================
// Scripted query executor
// ============================================================================

/// Executor returning scripted rows for queries whose SQL contains the
/// script's key. Records executed SQL for cache assertions and applies the
/// configured rows limit the way a real executor would.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: Vec<(String, Vec<Row>)>,
    failures: Vec<(String, HierarchyError)>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        ScriptedExecutor::default()
    }

    pub fn on(mut self, sql_fragment: &str, rows: Vec<Row>) -> Self {
        self.scripts.push((sql_fragment.to_string(), rows));
        self
    }

    /// Terminate matching queries with the given error before any row.
    pub fn fail_with(mut self, sql_fragment: &str, error: HierarchyError) -> Self {
        self.failures.push((sql_fragment.to_string(), error));
        self
    }

    /// How many times a query whose SQL contains the fragment was executed.
    pub fn execution_count(&self, sql_fragment: &str) -> usize {
        self.executed
            .lock()
            .expect("executor mutex poisoned")
            .iter()
            .filter(|sql| sql.contains(sql_fragment))
            .count()
    }
}

impl QueryExecutor for ScriptedExecutor {
    fn create_query_reader(&self, query: InstanceQuery, config: QueryReaderConfig) -> RowStream {
        self.executed
            .lock()
            .expect("executor mutex poisoned")
            .push(query.sql.clone());

        if let Some((_, error)) = self
            .failures
            .iter()
            .find(|(fragment, _)| query.sql.contains(fragment))
        {
            let error = error.clone();
            return stream::once(async move { Err(error) }).boxed();
        }

        let script = self
            .scripts
            .iter()
            .find(|(fragment, _)| query.sql.contains(fragment));
        let Some((_, rows)) = script else {
            let sql = query.sql;
            return stream::once(async move {
                Err(HierarchyError::executor(anyhow::anyhow!(
                    "no scripted rows for query: {sql}"
                )))
            })
            .boxed();
        };

        let mut results: Vec<HierarchyResult<Row>> = rows.iter().cloned().map(Ok).collect();
        if let RowsLimit::Limited(limit) = config.limit {
            if results.len() as u64 > limit {
                results.truncate(limit as usize);
                results.push(Err(HierarchyError::RowsLimitExceeded { limit }));
            }
        }
        stream::iter(results).boxed()
    }
}

// ============================================================================
// Closure-driven hierarchy definition
// ============================================================================

type LevelFn = Box<dyn Fn(Option<&HierarchyNode>) -> LevelDefinition + Send + Sync>;

pub struct TestDefinition {
    levels: LevelFn,
}

impl TestDefinition {
    pub fn new(
        levels: impl Fn(Option<&HierarchyNode>) -> LevelDefinition + Send + Sync + 'static,
    ) -> Self {
        TestDefinition {
            levels: Box::new(levels),
        }
    }
}

#[async_trait]
impl HierarchyDefinition for TestDefinition {
    async fn define_level(
        &self,
        parent: Option<&HierarchyNode>,
        _instance_filter: Option<&InstanceFilter>,
    ) -> HierarchyResult<LevelDefinition> {
        Ok((self.levels)(parent))
    }
}

// ============================================================================
// Row & definition builders
// ============================================================================

pub fn instance_row(class: &str, id: &str, label: &str) -> Row {
    Row::from([
        ("FullClassName", json!(class)),
        ("ECInstanceId", json!(id)),
        ("DisplayLabel", json!(label)),
    ])
}

pub fn with_column(mut row: Row, column: &str, value: serde_json::Value) -> Row {
    row.0.insert(column.to_string(), value);
    row
}

pub fn generic_def(id: &str, label: &str) -> NodeDefinition {
    NodeDefinition::Generic(SourceNode::generic(id, label))
}

pub fn query_def(full_class_name: &str, sql: &str) -> NodeDefinition {
    NodeDefinition::InstanceQuery(InstanceQueryDefinition {
        full_class_name: full_class_name.to_string(),
        query: InstanceQuery::new(sql),
    })
}

// ============================================================================
// Provider & assertion helpers
// ============================================================================

pub fn build_provider(
    schema: StaticSchema,
    executor: ScriptedExecutor,
    definition: TestDefinition,
) -> HierarchyProvider {
    HierarchyProvider::new(ProviderConfig::new(
        Arc::new(schema),
        Arc::new(executor),
        Arc::new(definition),
    ))
}

pub async fn root_nodes(provider: &HierarchyProvider) -> Vec<HierarchyNode> {
    provider
        .collect_nodes(GetNodesRequest::root())
        .await
        .expect("root level request failed")
}

pub async fn children_of(provider: &HierarchyProvider, parent: &HierarchyNode) -> Vec<HierarchyNode> {
    provider
        .collect_nodes(GetNodesRequest::children_of(parent.clone()))
        .await
        .expect("child level request failed")
}

pub fn labels(nodes: &[HierarchyNode]) -> Vec<&str> {
    nodes.iter().map(|node| node.label.as_str()).collect()
}

/// Id of a generic parent node, if the parent is generic.
pub fn generic_parent_id(parent: Option<&HierarchyNode>) -> Option<&str> {
    match parent.map(|parent| &parent.key) {
        Some(NodeKey::Generic(key)) => Some(key.id.as_str()),
        _ => None,
    }
}

/// Ids of an instances parent's keys.
pub fn instance_parent_ids(parent: Option<&HierarchyNode>) -> Vec<&str> {
    match parent.map(|parent| &parent.key) {
        Some(NodeKey::Instances(keys)) => keys.iter().map(|key| key.id.as_str()).collect(),
        _ => Vec::new(),
    }
}
