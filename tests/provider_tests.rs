//! Provider end-to-end tests: level resolution, hiding, ordering, caching,
//! formatter swapping, and error surfacing.

mod common;

use std::sync::Arc;

use async_trait::async_trait;

use canopy::{
    GetNodesRequest, HierarchyError, HierarchyProvider, HierarchyResult, NodeKey,
    ProcessingParams, PrimitiveValue, ProviderConfig, RowsLimit, SourceNode, TypedValue,
    ValueFormatter,
};

use common::{
    build_provider, children_of, generic_def, generic_parent_id, instance_parent_ids,
    instance_row, labels, query_def, root_nodes, with_column, ScriptedExecutor, StaticSchema,
    TestDefinition,
};

fn hidden_generic(id: &str, label: &str) -> canopy::NodeDefinition {
    canopy::NodeDefinition::Generic(SourceNode::generic(id, label).with_processing(
        ProcessingParams {
            hide_in_hierarchy: true,
            ..ProcessingParams::default()
        },
    ))
}

// ============================================================================
// Custom nodes & hiding
// ============================================================================

#[tokio::test]
async fn test_two_custom_root_nodes() {
    let provider = build_provider(
        StaticSchema::new(),
        ScriptedExecutor::new(),
        TestDefinition::new(|parent| match parent {
            None => vec![generic_def("custom-1", "1"), generic_def("custom-2", "2")],
            Some(_) => vec![],
        }),
    );

    let roots = root_nodes(&provider).await;
    assert_eq!(labels(&roots), vec!["1", "2"]);
    for root in &roots {
        assert!(!root.children);
        assert!(root.parent_keys.is_empty());
    }
    assert_eq!(roots[0].key, NodeKey::generic("custom-1"));
}

#[tokio::test]
async fn test_hidden_intermediate_parent_is_elided() {
    let provider = build_provider(
        StaticSchema::new(),
        ScriptedExecutor::new(),
        TestDefinition::new(|parent| match generic_parent_id(parent) {
            None => vec![generic_def("root", "root")],
            Some("root") => vec![hidden_generic("hidden", "hidden")],
            Some("hidden") => vec![generic_def("visible", "visible")],
            Some(_) => vec![],
        }),
    );

    let roots = root_nodes(&provider).await;
    assert_eq!(labels(&roots), vec!["root"]);
    assert!(roots[0].children);

    let children = children_of(&provider, &roots[0]).await;
    assert_eq!(labels(&children), vec!["visible"]);
    // The hidden node is gone from the parent chain too.
    assert_eq!(children[0].parent_keys, vec![roots[0].key.clone()]);
    assert!(!children[0].children);
}

#[tokio::test]
async fn test_hide_if_no_children_drops_childless_node() {
    let provider = build_provider(
        StaticSchema::new(),
        ScriptedExecutor::new(),
        TestDefinition::new(|parent| match generic_parent_id(parent) {
            None => vec![generic_def("root", "root")],
            Some("root") => vec![canopy::NodeDefinition::Generic(
                SourceNode::generic("hidden-child", "hidden-child").with_processing(
                    ProcessingParams {
                        hide_if_no_children: true,
                        ..ProcessingParams::default()
                    },
                ),
            )],
            Some(_) => vec![],
        }),
    );

    let roots = root_nodes(&provider).await;
    assert_eq!(labels(&roots), vec!["root"]);
    assert!(!roots[0].children);

    let children = children_of(&provider, &roots[0]).await;
    assert!(children.is_empty());
}

#[tokio::test]
async fn test_hide_if_no_children_keeps_node_with_children() {
    let provider = build_provider(
        StaticSchema::new(),
        ScriptedExecutor::new(),
        TestDefinition::new(|parent| match generic_parent_id(parent) {
            None => vec![canopy::NodeDefinition::Generic(
                SourceNode::generic("maybe", "maybe").with_processing(ProcessingParams {
                    hide_if_no_children: true,
                    ..ProcessingParams::default()
                }),
            )],
            Some("maybe") => vec![generic_def("leaf", "leaf")],
            Some(_) => vec![],
        }),
    );

    let roots = root_nodes(&provider).await;
    assert_eq!(labels(&roots), vec!["maybe"]);
    assert!(roots[0].children);
}

// ============================================================================
// Ordering & parent keys
// ============================================================================

#[tokio::test]
async fn test_sibling_order_is_natural_and_case_insensitive() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = ScriptedExecutor::new().on(
        "widgets",
        vec![
            instance_row("S.Widget", "0x1", "Beta"),
            instance_row("S.Widget", "0x2", "alpha"),
            instance_row("S.Widget", "0x3", "10"),
            instance_row("S.Widget", "0x4", "2"),
        ],
    );
    let provider = build_provider(
        schema,
        executor,
        TestDefinition::new(|parent| match parent {
            None => vec![query_def("S.Widget", "SELECT widgets")],
            Some(_) => vec![],
        }),
    );

    let roots = root_nodes(&provider).await;
    assert_eq!(labels(&roots), vec!["2", "10", "alpha", "Beta"]);
}

#[tokio::test]
async fn test_parent_keys_grow_with_depth() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = ScriptedExecutor::new().on(
        "widgets",
        vec![instance_row("S.Widget", "0x1", "widget")],
    );
    let provider = build_provider(
        schema,
        executor,
        TestDefinition::new(|parent| {
            if parent.is_none() {
                return vec![generic_def("root", "root")];
            }
            if generic_parent_id(parent) == Some("root") {
                return vec![query_def("S.Widget", "SELECT widgets")];
            }
            if instance_parent_ids(parent) == vec!["0x1"] {
                return vec![generic_def("leaf", "leaf")];
            }
            vec![]
        }),
    );

    let roots = root_nodes(&provider).await;
    assert_eq!(roots[0].parent_keys.len(), 0);

    let level1 = children_of(&provider, &roots[0]).await;
    assert_eq!(level1[0].parent_keys.len(), 1);
    assert_eq!(level1[0].parent_keys[0], roots[0].key);

    let level2 = children_of(&provider, &level1[0]).await;
    assert_eq!(level2[0].parent_keys.len(), 2);
    assert_eq!(level2[0].parent_keys[1], level1[0].key);
    assert!(!level2[0].children);
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_repeated_requests_reuse_cached_stream() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = Arc::new(ScriptedExecutor::new().on(
        "widgets",
        vec![instance_row("S.Widget", "0x1", "widget")],
    ));
    let definition = TestDefinition::new(|parent| match parent {
        None => vec![query_def("S.Widget", "SELECT widgets")],
        Some(_) => vec![],
    });
    let provider = HierarchyProvider::new(ProviderConfig::new(
        Arc::new(schema),
        Arc::clone(&executor) as Arc<dyn canopy::QueryExecutor>,
        Arc::new(definition),
    ));

    let first = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    let second = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(executor.execution_count("widgets"), 1);
}

#[tokio::test]
async fn test_data_source_change_invalidates_cache() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = Arc::new(ScriptedExecutor::new().on(
        "widgets",
        vec![instance_row("S.Widget", "0x1", "widget")],
    ));
    let definition = TestDefinition::new(|parent| match parent {
        None => vec![query_def("S.Widget", "SELECT widgets")],
        Some(_) => vec![],
    });
    let provider = HierarchyProvider::new(ProviderConfig::new(
        Arc::new(schema),
        Arc::clone(&executor) as Arc<dyn canopy::QueryExecutor>,
        Arc::new(definition),
    ));

    provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(executor.execution_count("widgets"), 1);

    provider.notify_data_source_changed();
    provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(executor.execution_count("widgets"), 2);
}

// ============================================================================
// Formatter swapping
// ============================================================================

struct UppercaseFormatter;

#[async_trait]
impl ValueFormatter for UppercaseFormatter {
    async fn format(&self, value: &TypedValue) -> HierarchyResult<String> {
        Ok(match &value.value {
            PrimitiveValue::String(text) => text.to_uppercase(),
            other => format!("{other:?}"),
        })
    }
}

#[tokio::test]
async fn test_set_formatter_reformats_without_requerying() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = Arc::new(ScriptedExecutor::new().on(
        "widgets",
        vec![instance_row("S.Widget", "0x1", "widget")],
    ));
    let definition = TestDefinition::new(|parent| match parent {
        None => vec![query_def("S.Widget", "SELECT widgets")],
        Some(_) => vec![],
    });
    let provider = HierarchyProvider::new(ProviderConfig::new(
        Arc::new(schema),
        Arc::clone(&executor) as Arc<dyn canopy::QueryExecutor>,
        Arc::new(definition),
    ));

    let plain = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(labels(&plain), vec!["widget"]);

    provider.set_formatter(Some(Arc::new(UppercaseFormatter)));
    let shouting = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(labels(&shouting), vec!["WIDGET"]);
    // The cached raw stream stayed valid; no re-query happened.
    assert_eq!(executor.execution_count("widgets"), 1);

    provider.set_formatter(None);
    let plain_again = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(labels(&plain_again), vec!["widget"]);
}

// ============================================================================
// Error surfacing
// ============================================================================

#[tokio::test]
async fn test_rows_limit_exceeded_surfaces_from_get_nodes() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = ScriptedExecutor::new().on(
        "widgets",
        vec![
            instance_row("S.Widget", "0x1", "a"),
            instance_row("S.Widget", "0x2", "b"),
            instance_row("S.Widget", "0x3", "c"),
        ],
    );
    let provider = build_provider(
        schema,
        executor,
        TestDefinition::new(|parent| match parent {
            None => vec![query_def("S.Widget", "SELECT widgets")],
            Some(_) => vec![],
        }),
    );

    let result = provider
        .collect_nodes(GetNodesRequest::root().with_size_limit(RowsLimit::Limited(2)))
        .await;
    assert!(matches!(
        result,
        Err(HierarchyError::RowsLimitExceeded { limit: 2 })
    ));
}

#[tokio::test]
async fn test_rows_limit_in_children_probe_means_has_children() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = ScriptedExecutor::new()
        .on("widgets", vec![instance_row("S.Widget", "0x1", "widget")])
        .fail_with(
            "children-of-widget",
            HierarchyError::RowsLimitExceeded { limit: 1 },
        );
    let provider = build_provider(
        schema,
        executor,
        TestDefinition::new(|parent| {
            if parent.is_none() {
                return vec![query_def("S.Widget", "SELECT widgets")];
            }
            if instance_parent_ids(parent) == vec!["0x1"] {
                return vec![query_def("S.Widget", "SELECT children-of-widget")];
            }
            vec![]
        }),
    );

    let roots = root_nodes(&provider).await;
    assert_eq!(labels(&roots), vec!["widget"]);
    // The probe hit the rows limit, which counts as "has children".
    assert!(roots[0].children);
}

#[tokio::test]
async fn test_executor_failures_propagate() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = ScriptedExecutor::new().fail_with(
        "widgets",
        HierarchyError::executor(anyhow::anyhow!("connection reset")),
    );
    let provider = build_provider(
        schema,
        executor,
        TestDefinition::new(|parent| match parent {
            None => vec![query_def("S.Widget", "SELECT widgets")],
            Some(_) => vec![],
        }),
    );

    let result = provider.collect_nodes(GetNodesRequest::root()).await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("connection reset"));
}

#[tokio::test]
async fn test_empty_query_class_is_invalid_definition() {
    let provider = build_provider(
        StaticSchema::new(),
        ScriptedExecutor::new(),
        TestDefinition::new(|parent| match parent {
            None => vec![query_def("", "SELECT widgets")],
            Some(_) => vec![],
        }),
    );

    let result = provider.collect_nodes(GetNodesRequest::root()).await;
    assert!(matches!(
        result,
        Err(HierarchyError::InvalidDefinition { .. })
    ));
}

// ============================================================================
// Custom node labels go through the formatter too
// ============================================================================

#[tokio::test]
async fn test_extended_data_and_flags_survive_to_final_nodes() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = ScriptedExecutor::new().on(
        "widgets",
        vec![with_column(
            with_column(
                instance_row("S.Widget", "0x1", "widget"),
                "SupportsFiltering",
                serde_json::json!(true),
            ),
            "ExtendedData",
            serde_json::json!({"imageId": "icon-widget"}),
        )],
    );
    let provider = build_provider(
        schema,
        executor,
        TestDefinition::new(|parent| match parent {
            None => vec![query_def("S.Widget", "SELECT widgets")],
            Some(_) => vec![],
        }),
    );

    let roots = root_nodes(&provider).await;
    assert!(roots[0].supports_filtering);
    assert_eq!(
        roots[0]
            .extended_data
            .as_ref()
            .and_then(|data| data.get("imageId")),
        Some(&serde_json::json!("icon-widget"))
    );
}

// ============================================================================
// Class-based hierarchy definitions
// ============================================================================

#[tokio::test]
async fn test_class_based_definition_matches_parent_classes_polymorphically() {
    let schema = Arc::new(
        StaticSchema::new()
            .entity("S.Subject")
            .entity_with_bases("S.SpecialSubject", &["S.Subject"]),
    );
    let executor = ScriptedExecutor::new()
        .on(
            "root-subjects",
            vec![instance_row("S.SpecialSubject", "0x1", "special")],
        )
        .on(
            "children-of 0x1",
            vec![instance_row("S.SpecialSubject", "0x2", "nested")],
        );

    let definition = canopy::ClassBasedHierarchyDefinition::builder(
        Arc::clone(&schema) as Arc<dyn canopy::SchemaProvider>,
    )
    .root(|_request| async {
        Ok(vec![common::query_def("S.Subject", "SELECT root-subjects")])
    })
    .child_level_for_class("S.Subject", |request: canopy::ChildLevelRequest| async move {
        // The deduplicated parent ids select the child rows.
        let sql = format!("SELECT children-of {}", request.parent_instance_ids.join(","));
        Ok(vec![common::query_def("S.Subject", &sql)])
    })
    .build();

    let provider = HierarchyProvider::new(ProviderConfig::new(
        schema,
        Arc::new(executor),
        Arc::new(definition),
    ));

    let roots = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(labels(&roots), vec!["special"]);
    // The child level matched because S.SpecialSubject derives from the
    // level's declared S.Subject parent class.
    assert!(roots[0].children);

    let children = provider
        .collect_nodes(GetNodesRequest::children_of(roots[0].clone()))
        .await
        .unwrap();
    assert_eq!(labels(&children), vec!["nested"]);
}

#[tokio::test]
async fn test_class_based_definition_custom_parent_node() {
    let schema = Arc::new(StaticSchema::new().entity("S.Widget"));
    let executor = ScriptedExecutor::new().on(
        "widgets-under-custom",
        vec![instance_row("S.Widget", "0x1", "widget")],
    );

    let definition = canopy::ClassBasedHierarchyDefinition::builder(
        Arc::clone(&schema) as Arc<dyn canopy::SchemaProvider>,
    )
    .root(|_request| async {
        Ok(vec![canopy::NodeDefinition::Generic(SourceNode::generic(
            "settings", "Settings",
        ))])
    })
    .child_level_for_custom_node("settings", |_request| async {
        Ok(vec![common::query_def(
            "S.Widget",
            "SELECT widgets-under-custom",
        )])
    })
    .build();

    let provider = HierarchyProvider::new(ProviderConfig::new(
        schema,
        Arc::new(executor),
        Arc::new(definition),
    ));

    let roots = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(labels(&roots), vec!["Settings"]);
    assert!(roots[0].children);

    let children = provider
        .collect_nodes(GetNodesRequest::children_of(roots[0].clone()))
        .await
        .unwrap();
    assert_eq!(labels(&children), vec!["widget"]);
}

// ============================================================================
// Custom row parsers
// ============================================================================

struct ShoutingDefinition;

#[async_trait]
impl canopy::HierarchyDefinition for ShoutingDefinition {
    async fn define_level(
        &self,
        parent: Option<&canopy::HierarchyNode>,
        _instance_filter: Option<&canopy::InstanceFilter>,
    ) -> HierarchyResult<canopy::LevelDefinition> {
        match parent {
            None => Ok(vec![common::query_def("S.Widget", "SELECT widgets")]),
            Some(_) => Ok(vec![]),
        }
    }

    async fn parse_node(
        &self,
        row: &canopy::Row,
        _parent: Option<&canopy::HierarchyNode>,
    ) -> Option<HierarchyResult<SourceNode>> {
        // The raw row arrives unchanged; build the node from it directly.
        let class = row.string("FullClassName")?;
        let id = row.string("ECInstanceId")?;
        let label = row.string("DisplayLabel").unwrap_or_default().to_uppercase();
        Some(Ok(SourceNode::instance(
            canopy::InstanceKey::new(class, id),
            label,
        )))
    }
}

#[tokio::test]
async fn test_custom_parser_receives_raw_rows() {
    let schema = StaticSchema::new().entity("S.Widget");
    let executor = ScriptedExecutor::new().on(
        "widgets",
        vec![instance_row("S.Widget", "0x1", "widget")],
    );
    let provider = HierarchyProvider::new(ProviderConfig::new(
        Arc::new(schema),
        Arc::new(executor),
        Arc::new(ShoutingDefinition),
    ));

    let roots = provider.collect_nodes(GetNodesRequest::root()).await.unwrap();
    assert_eq!(labels(&roots), vec!["WIDGET"]);
}
