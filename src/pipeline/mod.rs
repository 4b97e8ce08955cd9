//! Processing pipeline.
//!
//! Applied, in this order, to the per-parent stream of source nodes:
//!
//! 1. assign parent keys, 2. format labels, 3. pre-process hook,
//! 4. hide-if-no-children, 5. hide-in-hierarchy, 6. sort, 7. group,
//! 8. determine children, 9. post-process hook, 10. strip params.
//!
//! Stages 1–5 are pure stream transforms; sorting and grouping buffer the
//! whole level by design. The hiding and determine-children stages recurse
//! into child levels through [`LevelSource`], which the provider implements
//! on top of its cache.

pub(crate) mod sort;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::cache::LevelVariation;
use crate::definition::HierarchyDefinition;
use crate::error::HierarchyResult;
use crate::formatter::{format_node_label, ValueFormatter};
use crate::grouping::{apply_grouping, GroupingContext};
use crate::keys::NodeKey;
use crate::nodes::{ChildrenState, HierarchyNode, ProcessedNode, SourceNode};
use crate::provider::LocalizedStrings;
use crate::schema::SchemaProvider;

/// Collaborators a pipeline run needs. The formatter is a snapshot taken
/// when the request starts, so formatter swaps apply on the next read.
#[derive(Clone)]
pub(crate) struct PipelineEnv {
    pub schema: Arc<dyn SchemaProvider>,
    pub formatter: Arc<dyn ValueFormatter>,
    pub definition: Arc<dyn HierarchyDefinition>,
    pub localized: LocalizedStrings,
}

/// Access to child levels for the recursive pipeline stages.
pub(crate) trait LevelSource: Send + Sync + 'static {
    /// Pre-grouped processed-node stream of the level under `parent`
    /// (stages 1–5 applied). `base_keys` become the emitted nodes'
    /// `parent_keys`; the level cache is keyed by the parent's key path.
    fn pre_grouped_level(
        self: Arc<Self>,
        parent: HierarchyNode,
        base_keys: Vec<NodeKey>,
        variation: LevelVariation,
    ) -> BoxStream<'static, HierarchyResult<ProcessedNode>>;
}

/// Assemble stages 1–5 over a source-node stream.
pub(crate) fn pre_grouped_stages<P: LevelSource>(
    source: BoxStream<'static, HierarchyResult<SourceNode>>,
    base_keys: Vec<NodeKey>,
    env: PipelineEnv,
    provider: Arc<P>,
    variation: LevelVariation,
) -> BoxStream<'static, HierarchyResult<ProcessedNode>> {
    let stream = process_source_nodes(source, base_keys, env);
    let stream = hide_if_no_children(stream, Arc::clone(&provider), variation.clone());
    hide_in_hierarchy(stream, provider, variation)
}

/// Stages 1–3: parent keys, label formatting, pre-process hook.
fn process_source_nodes(
    source: BoxStream<'static, HierarchyResult<SourceNode>>,
    base_keys: Vec<NodeKey>,
    env: PipelineEnv,
) -> BoxStream<'static, HierarchyResult<ProcessedNode>> {
    source
        .then(move |node| {
            let base_keys = base_keys.clone();
            let env = env.clone();
            async move {
                let node = node?;
                let label =
                    format_node_label(&node.label, &env.schema, env.formatter.as_ref()).await?;
                let processed = ProcessedNode {
                    key: node.key.into(),
                    parent_keys: base_keys,
                    label,
                    children: ChildrenState::from_flag(node.children),
                    auto_expand: node.auto_expand,
                    supports_filtering: node.supports_filtering,
                    extended_data: node.extended_data,
                    processing: node.processing,
                    filtering: node.filtering,
                };
                env.definition.pre_process_node(processed).await
            }
        })
        .filter_map(|result| async move { result.transpose() })
        .boxed()
}

/// Stage 4: drop nodes flagged `hide_if_no_children` whose child level is
/// empty. A successful probe also resolves the children flag.
fn hide_if_no_children<P: LevelSource>(
    stream: BoxStream<'static, HierarchyResult<ProcessedNode>>,
    provider: Arc<P>,
    variation: LevelVariation,
) -> BoxStream<'static, HierarchyResult<ProcessedNode>> {
    stream
        .filter_map(move |node| {
            let provider = Arc::clone(&provider);
            let variation = variation.clone();
            async move {
                let mut node = match node {
                    Ok(node) => node,
                    Err(err) => return Some(Err(err)),
                };
                if !node.processing.hide_if_no_children {
                    return Some(Ok(node));
                }
                match node.children {
                    ChildrenState::Known(false) => None,
                    ChildrenState::Known(true) | ChildrenState::Grouped(_) => Some(Ok(node)),
                    ChildrenState::Unknown => {
                        match probe_has_children(provider, &node, &variation).await {
                            Ok(true) => {
                                node.children = ChildrenState::Known(true);
                                Some(Ok(node))
                            }
                            Ok(false) => None,
                            Err(err) => Some(Err(err)),
                        }
                    }
                }
            }
        })
        .boxed()
}

/// Stage 5: splice the children of `hide_in_hierarchy` nodes into their
/// place. A hidden node that is a filter target without a target ancestor
/// is dropped entirely.
fn hide_in_hierarchy<P: LevelSource>(
    stream: BoxStream<'static, HierarchyResult<ProcessedNode>>,
    provider: Arc<P>,
    variation: LevelVariation,
) -> BoxStream<'static, HierarchyResult<ProcessedNode>> {
    stream
        .flat_map(move |node| {
            let node = match node {
                Ok(node) => node,
                Err(err) => return stream::once(async move { Err(err) }).boxed(),
            };
            if !node.processing.hide_in_hierarchy {
                return stream::once(async move { Ok(node) }).boxed();
            }
            if node.is_standalone_filter_target() {
                return stream::empty().boxed();
            }
            // Children replace the hidden node among its siblings, so they
            // keep the hidden node's own parent chain.
            let parent = node.to_parent_view();
            let base_keys = node.parent_keys.clone();
            Arc::clone(&provider).pre_grouped_level(parent, base_keys, variation.clone())
        })
        .boxed()
}

/// Probe whether a node's child level produces at least one pre-grouped
/// node. A rows-limit overflow counts as "has children".
pub(crate) async fn probe_has_children<P: LevelSource>(
    provider: Arc<P>,
    node: &ProcessedNode,
    variation: &LevelVariation,
) -> HierarchyResult<bool> {
    let mut children =
        provider.pre_grouped_level(node.to_parent_view(), node.key_path(), variation.clone());
    match children.next().await {
        None => Ok(false),
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) if err.is_rows_limit_exceeded() => Ok(true),
        Some(Err(err)) => Err(err),
    }
}

/// Grouped children registered with the provider's cache, keyed by the
/// grouping node's key path.
pub(crate) type GroupedRegistration = (Vec<NodeKey>, Vec<HierarchyNode>);

/// Stages 6–10 over the buffered level: sort, group, determine children,
/// post-process, finalize.
pub(crate) async fn finalize_level<P: LevelSource>(
    pre_grouped: BoxStream<'static, HierarchyResult<ProcessedNode>>,
    provider: Arc<P>,
    env: &PipelineEnv,
    variation: &LevelVariation,
) -> HierarchyResult<(Vec<HierarchyNode>, Vec<GroupedRegistration>)> {
    let mut level: Vec<ProcessedNode> = pre_grouped.try_collect().await?;
    sort::sort_level(&mut level);

    let ctx = GroupingContext {
        schema: &env.schema,
        formatter: &env.formatter,
        localized: &env.localized,
    };
    let mut level = apply_grouping(level, &ctx).await?;

    determine_children(&mut level, &provider, variation).await?;

    let mut finalized = Vec::with_capacity(level.len());
    let mut registrations = Vec::new();
    for node in level {
        let node = env.definition.post_process_node(node).await?;
        finalized.push(finalize_node(node, &mut registrations));
    }
    Ok((finalized, registrations))
}

/// Stage 8: resolve the children flag of every node that does not know it
/// yet, descending into materialized grouping children.
fn determine_children<'a, P: LevelSource>(
    nodes: &'a mut Vec<ProcessedNode>,
    provider: &'a Arc<P>,
    variation: &'a LevelVariation,
) -> BoxFuture<'a, HierarchyResult<()>> {
    Box::pin(async move {
        for node in nodes.iter_mut() {
            match &mut node.children {
                ChildrenState::Grouped(children) => {
                    determine_children(children, provider, variation).await?;
                }
                ChildrenState::Known(_) => {}
                ChildrenState::Unknown => {
                    let has_children =
                        probe_has_children(Arc::clone(provider), node, variation).await?;
                    node.children = ChildrenState::Known(has_children);
                }
            }
        }
        Ok(())
    })
}

/// Stage 10: strip processing params by converting into the final node
/// shape; collect grouped-children cache registrations on the way.
fn finalize_node(
    node: ProcessedNode,
    registrations: &mut Vec<GroupedRegistration>,
) -> HierarchyNode {
    let ProcessedNode {
        key,
        parent_keys,
        label,
        children,
        auto_expand,
        supports_filtering,
        extended_data,
        processing: _,
        filtering,
    } = node;

    let has_children = match children {
        ChildrenState::Known(flag) => flag,
        ChildrenState::Unknown => false,
        ChildrenState::Grouped(grouped) => {
            let finalized: Vec<HierarchyNode> = grouped
                .into_iter()
                .map(|child| finalize_node(child, registrations))
                .collect();
            let mut path = parent_keys.clone();
            path.push(key.clone());
            let has = !finalized.is_empty();
            registrations.push((path, finalized));
            has
        }
    };

    HierarchyNode {
        key,
        parent_keys,
        label,
        children: has_children,
        auto_expand,
        supports_filtering,
        extended_data,
        filtering,
    }
}
