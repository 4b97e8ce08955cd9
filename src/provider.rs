//! Hierarchy provider.
//!
//! Orchestrates the whole engine: resolves level definitions, schedules
//! queries, runs the processing pipeline, and serves grouping-node children
//! from the cache. The public surface is small:
//!
//! ```text
//! HierarchyProvider::new(config)
//!     .get_nodes(request)            → stream of finalized nodes
//!     .set_formatter(formatter)      → swap label formatting, keep cache
//!     .notify_data_source_changed()  → drop every cached level
//! ```

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::cache::{CacheEntry, ChildNodesCache, LevelVariation, DEFAULT_CACHE_SIZE};
use crate::definition::{HierarchyDefinition, InstanceFilter, NodeDefinition};
use crate::error::{HierarchyError, HierarchyResult};
use crate::executor::{QueryExecutor, QueryReaderConfig, RowFormat, RowsLimit};
use crate::filtering::FilteringHierarchyDefinition;
use crate::formatter::{DefaultValueFormatter, ValueFormatter};
use crate::keys::NodeKey;
use crate::nodes::{FilteringPath, HierarchyNode, ProcessedNode, SourceNode};
use crate::pipeline::{self, LevelSource, PipelineEnv};
use crate::reader::read_nodes;
use crate::scheduler::{QueryScheduler, DEFAULT_QUERY_CONCURRENCY};
use crate::schema::SchemaProvider;
use crate::streams::SharedStream;

/// Strings injected into synthesized grouping-node labels.
#[derive(Debug, Clone)]
pub struct LocalizedStrings {
    /// Label of the out-of-range property grouping bucket.
    pub other: String,
    /// Label of the no-value property grouping bucket.
    pub unspecified: String,
}

impl Default for LocalizedStrings {
    fn default() -> Self {
        LocalizedStrings {
            other: "Other".to_string(),
            unspecified: "Not specified".to_string(),
        }
    }
}

/// Configuration of a [`HierarchyProvider`].
pub struct ProviderConfig {
    pub schema: Arc<dyn SchemaProvider>,
    pub executor: Arc<dyn QueryExecutor>,
    pub definition: Arc<dyn HierarchyDefinition>,
    /// Label formatter; defaults to [`DefaultValueFormatter`].
    pub formatter: Option<Arc<dyn ValueFormatter>>,
    pub localized_strings: LocalizedStrings,
    /// Maximum number of concurrently executing queries.
    pub query_concurrency: usize,
    /// Maximum number of cached levels.
    pub query_cache_size: usize,
    /// When set, restrict the hierarchy to these identifier paths.
    pub filtering: Option<Vec<FilteringPath>>,
}

impl ProviderConfig {
    pub fn new(
        schema: Arc<dyn SchemaProvider>,
        executor: Arc<dyn QueryExecutor>,
        definition: Arc<dyn HierarchyDefinition>,
    ) -> Self {
        ProviderConfig {
            schema,
            executor,
            definition,
            formatter: None,
            localized_strings: LocalizedStrings::default(),
            query_concurrency: DEFAULT_QUERY_CONCURRENCY,
            query_cache_size: DEFAULT_CACHE_SIZE,
            filtering: None,
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn ValueFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_localized_strings(mut self, localized_strings: LocalizedStrings) -> Self {
        self.localized_strings = localized_strings;
        self
    }

    pub fn with_query_concurrency(mut self, query_concurrency: usize) -> Self {
        self.query_concurrency = query_concurrency;
        self
    }

    pub fn with_query_cache_size(mut self, query_cache_size: usize) -> Self {
        self.query_cache_size = query_cache_size;
        self
    }

    pub fn with_filtering(mut self, paths: Vec<FilteringPath>) -> Self {
        self.filtering = Some(paths);
        self
    }
}

/// Request for one hierarchy level.
#[derive(Debug, Clone, Default)]
pub struct GetNodesRequest {
    /// Parent node; `None` requests the root level.
    pub parent: Option<HierarchyNode>,
    /// Caller-supplied restriction passed through to the definition.
    pub instance_filter: Option<InstanceFilter>,
    /// Row cap for this level; `None` leaves the level unbounded.
    pub hierarchy_level_size_limit: Option<RowsLimit>,
}

impl GetNodesRequest {
    /// Request the root level.
    pub fn root() -> Self {
        GetNodesRequest::default()
    }

    /// Request the children of a previously returned node.
    pub fn children_of(parent: HierarchyNode) -> Self {
        GetNodesRequest {
            parent: Some(parent),
            ..GetNodesRequest::default()
        }
    }

    pub fn with_instance_filter(mut self, instance_filter: InstanceFilter) -> Self {
        self.instance_filter = Some(instance_filter);
        self
    }

    pub fn with_size_limit(mut self, limit: RowsLimit) -> Self {
        self.hierarchy_level_size_limit = Some(limit);
        self
    }
}

/// Builds hierarchical tree models on demand from a relational data source.
pub struct HierarchyProvider {
    inner: Arc<ProviderInner>,
}

impl HierarchyProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let definition = match config.filtering {
            Some(paths) => Arc::new(FilteringHierarchyDefinition::new(
                config.definition,
                Arc::clone(&config.schema),
                paths,
            )) as Arc<dyn HierarchyDefinition>,
            None => config.definition,
        };
        let formatter = config
            .formatter
            .unwrap_or_else(|| Arc::new(DefaultValueFormatter));
        HierarchyProvider {
            inner: Arc::new(ProviderInner {
                schema: config.schema,
                executor: config.executor,
                definition,
                formatter: RwLock::new(formatter),
                localized: config.localized_strings,
                scheduler: QueryScheduler::new(config.query_concurrency),
                cache: ChildNodesCache::new(config.query_cache_size),
            }),
        }
    }

    /// Stream the finalized nodes of one hierarchy level. Dropping the
    /// stream cancels the work.
    pub fn get_nodes(
        &self,
        request: GetNodesRequest,
    ) -> BoxStream<'static, HierarchyResult<HierarchyNode>> {
        let inner = Arc::clone(&self.inner);
        stream::once(async move { inner.finalized_level(request).await })
            .flat_map(|result| match result {
                Ok(nodes) => stream::iter(nodes.into_iter().map(Ok)).boxed(),
                Err(err) => stream::once(async move { Err(err) }).boxed(),
            })
            .boxed()
    }

    /// Drain [`HierarchyProvider::get_nodes`] into a vector.
    pub async fn collect_nodes(
        &self,
        request: GetNodesRequest,
    ) -> HierarchyResult<Vec<HierarchyNode>> {
        self.get_nodes(request).try_collect().await
    }

    /// Swap the label formatter without clearing the cache: cached raw
    /// streams stay valid and labels are re-formatted on the next read.
    pub fn set_formatter(&self, formatter: Option<Arc<dyn ValueFormatter>>) {
        let formatter = formatter.unwrap_or_else(|| Arc::new(DefaultValueFormatter));
        *self.inner.formatter.write() = formatter;
    }

    /// Notify the provider that the underlying data changed: every cached
    /// level is dropped and subsequent requests re-run their queries.
    pub fn notify_data_source_changed(&self) {
        debug!("data source changed, dropping cached levels");
        self.inner.cache.clear();
    }
}

struct ProviderInner {
    schema: Arc<dyn SchemaProvider>,
    executor: Arc<dyn QueryExecutor>,
    definition: Arc<dyn HierarchyDefinition>,
    formatter: RwLock<Arc<dyn ValueFormatter>>,
    localized: LocalizedStrings,
    scheduler: QueryScheduler,
    cache: ChildNodesCache,
}

impl ProviderInner {
    fn pipeline_env(&self) -> PipelineEnv {
        PipelineEnv {
            schema: Arc::clone(&self.schema),
            formatter: self.formatter.read().clone(),
            definition: Arc::clone(&self.definition),
            localized: self.localized.clone(),
        }
    }

    async fn finalized_level(
        self: Arc<Self>,
        request: GetNodesRequest,
    ) -> HierarchyResult<Vec<HierarchyNode>> {
        let variation = LevelVariation {
            instance_filter: request.instance_filter,
            limit: request.hierarchy_level_size_limit.unwrap_or_default(),
        };
        match request.parent {
            Some(parent) if parent.key.is_grouping() => {
                self.grouped_children(&parent, &variation).await
            }
            parent => {
                let base_keys = parent
                    .as_ref()
                    .map(HierarchyNode::key_path)
                    .unwrap_or_default();
                let source =
                    Arc::clone(&self).source_level(parent, base_keys.clone(), &variation);
                self.run_buffered(source, base_keys, variation).await
            }
        }
    }

    /// Cached (or freshly created) stream of parsed source nodes for the
    /// level under `parent`, keyed by `path` and the request variation.
    fn source_level(
        self: Arc<Self>,
        parent: Option<HierarchyNode>,
        path: Vec<NodeKey>,
        variation: &LevelVariation,
    ) -> SharedStream<SourceNode> {
        let key = variation.cache_key();
        if let Some(CacheEntry::Primary(stream)) = self.cache.get(&path, &key) {
            return stream;
        }
        trace!(depth = path.len(), "creating level source stream");
        let stream =
            SharedStream::new(Arc::clone(&self).create_source_stream(parent, variation.clone()));
        self.cache
            .insert(path, key, CacheEntry::Primary(stream.clone()));
        stream
    }

    /// Resolve the level definition and concatenate its parts: generic
    /// nodes are emitted as-is, instance queries go through the scheduler
    /// and the row reader, in definition order.
    fn create_source_stream(
        self: Arc<Self>,
        parent: Option<HierarchyNode>,
        variation: LevelVariation,
    ) -> BoxStream<'static, HierarchyResult<SourceNode>> {
        let inner = self;
        stream::once(async move {
            let level = inner
                .definition
                .define_level(parent.as_ref(), variation.instance_filter.as_ref())
                .await?;

            let mut parts: Vec<BoxStream<'static, HierarchyResult<SourceNode>>> =
                Vec::with_capacity(level.len());
            for definition in level {
                match definition {
                    NodeDefinition::Generic(node) => {
                        parts.push(stream::once(async move { Ok(node) }).boxed());
                    }
                    NodeDefinition::InstanceQuery(query_definition) => {
                        if query_definition.full_class_name.trim().is_empty() {
                            return Err(HierarchyError::invalid_definition(
                                "instance query definition has an empty class name",
                            ));
                        }
                        let rows = inner.scheduler.schedule(
                            Arc::clone(&inner.executor),
                            query_definition.query,
                            QueryReaderConfig {
                                row_format: RowFormat::Names,
                                limit: variation.limit,
                            },
                        );
                        parts.push(read_nodes(
                            Arc::clone(&inner.definition),
                            rows.subscribe(),
                            parent.clone(),
                        ));
                    }
                }
            }
            Ok(stream::iter(parts).flatten())
        })
        .map(|result| match result {
            Ok(nodes) => nodes.boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        })
        .flatten()
        .boxed()
    }

    /// Run the buffered pipeline tail over a source stream and register the
    /// materialized children of every produced grouping node.
    async fn run_buffered(
        self: Arc<Self>,
        source: SharedStream<SourceNode>,
        base_keys: Vec<NodeKey>,
        variation: LevelVariation,
    ) -> HierarchyResult<Vec<HierarchyNode>> {
        let env = self.pipeline_env();
        let pre_grouped = pipeline::pre_grouped_stages(
            source.subscribe(),
            base_keys,
            env.clone(),
            Arc::clone(&self),
            variation.clone(),
        );
        let (nodes, registrations) =
            pipeline::finalize_level(pre_grouped, Arc::clone(&self), &env, &variation).await?;
        for (path, children) in registrations {
            self.cache.insert(
                path,
                variation.cache_key(),
                CacheEntry::Grouped(Arc::new(children)),
            );
        }
        Ok(nodes)
    }

    /// Serve the materialized children of a grouping node. On a cache miss
    /// the grouping level is regenerated from its primary stream once; a
    /// second miss is an inconsistency.
    async fn grouped_children(
        self: Arc<Self>,
        parent: &HierarchyNode,
        variation: &LevelVariation,
    ) -> HierarchyResult<Vec<HierarchyNode>> {
        let path = parent.key_path();
        let key = variation.cache_key();
        if let Some(CacheEntry::Grouped(children)) = self.cache.get(&path, &key) {
            return Ok(children.as_ref().clone());
        }

        debug!(label = %parent.label, "grouped children missing, regenerating level");
        let mut ancestor_path = parent.parent_keys.clone();
        while matches!(ancestor_path.last(), Some(NodeKey::Grouping(_))) {
            ancestor_path.pop();
        }
        let Some(CacheEntry::Primary(source)) = self.cache.get(&ancestor_path, &key) else {
            return Err(HierarchyError::MissingGroupingNodeChildren {
                label: parent.label.clone(),
            });
        };
        Arc::clone(&self)
            .run_buffered(source, ancestor_path, variation.clone())
            .await?;

        match self.cache.get(&path, &key) {
            Some(CacheEntry::Grouped(children)) => Ok(children.as_ref().clone()),
            _ => Err(HierarchyError::MissingGroupingNodeChildren {
                label: parent.label.clone(),
            }),
        }
    }
}

impl LevelSource for ProviderInner {
    fn pre_grouped_level(
        self: Arc<Self>,
        parent: HierarchyNode,
        base_keys: Vec<NodeKey>,
        variation: LevelVariation,
    ) -> BoxStream<'static, HierarchyResult<ProcessedNode>> {
        // Grouping nodes' children are materialized, never probed.
        if parent.key.is_grouping() {
            return stream::empty().boxed();
        }
        let path = parent.key_path();
        let env = self.pipeline_env();
        let source = Arc::clone(&self).source_level(Some(parent), path, &variation);
        pipeline::pre_grouped_stages(source.subscribe(), base_keys, env, self, variation)
    }
}
