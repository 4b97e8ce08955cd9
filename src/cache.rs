//! Per-parent cache of level streams and grouped children.
//!
//! Keyed by the parent's node-key path, with per-path variations keyed by
//! `(instance filter, size limit)`. An entry either wraps the hot shared
//! stream of parsed source nodes (the pipeline runs atop it per consumer)
//! or a cold materialized child list registered for a grouping node.
//! Paths are evicted LRU; `clear` drops everything atomically.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::definition::InstanceFilter;
use crate::executor::RowsLimit;
use crate::keys::NodeKey;
use crate::nodes::{HierarchyNode, SourceNode};
use crate::streams::SharedStream;

/// Default number of cached paths.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// Default number of `(filter, limit)` variations kept per path.
pub const DEFAULT_VARIATIONS_PER_PATH: usize = 1;

/// The non-path components of a level request.
#[derive(Debug, Clone, Default)]
pub struct LevelVariation {
    pub instance_filter: Option<InstanceFilter>,
    pub limit: RowsLimit,
}

impl LevelVariation {
    /// Hashable form of the variation. The instance filter is keyed by its
    /// serialized JSON (object keys serialize in sorted order).
    pub(crate) fn cache_key(&self) -> VariationKey {
        VariationKey {
            instance_filter: self.instance_filter.as_ref().map(|f| f.to_string()),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct VariationKey {
    instance_filter: Option<String>,
    limit: RowsLimit,
}

/// One cached level.
#[derive(Clone)]
pub(crate) enum CacheEntry {
    /// Hot replayable stream of parsed source nodes; needs downstream
    /// processing.
    Primary(SharedStream<SourceNode>),
    /// Cold materialized children of a grouping node.
    Grouped(Arc<Vec<HierarchyNode>>),
}

struct PathSlot {
    /// Variations in insertion order; oldest first.
    variations: Vec<(VariationKey, CacheEntry)>,
}

struct CacheInner {
    entries: HashMap<Vec<NodeKey>, PathSlot>,
    /// Paths in LRU order; most recently used last.
    order: Vec<Vec<NodeKey>>,
}

/// LRU cache of in-flight and completed child-node streams.
pub(crate) struct ChildNodesCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    variations_per_path: usize,
}

impl ChildNodesCache {
    pub fn new(capacity: usize) -> Self {
        ChildNodesCache {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: Vec::new(),
            }),
            capacity: capacity.max(1),
            variations_per_path: DEFAULT_VARIATIONS_PER_PATH,
        }
    }

    pub fn get(&self, path: &[NodeKey], variation: &VariationKey) -> Option<CacheEntry> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let slot = inner.entries.get(path)?;
        let entry = slot
            .variations
            .iter()
            .find(|(key, _)| key == variation)
            .map(|(_, entry)| entry.clone())?;
        touch(&mut inner.order, path);
        trace!(depth = path.len(), "level cache hit");
        Some(entry)
    }

    pub fn insert(&self, path: Vec<NodeKey>, variation: VariationKey, entry: CacheEntry) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(slot) = inner.entries.get_mut(&path) {
            slot.variations.retain(|(key, _)| key != &variation);
            slot.variations.push((variation, entry));
            let overflow = slot.variations.len().saturating_sub(self.variations_per_path);
            if overflow > 0 {
                slot.variations.drain(..overflow);
            }
            touch(&mut inner.order, &path);
            return;
        }
        inner.entries.insert(
            path.clone(),
            PathSlot {
                variations: vec![(variation, entry)],
            },
        );
        inner.order.push(path);
        while inner.order.len() > self.capacity {
            let evicted = inner.order.remove(0);
            inner.entries.remove(&evicted);
            debug!(depth = evicted.len(), "evicted level cache entry");
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        debug!("level cache cleared");
    }
}

fn touch(order: &mut Vec<Vec<NodeKey>>, path: &[NodeKey]) {
    if let Some(position) = order.iter().position(|p| p == path) {
        let path = order.remove(position);
        order.push(path);
    }
}
