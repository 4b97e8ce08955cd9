//! # Canopy Hierarchy Engine
//!
//! Builds hierarchical tree models on demand from a relational data source.
//! A caller-supplied *hierarchy definition* describes how each level of the
//! tree is produced (instance queries over the relational store or
//! statically declared generic nodes), and the engine materializes levels
//! lazily, runs them through a processing pipeline, deduplicates work via a
//! cache, and streams finalized nodes to the caller.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! HierarchyDefinition::define_level
//!     ↓
//! [Query Scheduler]     → bounded-concurrency row streams (shared, replayable)
//!     ↓
//! [Row Reader]          → parsed source nodes, cached per (parent, filter, limit)
//!     ↓
//! [Processing Pipeline] → parent keys → labels → pre-process
//!                       → hide-if-no-children → hide-in-hierarchy
//!                       → sort → group → determine children
//!                       → post-process → strip params
//!     ↓
//! Finalized nodes
//! ```
//!
//! Collaborators stay behind traits: a [`executor::QueryExecutor`] runs the
//! queries, a [`schema::SchemaProvider`] answers class-derivation and
//! property questions, a [`formatter::ValueFormatter`] renders label values.
//! The optional [`filtering`] wrapper restricts the hierarchy to
//! caller-supplied identifier paths.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use canopy::{GetNodesRequest, HierarchyProvider, ProviderConfig};
//!
//! let provider = HierarchyProvider::new(ProviderConfig::new(
//!     schema,
//!     executor,
//!     definition,
//! ));
//!
//! let roots = provider.collect_nodes(GetNodesRequest::root()).await?;
//! for root in &roots {
//!     if root.children {
//!         let children = provider
//!             .collect_nodes(GetNodesRequest::children_of(root.clone()))
//!             .await?;
//!     }
//! }
//! ```

// Data model
pub mod error;
pub mod keys;
pub mod nodes;
pub mod values;

// Collaborator contracts
pub mod executor;
pub mod formatter;
pub mod schema;

// Level production
pub mod definition;      // Hierarchy definitions & per-class factory
pub mod filtering;       // Filter-path definition wrapper
pub mod reader;          // Row parsing (fixed column names)
pub mod scheduler;       // Bounded-concurrency query scheduling
pub mod select;          // Select-clause helpers for level queries
pub mod streams;         // Shared replayable streams

// Engine internals
mod cache;               // Per-parent level cache (LRU)
mod grouping;            // Grouping handlers & policies
mod pipeline;            // Processing operators

// Public entry point
pub mod provider;

// Re-export the data model
pub use error::{HierarchyError, HierarchyResult};
pub use keys::{GenericNodeKey, GroupingNodeKey, InstanceKey, NodeKey, PropertyRef};
pub use nodes::{
    AutoExpandMode, FilterTargetAutoExpand, FilterTargetOptions, FilteringInfo, FilteringPath,
    GroupingParams, GroupingPolicies, HierarchyNode, LabelGroupingAction, NodeIdentifier,
    ProcessingParams, SourceNode, SourceNodeKey,
};
pub use values::{ConcatenatedValue, ConcatenatedValuePart, Label, PrimitiveValue, TypedValue};

// Re-export the collaborator contracts
pub use executor::{
    InstanceQuery, QueryBinding, QueryExecutor, QueryReaderConfig, Row, RowFormat, RowStream,
    RowsLimit,
};
pub use formatter::{DefaultValueFormatter, ValueFormatter};
pub use schema::{ClassInfo, ClassKind, PrimitiveType, PropertyInfo, SchemaProvider};

// Re-export level production types
pub use definition::{
    ChildLevelRequest, ClassBasedHierarchyDefinition, HierarchyDefinition, InstanceFilter,
    InstanceQueryDefinition, LevelDefinition, NodeDefinition, RootLevelRequest,
};
pub use filtering::FilteringHierarchyDefinition;

// Re-export the provider surface
pub use cache::DEFAULT_CACHE_SIZE;
pub use provider::{GetNodesRequest, HierarchyProvider, LocalizedStrings, ProviderConfig};
pub use scheduler::DEFAULT_QUERY_CONCURRENCY;
