//! Row reading.
//!
//! Turns rows streamed by the query executor into source nodes. The default
//! parser expects the fixed column names of [`columns`]; a hierarchy
//! definition may install a custom parser, which receives each raw row
//! unchanged.

use std::sync::Arc;

use futures_util::stream::{BoxStream, StreamExt};

use crate::definition::HierarchyDefinition;
use crate::error::{HierarchyError, HierarchyResult};
use crate::executor::Row;
use crate::keys::InstanceKey;
use crate::nodes::{ProcessingParams, SourceNode, SourceNodeKey};
use crate::values::Label;

/// Column names the default parser reads. Queries must SELECT them using
/// these exact names.
pub mod columns {
    pub const FULL_CLASS_NAME: &str = "FullClassName";
    pub const ECINSTANCE_ID: &str = "ECInstanceId";
    pub const DISPLAY_LABEL: &str = "DisplayLabel";
    pub const HAS_CHILDREN: &str = "HasChildren";
    pub const HIDE_IF_NO_CHILDREN: &str = "HideIfNoChildren";
    pub const HIDE_NODE_IN_HIERARCHY: &str = "HideNodeInHierarchy";
    pub const GROUPING: &str = "Grouping";
    pub const EXTENDED_DATA: &str = "ExtendedData";
    pub const AUTO_EXPAND: &str = "AutoExpand";
    pub const SUPPORTS_FILTERING: &str = "SupportsFiltering";

    // Synthetic columns emitted by filter-rewritten queries.
    pub const HAS_FILTER_TARGET_ANCESTOR: &str = "HasFilterTargetAncestor";
    pub const FILTER_ECINSTANCE_ID: &str = "FilterECInstanceId";
    pub const FILTER_CLASS_NAME: &str = "FilterClassName";
}

/// Parse a row into an instance source node using the default row shape.
pub fn parse_row(row: &Row) -> HierarchyResult<SourceNode> {
    let class_name = row.string(columns::FULL_CLASS_NAME).ok_or_else(|| {
        HierarchyError::invalid_definition(format!(
            "query row is missing the '{}' column",
            columns::FULL_CLASS_NAME
        ))
    })?;
    let id = row.string(columns::ECINSTANCE_ID).ok_or_else(|| {
        HierarchyError::invalid_definition(format!(
            "query row is missing the '{}' column",
            columns::ECINSTANCE_ID
        ))
    })?;

    let grouping = match row.json(columns::GROUPING) {
        Some(value) => Some(serde_json::from_value(value).map_err(|err| {
            HierarchyError::invalid_definition(format!("malformed '{}' column: {err}", columns::GROUPING))
        })?),
        None => None,
    };
    let extended_data = row
        .json(columns::EXTENDED_DATA)
        .and_then(|value| value.as_object().cloned());

    Ok(SourceNode {
        key: SourceNodeKey::Instances(vec![InstanceKey::new(class_name, id)]),
        label: Label::from_raw(row.string(columns::DISPLAY_LABEL).unwrap_or_default()),
        children: row.flag(columns::HAS_CHILDREN),
        auto_expand: row.flag(columns::AUTO_EXPAND).unwrap_or(false),
        supports_filtering: row.flag(columns::SUPPORTS_FILTERING).unwrap_or(false),
        extended_data,
        processing: ProcessingParams {
            hide_in_hierarchy: row.flag(columns::HIDE_NODE_IN_HIERARCHY).unwrap_or(false),
            hide_if_no_children: row.flag(columns::HIDE_IF_NO_CHILDREN).unwrap_or(false),
            grouping,
        },
        filtering: None,
    })
}

/// Parse a row stream into source nodes, preferring the definition's custom
/// parser when it provides one.
pub fn read_nodes(
    definition: Arc<dyn HierarchyDefinition>,
    rows: BoxStream<'static, HierarchyResult<Row>>,
    parent: Option<crate::nodes::HierarchyNode>,
) -> BoxStream<'static, HierarchyResult<SourceNode>> {
    let parent = Arc::new(parent);
    rows.then(move |row| {
        let definition = Arc::clone(&definition);
        let parent = Arc::clone(&parent);
        async move {
            let row = row?;
            match definition.parse_node(&row, parent.as_ref().as_ref()).await {
                Some(parsed) => parsed,
                None => parse_row(&row),
            }
        }
    })
    .boxed()
}
