//! Select-clause helpers for hierarchy level queries.
//!
//! The row reader expects fixed column names; assembling the matching
//! `SELECT` list by hand is error prone, so definitions can describe the
//! level declaratively and render it with [`NodeSelectClause`]. Grouping
//! params and extended data are embedded as serialized JSON literals the
//! reader parses back.

use crate::error::{HierarchyError, HierarchyResult};
use crate::nodes::GroupingParams;
use crate::reader::columns;

/// A selected value: either a literal embedded into the SQL text or a raw
/// selector expression.
#[derive(Debug, Clone)]
pub enum SelectValue {
    Literal(serde_json::Value),
    Selector(String),
}

impl SelectValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        SelectValue::Literal(value.into())
    }

    pub fn selector(expr: impl Into<String>) -> Self {
        SelectValue::Selector(expr.into())
    }

    fn to_sql(&self) -> String {
        match self {
            SelectValue::Selector(expr) => expr.clone(),
            SelectValue::Literal(value) => match value {
                serde_json::Value::Null => "NULL".to_string(),
                serde_json::Value::Bool(true) => "1".to_string(),
                serde_json::Value::Bool(false) => "0".to_string(),
                serde_json::Value::Number(number) => number.to_string(),
                serde_json::Value::String(text) => quote(text),
                // Arrays and objects are embedded as serialized JSON.
                other => quote(&other.to_string()),
            },
        }
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Declarative description of one level query's select list.
#[derive(Debug, Clone, Default)]
pub struct NodeSelectClause {
    /// Expression selecting the row's full class name.
    pub full_class_name: Option<SelectValue>,
    /// Expression selecting the row's instance id.
    pub instance_id: Option<SelectValue>,
    pub label: Option<SelectValue>,
    pub has_children: Option<SelectValue>,
    pub hide_if_no_children: Option<SelectValue>,
    pub hide_in_hierarchy: Option<SelectValue>,
    pub grouping: Option<GroupingParams>,
    /// Entries rendered into a `json_object(...)` extended-data column.
    pub extended_data: Vec<(String, SelectValue)>,
    pub auto_expand: Option<SelectValue>,
    pub supports_filtering: Option<SelectValue>,
}

impl NodeSelectClause {
    pub fn new(
        full_class_name: SelectValue,
        instance_id: SelectValue,
        label: SelectValue,
    ) -> Self {
        NodeSelectClause {
            full_class_name: Some(full_class_name),
            instance_id: Some(instance_id),
            label: Some(label),
            ..NodeSelectClause::default()
        }
    }

    /// Render the `SELECT` list. Identity columns are required.
    pub fn to_select_clause(&self) -> HierarchyResult<String> {
        let full_class_name = self.full_class_name.as_ref().ok_or_else(|| {
            HierarchyError::invalid_definition("select clause is missing the class name selector")
        })?;
        let instance_id = self.instance_id.as_ref().ok_or_else(|| {
            HierarchyError::invalid_definition("select clause is missing the instance id selector")
        })?;

        let mut parts = vec![
            format!("{} AS {}", full_class_name.to_sql(), columns::FULL_CLASS_NAME),
            format!("{} AS {}", instance_id.to_sql(), columns::ECINSTANCE_ID),
        ];
        if let Some(label) = &self.label {
            parts.push(format!("{} AS {}", label.to_sql(), columns::DISPLAY_LABEL));
        }
        if let Some(value) = &self.has_children {
            parts.push(format!("{} AS {}", value.to_sql(), columns::HAS_CHILDREN));
        }
        if let Some(value) = &self.hide_if_no_children {
            parts.push(format!(
                "{} AS {}",
                value.to_sql(),
                columns::HIDE_IF_NO_CHILDREN
            ));
        }
        if let Some(value) = &self.hide_in_hierarchy {
            parts.push(format!(
                "{} AS {}",
                value.to_sql(),
                columns::HIDE_NODE_IN_HIERARCHY
            ));
        }
        if let Some(grouping) = &self.grouping {
            let serialized = serde_json::to_string(grouping).map_err(|err| {
                HierarchyError::invalid_definition(format!("unserializable grouping params: {err}"))
            })?;
            parts.push(format!("{} AS {}", quote(&serialized), columns::GROUPING));
        }
        if !self.extended_data.is_empty() {
            let entries = self
                .extended_data
                .iter()
                .map(|(key, value)| format!("{}, {}", quote(key), value.to_sql()))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!(
                "json_object({entries}) AS {}",
                columns::EXTENDED_DATA
            ));
        }
        if let Some(value) = &self.auto_expand {
            parts.push(format!("{} AS {}", value.to_sql(), columns::AUTO_EXPAND));
        }
        if let Some(value) = &self.supports_filtering {
            parts.push(format!(
                "{} AS {}",
                value.to_sql(),
                columns::SUPPORTS_FILTERING
            ));
        }
        Ok(parts.join(", "))
    }
}
