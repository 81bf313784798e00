//! Server-side row-model requests, as sent by the grid.
//!
//! Field names follow the grid's camelCase JSON. Every list defaults to
//! empty so partial requests deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Largest row number a window may name.
pub const MAX_ROW: u64 = i64::MAX as u64;

/// A column reference in `rowGroupCols`, `valueCols` or `pivotCols`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnVO {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg_func: Option<String>,
}

impl ColumnVO {
    pub fn new(field: &str) -> Self {
        Self {
            id: field.to_string(),
            display_name: None,
            field: Some(field.to_string()),
            agg_func: None,
        }
    }

    pub fn with_agg(field: &str, agg_func: &str) -> Self {
        Self {
            agg_func: Some(agg_func.to_string()),
            ..Self::new(field)
        }
    }

    /// The registry field this column refers to; `field` wins over `id`.
    pub fn field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortModelItem {
    pub col_id: String,
    pub sort: SortDirection,
}

impl SortModelItem {
    pub fn asc(col_id: &str) -> Self {
        Self {
            col_id: col_id.to_string(),
            sort: SortDirection::Asc,
        }
    }

    pub fn desc(col_id: &str) -> Self {
        Self {
            col_id: col_id.to_string(),
            sort: SortDirection::Desc,
        }
    }
}

/// One `getRows` call from the server-side row model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetRowsRequest {
    pub start_row: u64,
    /// Exclusive; absent means no limit.
    pub end_row: Option<u64>,
    pub row_group_cols: Vec<ColumnVO>,
    pub value_cols: Vec<ColumnVO>,
    pub pivot_cols: Vec<ColumnVO>,
    pub pivot_mode: bool,
    /// Scalars identifying the expanded group path.
    pub group_keys: Vec<serde_json::Value>,
    /// Column-keyed map, or an advanced filter tree when advanced filtering
    /// is enabled.
    pub filter_model: Option<serde_json::Value>,
    pub sort_model: Vec<SortModelItem>,
    pub quick_filter: Option<String>,
    pub external_filter: Option<serde_json::Value>,
}

impl GetRowsRequest {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// `(limit, offset)` of the row window. Row numbers must fit a signed
    /// 64-bit SQL integer.
    pub fn window(&self) -> EngineResult<(Option<u64>, u64)> {
        for (name, row) in [("startRow", Some(self.start_row)), ("endRow", self.end_row)] {
            if let Some(row) = row.filter(|r| *r > MAX_ROW) {
                return Err(EngineError::MalformedRequest(format!(
                    "{} {} exceeds {}",
                    name, row, MAX_ROW
                )));
            }
        }
        match self.end_row {
            Some(end) if end < self.start_row => Err(EngineError::MalformedRequest(format!(
                "endRow {} is before startRow {}",
                end, self.start_row
            ))),
            Some(end) => Ok((Some(end - self.start_row), self.start_row)),
            None => Ok((None, self.start_row)),
        }
    }

    /// Whether pivoting takes effect for this request.
    pub fn is_pivoting(&self) -> bool {
        self.pivot_mode && !self.pivot_cols.is_empty()
    }
}
