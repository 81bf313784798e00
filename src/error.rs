//! Errors raised while translating a grid request into a query plan.
//!
//! Every variant describes a caller or configuration mistake. Translation
//! aborts on the first one; there is no partial plan.

use thiserror::Error;

use crate::config::SettingsError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Column not found: {field}")]
    ColumnNotFound { field: String },

    #[error("Duplicate column in registry: {field}")]
    DuplicateColumn { field: String },

    #[error("Column '{field}' is not filterable")]
    ColumnNotFilterable { field: String },

    #[error("Column '{field}' is not groupable")]
    ColumnNotGroupable { field: String },

    #[error("Column '{field}' is not pivotable")]
    ColumnNotPivotable { field: String },

    #[error("Column '{field}' is not sortable")]
    ColumnNotSortable { field: String },

    #[error("Unrecognized filter on '{field}': {reason}")]
    UnrecognizedFilter { field: String, reason: String },

    #[error("Invalid range on '{field}': {from} is after {to}")]
    InvalidRange {
        field: String,
        from: String,
        to: String,
    },

    #[error("Invalid value for '{field}': {value} (expected {expected})")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Unsupported aggregation {func}({field}): {reason}")]
    UnsupportedAggregation {
        field: String,
        func: String,
        reason: String,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Pivot would generate {generated} columns, limit is {limit}")]
    PivotColumnsExceeded { limit: usize, generated: usize },

    #[error("Failed to resolve pivot values: {0}")]
    PivotValues(String),

    #[error("Master/detail is not enabled")]
    MasterDetailDisabled,

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Invalid request JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl EngineError {
    pub(crate) fn unrecognized(field: &str, reason: impl Into<String>) -> Self {
        EngineError::UnrecognizedFilter {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(
        field: &str,
        value: impl ToString,
        expected: impl Into<String>,
    ) -> Self {
        EngineError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
