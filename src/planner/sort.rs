//! Sort model to ORDER BY.

use crate::error::{EngineError, EngineResult};
use crate::planner::logical::{ProjectionItem, SortTerm};
use crate::registry::ColumnRegistry;
use crate::request::{SortDirection, SortModelItem};

/// The grid's auto group column; never a real field.
pub const AUTO_GROUP_COLUMN: &str = "ag-Grid-AutoColumn";

pub struct SortTranslator<'a> {
    registry: &'a ColumnRegistry,
}

impl<'a> SortTranslator<'a> {
    pub fn new(registry: &'a ColumnRegistry) -> Self {
        Self { registry }
    }

    /// Map sort items onto the projection, in sort-model order. Items on
    /// columns outside the projection are dropped.
    pub fn translate(
        &self,
        sort_model: &[SortModelItem],
        projection: &[ProjectionItem],
    ) -> EngineResult<Vec<SortTerm>> {
        let mut terms = Vec::with_capacity(sort_model.len());
        for item in sort_model {
            let col_id = item.col_id.as_str();
            if col_id == AUTO_GROUP_COLUMN {
                tracing::debug!(col_id, "dropping sort on auto group column");
                continue;
            }

            let column = self.registry.get(col_id);
            let projected = projection.iter().find(|p| p.alias == col_id);

            match (projected, column) {
                (Some(_), Some(column)) if !column.sortable => {
                    return Err(EngineError::ColumnNotSortable {
                        field: column.field.clone(),
                    });
                }
                (Some(p), _) => {
                    if terms.iter().any(|t: &SortTerm| t.key == col_id) {
                        continue;
                    }
                    terms.push(SortTerm {
                        key: col_id.to_string(),
                        expr: p.expr.clone(),
                        descending: item.sort == SortDirection::Desc,
                    });
                }
                (None, Some(_)) => {
                    tracing::debug!(col_id, "dropping sort on column outside the projection");
                }
                (None, None) => {
                    return Err(EngineError::ColumnNotFound {
                        field: col_id.to_string(),
                    });
                }
            }
        }
        Ok(terms)
    }
}
