//! Row grouping and group expansion.
//!
//! The number of group keys in a request is the level the grid is asking
//! for. Below the last group column the request returns group header rows
//! for the next column; at full depth it returns the leaf rows of the
//! expanded group.

use crate::error::{EngineError, EngineResult};
use crate::planner::logical::{Predicate, ValueExpr};
use crate::registry::ColumnRegistry;
use crate::request::GetRowsRequest;
use crate::value::Value;

/// The grouping depth a plan answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLevel {
    /// Number of expanded group keys.
    pub depth: usize,
    /// Leaf rows rather than group headers.
    pub leaf: bool,
}

/// Output of the grouping step.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupingPlan {
    /// `None` when the request has no row group columns.
    pub level: Option<GroupLevel>,
    /// Group columns projected and grouped on header rows.
    pub group_by: Vec<String>,
    /// `rowGroupCols[i] = groupKeys[i]`, in key order.
    pub bindings: Vec<Predicate>,
    /// Columns projected on leaf rows: every column but the group columns,
    /// value columns included.
    pub leaf_columns: Vec<String>,
}

impl GroupingPlan {
    pub fn is_header(&self) -> bool {
        matches!(self.level, Some(GroupLevel { leaf: false, .. }))
    }
}

pub struct GroupingPlanner<'a> {
    registry: &'a ColumnRegistry,
}

impl<'a> GroupingPlanner<'a> {
    pub fn new(registry: &'a ColumnRegistry) -> Self {
        Self { registry }
    }

    /// Plan the grouping step. While pivoting, a fully expanded path keeps
    /// header semantics over the last group column; the grid never shows
    /// leaves in pivot mode.
    pub fn plan(&self, request: &GetRowsRequest, pivoting: bool) -> EngineResult<GroupingPlan> {
        let group_cols = &request.row_group_cols;
        let keys = &request.group_keys;

        if keys.len() > group_cols.len() {
            return Err(EngineError::MalformedRequest(format!(
                "{} group keys for {} row group columns",
                keys.len(),
                group_cols.len()
            )));
        }

        let mut columns = Vec::with_capacity(group_cols.len());
        for vo in group_cols {
            let column = self.registry.require(vo.field())?;
            if !column.groupable {
                return Err(EngineError::ColumnNotGroupable {
                    field: column.field.clone(),
                });
            }
            columns.push(column);
        }

        if columns.is_empty() {
            return Ok(GroupingPlan {
                level: None,
                group_by: vec![],
                bindings: vec![],
                leaf_columns: self.registry.columns().iter().map(|c| c.field.clone()).collect(),
            });
        }

        let bindings = columns
            .iter()
            .zip(keys)
            .map(|(column, key)| {
                let value = Value::coerce(key, column.kind, &column.field)?;
                Ok(ValueExpr::column(&column.field).eq_value(&value))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        let depth = keys.len();
        let expanded = depth == columns.len();

        if expanded && !pivoting {
            let leaf_columns = self
                .registry
                .columns()
                .iter()
                .filter(|c| !columns.iter().any(|g| g.field == c.field))
                .map(|c| c.field.clone())
                .collect();
            return Ok(GroupingPlan {
                level: Some(GroupLevel { depth, leaf: true }),
                group_by: vec![],
                bindings,
                leaf_columns,
            });
        }

        let group_by = columns
            .iter()
            .take(depth + 1)
            .map(|c| c.field.clone())
            .collect();
        Ok(GroupingPlan {
            level: Some(GroupLevel { depth, leaf: false }),
            group_by,
            bindings,
            leaf_columns: vec![],
        })
    }
}
