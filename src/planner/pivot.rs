//! Pivoting: one conditional aggregate per pivot value combination and
//! value column.

use crate::error::{EngineError, EngineResult};
use crate::filter::combinator::and_all;
use crate::planner::aggregation::PlannedAggregate;
use crate::planner::logical::{
    Predicate, ProjectionItem, QueryPlan, SortTerm, SourceRef, ValueExpr,
};
use crate::registry::{ColumnDefinition, ColumnRegistry};
use crate::value::Value;

/// Resolves the distinct values of a pivot column.
///
/// Implementations execute `plan`, a `SELECT DISTINCT field ... ORDER BY
/// field` query, and return the values in the order the rows arrive.
pub trait PivotValueSource {
    fn distinct_values(&self, plan: &QueryPlan, field: &str) -> EngineResult<Vec<Value>>;
}

/// A source for engines whose pivot columns all declare a domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPivotValues;

impl PivotValueSource for NoPivotValues {
    fn distinct_values(&self, _plan: &QueryPlan, field: &str) -> EngineResult<Vec<Value>> {
        Err(EngineError::PivotValues(format!(
            "no value source for pivot column '{}' without a declared domain",
            field
        )))
    }
}

/// Distinct-values plan for one pivot column.
pub fn distinct_values_plan(source: SourceRef, field: &str, filter: Predicate) -> QueryPlan {
    let mut plan = QueryPlan::scan(source);
    plan.distinct = true;
    plan.projection = vec![ProjectionItem::column(field)];
    plan.predicate = filter;
    plan.order_by = vec![SortTerm {
        key: field.to_string(),
        expr: ValueExpr::column(field),
        descending: false,
    }];
    plan
}

/// A generated pivot column.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotColumn {
    pub alias: String,
    pub expr: ValueExpr,
    /// The value column this aggregates.
    pub value_field: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotPlan {
    pub columns: Vec<PivotColumn>,
}

impl PivotPlan {
    pub fn result_fields(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.alias.clone()).collect()
    }

    pub fn column(&self, alias: &str) -> Option<&PivotColumn> {
        self.columns.iter().find(|c| c.alias == alias)
    }
}

pub struct PivotPlanner<'a> {
    registry: &'a ColumnRegistry,
    separator: &'a str,
    max_generated_columns: Option<usize>,
}

impl<'a> PivotPlanner<'a> {
    pub fn new(
        registry: &'a ColumnRegistry,
        separator: &'a str,
        max_generated_columns: Option<usize>,
    ) -> Self {
        Self {
            registry,
            separator,
            max_generated_columns,
        }
    }

    /// Check that every pivot field exists and is pivotable.
    pub fn pivot_columns(&self, fields: &[&str]) -> EngineResult<Vec<&'a ColumnDefinition>> {
        fields
            .iter()
            .map(|field| {
                let column = self.registry.require(field)?;
                if column.pivotable {
                    Ok(column)
                } else {
                    Err(EngineError::ColumnNotPivotable {
                        field: column.field.clone(),
                    })
                }
            })
            .collect()
    }

    /// Generate pivot columns. `values_plan` builds the distinct-values plan
    /// for a column without a declared domain.
    pub fn plan(
        &self,
        fields: &[&str],
        aggregates: &[PlannedAggregate],
        values: &dyn PivotValueSource,
        values_plan: impl Fn(&str) -> QueryPlan,
    ) -> EngineResult<PivotPlan> {
        let columns = self.pivot_columns(fields)?;

        let mut domains = Vec::with_capacity(columns.len());
        for column in &columns {
            let domain = match &column.pivot_domain {
                Some(domain) => domain.clone(),
                None => {
                    let plan = values_plan(&column.field);
                    tracing::debug!(field = %column.field, sql = %plan, "resolving pivot values");
                    values.distinct_values(&plan, &column.field)?
                }
            };
            domains.push(dedup(domain));
        }

        let combinations = domains.iter().map(Vec::len).product::<usize>();
        if let Some(limit) = self.max_generated_columns {
            if combinations > limit {
                return Err(EngineError::PivotColumnsExceeded {
                    limit,
                    generated: combinations,
                });
            }
        }

        let mut out = Vec::with_capacity(combinations * aggregates.len());
        for combination in cartesian(&domains) {
            let when = and_all(
                columns
                    .iter()
                    .zip(&combination)
                    .map(|(column, value)| ValueExpr::column(&column.field).eq_value(value)),
            );
            let prefix = combination
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(self.separator);

            for agg in aggregates {
                let case = ValueExpr::when(when.clone(), ValueExpr::column(&agg.field));
                out.push(PivotColumn {
                    alias: format!("{}{}{}", prefix, self.separator, agg.field),
                    expr: agg.over(case),
                    value_field: agg.field.clone(),
                });
            }
        }
        Ok(PivotPlan { columns: out })
    }
}

fn dedup(values: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !out.contains(&v) {
            out.push(v);
        }
    }
    out
}

/// Cartesian product in column order; the last column varies fastest.
fn cartesian(domains: &[Vec<Value>]) -> Vec<Vec<Value>> {
    domains.iter().fold(vec![vec![]], |acc, domain| {
        acc.iter()
            .flat_map(|prefix| {
                domain.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push(v.clone());
                    next
                })
            })
            .collect()
    })
}
