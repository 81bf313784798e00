//! In-memory table that executes query plans.

use std::cmp::Ordering;

use serde_json::Value as Json;

use super::eval::{Evaluator, Row, Scope};
use crate::error::{EngineError, EngineResult};
use crate::planner::aggregation::AggregationRegistry;
use crate::planner::logical::QueryPlan;
use crate::planner::pivot::PivotValueSource;
use crate::registry::ColumnRegistry;
use crate::value::Value;

/// Output of a plan: rows in projection order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, alias: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == alias)
    }

    pub fn get(&self, row: usize, alias: &str) -> Option<&Value> {
        let i = self.column(alias)?;
        self.rows.get(row).and_then(|r| r.get(i))
    }

    /// All values of one output column.
    pub fn values(&self, alias: &str) -> Vec<Value> {
        match self.column(alias) {
            Some(i) => self.rows.iter().map(|r| r[i].clone()).collect(),
            None => vec![],
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }
}

/// Rows of one table, held in memory.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    table: String,
    rows: Vec<Row>,
    aggregates: AggregationRegistry,
}

impl MemoryTable {
    pub fn new(table: &str, rows: Vec<Row>) -> Self {
        Self {
            table: table.to_string(),
            rows,
            aggregates: AggregationRegistry::new(),
        }
    }

    /// Load JSON objects, coercing each registry column to its kind.
    /// Missing fields are null.
    pub fn from_json(table: &str, registry: &ColumnRegistry, rows: &[Json]) -> EngineResult<Self> {
        let mut out = Vec::with_capacity(rows.len());
        for (i, raw) in rows.iter().enumerate() {
            let Some(object) = raw.as_object() else {
                return Err(EngineError::Execution(format!("row {} is not an object", i)));
            };
            let mut row = Row::with_capacity(registry.len());
            for column in registry.columns() {
                let value = match object.get(&column.field) {
                    Some(raw) => Value::coerce(raw, column.kind, &column.field)?,
                    None => Value::Null,
                };
                row.insert(column.field.clone(), value);
            }
            out.push(row);
        }
        Ok(Self::new(table, out))
    }

    /// Reducers for custom aggregates.
    pub fn with_aggregates(mut self, aggregates: AggregationRegistry) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn execute(&self, plan: &QueryPlan) -> EngineResult<ResultSet> {
        self.execute_correlated(plan, None)
    }

    /// Execute with `outer` as the row that `ValueExpr::Outer` reads.
    pub(crate) fn execute_correlated(
        &self,
        plan: &QueryPlan,
        outer: Option<&Row>,
    ) -> EngineResult<ResultSet> {
        let derived;
        let input: &[Row] = match &plan.derived {
            Some(inner) => {
                derived = self.execute_correlated(inner, outer)?.into_rows();
                &derived
            }
            None if plan.source.table == self.table => &self.rows,
            None => {
                return Err(EngineError::Execution(format!(
                    "unknown table '{}'",
                    plan.source.table
                )))
            }
        };

        let eval = Evaluator::new(&self.aggregates)
            .with_table(self)
            .with_outer(outer);
        let mut filtered: Vec<&Row> = Vec::with_capacity(input.len());
        for row in input {
            if eval.predicate(&plan.predicate, Scope::Row(row))? == Some(true) {
                filtered.push(row);
            }
        }

        let aggregated =
            plan.is_grouped() || plan.projection.iter().any(|p| p.expr.is_aggregate());

        // (projected values, sort keys)
        let mut out: Vec<(Vec<Value>, Vec<Value>)> = vec![];
        if aggregated {
            for group in group_rows(&filtered, &plan.group_by) {
                let scope = Scope::Group(&group);
                if let Some(having) = &plan.having {
                    if eval.predicate(having, scope)? != Some(true) {
                        continue;
                    }
                }
                out.push(project(&eval, plan, scope)?);
            }
        } else {
            for row in filtered {
                out.push(project(&eval, plan, Scope::Row(row))?);
            }
        }

        if plan.distinct {
            let mut seen: Vec<Vec<Value>> = vec![];
            out.retain(|(values, _)| {
                if seen.contains(values) {
                    false
                } else {
                    seen.push(values.clone());
                    true
                }
            });
        }

        out.sort_by(|(_, a), (_, b)| {
            plan.order_by
                .iter()
                .zip(a.iter().zip(b))
                .map(|(term, (x, y))| {
                    let ord = x.sort_cmp(y);
                    if term.descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        let offset = plan.offset.unwrap_or(0) as usize;
        let limit = plan.limit.map_or(usize::MAX, |l| l as usize);
        let rows = out
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(values, _)| values)
            .collect();

        Ok(ResultSet {
            columns: plan.projected_aliases().map(str::to_string).collect(),
            rows,
        })
    }
}

impl PivotValueSource for MemoryTable {
    fn distinct_values(&self, plan: &QueryPlan, field: &str) -> EngineResult<Vec<Value>> {
        Ok(self.execute(plan)?.values(field))
    }
}

fn project(
    eval: &Evaluator<'_>,
    plan: &QueryPlan,
    scope: Scope<'_>,
) -> EngineResult<(Vec<Value>, Vec<Value>)> {
    let values = plan
        .projection
        .iter()
        .map(|p| eval.value(&p.expr, scope))
        .collect::<EngineResult<Vec<_>>>()?;
    let keys = plan
        .order_by
        .iter()
        .map(|t| eval.value(&t.expr, scope))
        .collect::<EngineResult<Vec<_>>>()?;
    Ok((values, keys))
}

/// Groups in first-seen order. Without grouping columns every row forms one
/// group, even when there are none.
fn group_rows<'r>(rows: &[&'r Row], group_by: &[String]) -> Vec<Vec<&'r Row>> {
    if group_by.is_empty() {
        return vec![rows.to_vec()];
    }
    let mut keys: Vec<Vec<Value>> = vec![];
    let mut groups: Vec<Vec<&'r Row>> = vec![];
    for row in rows {
        let key: Vec<Value> = group_by
            .iter()
            .map(|f| row.get(f).cloned().unwrap_or(Value::Null))
            .collect();
        match keys.iter().position(|k| *k == key) {
            Some(i) => groups[i].push(row),
            None => {
                keys.push(key);
                groups.push(vec![row]);
            }
        }
    }
    groups
}
