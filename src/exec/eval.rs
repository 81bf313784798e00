//! Expression and predicate evaluation over in-memory rows.
//!
//! Predicates use SQL three-valued logic: `None` is UNKNOWN, and a row or
//! group passes only on `Some(true)`. Subqueries run against the table the
//! evaluator was given, correlated on the row in scope.

use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;

use super::memory::{MemoryTable, ResultSet};
use crate::error::{EngineError, EngineResult};
use crate::planner::aggregation::AggregationRegistry;
use crate::planner::logical::{AggFunc, CompareOp, Predicate, QueryPlan, ValueExpr};
use crate::value::Value;

/// One row, keyed by field or output alias.
pub type Row = HashMap<String, Value>;

/// What an expression is evaluated against.
#[derive(Clone, Copy)]
pub enum Scope<'r> {
    Row(&'r Row),
    /// The rows of one group; plain columns read the first row.
    Group(&'r [&'r Row]),
}

pub struct Evaluator<'a> {
    aggregates: &'a AggregationRegistry,
    table: Option<&'a MemoryTable>,
    /// The enclosing query's row, when evaluating inside a subquery.
    outer: Option<&'a Row>,
}

impl<'a> Evaluator<'a> {
    pub fn new(aggregates: &'a AggregationRegistry) -> Self {
        Self {
            aggregates,
            table: None,
            outer: None,
        }
    }

    /// Run subqueries against `table`.
    pub fn with_table(mut self, table: &'a MemoryTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_outer(mut self, outer: Option<&'a Row>) -> Self {
        self.outer = outer;
        self
    }

    fn subquery(&self, plan: &QueryPlan, scope: Scope<'_>) -> EngineResult<ResultSet> {
        let table = self.table.ok_or_else(|| {
            EngineError::Execution("subquery without a table to run on".to_string())
        })?;
        let row = match scope {
            Scope::Row(row) => Some(row),
            Scope::Group(rows) => rows.first().copied(),
        };
        table.execute_correlated(plan, row)
    }

    pub fn value(&self, expr: &ValueExpr, scope: Scope<'_>) -> EngineResult<Value> {
        match expr {
            ValueExpr::Column(field) => Ok(match scope {
                Scope::Row(row) => row.get(field).cloned().unwrap_or(Value::Null),
                Scope::Group(rows) => rows
                    .first()
                    .and_then(|row| row.get(field))
                    .cloned()
                    .unwrap_or(Value::Null),
            }),
            ValueExpr::Literal(value) => Ok(value.clone()),
            ValueExpr::Function { name, args } => {
                let args = args
                    .iter()
                    .map(|a| self.value(a, scope))
                    .collect::<EngineResult<Vec<_>>>()?;
                scalar_function(name, args)
            }
            ValueExpr::Aggregate { func, arg } => {
                let Scope::Group(rows) = scope else {
                    return Err(EngineError::Execution(format!(
                        "aggregate {} outside a grouped query",
                        func
                    )));
                };
                let values = rows
                    .iter()
                    .map(|row| self.value(arg, Scope::Row(row)))
                    .collect::<EngineResult<Vec<_>>>()?;
                self.aggregate(func, values)
            }
            ValueExpr::CountStar => match scope {
                Scope::Group(rows) => Ok(Value::Int(rows.len() as i64)),
                Scope::Row(_) => Err(EngineError::Execution(
                    "COUNT(*) outside a grouped query".to_string(),
                )),
            },
            ValueExpr::Case {
                when,
                then,
                otherwise,
            } => {
                if self.predicate(when, scope)? == Some(true) {
                    self.value(then, scope)
                } else if let Some(otherwise) = otherwise {
                    self.value(otherwise, scope)
                } else {
                    Ok(Value::Null)
                }
            }
            ValueExpr::Outer(field) => Ok(self
                .outer
                .and_then(|row| row.get(field))
                .cloned()
                .unwrap_or(Value::Null)),
            ValueExpr::Subquery(plan) => Ok(self
                .subquery(plan, scope)?
                .rows
                .into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .unwrap_or(Value::Null)),
        }
    }

    pub fn predicate(&self, predicate: &Predicate, scope: Scope<'_>) -> EngineResult<Option<bool>> {
        match predicate {
            Predicate::True => Ok(Some(true)),
            Predicate::False => Ok(Some(false)),
            Predicate::And(children) => {
                let mut result = Some(true);
                for child in children {
                    match self.predicate(child, scope)? {
                        Some(false) => return Ok(Some(false)),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                Ok(result)
            }
            Predicate::Or(children) => {
                let mut result = Some(false);
                for child in children {
                    match self.predicate(child, scope)? {
                        Some(true) => return Ok(Some(true)),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                Ok(result)
            }
            Predicate::Not(inner) => Ok(self.predicate(inner, scope)?.map(|b| !b)),
            Predicate::Compare { left, op, right } => {
                let left = self.value(left, scope)?;
                let right = self.value(right, scope)?;
                if left.is_null() || right.is_null() {
                    return Ok(None);
                }
                Ok(match (left.compare(&right), op) {
                    (Some(ord), op) => Some(compare_holds(ord, *op)),
                    // Values of unrelated kinds are never equal.
                    (None, CompareOp::Eq) => Some(false),
                    (None, CompareOp::Ne) => Some(true),
                    (None, _) => None,
                })
            }
            Predicate::IsNull { expr, negated } => {
                Ok(Some(self.value(expr, scope)?.is_null() != *negated))
            }
            Predicate::Like {
                expr,
                pattern,
                negated,
            } => {
                let value = self.value(expr, scope)?;
                let pattern = self.value(pattern, scope)?;
                if value.is_null() || pattern.is_null() {
                    return Ok(None);
                }
                let matched = like_match(&value.to_string(), &pattern.to_string())?;
                Ok(Some(matched != *negated))
            }
            Predicate::InList {
                expr,
                values,
                negated,
            } => {
                let value = self.value(expr, scope)?;
                if value.is_null() {
                    return Ok(None);
                }
                let found = values
                    .iter()
                    .any(|v| value.compare(v) == Some(Ordering::Equal));
                Ok(Some(found != *negated))
            }
            Predicate::Exists(plan) => Ok(Some(!self.subquery(plan, scope)?.is_empty())),
        }
    }

    fn aggregate(&self, func: &AggFunc, values: Vec<Value>) -> EngineResult<Value> {
        let present = || values.iter().filter(|v| !v.is_null());
        Ok(match func {
            AggFunc::Sum => sum(present())?,
            AggFunc::Avg => {
                let nums: Vec<f64> = present().filter_map(Value::as_f64).collect();
                if nums.is_empty() {
                    Value::Null
                } else {
                    Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                }
            }
            AggFunc::Min => present()
                .min_by(|a, b| a.sort_cmp(b))
                .cloned()
                .unwrap_or(Value::Null),
            AggFunc::Max => present()
                .max_by(|a, b| a.sort_cmp(b))
                .cloned()
                .unwrap_or(Value::Null),
            AggFunc::Count => Value::Int(present().count() as i64),
            AggFunc::First => values.first().cloned().unwrap_or(Value::Null),
            AggFunc::Last => values.last().cloned().unwrap_or(Value::Null),
            AggFunc::Custom(name) => {
                let reduce = self
                    .aggregates
                    .get(name)
                    .and_then(|c| c.reduce.as_ref())
                    .ok_or_else(|| {
                        EngineError::Execution(format!("aggregate '{}' has no reducer", name))
                    })?;
                reduce(&values)
            }
        })
    }
}

fn compare_holds(ord: Ordering, op: CompareOp) -> bool {
    match op {
        CompareOp::Eq => ord == Ordering::Equal,
        CompareOp::Ne => ord != Ordering::Equal,
        CompareOp::Lt => ord == Ordering::Less,
        CompareOp::Lte => ord != Ordering::Greater,
        CompareOp::Gt => ord == Ordering::Greater,
        CompareOp::Gte => ord != Ordering::Less,
    }
}

/// Integer sum while every input is an integer and nothing overflows.
fn sum<'v>(values: impl Iterator<Item = &'v Value>) -> EngineResult<Value> {
    let mut int_sum: Option<i64> = Some(0);
    let mut float_sum = 0.0;
    let mut seen = false;
    for value in values {
        seen = true;
        match value {
            Value::Int(i) => {
                int_sum = int_sum.and_then(|s| s.checked_add(*i));
                float_sum += *i as f64;
            }
            Value::Float(f) => {
                int_sum = None;
                float_sum += f;
            }
            other => {
                return Err(EngineError::Execution(format!("cannot sum {}", other)));
            }
        }
    }
    Ok(match (seen, int_sum) {
        (false, _) => Value::Null,
        (true, Some(i)) => Value::Int(i),
        (true, None) => Value::Float(float_sum),
    })
}

fn scalar_function(name: &str, args: Vec<Value>) -> EngineResult<Value> {
    let upper = name.to_ascii_uppercase();
    if upper == "CONCAT" {
        // Nulls concatenate as empty strings.
        let joined: String = args
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| v.to_string())
            .collect();
        return Ok(Value::Text(joined));
    }

    let [arg] = args.as_slice() else {
        return Err(EngineError::Execution(format!(
            "{} takes one argument, got {}",
            upper,
            args.len()
        )));
    };
    if arg.is_null() {
        return Ok(Value::Null);
    }
    let text = arg.to_string();
    match upper.as_str() {
        "LOWER" => Ok(Value::Text(text.to_lowercase())),
        "UPPER" => Ok(Value::Text(text.to_uppercase())),
        "TRIM" => Ok(Value::Text(text.trim().to_string())),
        _ => Err(EngineError::Execution(format!(
            "function {} is not supported in memory",
            upper
        ))),
    }
}

/// SQL LIKE with `\` as the escape character.
pub fn like_match(text: &str, pattern: &str) -> EngineResult<bool> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push_str("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    let re = Regex::new(&re).map_err(|e| EngineError::Execution(e.to_string()))?;
    Ok(re.is_match(text))
}
