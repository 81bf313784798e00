//! Advanced filter trees.
//!
//! With advanced filtering enabled, `filterModel` is a single tree instead of
//! a per-column map. Join nodes carry `type` AND/OR and `conditions`; leaves
//! carry `colId`, a `filterType` and an operator. Column leaves are lowered to
//! ordinary filter models so per-column parameters still apply.

use serde_json::{Map, Value as Json};

use crate::error::{EngineError, EngineResult};
use crate::filter::builder::PredicateBuilder;
use crate::filter::combinator::join;
use crate::filter::model::{FilterModel, JoinOperator, ScalarOp, TextOp};
use crate::planner::logical::{Predicate, ValueExpr};
use crate::registry::{ColumnDefinition, ColumnRegistry, DataKind};
use crate::value::{parse_date, Value};

const ROOT: &str = "advancedFilter";

/// Build the predicate of an advanced filter tree.
pub fn build_tree(
    tree: &Json,
    registry: &ColumnRegistry,
    builder: &PredicateBuilder<'_>,
) -> EngineResult<Predicate> {
    let Some(node) = tree.as_object() else {
        return Err(EngineError::unrecognized(ROOT, "advanced filter node must be an object"));
    };

    if node.get("filterType").and_then(Json::as_str) == Some("join") {
        let operator = node
            .get("type")
            .and_then(Json::as_str)
            .and_then(JoinOperator::parse)
            .ok_or_else(|| EngineError::unrecognized(ROOT, "join type must be AND or OR"))?;
        let conditions = match node.get("conditions") {
            Some(Json::Array(items)) => items,
            _ => return Err(EngineError::unrecognized(ROOT, "join requires conditions")),
        };
        let built = conditions
            .iter()
            .map(|c| build_tree(c, registry, builder))
            .collect::<EngineResult<Vec<_>>>()?;
        return Ok(join(operator, built));
    }

    let col_id = node
        .get("colId")
        .and_then(Json::as_str)
        .ok_or_else(|| EngineError::unrecognized(ROOT, "column condition requires colId"))?;
    let column = registry.require(col_id)?;
    if !column.is_filterable() {
        return Err(EngineError::ColumnNotFilterable {
            field: column.field.clone(),
        });
    }
    build_leaf(node, column, builder)
}

fn build_leaf(
    node: &Map<String, Json>,
    column: &ColumnDefinition,
    builder: &PredicateBuilder<'_>,
) -> EngineResult<Predicate> {
    let field = column.field.as_str();
    let filter_type = node.get("filterType").and_then(Json::as_str).unwrap_or_default();
    let op_name = node.get("type").and_then(Json::as_str).unwrap_or_default();
    let filter = node.get("filter").filter(|v| !v.is_null());
    let unknown_op = || {
        EngineError::unrecognized(
            field,
            format!("unknown {} operator '{}'", filter_type, op_name),
        )
    };

    let model = match filter_type {
        "text" | "object" => {
            let op = TextOp::parse(op_name).ok_or_else(unknown_op)?;
            FilterModel::Text {
                op,
                filter: filter.map(|v| match v {
                    Json::String(s) => s.clone(),
                    other => other.to_string(),
                }),
                filter_to: None,
            }
        }
        "number" => {
            let op = scalar_op(op_name).ok_or_else(unknown_op)?;
            FilterModel::Number {
                op,
                filter: filter
                    .map(|v| Value::coerce(v, DataKind::Number, field))
                    .transpose()?,
                filter_to: None,
            }
        }
        "date" | "dateString" => {
            let op = scalar_op(op_name).ok_or_else(unknown_op)?;
            let date_from = match filter {
                None => None,
                Some(Json::String(s)) => Some(
                    parse_date(s)
                        .ok_or_else(|| EngineError::invalid_value(field, s, "a date (yyyy-MM-dd)"))?,
                ),
                Some(other) => return Err(EngineError::invalid_value(field, other, "a date string")),
            };
            FilterModel::Date {
                op,
                date_from,
                date_to: None,
            }
        }
        "boolean" => {
            let operand = ValueExpr::column(field);
            return match op_name {
                "true" => Ok(operand.eq(ValueExpr::lit(Value::Bool(true)))),
                "false" => Ok(operand.eq(ValueExpr::lit(Value::Bool(false)))),
                "blank" => Ok(operand.is_null()),
                "notBlank" => Ok(operand.is_not_null()),
                _ => Err(unknown_op()),
            };
        }
        other => {
            return Err(EngineError::unrecognized(
                field,
                format!("unknown advanced filter type '{}'", other),
            ))
        }
    };
    builder.build_typed(&model, column)
}

/// Scalar operators of advanced leaves; there is no inRange.
fn scalar_op(name: &str) -> Option<ScalarOp> {
    ScalarOp::parse(name).filter(|op| *op != ScalarOp::InRange)
}
