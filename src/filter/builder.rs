//! Predicate builder.
//!
//! Turns a recognized [`FilterModel`] into a [`Predicate`] against a column,
//! or against any operand expression when the filter applies to a group
//! aggregate. Parameters come from the column's [`FilterConfig`]; a model
//! whose kind differs from the configured filter is rejected.

use chrono::NaiveDate;

use crate::error::{EngineError, EngineResult};
use crate::filter::combinator::{and_all, join, or_all};
use crate::filter::model::{FilterModel, ScalarOp, TextOp};
use crate::filter::params::{
    DateFilterParams, ScalarFilterParams, SetFilterParams, TextFilterParams, TextMatcherParams,
};
use crate::filter::recognizer::RecognizerChain;
use crate::planner::logical::{escape_like, CompareOp, Predicate, ValueExpr};
use crate::registry::{ColumnDefinition, DataKind, FilterConfig};
use crate::value::Value;

/// Builds predicates from recognized filter models.
#[derive(Debug, Clone, Copy)]
pub struct PredicateBuilder<'a> {
    recognizers: &'a RecognizerChain,
}

impl<'a> PredicateBuilder<'a> {
    /// `recognizers` supplies the handlers of custom models.
    pub fn new(recognizers: &'a RecognizerChain) -> Self {
        Self { recognizers }
    }

    /// Predicate over the column itself.
    pub fn build(&self, model: &FilterModel, column: &ColumnDefinition) -> EngineResult<Predicate> {
        self.build_on(model, column, ValueExpr::column(&column.field))
    }

    /// Predicate over `operand`, e.g. the column's aggregate in HAVING.
    pub fn build_on(
        &self,
        model: &FilterModel,
        column: &ColumnDefinition,
        operand: ValueExpr,
    ) -> EngineResult<Predicate> {
        self.build_with(model, column, &column.filter, operand)
    }

    /// Predicate for a model whose kind was chosen by the caller rather than
    /// by the column, as advanced filter leaves are. The column's parameters
    /// apply when they are of the model's kind, stock parameters otherwise.
    pub fn build_typed(
        &self,
        model: &FilterModel,
        column: &ColumnDefinition,
    ) -> EngineResult<Predicate> {
        let stock = match model {
            _ if column.filter.admits(model.kind()) => None,
            FilterModel::Text { .. } => Some(FilterConfig::Text(TextFilterParams::default())),
            FilterModel::Number { .. } => {
                Some(FilterConfig::Number(ScalarFilterParams::default()))
            }
            FilterModel::Date { .. } => Some(FilterConfig::Date(DateFilterParams::default())),
            FilterModel::Set { .. } => Some(FilterConfig::Set(SetFilterParams::default())),
            _ => None,
        };
        let config = stock.as_ref().unwrap_or(&column.filter);
        self.build_with(model, column, config, ValueExpr::column(&column.field))
    }

    fn build_with(
        &self,
        model: &FilterModel,
        column: &ColumnDefinition,
        config: &FilterConfig,
        operand: ValueExpr,
    ) -> EngineResult<Predicate> {
        let mismatch = |found: &str| {
            EngineError::unrecognized(
                &column.field,
                format!(
                    "{} filter on a column configured with a {} filter",
                    found,
                    config.name()
                ),
            )
        };

        match (model, config) {
            (
                FilterModel::Text {
                    op,
                    filter,
                    filter_to: _,
                },
                FilterConfig::Text(params),
            ) => text_predicate(params, *op, filter.as_deref(), column, operand),
            (
                FilterModel::Number {
                    op,
                    filter,
                    filter_to,
                },
                FilterConfig::Number(params),
            ) => scalar_predicate(params, *op, filter.as_ref(), filter_to.as_ref(), column, operand),
            (
                FilterModel::Date {
                    op,
                    date_from,
                    date_to,
                },
                FilterConfig::Date(params),
            ) => date_predicate(params, *op, *date_from, *date_to, column, operand),
            (FilterModel::Set { values }, FilterConfig::Set(params)) => {
                set_predicate(params, values, column, operand)
            }
            (
                FilterModel::Combined {
                    operator,
                    conditions,
                },
                _,
            ) => {
                let built = conditions
                    .iter()
                    .map(|c| self.build_with(c, column, config, operand.clone()))
                    .collect::<EngineResult<Vec<_>>>()?;
                Ok(join(*operator, built))
            }
            (FilterModel::Multi { models }, FilterConfig::Multi(subs)) => {
                if models.len() != subs.len() {
                    return Err(EngineError::unrecognized(
                        &column.field,
                        format!(
                            "multi filter has {} models, column is configured with {}",
                            models.len(),
                            subs.len()
                        ),
                    ));
                }
                let mut built = Vec::with_capacity(models.len());
                for (model, sub) in models.iter().zip(subs) {
                    let Some(model) = model else { continue };
                    built.push(self.build_with(model, column, sub, operand.clone())?);
                }
                Ok(and_all(built))
            }
            (FilterModel::Custom { tag, .. }, FilterConfig::Custom { tag: configured })
                if tag != configured =>
            {
                Err(mismatch(tag))
            }
            (FilterModel::Custom { tag, payload }, _) => {
                let handler = self.recognizers.handler(tag).ok_or_else(|| {
                    EngineError::unrecognized(
                        &column.field,
                        format!("no handler registered for '{}'", tag),
                    )
                })?;
                handler.build(payload, column)
            }
            (model, _) => Err(mismatch(kind_name(model))),
        }
    }
}

fn kind_name(model: &FilterModel) -> &'static str {
    match model {
        FilterModel::Text { .. } => "text",
        FilterModel::Number { .. } => "number",
        FilterModel::Date { .. } => "date",
        FilterModel::Set { .. } => "set",
        FilterModel::Combined { .. } => "combined",
        FilterModel::Multi { .. } => "multi",
        FilterModel::Custom { .. } => "custom",
    }
}

// =============================================================================
// Text
// =============================================================================

fn text_predicate(
    params: &TextFilterParams,
    op: TextOp,
    filter: Option<&str>,
    column: &ColumnDefinition,
    operand: ValueExpr,
) -> EngineResult<Predicate> {
    if !params.allows(op) {
        return Err(EngineError::unrecognized(
            &column.field,
            format!("text operator {:?} is not enabled for this column", op),
        ));
    }

    let filter = filter.map(|text| {
        let trimmed = text.trim();
        if params.trim_input && !trimmed.is_empty() {
            trimmed.to_string()
        } else {
            text.to_string()
        }
    });

    if let Some(matcher) = &params.text_matcher {
        let matcher_params = TextMatcherParams {
            op,
            value: params.format(operand),
            filter_text: filter.as_deref().map(|t| fold_literal(params, t)),
        };
        return Ok(matcher(&matcher_params));
    }

    let text = || {
        filter.clone().ok_or_else(|| {
            EngineError::unrecognized(&column.field, "text filter requires a filter value")
        })
    };

    Ok(match op {
        TextOp::Blank => or_all([
            operand.clone().is_null(),
            operand.eq(ValueExpr::text("")),
        ]),
        TextOp::NotBlank => and_all([
            operand.clone().is_not_null(),
            operand.ne(ValueExpr::text("")),
        ]),
        TextOp::Equals => params.format(operand).eq(fold_literal(params, &text()?)),
        TextOp::NotEqual => params.format(operand).ne(fold_literal(params, &text()?)),
        TextOp::Contains => like(params, operand, &text()?, true, true, false),
        TextOp::NotContains => like(params, operand, &text()?, true, true, true),
        TextOp::StartsWith => like(params, operand, &text()?, false, true, false),
        TextOp::EndsWith => like(params, operand, &text()?, true, false, false),
    })
}

/// The literal side of a text comparison. Lowercasing is folded here rather
/// than emitted as `LOWER('...')`.
fn fold_literal(params: &TextFilterParams, text: &str) -> ValueExpr {
    match &params.text_formatter {
        Some(f) => f(ValueExpr::text(text)),
        None if !params.case_sensitive => ValueExpr::text(&text.to_lowercase()),
        None => ValueExpr::text(text),
    }
}

fn like(
    params: &TextFilterParams,
    operand: ValueExpr,
    text: &str,
    leading: bool,
    trailing: bool,
    negated: bool,
) -> Predicate {
    let pattern = match &params.text_formatter {
        Some(f) => {
            let mut parts = Vec::with_capacity(3);
            if leading {
                parts.push(ValueExpr::text("%"));
            }
            parts.push(f(ValueExpr::text(&escape_like(text))));
            if trailing {
                parts.push(ValueExpr::text("%"));
            }
            ValueExpr::func("CONCAT", parts)
        }
        None => {
            let folded = if params.case_sensitive {
                text.to_string()
            } else {
                text.to_lowercase()
            };
            ValueExpr::text(&format!(
                "{}{}{}",
                if leading { "%" } else { "" },
                escape_like(&folded),
                if trailing { "%" } else { "" }
            ))
        }
    };
    Predicate::Like {
        expr: params.format(operand),
        pattern,
        negated,
    }
}

// =============================================================================
// Number / Date
// =============================================================================

fn scalar_predicate(
    params: &ScalarFilterParams,
    op: ScalarOp,
    from: Option<&Value>,
    to: Option<&Value>,
    column: &ColumnDefinition,
    operand: ValueExpr,
) -> EngineResult<Predicate> {
    if !params.allows(op) {
        return Err(EngineError::unrecognized(
            &column.field,
            format!("operator {:?} is not enabled for this column", op),
        ));
    }

    let required = |v: Option<&Value>, what: &str| {
        v.filter(|v| !v.is_null()).cloned().ok_or_else(|| {
            EngineError::unrecognized(&column.field, format!("{} is required", what))
        })
    };
    let cmp = |op: CompareOp, v: Value| Predicate::compare(operand.clone(), op, ValueExpr::lit(v));

    let core = match op {
        ScalarOp::Blank => return Ok(operand.is_null()),
        ScalarOp::NotBlank => return Ok(operand.is_not_null()),
        ScalarOp::Equals => cmp(CompareOp::Eq, required(from, "filter")?),
        ScalarOp::NotEqual => cmp(CompareOp::Ne, required(from, "filter")?),
        ScalarOp::LessThan => cmp(CompareOp::Lt, required(from, "filter")?),
        ScalarOp::LessThanOrEqual => cmp(CompareOp::Lte, required(from, "filter")?),
        ScalarOp::GreaterThan => cmp(CompareOp::Gt, required(from, "filter")?),
        ScalarOp::GreaterThanOrEqual => cmp(CompareOp::Gte, required(from, "filter")?),
        ScalarOp::InRange => {
            let lo = required(from, "filter")?;
            let hi = required(to, "filterTo")?;
            if lo.compare(&hi) == Some(std::cmp::Ordering::Greater) {
                return Err(EngineError::InvalidRange {
                    field: column.field.clone(),
                    from: lo.to_string(),
                    to: hi.to_string(),
                });
            }
            let (lo_op, hi_op) = if params.in_range_inclusive {
                (CompareOp::Gte, CompareOp::Lte)
            } else {
                (CompareOp::Gt, CompareOp::Lt)
            };
            and_all([cmp(lo_op, lo), cmp(hi_op, hi)])
        }
    };

    if params.includes_blanks(op) {
        Ok(or_all([core, operand.is_null()]))
    } else {
        Ok(core)
    }
}

fn date_predicate(
    params: &DateFilterParams,
    op: ScalarOp,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    column: &ColumnDefinition,
    operand: ValueExpr,
) -> EngineResult<Predicate> {
    let to_value = |date: Option<NaiveDate>| -> EngineResult<Option<Value>> {
        let Some(date) = date else { return Ok(None) };
        params
            .check(date)
            .map_err(|expected| EngineError::invalid_value(&column.field, date, expected))?;
        Ok(Some(match column.kind {
            DataKind::DateString => Value::Text(date.format("%Y-%m-%d").to_string()),
            _ => Value::Date(date),
        }))
    };
    let from = if op.needs_operand() { to_value(from)? } else { None };
    let to = if op == ScalarOp::InRange { to_value(to)? } else { None };
    scalar_predicate(&params.scalar, op, from.as_ref(), to.as_ref(), column, operand)
}

// =============================================================================
// Set
// =============================================================================

fn set_predicate(
    params: &SetFilterParams,
    raw: &[serde_json::Value],
    column: &ColumnDefinition,
    operand: ValueExpr,
) -> EngineResult<Predicate> {
    let mut include_null = false;
    let mut values = Vec::with_capacity(raw.len());
    for item in raw {
        match Value::coerce(item, column.kind, &column.field)? {
            Value::Null => include_null = true,
            value => values.push(value),
        }
    }

    let folds_text = column.kind == DataKind::Text;
    let members = if values.is_empty() {
        Predicate::False
    } else if let (true, Some(f)) = (folds_text, &params.text_formatter) {
        let formatted = f(operand.clone());
        or_all(
            values
                .into_iter()
                .map(|v| formatted.clone().eq(f(ValueExpr::lit(v)))),
        )
    } else if folds_text && !params.case_sensitive {
        Predicate::InList {
            expr: operand.clone().lower(),
            values: values
                .into_iter()
                .map(|v| match v {
                    Value::Text(s) => Value::Text(s.to_lowercase()),
                    other => other,
                })
                .collect(),
            negated: false,
        }
    } else {
        Predicate::InList {
            expr: operand.clone(),
            values,
            negated: false,
        }
    };

    if include_null {
        Ok(or_all([members, operand.is_null()]))
    } else {
        Ok(members)
    }
}
