//! Filter recognizer chain.
//!
//! Classifies an untyped filter payload into a [`FilterModel`]. Structural
//! forms are detected first (an array or `filterType: "multi"` is Multi, an
//! object with `operator` + `conditions` is Combined) because a combined
//! payload embeds a `filterType` a simple recognizer would otherwise claim.
//! Then the built-ins run in the order Date, Number, Text, Set, and finally
//! caller-registered recognizers in registration order. First claim wins.
//!
//! The column's [`FilterConfig`] bounds what may be claimed: a built-in kind
//! other than the configured one is rejected, a multi payload needs a multi
//! configuration of the same length, and a column configured with a custom
//! tag hands every payload to that tag's handler.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as Json};

use crate::error::{EngineError, EngineResult};
use crate::filter::model::{FilterModel, JoinOperator, ScalarOp, TextOp};
use crate::planner::logical::Predicate;
use crate::registry::{ColumnDefinition, DataKind, FilterConfig};
use crate::value::{parse_date, Value};

/// Decides whether a custom recognizer claims a payload.
pub type MatchFn = Arc<dyn Fn(&Json, &ColumnDefinition) -> bool + Send + Sync>;

/// Builds the predicate for a payload a custom recognizer claimed. Returning
/// `Predicate::True` signals an inactive filter.
pub type BuildFn =
    Arc<dyn Fn(&Json, &ColumnDefinition) -> EngineResult<Predicate> + Send + Sync>;

/// A caller-registered recognizer with its predicate handler.
#[derive(Clone)]
pub struct CustomRecognizer {
    pub tag: String,
    matches: MatchFn,
    build: BuildFn,
}

impl CustomRecognizer {
    pub fn new<M, B>(tag: &str, matches: M, build: B) -> Self
    where
        M: Fn(&Json, &ColumnDefinition) -> bool + Send + Sync + 'static,
        B: Fn(&Json, &ColumnDefinition) -> EngineResult<Predicate> + Send + Sync + 'static,
    {
        Self {
            tag: tag.to_string(),
            matches: Arc::new(matches),
            build: Arc::new(build),
        }
    }

    /// Claims payloads whose `filterType` equals the tag.
    pub fn by_filter_type<B>(tag: &str, build: B) -> Self
    where
        B: Fn(&Json, &ColumnDefinition) -> EngineResult<Predicate> + Send + Sync + 'static,
    {
        let owned = tag.to_string();
        Self::new(
            tag,
            move |raw, _| raw.get("filterType").and_then(Json::as_str) == Some(owned.as_str()),
            build,
        )
    }

    pub fn matches(&self, raw: &Json, column: &ColumnDefinition) -> bool {
        (self.matches)(raw, column)
    }

    pub fn build(&self, raw: &Json, column: &ColumnDefinition) -> EngineResult<Predicate> {
        (self.build)(raw, column)
    }
}

impl fmt::Debug for CustomRecognizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRecognizer")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Result of one built-in recognizer attempt.
enum Attempt {
    Claimed(FilterModel),
    /// Not this recognizer's payload.
    Skipped,
    /// Right discriminator, inconsistent fields.
    Declined(String),
}

type Builtin = fn(&Map<String, Json>, &ColumnDefinition) -> Attempt;

const BUILTINS: [(&str, Builtin); 4] = [
    ("date", recognize_date),
    ("number", recognize_number),
    ("text", recognize_text),
    ("set", recognize_set),
];

/// Ordered recognizers. Frozen once the engine is built.
#[derive(Debug, Clone, Default)]
pub struct RecognizerChain {
    custom: Vec<CustomRecognizer>,
}

impl RecognizerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, recognizer: CustomRecognizer) {
        self.custom.push(recognizer);
    }

    pub fn handler(&self, tag: &str) -> Option<&CustomRecognizer> {
        self.custom.iter().find(|r| r.tag == tag)
    }

    /// Classify `raw` as a filter on `column`. The recognized kind must be
    /// the one the column is configured with.
    pub fn recognize(&self, raw: &Json, column: &ColumnDefinition) -> EngineResult<FilterModel> {
        if !column.is_filterable() {
            return Err(EngineError::ColumnNotFilterable {
                field: column.field.clone(),
            });
        }
        self.recognize_as(raw, column, &column.filter)
    }

    fn recognize_as(
        &self,
        raw: &Json,
        column: &ColumnDefinition,
        config: &FilterConfig,
    ) -> EngineResult<FilterModel> {
        let field = column.field.as_str();

        match config {
            FilterConfig::None => {
                return Err(EngineError::ColumnNotFilterable {
                    field: column.field.clone(),
                })
            }
            FilterConfig::Custom { tag } => {
                if self.handler(tag).is_none() {
                    return Err(EngineError::unrecognized(
                        field,
                        format!("no recognizer registered for '{}'", tag),
                    ));
                }
                tracing::trace!(field, recognizer = %tag, "routed by column filter");
                return Ok(FilterModel::Custom {
                    tag: tag.clone(),
                    payload: raw.clone(),
                });
            }
            _ => {}
        }

        if let Some(items) = multi_items(raw) {
            let FilterConfig::Multi(subs) = config else {
                return Err(mismatch(field, "multi", config));
            };
            tracing::trace!(field, recognizer = "multi", "claimed");
            return self.recognize_multi(items, column, subs);
        }
        if let FilterConfig::Multi(_) = config {
            return Err(EngineError::unrecognized(
                field,
                "column is configured with a multi filter",
            ));
        }

        let Some(obj) = raw.as_object() else {
            return Err(EngineError::unrecognized(field, "filter payload must be an object"));
        };

        if obj.contains_key("operator") && obj.contains_key("conditions") {
            tracing::trace!(field, recognizer = "combined", "claimed");
            return self.recognize_combined(obj, column, config);
        }

        let mut reason = None;
        for (name, builtin) in BUILTINS {
            match builtin(obj, column) {
                Attempt::Claimed(model) => {
                    tracing::trace!(field, recognizer = name, "claimed");
                    if !config.admits(model.kind()) {
                        return Err(mismatch(field, name, config));
                    }
                    return Ok(model);
                }
                Attempt::Declined(why) => {
                    tracing::trace!(field, recognizer = name, reason = %why, "declined");
                    reason.get_or_insert(why);
                }
                Attempt::Skipped => {
                    tracing::trace!(field, recognizer = name, "skipped");
                }
            }
        }

        for custom in &self.custom {
            if custom.matches(raw, column) {
                tracing::trace!(field, recognizer = %custom.tag, "claimed by custom recognizer");
                return Ok(FilterModel::Custom {
                    tag: custom.tag.clone(),
                    payload: raw.clone(),
                });
            }
        }

        Err(EngineError::unrecognized(
            field,
            reason.unwrap_or_else(|| "no recognizer claimed the payload".to_string()),
        ))
    }

    /// Each position is recognized against the sub-filter configured there.
    fn recognize_multi(
        &self,
        items: &[Json],
        column: &ColumnDefinition,
        subs: &[FilterConfig],
    ) -> EngineResult<FilterModel> {
        if items.len() != subs.len() {
            return Err(EngineError::unrecognized(
                &column.field,
                format!(
                    "multi filter has {} models, column is configured with {}",
                    items.len(),
                    subs.len()
                ),
            ));
        }
        let models = items
            .iter()
            .zip(subs)
            .map(|(item, sub)| match item {
                Json::Null => Ok(None),
                other => self.recognize_as(other, column, sub).map(Some),
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(FilterModel::Multi { models })
    }

    fn recognize_combined(
        &self,
        obj: &Map<String, Json>,
        column: &ColumnDefinition,
        config: &FilterConfig,
    ) -> EngineResult<FilterModel> {
        let field = column.field.as_str();
        let operator = obj
            .get("operator")
            .and_then(Json::as_str)
            .and_then(JoinOperator::parse)
            .ok_or_else(|| EngineError::unrecognized(field, "operator must be AND or OR"))?;
        let Some(Json::Array(raw_conditions)) = obj.get("conditions") else {
            return Err(EngineError::unrecognized(field, "conditions must be an array"));
        };

        let mut conditions = Vec::with_capacity(raw_conditions.len());
        for raw in raw_conditions {
            let model = self.recognize_as(raw, column, config)?;
            if !model.is_simple() {
                return Err(EngineError::unrecognized(
                    field,
                    "combined conditions must be text, number or date filters",
                ));
            }
            if let Some(first) = conditions.first().map(FilterModel::kind) {
                if first != model.kind() {
                    return Err(EngineError::unrecognized(
                        field,
                        "combined conditions must all be the same filter kind",
                    ));
                }
            }
            conditions.push(model);
        }
        Ok(FilterModel::Combined {
            operator,
            conditions,
        })
    }
}

/// The sub-payloads of a multi payload: a bare array, or `filterType: "multi"`
/// with `filterModels`.
fn multi_items(raw: &Json) -> Option<&[Json]> {
    match raw {
        Json::Array(items) => Some(items),
        Json::Object(obj) if obj.get("filterType").and_then(Json::as_str) == Some("multi") => {
            match obj.get("filterModels") {
                Some(Json::Array(items)) => Some(items),
                _ => None,
            }
        }
        _ => None,
    }
}

fn mismatch(field: &str, found: &str, config: &FilterConfig) -> EngineError {
    EngineError::unrecognized(
        field,
        format!(
            "{} filter on a column configured with a {} filter",
            found,
            config.name()
        ),
    )
}

// =============================================================================
// Built-in recognizers
// =============================================================================

fn filter_type<'a>(obj: &'a Map<String, Json>) -> Option<&'a str> {
    obj.get("filterType").and_then(Json::as_str)
}

fn present<'a>(obj: &'a Map<String, Json>, key: &str) -> Option<&'a Json> {
    obj.get(key).filter(|v| !v.is_null())
}

fn recognize_date(obj: &Map<String, Json>, _column: &ColumnDefinition) -> Attempt {
    if filter_type(obj) != Some("date") {
        return Attempt::Skipped;
    }
    let Some(op) = obj.get("type").and_then(Json::as_str).and_then(ScalarOp::parse) else {
        return Attempt::Declined("unknown date filter type".to_string());
    };

    let parse = |key: &str| -> Result<Option<chrono::NaiveDate>, String> {
        match present(obj, key) {
            None => Ok(None),
            Some(Json::String(s)) => parse_date(s)
                .map(Some)
                .ok_or_else(|| format!("{} '{}' is not a date", key, s)),
            Some(other) => Err(format!("{} {} is not a date", key, other)),
        }
    };

    let (date_from, date_to) = match (parse("dateFrom"), parse("dateTo")) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(why), _) | (_, Err(why)) => return Attempt::Declined(why),
    };
    if op.needs_operand() && date_from.is_none() {
        return Attempt::Declined("dateFrom is required".to_string());
    }
    if op == ScalarOp::InRange && date_to.is_none() {
        return Attempt::Declined("inRange requires dateTo".to_string());
    }
    Attempt::Claimed(FilterModel::Date {
        op,
        date_from,
        date_to,
    })
}

fn recognize_number(obj: &Map<String, Json>, column: &ColumnDefinition) -> Attempt {
    if filter_type(obj) != Some("number") {
        return Attempt::Skipped;
    }
    let Some(op) = obj.get("type").and_then(Json::as_str).and_then(ScalarOp::parse) else {
        return Attempt::Declined("unknown number filter type".to_string());
    };

    let parse = |key: &str| -> Result<Option<Value>, String> {
        present(obj, key)
            .map(|raw| Value::coerce(raw, DataKind::Number, &column.field))
            .transpose()
            .map_err(|_| format!("{} must be numeric", key))
    };

    let (filter, filter_to) = match (parse("filter"), parse("filterTo")) {
        (Ok(from), Ok(to)) => (from, to),
        (Err(why), _) | (_, Err(why)) => return Attempt::Declined(why),
    };
    if op.needs_operand() && filter.is_none() {
        return Attempt::Declined("filter is required".to_string());
    }
    if op == ScalarOp::InRange && filter_to.is_none() {
        return Attempt::Declined("inRange requires filterTo".to_string());
    }
    Attempt::Claimed(FilterModel::Number {
        op,
        filter,
        filter_to,
    })
}

fn recognize_text(obj: &Map<String, Json>, _column: &ColumnDefinition) -> Attempt {
    if filter_type(obj) != Some("text") {
        return Attempt::Skipped;
    }
    let Some(op) = obj.get("type").and_then(Json::as_str).and_then(TextOp::parse) else {
        return Attempt::Declined("unknown text filter type".to_string());
    };

    let text = |key: &str| -> Option<String> {
        present(obj, key).map(|v| match v {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })
    };
    let filter = text("filter");
    if op.needs_operand() && filter.is_none() {
        return Attempt::Declined("filter is required".to_string());
    }
    Attempt::Claimed(FilterModel::Text {
        op,
        filter,
        filter_to: text("filterTo"),
    })
}

fn recognize_set(obj: &Map<String, Json>, _column: &ColumnDefinition) -> Attempt {
    if filter_type(obj) != Some("set") {
        return Attempt::Skipped;
    }
    match obj.get("values") {
        Some(Json::Array(values)) => Attempt::Claimed(FilterModel::Set {
            values: values.clone(),
        }),
        _ => Attempt::Declined("set filter requires a values array".to_string()),
    }
}
