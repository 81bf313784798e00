//! Recognized filter models.
//!
//! Raw filter payloads are untyped JSON. The recognizer chain classifies each
//! payload into one of these variants; the predicate builder consumes them.

use chrono::NaiveDate;

use crate::value::Value;

/// Operators of the text filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Equals,
    NotEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Blank,
    NotBlank,
}

impl TextOp {
    pub fn parse(s: &str) -> Option<TextOp> {
        Some(match s {
            "equals" => TextOp::Equals,
            "notEqual" => TextOp::NotEqual,
            "contains" => TextOp::Contains,
            "notContains" => TextOp::NotContains,
            "startsWith" => TextOp::StartsWith,
            "endsWith" => TextOp::EndsWith,
            "blank" | "empty" => TextOp::Blank,
            "notBlank" => TextOp::NotBlank,
            _ => return None,
        })
    }

    pub fn needs_operand(self) -> bool {
        !matches!(self, TextOp::Blank | TextOp::NotBlank)
    }
}

/// Operators shared by the number and date filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarOp {
    Equals,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    InRange,
    Blank,
    NotBlank,
}

impl ScalarOp {
    pub fn parse(s: &str) -> Option<ScalarOp> {
        Some(match s {
            "equals" => ScalarOp::Equals,
            "notEqual" => ScalarOp::NotEqual,
            "lessThan" => ScalarOp::LessThan,
            "lessThanOrEqual" => ScalarOp::LessThanOrEqual,
            "greaterThan" => ScalarOp::GreaterThan,
            "greaterThanOrEqual" => ScalarOp::GreaterThanOrEqual,
            "inRange" => ScalarOp::InRange,
            "blank" | "empty" => ScalarOp::Blank,
            "notBlank" => ScalarOp::NotBlank,
            _ => return None,
        })
    }

    pub fn needs_operand(self) -> bool {
        !matches!(self, ScalarOp::Blank | ScalarOp::NotBlank)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOperator {
    And,
    Or,
}

impl JoinOperator {
    pub fn parse(s: &str) -> Option<JoinOperator> {
        if s.eq_ignore_ascii_case("and") {
            Some(JoinOperator::And)
        } else if s.eq_ignore_ascii_case("or") {
            Some(JoinOperator::Or)
        } else {
            None
        }
    }
}

/// Coarse kind of a model, used to check that combined conditions agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Text,
    Number,
    Date,
    Set,
    Combined,
    Multi,
    Custom,
}

/// A recognized column filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterModel {
    Text {
        op: TextOp,
        filter: Option<String>,
        filter_to: Option<String>,
    },
    Number {
        op: ScalarOp,
        filter: Option<Value>,
        filter_to: Option<Value>,
    },
    Date {
        op: ScalarOp,
        date_from: Option<NaiveDate>,
        date_to: Option<NaiveDate>,
    },
    /// Raw values; a JSON null entry selects null cells.
    Set { values: Vec<serde_json::Value> },
    /// Same-kind conditions on one column joined by AND/OR.
    Combined {
        operator: JoinOperator,
        conditions: Vec<FilterModel>,
    },
    /// Several filters on one column, all of which must pass. `None` marks a
    /// sub-filter with no model at that position.
    Multi { models: Vec<Option<FilterModel>> },
    /// Claimed by a caller-registered recognizer.
    Custom {
        tag: String,
        payload: serde_json::Value,
    },
}

impl FilterModel {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterModel::Text { .. } => FilterKind::Text,
            FilterModel::Number { .. } => FilterKind::Number,
            FilterModel::Date { .. } => FilterKind::Date,
            FilterModel::Set { .. } => FilterKind::Set,
            FilterModel::Combined { .. } => FilterKind::Combined,
            FilterModel::Multi { .. } => FilterKind::Multi,
            FilterModel::Custom { .. } => FilterKind::Custom,
        }
    }

    /// Whether this model may appear as a condition of a combined model.
    pub fn is_simple(&self) -> bool {
        matches!(
            self.kind(),
            FilterKind::Text | FilterKind::Number | FilterKind::Date
        )
    }
}
