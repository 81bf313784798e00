//! Per-column filter parameters.
//!
//! These are the defaults a column's filter is built with. Text and set
//! parameters can carry caller hooks; hooks are shared closures so a
//! registry stays `Send + Sync` and cheap to clone.

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};

use crate::filter::model::{ScalarOp, TextOp};
use crate::planner::logical::{Predicate, ValueExpr};

/// Transforms both sides of a text comparison, e.g. to strip accents.
pub type TextFormatter = Arc<dyn Fn(ValueExpr) -> ValueExpr + Send + Sync>;

/// Replaces the text operator semantics entirely.
pub type TextMatcher = Arc<dyn Fn(&TextMatcherParams) -> Predicate + Send + Sync>;

/// Inputs handed to a [`TextMatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextMatcherParams {
    pub op: TextOp,
    /// The column side, after trimming and formatting.
    pub value: ValueExpr,
    /// The filter text after trimming and formatting; absent for blank tests.
    pub filter_text: Option<ValueExpr>,
}

// =============================================================================
// Text
// =============================================================================

#[derive(Clone, Default)]
pub struct TextFilterParams {
    pub case_sensitive: bool,
    pub trim_input: bool,
    pub text_formatter: Option<TextFormatter>,
    pub text_matcher: Option<TextMatcher>,
    /// Allowed operators; `None` allows all.
    pub filter_options: Option<Vec<TextOp>>,
}

impl TextFilterParams {
    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn trim_input(mut self, yes: bool) -> Self {
        self.trim_input = yes;
        self
    }

    pub fn text_formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(ValueExpr) -> ValueExpr + Send + Sync + 'static,
    {
        self.text_formatter = Some(Arc::new(f));
        self
    }

    pub fn text_matcher<F>(mut self, f: F) -> Self
    where
        F: Fn(&TextMatcherParams) -> Predicate + Send + Sync + 'static,
    {
        self.text_matcher = Some(Arc::new(f));
        self
    }

    pub fn filter_options(mut self, ops: Vec<TextOp>) -> Self {
        self.filter_options = Some(ops);
        self
    }

    pub fn allows(&self, op: TextOp) -> bool {
        self.filter_options
            .as_ref()
            .map_or(true, |ops| ops.contains(&op))
    }

    /// Formatting applied to either side of a comparison: the formatter
    /// hook if set, otherwise lowercasing unless case-sensitive.
    pub fn format(&self, expr: ValueExpr) -> ValueExpr {
        match &self.text_formatter {
            Some(f) => f(expr),
            None if !self.case_sensitive => expr.lower(),
            None => expr,
        }
    }
}

impl fmt::Debug for TextFilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextFilterParams")
            .field("case_sensitive", &self.case_sensitive)
            .field("trim_input", &self.trim_input)
            .field("text_formatter", &self.text_formatter.is_some())
            .field("text_matcher", &self.text_matcher.is_some())
            .field("filter_options", &self.filter_options)
            .finish()
    }
}

// =============================================================================
// Number / Date
// =============================================================================

/// Parameters shared by the number and date filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarFilterParams {
    pub in_range_inclusive: bool,
    pub include_blanks_in_equals: bool,
    pub include_blanks_in_not_equal: bool,
    pub include_blanks_in_less_than: bool,
    pub include_blanks_in_greater_than: bool,
    pub include_blanks_in_range: bool,
    pub filter_options: Option<Vec<ScalarOp>>,
}

impl Default for ScalarFilterParams {
    fn default() -> Self {
        Self {
            in_range_inclusive: true,
            include_blanks_in_equals: false,
            include_blanks_in_not_equal: false,
            include_blanks_in_less_than: false,
            include_blanks_in_greater_than: false,
            include_blanks_in_range: false,
            filter_options: None,
        }
    }
}

impl ScalarFilterParams {
    pub fn in_range_inclusive(mut self, yes: bool) -> Self {
        self.in_range_inclusive = yes;
        self
    }

    pub fn include_blanks_in_equals(mut self, yes: bool) -> Self {
        self.include_blanks_in_equals = yes;
        self
    }

    pub fn include_blanks_in_not_equal(mut self, yes: bool) -> Self {
        self.include_blanks_in_not_equal = yes;
        self
    }

    pub fn include_blanks_in_less_than(mut self, yes: bool) -> Self {
        self.include_blanks_in_less_than = yes;
        self
    }

    pub fn include_blanks_in_greater_than(mut self, yes: bool) -> Self {
        self.include_blanks_in_greater_than = yes;
        self
    }

    pub fn include_blanks_in_range(mut self, yes: bool) -> Self {
        self.include_blanks_in_range = yes;
        self
    }

    pub fn filter_options(mut self, ops: Vec<ScalarOp>) -> Self {
        self.filter_options = Some(ops);
        self
    }

    pub fn allows(&self, op: ScalarOp) -> bool {
        self.filter_options
            .as_ref()
            .map_or(true, |ops| ops.contains(&op))
    }

    /// Whether blanks pass the given operator.
    pub fn includes_blanks(&self, op: ScalarOp) -> bool {
        match op {
            ScalarOp::Equals => self.include_blanks_in_equals,
            ScalarOp::NotEqual => self.include_blanks_in_not_equal,
            ScalarOp::LessThan | ScalarOp::LessThanOrEqual => self.include_blanks_in_less_than,
            ScalarOp::GreaterThan | ScalarOp::GreaterThanOrEqual => {
                self.include_blanks_in_greater_than
            }
            ScalarOp::InRange => self.include_blanks_in_range,
            ScalarOp::Blank | ScalarOp::NotBlank => false,
        }
    }
}

pub type NumberFilterParams = ScalarFilterParams;

#[derive(Debug, Clone, PartialEq)]
pub struct DateFilterParams {
    pub scalar: ScalarFilterParams,
    pub min_valid_year: Option<i32>,
    pub max_valid_year: Option<i32>,
    /// Overrides `min_valid_year` when set.
    pub min_valid_date: Option<NaiveDate>,
    /// Overrides `max_valid_year` when set.
    pub max_valid_date: Option<NaiveDate>,
}

impl Default for DateFilterParams {
    fn default() -> Self {
        Self {
            scalar: ScalarFilterParams::default(),
            min_valid_year: Some(1000),
            max_valid_year: None,
            min_valid_date: None,
            max_valid_date: None,
        }
    }
}

impl DateFilterParams {
    pub fn scalar(mut self, scalar: ScalarFilterParams) -> Self {
        self.scalar = scalar;
        self
    }

    pub fn valid_years(mut self, min: Option<i32>, max: Option<i32>) -> Self {
        self.min_valid_year = min;
        self.max_valid_year = max;
        self
    }

    pub fn valid_dates(mut self, min: Option<NaiveDate>, max: Option<NaiveDate>) -> Self {
        self.min_valid_date = min;
        self.max_valid_date = max;
        self
    }

    /// Check a filter date against the configured window. Returns the
    /// violated bound on failure.
    pub fn check(&self, date: NaiveDate) -> Result<(), String> {
        match self.min_valid_date {
            Some(min) if date < min => return Err(format!("on or after {}", min)),
            Some(_) => {}
            None => {
                if let Some(min) = self.min_valid_year.filter(|y| date.year() < *y) {
                    return Err(format!("a year of at least {}", min));
                }
            }
        }
        match self.max_valid_date {
            Some(max) if date > max => Err(format!("on or before {}", max)),
            Some(_) => Ok(()),
            None => match self.max_valid_year.filter(|y| date.year() > *y) {
                Some(max) => Err(format!("a year of at most {}", max)),
                None => Ok(()),
            },
        }
    }
}

// =============================================================================
// Set
// =============================================================================

#[derive(Clone, Default)]
pub struct SetFilterParams {
    /// Text values compare lowercased unless set.
    pub case_sensitive: bool,
    pub text_formatter: Option<TextFormatter>,
}

impl SetFilterParams {
    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn text_formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(ValueExpr) -> ValueExpr + Send + Sync + 'static,
    {
        self.text_formatter = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for SetFilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetFilterParams")
            .field("case_sensitive", &self.case_sensitive)
            .field("text_formatter", &self.text_formatter.is_some())
            .finish()
    }
}
