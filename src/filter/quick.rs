//! Quick filter: a free-text search across a fixed set of columns.
//!
//! The search text splits on whitespace unless a parser is set. Every word
//! must be contained in at least one searched column, so words AND together
//! and columns OR together. A text formatter, when set, rewrites both the
//! searched column and the word before they are compared.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::filter::combinator::{and_all, or_all};
use crate::planner::logical::{escape_like, Predicate, ValueExpr};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Replaces the default word matching. Receives the parsed words.
pub type QuickFilterMatcher = Arc<dyn Fn(&[String]) -> Predicate + Send + Sync>;

/// Replaces [`parse_words`].
pub type QuickFilterParser = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

/// Rewrites a searched column or word expression, e.g. to strip accents.
pub type QuickFilterFormatter = Arc<dyn Fn(ValueExpr) -> ValueExpr + Send + Sync>;

/// Split search text into words. Blank input yields no words.
pub fn parse_words(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return vec![];
    }
    WHITESPACE.split(trimmed).map(str::to_string).collect()
}

#[derive(Clone, Default)]
pub struct QuickFilter {
    pub fields: Vec<String>,
    pub case_sensitive: bool,
    pub trim_input: bool,
    pub matcher: Option<QuickFilterMatcher>,
    pub parser: Option<QuickFilterParser>,
    pub formatter: Option<QuickFilterFormatter>,
}

impl QuickFilter {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            ..Default::default()
        }
    }

    pub fn case_sensitive(mut self, yes: bool) -> Self {
        self.case_sensitive = yes;
        self
    }

    pub fn trim_input(mut self, yes: bool) -> Self {
        self.trim_input = yes;
        self
    }

    pub fn matcher<F>(mut self, f: F) -> Self
    where
        F: Fn(&[String]) -> Predicate + Send + Sync + 'static,
    {
        self.matcher = Some(Arc::new(f));
        self
    }

    pub fn parser<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.parser = Some(Arc::new(f));
        self
    }

    pub fn formatter<F>(mut self, f: F) -> Self
    where
        F: Fn(ValueExpr) -> ValueExpr + Send + Sync + 'static,
    {
        self.formatter = Some(Arc::new(f));
        self
    }

    pub fn words(&self, input: &str) -> Vec<String> {
        match &self.parser {
            Some(parser) => parser(input),
            None => parse_words(input),
        }
    }

    /// Predicate for the search text; TRUE when there is nothing to search.
    pub fn predicate(&self, input: &str) -> Predicate {
        let words = self.words(input);
        if words.is_empty() {
            return Predicate::True;
        }
        if let Some(matcher) = &self.matcher {
            return matcher(&words);
        }
        if self.fields.is_empty() {
            tracing::debug!("quick filter ignored, no searchable fields configured");
            return Predicate::True;
        }

        and_all(words.iter().map(|word| {
            let pattern = self.pattern(word);
            or_all(self.fields.iter().map(|field| Predicate::Like {
                expr: self.column(field),
                pattern: pattern.clone(),
                negated: false,
            }))
        }))
    }

    fn fold(&self, word: &str) -> String {
        let word = if self.trim_input { word.trim() } else { word };
        if self.case_sensitive {
            word.to_string()
        } else {
            word.to_lowercase()
        }
    }

    /// `%word%`; with a formatter, `CONCAT('%', format(word), '%')`.
    fn pattern(&self, word: &str) -> ValueExpr {
        let word = escape_like(&self.fold(word));
        match &self.formatter {
            None => ValueExpr::text(&format!("%{}%", word)),
            Some(format) => ValueExpr::func(
                "CONCAT",
                vec![
                    ValueExpr::text("%"),
                    format(ValueExpr::text(&word)),
                    ValueExpr::text("%"),
                ],
            ),
        }
    }

    fn column(&self, field: &str) -> ValueExpr {
        let mut expr = ValueExpr::column(field);
        if self.trim_input {
            expr = expr.trim();
        }
        if !self.case_sensitive {
            expr = expr.lower();
        }
        match &self.formatter {
            Some(format) => format(expr),
            None => expr,
        }
    }
}

impl fmt::Debug for QuickFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuickFilter")
            .field("fields", &self.fields)
            .field("case_sensitive", &self.case_sensitive)
            .field("trim_input", &self.trim_input)
            .field("matcher", &self.matcher.is_some())
            .field("parser", &self.parser.is_some())
            .field("formatter", &self.formatter.is_some())
            .finish()
    }
}
