//! Logical query plan.

use std::fmt;

use super::expr::{Predicate, ValueExpr};
use crate::planner::grouping::GroupLevel;
use crate::sql::dialect::Dialect;

/// Alias of a source whose rows correlated subqueries read through
/// [`ValueExpr::Outer`].
pub const OUTER_ALIAS: &str = "src";

/// The row source a plan reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub schema: Option<String>,
    pub table: String,
    pub alias: Option<String>,
}

impl SourceRef {
    pub fn new(table: &str) -> Self {
        Self {
            schema: None,
            table: table.to_string(),
            alias: None,
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// Name the source [`OUTER_ALIAS`] so subqueries can correlate on it.
    pub fn correlated(mut self) -> Self {
        self.alias = Some(OUTER_ALIAS.to_string());
        self
    }

    /// The same source without an alias, for a subquery over it.
    pub fn unaliased(&self) -> Self {
        Self {
            alias: None,
            ..self.clone()
        }
    }
}

/// A projected output column.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionItem {
    pub expr: ValueExpr,
    pub alias: String,
}

impl ProjectionItem {
    pub fn new(expr: ValueExpr, alias: &str) -> Self {
        Self {
            expr,
            alias: alias.to_string(),
        }
    }

    /// Plain column projected under its own name.
    pub fn column(field: &str) -> Self {
        Self::new(ValueExpr::column(field), field)
    }
}

/// ORDER BY term. `key` names the output column the term sorts on.
#[derive(Debug, Clone, PartialEq)]
pub struct SortTerm {
    pub key: String,
    pub expr: ValueExpr,
    pub descending: bool,
}

/// A translated request: a single SELECT over one source.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub source: SourceRef,
    /// Read the rows of this plan instead of `source`.
    pub derived: Option<Box<QueryPlan>>,
    pub distinct: bool,
    pub projection: Vec<ProjectionItem>,
    pub predicate: Predicate,
    pub group_by: Vec<String>,
    pub having: Option<Predicate>,
    pub order_by: Vec<SortTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Grouping depth this plan answers, when row grouping is active.
    pub group_level: Option<GroupLevel>,
    /// Aliases of generated pivot columns, in projection order.
    pub pivot_result_fields: Vec<String>,
    pub child_count_alias: Option<String>,
}

impl QueryPlan {
    /// An unfiltered, unprojected plan over `source`.
    pub fn scan(source: SourceRef) -> Self {
        Self {
            source,
            derived: None,
            distinct: false,
            projection: vec![],
            predicate: Predicate::True,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            group_level: None,
            pivot_result_fields: vec![],
            child_count_alias: None,
        }
    }

    /// A plan over the output rows of `inner`.
    pub fn over(inner: QueryPlan) -> Self {
        let mut plan = Self::scan(inner.source.clone());
        plan.derived = Some(Box::new(inner));
        plan
    }

    pub fn projected_aliases(&self) -> impl Iterator<Item = &str> {
        self.projection.iter().map(|p| p.alias.as_str())
    }

    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
    }

    /// Diagnostic SQL for a dialect.
    pub fn to_sql(&self, dialect: Dialect) -> String {
        self.to_query().to_sql(dialect)
    }
}

impl fmt::Display for QueryPlan {
    /// Formats the plan as DuckDB SQL.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_sql(Dialect::default()))
    }
}
