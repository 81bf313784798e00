//! Final assembly of a [`QueryPlan`] from the planning steps' outputs.

use crate::filter::combinator::and_all;
use crate::planner::grouping::GroupLevel;
use crate::planner::logical::{Predicate, ProjectionItem, QueryPlan, SortTerm, SourceRef};

/// Everything the planning steps produced for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanParts {
    pub source: SourceRef,
    pub group_level: Option<GroupLevel>,
    /// Group-key bindings, in key order.
    pub bindings: Vec<Predicate>,
    pub filter: Predicate,
    pub group_by: Vec<String>,
    pub child_count: Option<ProjectionItem>,
    /// Plain or pivot aggregates, in output order.
    pub aggregates: Vec<ProjectionItem>,
    pub leaf_columns: Vec<String>,
    pub having: Predicate,
    pub order_by: Vec<SortTerm>,
    pub pivot_result_fields: Vec<String>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl PlanParts {
    pub fn new(source: SourceRef) -> Self {
        Self {
            source,
            group_level: None,
            bindings: vec![],
            filter: Predicate::True,
            group_by: vec![],
            child_count: None,
            aggregates: vec![],
            leaf_columns: vec![],
            having: Predicate::True,
            order_by: vec![],
            pivot_result_fields: vec![],
            limit: None,
            offset: 0,
        }
    }

    /// Grouped columns, then the child count and aggregates, then plain leaf
    /// columns.
    pub fn projection(&self) -> Vec<ProjectionItem> {
        self.group_by
            .iter()
            .map(|f| ProjectionItem::column(f))
            .chain(self.child_count.iter().cloned())
            .chain(self.aggregates.iter().cloned())
            .chain(self.leaf_columns.iter().map(|f| ProjectionItem::column(f)))
            .collect()
    }

    /// The WHERE predicate: bindings first, then the filter.
    pub fn predicate(&self) -> Predicate {
        and_all(
            self.bindings
                .iter()
                .cloned()
                .chain(std::iter::once(self.filter.clone())),
        )
    }
}

/// Build the plan. A source read by correlated subqueries gets the outer
/// alias.
pub fn assemble(parts: PlanParts) -> QueryPlan {
    let projection = parts.projection();
    let predicate = parts.predicate();
    let having = Some(parts.having).filter(|h| !h.is_true());
    let correlated =
        predicate.has_subquery() || projection.iter().any(|p| p.expr.has_subquery());

    QueryPlan {
        source: if correlated {
            parts.source.correlated()
        } else {
            parts.source
        },
        derived: None,
        distinct: false,
        projection,
        predicate,
        group_by: parts.group_by,
        having,
        order_by: parts.order_by,
        limit: parts.limit,
        offset: Some(parts.offset).filter(|o| *o > 0),
        group_level: parts.group_level,
        pivot_result_fields: parts.pivot_result_fields,
        child_count_alias: parts.child_count.map(|c| c.alias),
    }
}
