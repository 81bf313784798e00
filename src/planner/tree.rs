//! Tree data: rows nest through a parent id column.
//!
//! The group keys of a tree request are the ids along the expanded path. A
//! plan returns the children of the last id, or the root rows when the path
//! is empty. Every row carries a has-children flag; on rows with children,
//! value columns are aggregated over all descendants, found through the
//! materialized path column.
//!
//! Under a filter a row is kept when it passes, when a descendant passes, or
//! when an ancestor on the expanded path passes:
//!
//! ```text
//! WHERE parent_id = <last key>
//!   AND (EXISTS (ancestor on the path, filtered)
//!        OR <filter>
//!        OR EXISTS (descendant, filtered))
//! ```

use serde_json::Value as Json;

use crate::config::TreeDataSettings;
use crate::error::EngineResult;
use crate::filter::combinator::{and_all, or_all};
use crate::planner::aggregation::PlannedAggregate;
use crate::planner::logical::{
    escape_like, Predicate, ProjectionItem, QueryPlan, SourceRef, ValueExpr,
};
use crate::registry::{ColumnDefinition, ColumnRegistry};
use crate::value::Value;

pub struct TreePlanner<'a> {
    registry: &'a ColumnRegistry,
    settings: &'a TreeDataSettings,
    source: &'a SourceRef,
}

impl<'a> TreePlanner<'a> {
    pub fn new(
        registry: &'a ColumnRegistry,
        settings: &'a TreeDataSettings,
        source: &'a SourceRef,
    ) -> Self {
        Self {
            registry,
            settings,
            source,
        }
    }

    /// The id, parent id and path columns must be registered.
    pub fn check(&self) -> EngineResult<()> {
        self.primary()?;
        self.parent()?;
        self.registry.require(&self.settings.data_path_field)?;
        Ok(())
    }

    /// `parent_id IS NULL` at the root, `parent_id = <last key>` below it.
    pub fn level(&self, keys: &[Json]) -> EngineResult<Predicate> {
        let parent = self.parent()?;
        let column = ValueExpr::column(&parent.field);
        Ok(match keys.last() {
            None => column.is_null(),
            Some(key) => column.eq_value(&Value::coerce(key, parent.kind, &parent.field)?),
        })
    }

    /// Narrow a level to rows that pass `filter` themselves, through a
    /// descendant, or through an ancestor on the expanded path. A true filter
    /// keeps the whole level.
    pub fn filter(&self, keys: &[Json], filter: Predicate) -> EngineResult<Predicate> {
        if filter.is_true() {
            return Ok(Predicate::True);
        }

        let ancestors = if keys.is_empty() {
            Predicate::False
        } else {
            let primary = self.primary()?;
            let ids = keys
                .iter()
                .map(|key| {
                    let id = Value::coerce(key, primary.kind, &primary.field)?;
                    Ok(ValueExpr::column(&primary.field).eq_value(&id))
                })
                .collect::<EngineResult<Vec<_>>>()?;
            let mut ancestor = QueryPlan::scan(self.source.unaliased());
            ancestor.predicate = and_all([or_all(ids), filter.clone()]);
            Predicate::exists(ancestor)
        };

        let descendant = Predicate::exists(self.descendants(filter.clone()));
        Ok(or_all([ancestors, filter, descendant]))
    }

    /// Whether any row names the enclosing row as its parent.
    pub fn has_children(&self) -> Predicate {
        let mut children = QueryPlan::scan(self.source.unaliased());
        children.predicate = ValueExpr::column(&self.settings.parent_id_field)
            .eq(ValueExpr::outer(&self.settings.primary_field));
        Predicate::exists(children)
    }

    /// The has-children flag, projected under its configured alias.
    pub fn group_flag(&self) -> ProjectionItem {
        let flag = ValueExpr::when(self.has_children(), ValueExpr::lit(Value::Bool(true)))
            .otherwise(ValueExpr::lit(Value::Bool(false)));
        ProjectionItem::new(flag, &self.settings.is_server_side_group_field)
    }

    /// Registry columns that aren't aggregated, in registry order.
    pub fn plain_columns(&self, aggregates: &[PlannedAggregate]) -> Vec<String> {
        self.registry
            .columns()
            .iter()
            .filter(|c| !aggregates.iter().any(|a| a.field == c.field))
            .map(|c| c.field.clone())
            .collect()
    }

    /// Each value column aggregated over the descendants passing `filter`
    /// on rows with children, the row's own value otherwise.
    pub fn rollups(&self, aggregates: &[PlannedAggregate], filter: &Predicate) -> Vec<ProjectionItem> {
        aggregates
            .iter()
            .map(|agg| {
                let mut rollup = self.descendants(filter.clone());
                rollup.projection = vec![ProjectionItem::new(agg.expr(), &agg.field)];
                let expr = ValueExpr::when(
                    self.has_children(),
                    ValueExpr::Subquery(Box::new(rollup)),
                )
                .otherwise(ValueExpr::column(&agg.field));
                ProjectionItem::new(expr, &agg.field)
            })
            .collect()
    }

    /// Descendants passing `filter`, counted on rows with children; null on
    /// the others.
    pub fn child_count(&self, alias: &str, filter: &Predicate) -> ProjectionItem {
        let mut count = self.descendants(filter.clone());
        count.projection = vec![ProjectionItem::new(ValueExpr::CountStar, alias)];
        let expr = ValueExpr::when(self.has_children(), ValueExpr::Subquery(Box::new(count)));
        ProjectionItem::new(expr, alias)
    }

    /// Rows under the enclosing row: their path extends its path.
    fn descendants(&self, filter: Predicate) -> QueryPlan {
        let path = &self.settings.data_path_field;
        let below = Predicate::Like {
            expr: ValueExpr::column(path),
            pattern: ValueExpr::func(
                "CONCAT",
                vec![
                    ValueExpr::outer(path),
                    ValueExpr::text(&format!(
                        "{}%",
                        escape_like(&self.settings.data_path_separator)
                    )),
                ],
            ),
            negated: false,
        };
        let mut plan = QueryPlan::scan(self.source.unaliased());
        plan.predicate = and_all([below, filter]);
        plan
    }

    fn primary(&self) -> EngineResult<&'a ColumnDefinition> {
        self.registry.require(&self.settings.primary_field)
    }

    fn parent(&self) -> EngineResult<&'a ColumnDefinition> {
        self.registry.require(&self.settings.parent_id_field)
    }
}
