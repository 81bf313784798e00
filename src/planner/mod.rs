//! Request planner - converts a grid request into a logical query plan.
//!
//! Planning runs in fixed steps:
//! 1. Grouping: header or leaf level, group-key bindings
//! 2. Aggregation and pivoting: the aggregated projection
//! 3. Filtering: WHERE and HAVING predicates
//! 4. Sorting, then assembly into a [`QueryPlan`]

pub mod aggregation;
pub mod assemble;
pub mod grouping;
pub mod logical;
pub mod pivot;
pub mod sort;
pub mod tree;

pub use aggregation::{AggregationRegistry, CustomAggregate, FirstLastPolicy, PlannedAggregate};
pub use assemble::{assemble, PlanParts};
pub use grouping::{GroupLevel, GroupingPlan};
pub use logical::{Predicate, ProjectionItem, QueryPlan, SortTerm, SourceRef, ValueExpr};
pub use pivot::{NoPivotValues, PivotPlan, PivotValueSource};
pub use sort::AUTO_GROUP_COLUMN;
pub use tree::TreePlanner;

use std::borrow::Cow;

use serde_json::Value as Json;

use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::filter::combinator::{and_all, or_all};
use crate::filter::{advanced, ExternalFilterHook, PredicateBuilder, QuickFilter, RecognizerChain};
use crate::registry::{ColumnDefinition, ColumnRegistry, FilterConfig};
use crate::request::GetRowsRequest;
use aggregation::AggregationPlanner;
use grouping::GroupingPlanner;
use pivot::{distinct_values_plan, PivotPlanner};
use sort::SortTranslator;

/// Alias of the count projected by count plans.
pub const ROW_COUNT: &str = "rowCount";

/// Everything a [`RequestPlanner`] reads. Borrowed from the engine.
#[derive(Clone, Copy)]
pub struct PlanContext<'a> {
    pub registry: &'a ColumnRegistry,
    pub recognizers: &'a RecognizerChain,
    pub aggregates: &'a AggregationRegistry,
    pub settings: &'a EngineSettings,
    pub source: &'a SourceRef,
    pub quick_filter: &'a QuickFilter,
    pub external_filter: Option<&'a ExternalFilterHook>,
}

/// Where a filter entry ended up.
enum FilterPart {
    Where(Predicate),
    Having(Predicate),
    Skipped,
}

/// State of pivot planning when filters are built.
#[derive(Clone, Copy)]
enum PivotScope<'s> {
    Off,
    /// Pivoting, but the pivot columns are not generated yet; result-field
    /// filters are skipped.
    Pending,
    Resolved(&'s PivotPlan),
}

#[derive(Clone, Copy)]
struct FilterScope<'s> {
    /// Rows are aggregated: group headers or pivot rows.
    header: bool,
    aggregates: &'s [PlannedAggregate],
    pivot: PivotScope<'s>,
}

impl FilterScope<'_> {
    /// Plain rows; every column filter lands in WHERE.
    fn rows(pivoting: bool) -> Self {
        FilterScope {
            header: false,
            aggregates: &[],
            pivot: if pivoting {
                PivotScope::Pending
            } else {
                PivotScope::Off
            },
        }
    }
}

struct Filters {
    predicate: Predicate,
    having: Predicate,
}

/// Main entry point for request planning.
pub struct RequestPlanner<'a> {
    ctx: PlanContext<'a>,
}

impl<'a> RequestPlanner<'a> {
    pub fn new(ctx: PlanContext<'a>) -> Self {
        Self { ctx }
    }

    /// Plan a request into a query plan.
    pub fn plan(
        &self,
        request: &GetRowsRequest,
        values: &dyn PivotValueSource,
    ) -> EngineResult<QueryPlan> {
        if self.ctx.settings.tree_data.enabled {
            return self.plan_tree(request);
        }
        let master = self.master_rows(request);
        let request: &GetRowsRequest = &master;
        let (limit, offset) = request.window()?;
        let pivoting = request.is_pivoting();

        // Step 1: grouping
        let grouping = GroupingPlanner::new(self.ctx.registry).plan(request, pivoting)?;
        let aggregating = grouping.is_header() || pivoting;

        // Step 2: aggregation and pivoting
        let aggregates = if aggregating {
            self.aggregation().plan(&request.value_cols)?
        } else {
            vec![]
        };
        let pivot = if pivoting {
            Some(self.pivot_plan(request, &aggregates, values)?)
        } else {
            None
        };

        // Step 3: filters
        let filters = self.filters(
            request,
            FilterScope {
                header: aggregating,
                aggregates: &aggregates,
                pivot: pivot.as_ref().map_or(PivotScope::Off, PivotScope::Resolved),
            },
        )?;

        let mut parts = PlanParts::new(self.ctx.source.clone());
        parts.group_level = grouping.level;
        parts.bindings = grouping.bindings;
        parts.filter = filters.predicate;
        parts.having = filters.having;
        parts.group_by = grouping.group_by;
        if aggregating {
            if grouping.level.is_some() {
                parts.child_count = self.child_count();
            }
            parts.aggregates = match &pivot {
                Some(pivot) => pivot
                    .columns
                    .iter()
                    .map(|c| ProjectionItem::new(c.expr.clone(), &c.alias))
                    .collect(),
                None => aggregates
                    .iter()
                    .map(|a| ProjectionItem::new(a.expr(), &a.field))
                    .collect(),
            };
        } else {
            parts.leaf_columns = grouping.leaf_columns;
        }
        parts.pivot_result_fields = pivot.map(|p| p.result_fields()).unwrap_or_default();

        // Step 4: sorting and assembly
        parts.order_by =
            SortTranslator::new(self.ctx.registry).translate(&request.sort_model, &parts.projection())?;
        parts.limit = limit;
        parts.offset = offset;

        Ok(assemble(parts))
    }

    /// Count the rows of a leaf request, or the groups at the counting level.
    ///
    /// The counting level is the root, or with `paginate_child_rows` the
    /// first unexpanded level. Pivot result-field filters don't apply.
    pub fn count(&self, request: &GetRowsRequest) -> EngineResult<QueryPlan> {
        if self.ctx.settings.tree_data.enabled {
            return self.count_tree(request);
        }
        let master = self.master_rows(request);
        let request: &GetRowsRequest = &master;
        let pivoting = request.is_pivoting();
        let grouping = GroupingPlanner::new(self.ctx.registry).plan(request, pivoting)?;
        let aggregating = grouping.is_header() || pivoting;
        let aggregates = if aggregating {
            self.aggregation().plan(&request.value_cols)?
        } else {
            vec![]
        };
        let filters = self.filters(
            request,
            FilterScope {
                header: aggregating,
                aggregates: &aggregates,
                pivot: if pivoting {
                    PivotScope::Pending
                } else {
                    PivotScope::Off
                },
            },
        )?;

        let mut parts = PlanParts::new(self.ctx.source.clone());
        parts.filter = filters.predicate;

        let depth = match grouping.level {
            Some(level) if !level.leaf && !grouping.group_by.is_empty() => {
                let depth = if self.ctx.settings.grouping.paginate_child_rows {
                    level.depth
                } else {
                    0
                };
                Some(depth.min(grouping.group_by.len() - 1))
            }
            _ => None,
        };

        let Some(depth) = depth else {
            parts.bindings = grouping.bindings;
            parts.aggregates = vec![ProjectionItem::new(ValueExpr::CountStar, ROW_COUNT)];
            return Ok(assemble(parts));
        };

        let mut bindings = grouping.bindings;
        bindings.truncate(depth);
        parts.bindings = bindings;
        parts.group_by = grouping.group_by[..=depth].to_vec();
        parts.having = filters.having;

        let mut plan = QueryPlan::over(assemble(parts));
        plan.projection = vec![ProjectionItem::new(ValueExpr::CountStar, ROW_COUNT)];
        Ok(plan)
    }

    /// `SELECT DISTINCT field ORDER BY field` for a set filter's value list.
    pub fn set_filter_values(&self, field: &str) -> EngineResult<QueryPlan> {
        let column = self.ctx.registry.require(field)?;
        if !column.is_filterable() {
            return Err(EngineError::ColumnNotFilterable {
                field: column.field.clone(),
            });
        }
        Ok(distinct_values_plan(
            self.ctx.source.clone(),
            &column.field,
            Predicate::True,
        ))
    }

    /// Distinct values of one pivot column under the request's filters.
    pub fn pivot_values(&self, request: &GetRowsRequest, field: &str) -> EngineResult<QueryPlan> {
        let master = self.master_rows(request);
        let request: &GetRowsRequest = &master;
        self.pivot_planner().pivot_columns(&[field])?;
        let filters = self.filters(request, FilterScope::rows(request.is_pivoting()))?;
        Ok(distinct_values_plan(
            self.ctx.source.clone(),
            field,
            filters.predicate,
        ))
    }

    /// Every problem with a request, in request order. Pivot values are not
    /// resolved, so result-field filters are not checked. Tree data requests
    /// report their first problem only.
    pub fn problems(&self, request: &GetRowsRequest) -> Vec<EngineError> {
        if self.ctx.settings.tree_data.enabled {
            return self.plan_tree(request).err().into_iter().collect();
        }
        let master = self.master_rows(request);
        let request: &GetRowsRequest = &master;
        let mut problems = vec![];
        if let Err(e) = request.window() {
            problems.push(e);
        }

        let pivoting = request.is_pivoting();
        let grouping = GroupingPlanner::new(self.ctx.registry)
            .plan(request, pivoting)
            .map_err(|e| problems.push(e))
            .ok();
        let aggregating = pivoting || grouping.as_ref().is_some_and(GroupingPlan::is_header);

        let mut aggregates = vec![];
        if aggregating {
            let planner = self.aggregation();
            for vo in &request.value_cols {
                match planner.resolve(vo) {
                    Ok(Some(agg)) => aggregates.push(agg),
                    Ok(None) => {}
                    Err(e) => problems.push(e),
                }
            }
        }
        if pivoting {
            let fields: Vec<&str> = request.pivot_cols.iter().map(|c| c.field()).collect();
            if let Err(e) = self.pivot_planner().pivot_columns(&fields) {
                problems.push(e);
            }
        }

        let scope = FilterScope {
            header: aggregating,
            aggregates: &aggregates,
            pivot: if pivoting {
                PivotScope::Pending
            } else {
                PivotScope::Off
            },
        };
        problems.extend(self.filter_parts(request, scope).into_iter().filter_map(Result::err));

        let mut visible: Vec<&str> = vec![];
        if let Some(grouping) = &grouping {
            visible.extend(grouping.group_by.iter().map(String::as_str));
            if aggregating {
                if !pivoting {
                    visible.extend(aggregates.iter().map(|a| a.field.as_str()));
                }
            } else {
                visible.extend(grouping.leaf_columns.iter().map(String::as_str));
            }
        }
        for item in &request.sort_model {
            if item.col_id == AUTO_GROUP_COLUMN {
                continue;
            }
            match self.ctx.registry.get(&item.col_id) {
                Some(column) if !column.sortable && visible.contains(&item.col_id.as_str()) => {
                    problems.push(EngineError::ColumnNotSortable {
                        field: column.field.clone(),
                    });
                }
                Some(_) => {}
                None if pivoting => {}
                None if aggregating
                    && self.ctx.settings.grouping.child_count_field.as_deref()
                        == Some(item.col_id.as_str()) => {}
                None => problems.push(EngineError::ColumnNotFound {
                    field: item.col_id.clone(),
                }),
            }
        }

        problems
    }

    // =========================================================================
    // Tree data
    // =========================================================================

    fn tree_planner(&self) -> TreePlanner<'a> {
        TreePlanner::new(
            self.ctx.registry,
            &self.ctx.settings.tree_data,
            self.ctx.source,
        )
    }

    /// Children of the last group key, or the roots. Row grouping and
    /// pivoting don't apply to tree data.
    fn plan_tree(&self, request: &GetRowsRequest) -> EngineResult<QueryPlan> {
        let (limit, offset) = request.window()?;
        let tree = self.tree_planner();
        let aggregates = self.aggregation().plan(&request.value_cols)?;
        let filter = self.filters(request, FilterScope::rows(false))?.predicate;
        let rollup_filter = if self.ctx.settings.grouping.defers_column_filters() {
            Predicate::True
        } else {
            filter.clone()
        };

        let mut parts = PlanParts::new(self.ctx.source.clone());
        parts.bindings = vec![tree.level(&request.group_keys)?];
        parts.filter = tree.filter(&request.group_keys, filter)?;
        parts.child_count = self
            .ctx
            .settings
            .grouping
            .child_count_field
            .as_deref()
            .map(|alias| tree.child_count(alias, &rollup_filter));
        parts.aggregates = std::iter::once(tree.group_flag())
            .chain(tree.rollups(&aggregates, &rollup_filter))
            .collect();
        parts.leaf_columns = tree.plain_columns(&aggregates);

        parts.order_by =
            SortTranslator::new(self.ctx.registry).translate(&request.sort_model, &parts.projection())?;
        parts.limit = limit;
        parts.offset = offset;
        Ok(assemble(parts))
    }

    /// Rows of the requested tree level.
    fn count_tree(&self, request: &GetRowsRequest) -> EngineResult<QueryPlan> {
        let tree = self.tree_planner();
        let filter = self.filters(request, FilterScope::rows(false))?.predicate;

        let mut parts = PlanParts::new(self.ctx.source.clone());
        parts.bindings = vec![tree.level(&request.group_keys)?];
        parts.filter = tree.filter(&request.group_keys, filter)?;
        parts.aggregates = vec![ProjectionItem::new(ValueExpr::CountStar, ROW_COUNT)];
        Ok(assemble(parts))
    }

    /// Master/detail grids don't pivot; master rows group like any others.
    fn master_rows<'r>(&self, request: &'r GetRowsRequest) -> Cow<'r, GetRowsRequest> {
        if !self.ctx.settings.master_detail.enabled || !request.pivot_mode {
            return Cow::Borrowed(request);
        }
        tracing::debug!("pivot mode ignored on a master/detail grid");
        Cow::Owned(GetRowsRequest {
            pivot_mode: false,
            ..request.clone()
        })
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn aggregation(&self) -> AggregationPlanner<'a> {
        AggregationPlanner::new(
            self.ctx.registry,
            self.ctx.aggregates,
            self.ctx.settings.aggregation.first_last,
            self.ctx.settings.source.dialect,
        )
    }

    fn pivot_planner(&self) -> PivotPlanner<'a> {
        PivotPlanner::new(
            self.ctx.registry,
            &self.ctx.settings.pivot.result_field_separator,
            self.ctx.settings.pivot.max_generated_columns,
        )
    }

    fn pivot_plan(
        &self,
        request: &GetRowsRequest,
        aggregates: &[PlannedAggregate],
        values: &dyn PivotValueSource,
    ) -> EngineResult<PivotPlan> {
        let filter = self.filters(request, FilterScope::rows(true))?.predicate;
        let fields: Vec<&str> = request.pivot_cols.iter().map(|c| c.field()).collect();
        self.pivot_planner().plan(&fields, aggregates, values, |field| {
            distinct_values_plan(self.ctx.source.clone(), field, filter.clone())
        })
    }

    fn child_count(&self) -> Option<ProjectionItem> {
        self.ctx
            .settings
            .grouping
            .child_count_field
            .as_deref()
            .map(|alias| ProjectionItem::new(ValueExpr::CountStar, alias))
    }

    fn filters(&self, request: &GetRowsRequest, scope: FilterScope<'_>) -> EngineResult<Filters> {
        let mut predicates = vec![];
        let mut having = vec![];
        for part in self.filter_parts(request, scope) {
            match part? {
                FilterPart::Where(p) => predicates.push(p),
                FilterPart::Having(p) => having.push(p),
                FilterPart::Skipped => {}
            }
        }
        Ok(Filters {
            predicate: and_all(predicates),
            having: and_all(having),
        })
    }

    /// Column filters, then the quick filter, then the external filter.
    fn filter_parts(
        &self,
        request: &GetRowsRequest,
        scope: FilterScope<'_>,
    ) -> Vec<EngineResult<FilterPart>> {
        let mut parts = vec![];
        let builder = PredicateBuilder::new(self.ctx.recognizers);

        match &request.filter_model {
            None | Some(Json::Null) => {}
            Some(tree) if self.ctx.settings.filtering.advanced_filter => {
                if scope.header && self.ctx.settings.grouping.defers_column_filters() {
                    tracing::debug!("advanced filter deferred to leaf level");
                } else {
                    parts.push(
                        advanced::build_tree(tree, self.ctx.registry, &builder)
                            .map(FilterPart::Where),
                    );
                }
            }
            Some(Json::Object(map)) if self.filters_group_aggregates(request, map, scope) => {
                for (col_id, raw) in map {
                    if !scope.aggregates.iter().any(|a| a.field == *col_id) {
                        parts.push(self.deferred_filter(col_id, raw));
                    }
                }
                parts.push(
                    self.group_aggregate_filter(&builder, request, map, scope)
                        .map(FilterPart::Where),
                );
            }
            Some(Json::Object(map)) => {
                for (col_id, raw) in map {
                    parts.push(self.column_filter(&builder, col_id, raw, scope));
                }
            }
            Some(_) => parts.push(Err(EngineError::MalformedRequest(
                "filterModel must be an object keyed by column".to_string(),
            ))),
        }

        if let Some(text) = &request.quick_filter {
            parts.push(Ok(FilterPart::Where(self.ctx.quick_filter.predicate(text))));
        }

        match (&request.external_filter, self.ctx.external_filter) {
            (None | Some(Json::Null), _) => {}
            (Some(raw), Some(hook)) => parts.push(hook(raw).map(FilterPart::Where)),
            (Some(_), None) => tracing::debug!("external filter ignored, no hook registered"),
        }

        parts
    }

    fn column_filter(
        &self,
        builder: &PredicateBuilder<'_>,
        col_id: &str,
        raw: &Json,
        scope: FilterScope<'_>,
    ) -> EngineResult<FilterPart> {
        let Some(column) = self.ctx.registry.get(col_id) else {
            return self.pivot_filter(builder, col_id, raw, scope);
        };
        let model = self.ctx.recognizers.recognize(raw, column)?;

        if scope.header && self.ctx.settings.grouping.defers_column_filters() {
            tracing::debug!(col_id, "column filter deferred to leaf level");
            return Ok(FilterPart::Skipped);
        }
        builder.build(&model, column).map(FilterPart::Where)
    }

    /// A filter checked for validity, then left for the leaf level.
    fn deferred_filter(&self, col_id: &str, raw: &Json) -> EngineResult<FilterPart> {
        let column = self.ctx.registry.require(col_id)?;
        self.ctx.recognizers.recognize(raw, column)?;
        tracing::debug!(col_id, "column filter deferred to leaf level");
        Ok(FilterPart::Skipped)
    }

    /// Group rows with unexpanded levels below them, under group aggregate
    /// filtering, while some value column is filtered.
    fn filters_group_aggregates(
        &self,
        request: &GetRowsRequest,
        map: &serde_json::Map<String, Json>,
        scope: FilterScope<'_>,
    ) -> bool {
        self.ctx.settings.grouping.group_agg_filtering
            && scope.header
            && matches!(scope.pivot, PivotScope::Off)
            && request.row_group_cols.len() > request.group_keys.len()
            && scope.aggregates.iter().any(|a| map.contains_key(&a.field))
    }

    /// Keeps a row when a leaf of its group passes the value column filters,
    /// or when the aggregates of any group the row belongs to, at any level,
    /// pass them.
    ///
    /// ```text
    /// EXISTS (leaf in the row's group at this level, filtered per row)
    /// OR EXISTS (level 1 group of the row, filtered on aggregates)
    /// OR ... one EXISTS per level
    /// ```
    fn group_aggregate_filter(
        &self,
        builder: &PredicateBuilder<'_>,
        request: &GetRowsRequest,
        map: &serde_json::Map<String, Json>,
        scope: FilterScope<'_>,
    ) -> EngineResult<Predicate> {
        let levels: Vec<&str> = request.row_group_cols.iter().map(|c| c.field()).collect();
        let source = self.ctx.source.unaliased();
        let same_group = |depth: usize| {
            and_all(
                levels[..depth]
                    .iter()
                    .map(|f| ValueExpr::column(f).eq(ValueExpr::outer(f))),
            )
        };

        let mut row_filters: Vec<Predicate> = vec![];
        let mut aggregate_filters = vec![];
        let mut filtered: Vec<&str> = vec![];
        for agg in scope.aggregates {
            let Some(raw) = map.get(&agg.field) else {
                continue;
            };
            let column = self.ctx.registry.require(&agg.field)?;
            let model = self.ctx.recognizers.recognize(raw, column)?;
            if !filtered.contains(&agg.field.as_str()) {
                filtered.push(&agg.field);
                row_filters.push(builder.build(&model, column)?);
            }
            aggregate_filters.push(builder.build_on(&model, column, agg.expr())?);
        }

        let mut leaf = QueryPlan::scan(source.clone());
        let depth = (request.group_keys.len() + 1).min(levels.len());
        leaf.predicate = and_all(std::iter::once(same_group(depth)).chain(row_filters));

        let mut any = vec![Predicate::exists(leaf)];
        for depth in 1..=levels.len() {
            let mut group = QueryPlan::scan(source.clone());
            group.predicate = same_group(depth);
            group.group_by = levels[..depth].iter().map(|f| f.to_string()).collect();
            group.having = Some(and_all(aggregate_filters.clone()));
            any.push(Predicate::exists(group));
        }
        Ok(or_all(any))
    }

    /// A filter keyed by a generated pivot field applies to that aggregate.
    fn pivot_filter(
        &self,
        builder: &PredicateBuilder<'_>,
        col_id: &str,
        raw: &Json,
        scope: FilterScope<'_>,
    ) -> EngineResult<FilterPart> {
        let not_found = || EngineError::ColumnNotFound {
            field: col_id.to_string(),
        };
        let pivot = match scope.pivot {
            PivotScope::Off => return Err(not_found()),
            PivotScope::Pending => {
                tracing::debug!(col_id, "pivot result filter skipped before pivot planning");
                return Ok(FilterPart::Skipped);
            }
            PivotScope::Resolved(pivot) => pivot,
        };
        let pivot_column = pivot.column(col_id).ok_or_else(not_found)?;
        let agg = scope
            .aggregates
            .iter()
            .find(|a| a.field == pivot_column.value_field)
            .ok_or_else(not_found)?;

        let value_column = self.ctx.registry.require(&pivot_column.value_field)?;
        let kind = self.ctx.aggregates.result_kind(&agg.func, value_column.kind);
        // a count over a text column is filtered as a number
        let stock = FilterConfig::for_kind(kind);
        let filter = match &value_column.filter {
            FilterConfig::None => FilterConfig::None,
            configured if configured.name() == stock.name() => configured.clone(),
            _ => stock,
        };
        let result = ColumnDefinition {
            field: col_id.to_string(),
            kind,
            filter,
            ..value_column.clone()
        };
        let model = self.ctx.recognizers.recognize(raw, &result)?;
        builder
            .build_on(&model, &result, pivot_column.expr.clone())
            .map(FilterPart::Having)
    }
}
