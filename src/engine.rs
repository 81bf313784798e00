//! The translation engine.
//!
//! An [`Engine`] owns the column registry, filter recognizers, custom
//! aggregates and settings. It is immutable once built and can be shared
//! across threads by reference.

use std::sync::Arc;

use crate::config::EngineSettings;
use crate::error::{EngineError, EngineResult};
use crate::filter::{CustomRecognizer, ExternalFilterHook, QuickFilter, RecognizerChain};
use crate::planner::logical::{Predicate, QueryPlan, SourceRef, ValueExpr};
use crate::planner::{
    AggregationRegistry, CustomAggregate, NoPivotValues, PivotValueSource, PlanContext,
    ProjectionItem, RequestPlanner, TreePlanner,
};
use crate::registry::ColumnRegistry;
use crate::request::GetRowsRequest;
use crate::rows::MASTER_ID;
use crate::value::Value;

pub struct Engine {
    registry: ColumnRegistry,
    recognizers: RecognizerChain,
    aggregates: AggregationRegistry,
    settings: EngineSettings,
    source: SourceRef,
    /// Detail table, when master/detail is enabled.
    detail_source: Option<SourceRef>,
    quick_filter: QuickFilter,
    external_filter: Option<ExternalFilterHook>,
}

impl Engine {
    pub fn builder(registry: ColumnRegistry) -> EngineBuilder {
        EngineBuilder::new(registry)
    }

    pub fn registry(&self) -> &ColumnRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn aggregates(&self) -> &AggregationRegistry {
        &self.aggregates
    }

    /// Translate a request. `values` resolves pivot columns without a
    /// declared domain.
    pub fn translate(
        &self,
        request: &GetRowsRequest,
        values: &dyn PivotValueSource,
    ) -> EngineResult<QueryPlan> {
        let span = tracing::debug_span!(
            "translate",
            group_level = request.group_keys.len(),
            pivot = request.is_pivoting()
        );
        let _enter = span.enter();

        let plan = self.planner().plan(request, values)?;
        tracing::debug!(sql = %plan, "planned query");
        Ok(plan)
    }

    /// Translate a request that doesn't pivot, or whose pivot columns all
    /// declare a domain.
    pub fn translate_without_pivot_values(&self, request: &GetRowsRequest) -> EngineResult<QueryPlan> {
        self.translate(request, &NoPivotValues)
    }

    /// Row or group count for the request's level; the count is projected as
    /// [`ROW_COUNT`](crate::planner::ROW_COUNT).
    pub fn count_plan(&self, request: &GetRowsRequest) -> EngineResult<QueryPlan> {
        let plan = self.planner().count(request)?;
        tracing::debug!(sql = %plan, "planned count");
        Ok(plan)
    }

    pub fn set_filter_values_plan(&self, field: &str) -> EngineResult<QueryPlan> {
        self.planner().set_filter_values(field)
    }

    pub fn pivot_values_plan(
        &self,
        request: &GetRowsRequest,
        pivot_field: &str,
    ) -> EngineResult<QueryPlan> {
        self.planner().pivot_values(request, pivot_field)
    }

    /// The first problem with a request.
    pub fn validate(&self, request: &GetRowsRequest) -> EngineResult<()> {
        match self.problems(request).into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn problems(&self, request: &GetRowsRequest) -> Vec<EngineError> {
        self.planner().problems(request)
    }

    /// Detail rows of one master row, matched on the master's primary field.
    pub fn detail_plan(&self, master_row: &serde_json::Value) -> EngineResult<QueryPlan> {
        let id = self.master_id(master_row)?;
        let mut plan = self.detail_scan()?;
        plan.predicate =
            ValueExpr::column(&self.settings.master_detail.detail_master_id_field).eq_value(&id);
        tracing::debug!(sql = %plan, "planned detail rows");
        Ok(plan)
    }

    /// Detail rows of a page of master rows in one query. The master id is
    /// projected as [`MASTER_ID`] for
    /// [`LoadSuccess::attach_details`](crate::rows::LoadSuccess::attach_details).
    pub fn detail_rows_plan(&self, master_rows: &[serde_json::Value]) -> EngineResult<QueryPlan> {
        let mut ids: Vec<Value> = Vec::with_capacity(master_rows.len());
        for row in master_rows {
            let id = self.master_id(row)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let detail = &self.settings.master_detail;
        let mut plan = self.detail_scan()?;
        plan.projection.push(ProjectionItem::new(
            ValueExpr::column(&detail.detail_master_id_field),
            MASTER_ID,
        ));
        plan.predicate = if ids.is_empty() {
            Predicate::False
        } else {
            Predicate::InList {
                expr: ValueExpr::column(&detail.detail_master_id_field),
                values: ids,
                negated: false,
            }
        };
        tracing::debug!(sql = %plan, masters = master_rows.len(), "planned detail rows");
        Ok(plan)
    }

    fn detail_scan(&self) -> EngineResult<QueryPlan> {
        let source = self
            .detail_source
            .clone()
            .ok_or(EngineError::MasterDetailDisabled)?;
        let mut plan = QueryPlan::scan(source);
        plan.projection = self
            .settings
            .master_detail
            .detail_columns
            .iter()
            .map(|c| ProjectionItem::column(c))
            .collect();
        Ok(plan)
    }

    /// The master row's primary value, typed like the master column.
    fn master_id(&self, master_row: &serde_json::Value) -> EngineResult<Value> {
        if self.detail_source.is_none() {
            return Err(EngineError::MasterDetailDisabled);
        }
        let field = &self.settings.master_detail.primary_field;
        let column = self.registry.require(field)?;
        match master_row.get(field) {
            None | Some(serde_json::Value::Null) => Err(EngineError::MalformedRequest(format!(
                "master row has no value for primary field '{}'",
                field
            ))),
            Some(raw) => Value::coerce(raw, column.kind, &column.field),
        }
    }

    fn planner(&self) -> RequestPlanner<'_> {
        RequestPlanner::new(PlanContext {
            registry: &self.registry,
            recognizers: &self.recognizers,
            aggregates: &self.aggregates,
            settings: &self.settings,
            source: &self.source,
            quick_filter: &self.quick_filter,
            external_filter: self.external_filter.as_ref(),
        })
    }
}

/// Builder for [`Engine`]. Hooks registered here are frozen by `build()`.
pub struct EngineBuilder {
    registry: ColumnRegistry,
    recognizers: RecognizerChain,
    aggregates: AggregationRegistry,
    settings: EngineSettings,
    /// Quick filter hooks; fields and flags come from the settings.
    quick_filter: QuickFilter,
    external_filter: Option<ExternalFilterHook>,
}

impl EngineBuilder {
    pub fn new(registry: ColumnRegistry) -> Self {
        Self {
            registry,
            recognizers: RecognizerChain::new(),
            aggregates: AggregationRegistry::new(),
            settings: EngineSettings::default(),
            quick_filter: QuickFilter::default(),
            external_filter: None,
        }
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn register_recognizer(mut self, recognizer: CustomRecognizer) -> Self {
        self.recognizers.register(recognizer);
        self
    }

    pub fn register_aggregate(mut self, name: &str, aggregate: CustomAggregate) -> Self {
        self.aggregates.register(name, aggregate);
        self
    }

    pub fn external_filter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&serde_json::Value) -> EngineResult<Predicate> + Send + Sync + 'static,
    {
        self.external_filter = Some(Arc::new(hook));
        self
    }

    pub fn quick_filter_matcher<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> Predicate + Send + Sync + 'static,
    {
        self.quick_filter = self.quick_filter.matcher(matcher);
        self
    }

    /// Split quick filter text into words; whitespace splitting otherwise.
    pub fn quick_filter_parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        self.quick_filter = self.quick_filter.parser(parser);
        self
    }

    /// Rewrite both sides of every quick filter comparison.
    pub fn quick_filter_text_formatter<F>(mut self, formatter: F) -> Self
    where
        F: Fn(ValueExpr) -> ValueExpr + Send + Sync + 'static,
    {
        self.quick_filter = self.quick_filter.formatter(formatter);
        self
    }

    /// Validate settings against the registry and freeze the engine.
    pub fn build(self) -> EngineResult<Engine> {
        self.settings.validate()?;
        let (table, schema) = self.settings.resolved_source()?;
        let mut source = SourceRef::new(&table);
        if let Some(schema) = schema {
            source = source.with_schema(&schema);
        }

        if self.settings.tree_data.enabled {
            TreePlanner::new(&self.registry, &self.settings.tree_data, &source).check()?;
        }
        let detail_source = if self.settings.master_detail.enabled {
            self.registry.require(&self.settings.master_detail.primary_field)?;
            let (table, schema) = self.settings.resolved_detail_source()?;
            let mut detail = SourceRef::new(&table);
            if let Some(schema) = schema {
                detail = detail.with_schema(&schema);
            }
            Some(detail)
        } else {
            None
        };

        let filtering = &self.settings.filtering;
        for field in &filtering.quick_filter_fields {
            self.registry.require(field)?;
        }
        let quick_filter = QuickFilter {
            fields: filtering.quick_filter_fields.clone(),
            case_sensitive: filtering.quick_filter_case_sensitive,
            trim_input: filtering.quick_filter_trim_input,
            ..self.quick_filter
        };

        Ok(Engine {
            registry: self.registry,
            recognizers: self.recognizers,
            aggregates: self.aggregates,
            settings: self.settings,
            source,
            detail_source,
            quick_filter,
            external_filter: self.external_filter,
        })
    }
}
