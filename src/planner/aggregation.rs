//! Aggregation of value columns on group header rows.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::planner::logical::{AggFunc, ValueExpr};
use crate::registry::{ColumnDefinition, ColumnRegistry, DataKind};
use crate::request::ColumnVO;
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::value::Value;

/// How `first`/`last` are planned on dialects without ordered FIRST/LAST
/// aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirstLastPolicy {
    /// Fail with `UnsupportedAggregation`.
    #[default]
    Reject,
    /// Drop the value column and log a warning.
    Omit,
    /// Emit FIRST()/LAST() regardless of the dialect.
    Native,
}

/// Reduces the values of one group, for in-memory execution.
pub type ReduceFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// A caller-registered aggregate. Its SQL form is `NAME(arg)` where `NAME`
/// is the registered name.
#[derive(Clone)]
pub struct CustomAggregate {
    /// Kinds the aggregate accepts; `None` accepts any kind.
    pub accepts: Option<Vec<DataKind>>,
    /// Kind of the aggregate's result; `None` keeps the input kind.
    pub result_kind: Option<DataKind>,
    pub reduce: Option<ReduceFn>,
}

impl CustomAggregate {
    pub fn new() -> Self {
        Self {
            accepts: None,
            result_kind: None,
            reduce: None,
        }
    }

    pub fn accepts(mut self, kinds: &[DataKind]) -> Self {
        self.accepts = Some(kinds.to_vec());
        self
    }

    pub fn result_kind(mut self, kind: DataKind) -> Self {
        self.result_kind = Some(kind);
        self
    }

    pub fn reduce<F>(mut self, f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        self.reduce = Some(Arc::new(f));
        self
    }

    pub fn accepts_kind(&self, kind: DataKind) -> bool {
        self.accepts.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

impl Default for CustomAggregate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CustomAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAggregate")
            .field("accepts", &self.accepts)
            .field("result_kind", &self.result_kind)
            .field("reduce", &self.reduce.is_some())
            .finish()
    }
}

/// Custom aggregates by name.
#[derive(Debug, Clone, Default)]
pub struct AggregationRegistry {
    custom: HashMap<String, CustomAggregate>,
}

impl AggregationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, aggregate: CustomAggregate) {
        self.custom.insert(name.to_string(), aggregate);
    }

    pub fn get(&self, name: &str) -> Option<&CustomAggregate> {
        self.custom.get(name)
    }

    /// Kind of `func` applied to a column of `input` kind.
    pub fn result_kind(&self, func: &AggFunc, input: DataKind) -> DataKind {
        match func {
            AggFunc::Sum | AggFunc::Avg | AggFunc::Count => DataKind::Number,
            AggFunc::Min | AggFunc::Max | AggFunc::First | AggFunc::Last => input,
            AggFunc::Custom(name) => self
                .get(name)
                .and_then(|c| c.result_kind)
                .unwrap_or(input),
        }
    }
}

/// A value column resolved to its aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedAggregate {
    pub field: String,
    pub func: AggFunc,
}

impl PlannedAggregate {
    /// The aggregate over the column itself.
    pub fn expr(&self) -> ValueExpr {
        self.over(ValueExpr::column(&self.field))
    }

    /// The aggregate over another argument, e.g. a pivot CASE.
    pub fn over(&self, arg: ValueExpr) -> ValueExpr {
        ValueExpr::aggregate(self.func.clone(), arg)
    }
}

pub struct AggregationPlanner<'a> {
    registry: &'a ColumnRegistry,
    aggregates: &'a AggregationRegistry,
    policy: FirstLastPolicy,
    dialect: Dialect,
}

impl<'a> AggregationPlanner<'a> {
    pub fn new(
        registry: &'a ColumnRegistry,
        aggregates: &'a AggregationRegistry,
        policy: FirstLastPolicy,
        dialect: Dialect,
    ) -> Self {
        Self {
            registry,
            aggregates,
            policy,
            dialect,
        }
    }

    /// Resolve value columns in request order. Columns dropped under
    /// [`FirstLastPolicy::Omit`] are left out.
    pub fn plan(&self, value_cols: &[ColumnVO]) -> EngineResult<Vec<PlannedAggregate>> {
        let mut planned = Vec::with_capacity(value_cols.len());
        for vo in value_cols {
            if let Some(agg) = self.resolve(vo)? {
                planned.push(agg);
            }
        }
        Ok(planned)
    }

    pub fn resolve(&self, vo: &ColumnVO) -> EngineResult<Option<PlannedAggregate>> {
        let column = self.registry.require(vo.field())?;
        let name = vo.agg_func.as_deref().ok_or_else(|| {
            EngineError::MalformedRequest(format!("value column '{}' has no aggFunc", column.field))
        })?;
        let func = AggFunc::parse(name);
        let unsupported = |reason: &str| EngineError::UnsupportedAggregation {
            field: column.field.clone(),
            func: name.to_string(),
            reason: reason.to_string(),
        };

        if !column.aggregable {
            return Err(unsupported("column is not aggregable"));
        }
        if let Some(allowed) = &column.allowed_agg_funcs {
            if !allowed.iter().any(|a| a == name) {
                return Err(unsupported("function is not allowed for this column"));
            }
        }
        self.check_kind(&func, column)
            .map_err(|reason| unsupported(&reason))?;

        if matches!(func, AggFunc::First | AggFunc::Last)
            && !self.dialect.supports_first_last_aggregates()
        {
            match self.policy {
                FirstLastPolicy::Native => {}
                FirstLastPolicy::Reject => {
                    return Err(unsupported(&format!(
                        "{} has no ordered {} aggregate",
                        self.dialect, func
                    )))
                }
                FirstLastPolicy::Omit => {
                    tracing::warn!(
                        field = %column.field,
                        func = %func,
                        dialect = %self.dialect,
                        "omitting value column, dialect has no ordered first/last"
                    );
                    return Ok(None);
                }
            }
        }

        Ok(Some(PlannedAggregate {
            field: column.field.clone(),
            func,
        }))
    }

    fn check_kind(&self, func: &AggFunc, column: &ColumnDefinition) -> Result<(), String> {
        let kind = column.kind;
        let ok = match func {
            AggFunc::Count => true,
            AggFunc::Sum | AggFunc::Avg => kind == DataKind::Number,
            AggFunc::Min | AggFunc::Max => kind.is_orderable(),
            AggFunc::First | AggFunc::Last => kind != DataKind::Custom,
            AggFunc::Custom(name) => {
                let custom = self
                    .aggregates
                    .get(name)
                    .ok_or_else(|| "unknown aggregate function".to_string())?;
                custom.accepts_kind(kind)
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("not applicable to {:?} columns", kind))
        }
    }
}
