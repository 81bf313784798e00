//! Column registry: static metadata per queryable field.
//!
//! A registry is built once through [`ColumnRegistryBuilder`] and is
//! immutable afterwards. Registry order is the projection order of leaf rows.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::filter::model::FilterKind;
use crate::filter::params::{
    DateFilterParams, NumberFilterParams, SetFilterParams, TextFilterParams,
};
use crate::value::Value;

/// Native data kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Text,
    Number,
    /// Calendar date.
    Date,
    /// Date stored as ISO `yyyy-MM-dd` text.
    DateString,
    Boolean,
    Custom,
}

impl DataKind {
    /// Whether MIN/MAX are meaningful.
    pub fn is_orderable(self) -> bool {
        matches!(
            self,
            DataKind::Number | DataKind::Date | DataKind::DateString | DataKind::Text
        )
    }
}

/// The filter configured on a column, carrying its default parameters.
#[derive(Debug, Clone, Default)]
pub enum FilterConfig {
    /// Not filterable.
    #[default]
    None,
    Text(TextFilterParams),
    Number(NumberFilterParams),
    Date(DateFilterParams),
    Set(SetFilterParams),
    /// Sub-filters by position, matching the positions of a multi model.
    Multi(Vec<FilterConfig>),
    /// Routed to the custom recognizer registered under `tag`.
    Custom { tag: String },
}

impl FilterConfig {
    /// The stock filter for a data kind.
    pub fn for_kind(kind: DataKind) -> FilterConfig {
        match kind {
            DataKind::Text => FilterConfig::Text(TextFilterParams::default()),
            DataKind::Number => FilterConfig::Number(NumberFilterParams::default()),
            DataKind::Date | DataKind::DateString => {
                FilterConfig::Date(DateFilterParams::default())
            }
            DataKind::Boolean | DataKind::Custom => FilterConfig::Set(SetFilterParams::default()),
        }
    }

    pub fn is_filterable(&self) -> bool {
        !matches!(self, FilterConfig::None)
    }

    /// The configured filter's name, as a payload's `filterType` spells it.
    pub fn name(&self) -> &str {
        match self {
            FilterConfig::None => "none",
            FilterConfig::Text(_) => "text",
            FilterConfig::Number(_) => "number",
            FilterConfig::Date(_) => "date",
            FilterConfig::Set(_) => "set",
            FilterConfig::Multi(_) => "multi",
            FilterConfig::Custom { tag } => tag,
        }
    }

    /// Whether a built-in filter kind is the one configured here.
    pub fn admits(&self, kind: FilterKind) -> bool {
        matches!(
            (self, kind),
            (FilterConfig::Text(_), FilterKind::Text)
                | (FilterConfig::Number(_), FilterKind::Number)
                | (FilterConfig::Date(_), FilterKind::Date)
                | (FilterConfig::Set(_), FilterKind::Set)
                | (FilterConfig::Multi(_), FilterKind::Multi)
        )
    }
}

/// Metadata for one queryable field.
#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub field: String,
    pub kind: DataKind,
    pub filter: FilterConfig,
    pub groupable: bool,
    pub pivotable: bool,
    pub aggregable: bool,
    pub sortable: bool,
    /// Narrows the aggregate functions legal for this column.
    pub allowed_agg_funcs: Option<Vec<String>>,
    /// Explicit, ordered pivot values; skips the distinct-values query.
    pub pivot_domain: Option<Vec<Value>>,
}

impl ColumnDefinition {
    /// A sortable column with no filter, grouping, pivoting or aggregation.
    pub fn new(field: &str, kind: DataKind) -> Self {
        Self {
            field: field.to_string(),
            kind,
            filter: FilterConfig::None,
            groupable: false,
            pivotable: false,
            aggregable: false,
            sortable: true,
            allowed_agg_funcs: None,
            pivot_domain: None,
        }
    }

    /// Enable the stock filter for this column's kind.
    pub fn filterable(mut self) -> Self {
        self.filter = FilterConfig::for_kind(self.kind);
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn groupable(mut self) -> Self {
        self.groupable = true;
        self
    }

    pub fn pivotable(mut self) -> Self {
        self.pivotable = true;
        self
    }

    pub fn aggregable(mut self) -> Self {
        self.aggregable = true;
        self
    }

    pub fn not_sortable(mut self) -> Self {
        self.sortable = false;
        self
    }

    pub fn allowed_agg_funcs(mut self, funcs: &[&str]) -> Self {
        self.allowed_agg_funcs = Some(funcs.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn pivot_domain(mut self, values: Vec<Value>) -> Self {
        self.pivot_domain = Some(values);
        self
    }

    pub fn is_filterable(&self) -> bool {
        self.filter.is_filterable()
    }
}

/// Immutable lookup of column metadata by field id.
#[derive(Debug, Clone, Default)]
pub struct ColumnRegistry {
    columns: Vec<ColumnDefinition>,
    index: HashMap<String, usize>,
}

impl ColumnRegistry {
    pub fn builder() -> ColumnRegistryBuilder {
        ColumnRegistryBuilder::default()
    }

    pub fn get(&self, field: &str) -> Option<&ColumnDefinition> {
        self.index.get(field).map(|&i| &self.columns[i])
    }

    /// Look up a column, failing with `ColumnNotFound`.
    pub fn require(&self, field: &str) -> EngineResult<&ColumnDefinition> {
        self.get(field).ok_or_else(|| EngineError::ColumnNotFound {
            field: field.to_string(),
        })
    }

    /// Columns in registration order.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ColumnRegistryBuilder {
    columns: Vec<ColumnDefinition>,
}

impl ColumnRegistryBuilder {
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Freeze the registry. Field ids must be unique.
    pub fn build(self) -> EngineResult<ColumnRegistry> {
        let mut index = HashMap::with_capacity(self.columns.len());
        for (i, column) in self.columns.iter().enumerate() {
            if index.insert(column.field.clone(), i).is_some() {
                return Err(EngineError::DuplicateColumn {
                    field: column.field.clone(),
                });
            }
        }
        Ok(ColumnRegistry {
            columns: self.columns,
            index,
        })
    }
}
