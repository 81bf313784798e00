//! # gridplan
//!
//! Translates server-side row-model requests from a data grid into portable
//! query plans, rendered as multi-dialect SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   GetRowsRequest (JSON)                  │
//! │  (groups, keys, values, pivots, filters, sort, window)   │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [filter: recognize + build]
//! ┌─────────────────────────────────────────────────────────┐
//! │                Predicates (WHERE / HAVING)               │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [planner: group, aggregate, pivot, sort]
//! ┌─────────────────────────────────────────────────────────┐
//! │                       QueryPlan                          │
//! └─────────────────────────────────────────────────────────┘
//!                          │                     │
//!                          ▼ [sql]               ▼ [exec]
//! ┌──────────────────────────────┐  ┌────────────────────────┐
//! │     SQL text per dialect      │  │  in-memory result set  │
//! └──────────────────────────────┘  └────────────────────────┘
//! ```
//!
//! The column registry and settings are held by an [`Engine`]; the engine
//! never touches a database. Pivot values without a declared domain come from
//! a caller-supplied [`PivotValueSource`](planner::PivotValueSource).

pub mod config;
pub mod engine;
pub mod error;
pub mod exec;
pub mod filter;
pub mod planner;
pub mod registry;
pub mod request;
pub mod rows;
pub mod sql;
pub mod value;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::EngineSettings;
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::exec::{MemoryTable, ResultSet};
    pub use crate::filter::{
        CustomRecognizer, DateFilterParams, FilterModel, NumberFilterParams, SetFilterParams,
        TextFilterParams,
    };
    pub use crate::planner::logical::{AggFunc, Predicate, QueryPlan, ValueExpr};
    pub use crate::planner::{
        CustomAggregate, FirstLastPolicy, NoPivotValues, PivotValueSource, ROW_COUNT,
    };
    pub use crate::registry::{ColumnDefinition, ColumnRegistry, DataKind, FilterConfig};
    pub use crate::request::{ColumnVO, GetRowsRequest, SortModelItem};
    pub use crate::rows::LoadSuccess;
    pub use crate::sql::Dialect;
    pub use crate::value::Value;
}

// Also export at crate root for convenience
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use request::GetRowsRequest;
