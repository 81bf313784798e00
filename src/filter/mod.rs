//! Column filters: recognition, predicate building and folding.
//!
//! A raw filter payload is first classified by the [`RecognizerChain`], then
//! turned into a [`Predicate`](crate::planner::logical::Predicate) by the
//! [`PredicateBuilder`]. Per-column predicates are folded with
//! [`combinator::and_all`].

pub mod advanced;
pub mod builder;
pub mod combinator;
pub mod model;
pub mod params;
pub mod quick;
pub mod recognizer;

pub use builder::PredicateBuilder;
pub use model::{FilterKind, FilterModel, JoinOperator, ScalarOp, TextOp};
pub use params::{
    DateFilterParams, NumberFilterParams, ScalarFilterParams, SetFilterParams, TextFilterParams,
    TextMatcherParams,
};
pub use quick::{QuickFilter, QuickFilterFormatter, QuickFilterMatcher, QuickFilterParser};
pub use recognizer::{CustomRecognizer, RecognizerChain};

use std::sync::Arc;

use crate::error::EngineResult;
use crate::planner::logical::Predicate;

/// Turns a request's `externalFilter` payload into a WHERE predicate.
pub type ExternalFilterHook =
    Arc<dyn Fn(&serde_json::Value) -> EngineResult<Predicate> + Send + Sync>;
