//! SQL rendering module.
//!
//! Query plans lower into a type-safe SQL AST that renders to several
//! dialects. Rendered text is diagnostic: it shows what a plan means.
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod dialect;
pub mod expr;
pub mod query;
pub mod test_utils;
pub mod token;

pub use dialect::{Dialect, SqlDialect};
pub use expr::{
    col, count_star, func, lit_bool, lit_date, lit_float, lit_int, lit_null, lit_str,
    BinaryOperator, Expr, ExprExt, Literal, UnaryOperator,
};
pub use query::{FromItem, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir, TableRef};
pub use token::{Token, TokenStream};
