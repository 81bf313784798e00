//! Logical planning types: value and predicate expressions, the query plan,
//! and its lowering to SQL.

mod expr;
mod lower;
mod plan;

pub use expr::*;
pub use plan::*;
