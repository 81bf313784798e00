//! Reference execution of query plans over in-memory rows.
//!
//! [`MemoryTable`] evaluates a [`QueryPlan`](crate::planner::logical::QueryPlan)
//! the way a SQL database would: filter, group, aggregate, HAVING, sort,
//! then the row window. It also serves as a [`PivotValueSource`](crate::planner::PivotValueSource)
//! for small data sets.

pub mod eval;
mod memory;

pub use eval::Row;
pub use memory::{MemoryTable, ResultSet};
