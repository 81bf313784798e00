//! Value and predicate expressions of a logical plan.

use std::fmt;

use super::plan::QueryPlan;
use crate::value::Value;

// =============================================================================
// Aggregate functions
// =============================================================================

/// An aggregate function named by a value column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    First,
    Last,
    /// Caller-registered aggregate, by its registered name.
    Custom(String),
}

impl AggFunc {
    /// Resolve a request `aggFunc` name. Unknown names become `Custom` and are
    /// checked against the aggregation registry later.
    pub fn parse(name: &str) -> AggFunc {
        match name {
            "sum" => AggFunc::Sum,
            "avg" => AggFunc::Avg,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "count" => AggFunc::Count,
            "first" => AggFunc::First,
            "last" => AggFunc::Last,
            other => AggFunc::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Count => "count",
            AggFunc::First => "first",
            AggFunc::Last => "last",
            AggFunc::Custom(name) => name,
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Value expressions
// =============================================================================

/// Scalar or aggregate expression producing one value per row or group.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueExpr {
    Column(String),
    Literal(Value),
    /// Scalar function: LOWER, UPPER, TRIM, REPLACE, ...
    Function { name: String, args: Vec<ValueExpr> },
    Aggregate { func: AggFunc, arg: Box<ValueExpr> },
    CountStar,
    /// `CASE WHEN when THEN then ELSE otherwise END`; a missing `otherwise`
    /// is null.
    Case {
        when: Box<Predicate>,
        then: Box<ValueExpr>,
        otherwise: Option<Box<ValueExpr>>,
    },
    /// A column of the row the enclosing query is on, read from inside a
    /// correlated subquery. The enclosing source must carry [`OUTER_ALIAS`](super::OUTER_ALIAS).
    Outer(String),
    /// Scalar subquery: the first column of its first row, null when empty.
    Subquery(Box<QueryPlan>),
}

impl ValueExpr {
    pub fn column(field: &str) -> ValueExpr {
        ValueExpr::Column(field.to_string())
    }

    pub fn lit(value: Value) -> ValueExpr {
        ValueExpr::Literal(value)
    }

    pub fn text(s: &str) -> ValueExpr {
        ValueExpr::Literal(Value::Text(s.to_string()))
    }

    pub fn func(name: &str, args: Vec<ValueExpr>) -> ValueExpr {
        ValueExpr::Function {
            name: name.to_string(),
            args,
        }
    }

    pub fn lower(self) -> ValueExpr {
        ValueExpr::func("LOWER", vec![self])
    }

    pub fn trim(self) -> ValueExpr {
        ValueExpr::func("TRIM", vec![self])
    }

    pub fn outer(field: &str) -> ValueExpr {
        ValueExpr::Outer(field.to_string())
    }

    /// `CASE WHEN when THEN then END`.
    pub fn when(when: Predicate, then: ValueExpr) -> ValueExpr {
        ValueExpr::Case {
            when: Box::new(when),
            then: Box::new(then),
            otherwise: None,
        }
    }

    pub fn otherwise(self, value: ValueExpr) -> ValueExpr {
        match self {
            ValueExpr::Case { when, then, .. } => ValueExpr::Case {
                when,
                then,
                otherwise: Some(Box::new(value)),
            },
            other => other,
        }
    }

    pub fn aggregate(func: AggFunc, arg: ValueExpr) -> ValueExpr {
        ValueExpr::Aggregate {
            func,
            arg: Box::new(arg),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, ValueExpr::Aggregate { .. } | ValueExpr::CountStar)
    }

    /// Whether a subquery appears anywhere in this expression.
    pub fn has_subquery(&self) -> bool {
        match self {
            ValueExpr::Subquery(_) => true,
            ValueExpr::Function { args, .. } => args.iter().any(ValueExpr::has_subquery),
            ValueExpr::Aggregate { arg, .. } => arg.has_subquery(),
            ValueExpr::Case {
                when,
                then,
                otherwise,
            } => {
                when.has_subquery()
                    || then.has_subquery()
                    || otherwise.as_ref().is_some_and(|o| o.has_subquery())
            }
            ValueExpr::Column(_)
            | ValueExpr::Literal(_)
            | ValueExpr::CountStar
            | ValueExpr::Outer(_) => false,
        }
    }

    // Predicate shorthands

    pub fn eq(self, right: ValueExpr) -> Predicate {
        Predicate::compare(self, CompareOp::Eq, right)
    }

    pub fn ne(self, right: ValueExpr) -> Predicate {
        Predicate::compare(self, CompareOp::Ne, right)
    }

    pub fn is_null(self) -> Predicate {
        Predicate::IsNull {
            expr: self,
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Predicate {
        Predicate::IsNull {
            expr: self,
            negated: true,
        }
    }

    /// Equality that binds a null value with `IS NULL`.
    pub fn eq_value(self, value: &Value) -> Predicate {
        if value.is_null() {
            self.is_null()
        } else {
            self.eq(ValueExpr::lit(value.clone()))
        }
    }
}

// =============================================================================
// Predicates
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// Boolean expression tree. Children of `And`/`Or` keep their order.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    True,
    False,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        left: ValueExpr,
        op: CompareOp,
        right: ValueExpr,
    },
    IsNull {
        expr: ValueExpr,
        negated: bool,
    },
    /// `LIKE` with `\` as the escape character.
    Like {
        expr: ValueExpr,
        pattern: ValueExpr,
        negated: bool,
    },
    InList {
        expr: ValueExpr,
        values: Vec<Value>,
        negated: bool,
    },
    /// Whether the subquery yields any row.
    Exists(Box<QueryPlan>),
}

impl Predicate {
    pub fn compare(left: ValueExpr, op: CompareOp, right: ValueExpr) -> Predicate {
        Predicate::Compare { left, op, right }
    }

    pub fn negate(self) -> Predicate {
        match self {
            Predicate::True => Predicate::False,
            Predicate::False => Predicate::True,
            Predicate::Not(inner) => *inner,
            other => Predicate::Not(Box::new(other)),
        }
    }

    pub fn exists(plan: QueryPlan) -> Predicate {
        Predicate::Exists(Box::new(plan))
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    pub fn has_subquery(&self) -> bool {
        match self {
            Predicate::Exists(_) => true,
            Predicate::And(children) | Predicate::Or(children) => {
                children.iter().any(Predicate::has_subquery)
            }
            Predicate::Not(inner) => inner.has_subquery(),
            Predicate::Compare { left, right, .. } => left.has_subquery() || right.has_subquery(),
            Predicate::IsNull { expr, .. } | Predicate::InList { expr, .. } => expr.has_subquery(),
            Predicate::Like { expr, pattern, .. } => expr.has_subquery() || pattern.has_subquery(),
            Predicate::True | Predicate::False => false,
        }
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
pub fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
