//! Lowering of logical plans into the SQL AST.

use super::expr::{AggFunc, CompareOp, Predicate, ValueExpr};
use super::plan::{QueryPlan, OUTER_ALIAS};
use crate::sql::expr::{
    col, count_star, func, lit_int, qualified_col, BinaryOperator, Expr, UnaryOperator,
};
use crate::sql::query::{OrderByExpr, Query, SelectExpr, TableRef};

const DERIVED_ALIAS: &str = "grouped";

impl QueryPlan {
    /// Convert to a SQL query. Lowering is infallible; every logical node has
    /// a SQL form.
    pub fn to_query(&self) -> Query {
        let mut table = TableRef::new(&self.source.table);
        if let Some(schema) = &self.source.schema {
            table = table.with_schema(schema);
        }
        if let Some(alias) = &self.source.alias {
            table = table.with_alias(alias);
        }

        let select: Vec<SelectExpr> = self
            .projection
            .iter()
            .map(|item| {
                let expr = lower_value(&item.expr);
                match &item.expr {
                    ValueExpr::Column(field) if *field == item.alias => SelectExpr::new(expr),
                    _ => SelectExpr::new(expr).with_alias(&item.alias),
                }
            })
            .collect();

        let mut query = Query::new().select(select);
        query = match &self.derived {
            Some(inner) => query.from_derived(inner.to_query(), DERIVED_ALIAS),
            None => query.from(table),
        };
        if self.distinct {
            query = query.distinct();
        }
        if !self.predicate.is_true() {
            query = query.filter(lower_predicate(&self.predicate));
        }
        if !self.group_by.is_empty() {
            query = query.group_by(self.group_by.iter().map(|f| col(f)).collect());
        }
        if let Some(having) = self.having.as_ref().filter(|h| !h.is_true()) {
            query = query.having(lower_predicate(having));
        }
        if !self.order_by.is_empty() {
            query = query.order_by(
                self.order_by
                    .iter()
                    .map(|term| {
                        let expr = lower_value(&term.expr);
                        if term.descending {
                            OrderByExpr::desc(expr)
                        } else {
                            OrderByExpr::asc(expr)
                        }
                    })
                    .collect(),
            );
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            query = query.offset(offset);
        }
        query
    }
}

pub(crate) fn lower_value(expr: &ValueExpr) -> Expr {
    match expr {
        ValueExpr::Column(field) => col(field),
        ValueExpr::Literal(value) => value.to_sql_literal(),
        ValueExpr::Function { name, args } => func(name, args.iter().map(lower_value).collect()),
        ValueExpr::Aggregate { func: f, arg } => func(agg_sql_name(f), vec![lower_value(arg)]),
        ValueExpr::CountStar => count_star(),
        ValueExpr::Case {
            when,
            then,
            otherwise,
        } => Expr::Case {
            operand: None,
            when_clauses: vec![(lower_predicate(when), lower_value(then))],
            else_clause: otherwise.as_ref().map(|e| Box::new(lower_value(e))),
        },
        ValueExpr::Outer(field) => qualified_col(OUTER_ALIAS, field),
        ValueExpr::Subquery(plan) => Expr::Subquery(Box::new(plan.to_query())),
    }
}

fn agg_sql_name(f: &AggFunc) -> &str {
    match f {
        AggFunc::Sum => "SUM",
        AggFunc::Avg => "AVG",
        AggFunc::Min => "MIN",
        AggFunc::Max => "MAX",
        AggFunc::Count => "COUNT",
        AggFunc::First => "FIRST",
        AggFunc::Last => "LAST",
        AggFunc::Custom(name) => name,
    }
}

pub(crate) fn lower_predicate(pred: &Predicate) -> Expr {
    match pred {
        Predicate::True => Expr::Constant(true),
        Predicate::False => Expr::Constant(false),
        Predicate::And(children) => join(children, BinaryOperator::And, true),
        Predicate::Or(children) => join(children, BinaryOperator::Or, false),
        Predicate::Not(inner) => Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: Box::new(lower_predicate(inner).nested()),
        },
        Predicate::Compare { left, op, right } => Expr::BinaryOp {
            left: Box::new(lower_value(left)),
            op: compare_op(*op),
            right: Box::new(lower_value(right)),
        },
        Predicate::IsNull { expr, negated } => Expr::IsNull {
            expr: Box::new(lower_value(expr)),
            negated: *negated,
        },
        Predicate::Like {
            expr,
            pattern,
            negated,
        } => Expr::LikeEscape {
            expr: Box::new(lower_value(expr)),
            pattern: Box::new(lower_value(pattern)),
            escape_char: '\\',
            negated: *negated,
        },
        Predicate::InList {
            expr,
            values,
            negated,
        } => Expr::In {
            expr: Box::new(lower_value(expr)),
            values: values.iter().map(|v| v.to_sql_literal()).collect(),
            negated: *negated,
        },
        Predicate::Exists(plan) => {
            let mut query = plan.to_query();
            if query.select.is_empty() {
                query.select = vec![SelectExpr::new(lit_int(1))];
            }
            Expr::Exists(Box::new(query))
        }
    }
}

/// Left fold of AND/OR children; compound children are parenthesized.
fn join(children: &[Predicate], op: BinaryOperator, empty: bool) -> Expr {
    let mut iter = children.iter().map(|c| lower_predicate(c).nested());
    let Some(first) = iter.next() else {
        return Expr::Constant(empty);
    };
    iter.fold(first, |acc, next| Expr::BinaryOp {
        left: Box::new(acc),
        op,
        right: Box::new(next),
    })
}

fn compare_op(op: CompareOp) -> BinaryOperator {
    match op {
        CompareOp::Eq => BinaryOperator::Eq,
        CompareOp::Ne => BinaryOperator::Ne,
        CompareOp::Lt => BinaryOperator::Lt,
        CompareOp::Lte => BinaryOperator::Lte,
        CompareOp::Gt => BinaryOperator::Gt,
        CompareOp::Gte => BinaryOperator::Gte,
    }
}
