//! AND/OR folding of predicates.
//!
//! Folding keeps operand order, flattens nested nodes of the same operator,
//! and drops identity constants. An empty fold is TRUE, so an inactive
//! filter never narrows a result.

use crate::filter::model::JoinOperator;
use crate::planner::logical::Predicate;

/// Conjunction. TRUE operands drop out; any FALSE operand makes the whole
/// fold FALSE.
pub fn and_all<I>(predicates: I) -> Predicate
where
    I: IntoIterator<Item = Predicate>,
{
    let mut out = Vec::new();
    for p in predicates {
        match p {
            Predicate::True => {}
            Predicate::False => return Predicate::False,
            Predicate::And(children) => out.extend(children),
            other => out.push(other),
        }
    }
    collapse(out, Predicate::And, Predicate::True)
}

/// Disjunction. An empty input is TRUE; FALSE operands drop out, and a fold
/// whose operands were all FALSE is FALSE.
pub fn or_all<I>(predicates: I) -> Predicate
where
    I: IntoIterator<Item = Predicate>,
{
    let mut out = Vec::new();
    let mut seen = false;
    for p in predicates {
        seen = true;
        match p {
            Predicate::False => {}
            Predicate::True => return Predicate::True,
            Predicate::Or(children) => out.extend(children),
            other => out.push(other),
        }
    }
    if !seen {
        return Predicate::True;
    }
    collapse(out, Predicate::Or, Predicate::False)
}

/// Fold with a combined-model operator.
pub fn join<I>(operator: JoinOperator, predicates: I) -> Predicate
where
    I: IntoIterator<Item = Predicate>,
{
    match operator {
        JoinOperator::And => and_all(predicates),
        JoinOperator::Or => or_all(predicates),
    }
}

fn collapse(
    mut out: Vec<Predicate>,
    node: fn(Vec<Predicate>) -> Predicate,
    empty: Predicate,
) -> Predicate {
    match out.len() {
        0 => empty,
        1 => out.remove(0),
        _ => node(out),
    }
}
