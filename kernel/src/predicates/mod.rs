//! Three-valued evaluation of predicates over known field values, as used for partition pruning.
//!
//! Evaluation produces `Option<bool>`, where `None` means the value is unknown. A predicate
//! evaluates to unknown whenever it depends on a field with no known value, so pruning only ever
//! discards data when the predicate is provably `false` for every row.
use std::cmp::Ordering;

use tracing::debug;

use crate::expressions::{
    BinaryExpression, BinaryOperator, ColumnName, Expression as Expr, JunctionExpression,
    JunctionOperator, KnownFieldValues, Scalar, UnaryExpression, UnaryOperator,
};

#[cfg(test)]
mod tests;

/// Looks up the value a column is known to hold.
pub trait ResolveColumnAsScalar {
    fn resolve_column(&self, col: &ColumnName) -> Option<Scalar>;
}

impl ResolveColumnAsScalar for KnownFieldValues {
    fn resolve_column(&self, col: &ColumnName) -> Option<Scalar> {
        self.get(col).cloned()
    }
}

impl<R: ResolveColumnAsScalar> ResolveColumnAsScalar for &R {
    fn resolve_column(&self, col: &ColumnName) -> Option<Scalar> {
        (*self).resolve_column(col)
    }
}

/// Resolves from the first resolver, falling back to the second. Used to layer the bindings of a
/// partition directory over those of the dataset's root partition.
impl<A: ResolveColumnAsScalar, B: ResolveColumnAsScalar> ResolveColumnAsScalar for (A, B) {
    fn resolve_column(&self, col: &ColumnName) -> Option<Scalar> {
        self.0
            .resolve_column(col)
            .or_else(|| self.1.resolve_column(col))
    }
}

/// Evaluates a predicate to `Some(true)`, `Some(false)` or unknown (`None`), resolving columns
/// through `R`.
///
/// # NULL semantics
///
/// Comparisons involving NULL are unknown, as are comparisons between values of different types.
/// Columns without a known value are unknown too, never an error. AND is `false` as soon as any
/// input is `false`, whatever the others are; OR is `true` as soon as any input is `true`. Only
/// columns and literals can be null-checked: `a < 10 IS NULL` is unknown, because `a` may simply
/// be missing rather than known to be NULL. Function calls and arithmetic are not evaluated.
#[derive(Debug)]
pub struct TruthEvaluator<R> {
    resolver: R,
}

impl<R: ResolveColumnAsScalar> From<R> for TruthEvaluator<R> {
    fn from(resolver: R) -> Self {
        Self { resolver }
    }
}

impl<R: ResolveColumnAsScalar> TruthEvaluator<R> {
    /// Plain three-valued evaluation.
    pub fn eval(&self, expr: &Expr) -> Option<bool> {
        use Expr::*;
        match expr {
            Literal(value) => as_boolean(value),
            Column(col) => as_boolean(&self.resolver.resolve_column(col)?),
            Unary(UnaryExpression {
                op: UnaryOperator::Not,
                expr,
            }) => self.eval(expr).map(|value| !value),
            Unary(UnaryExpression {
                op: UnaryOperator::IsNull,
                expr,
            }) => self.is_null(expr),
            Binary(BinaryExpression { op, left, right }) => self.eval_binary(*op, left, right),
            Junction(JunctionExpression { op, exprs }) => {
                junction(*op, exprs.iter().map(|expr| self.eval(expr)))
            }
            Call(call) => {
                debug!("Function calls are not evaluated for pruning: {}", call.name);
                None
            }
        }
    }

    /// Evaluation with SQL WHERE semantics, which keep only rows for which the filter is `true`.
    ///
    /// Plain evaluation cannot tell a NULL comparison from an unknown one: `city = 'Franklin'` over
    /// data known to have a NULL city is NULL, not `false`, even though WHERE drops every such row.
    /// So each null-intolerant comparison `a < b` is evaluated as
    /// `a IS NOT NULL AND b IS NOT NULL AND a < b`, with NOT pushed down to the comparisons:
    ///
    /// ```text
    /// WHERE NOT (a < 10 AND b = 2)
    /// ```
    ///
    /// becomes
    ///
    /// ```text
    /// WHERE (a IS NOT NULL AND a >= 10) OR (b IS NOT NULL AND b != 2)
    /// ```
    ///
    /// A field known to be NULL then yields `false`, while a field with no known value still
    /// yields unknown and can never prune anything.
    pub fn eval_sql_where(&self, expr: &Expr) -> Option<bool> {
        self.eval_where(expr, false)
    }

    fn eval_where(&self, expr: &Expr, inverted: bool) -> Option<bool> {
        use Expr::*;
        let not_null = |expr: &Expr| self.is_null(expr).map(|null| !null);
        match expr {
            Junction(JunctionExpression { op, exprs }) => {
                let op = match (op, inverted) {
                    (op, false) => *op,
                    (JunctionOperator::And, true) => JunctionOperator::Or,
                    (JunctionOperator::Or, true) => JunctionOperator::And,
                };
                junction(op, exprs.iter().map(|expr| self.eval_where(expr, inverted)))
            }
            Binary(BinaryExpression { op, left, right }) if op.is_null_intolerant_comparison() => {
                let compared = self
                    .eval_binary(*op, left, right)
                    .map(|value| value != inverted);
                junction(
                    JunctionOperator::And,
                    [not_null(left), not_null(right), compared].into_iter(),
                )
            }
            Unary(UnaryExpression {
                op: UnaryOperator::Not,
                expr,
            }) => self.eval_where(expr, !inverted),
            Column(_) => {
                let value = self.eval(expr).map(|value| value != inverted);
                junction(JunctionOperator::And, [not_null(expr), value].into_iter())
            }
            Literal(value) if value.is_null() => Some(false),
            _ => self.eval(expr).map(|value| value != inverted),
        }
    }

    fn is_null(&self, expr: &Expr) -> Option<bool> {
        match expr {
            Expr::Literal(value) => Some(value.is_null()),
            Expr::Column(col) => Some(self.resolver.resolve_column(col)?.is_null()),
            _ => {
                debug!("Only columns and literals can be null-checked: {expr}");
                None
            }
        }
    }

    // The value of a comparison operand, if it is a literal or a column with a known value
    fn operand(&self, expr: &Expr) -> Option<Scalar> {
        match expr {
            Expr::Literal(value) => Some(value.clone()),
            Expr::Column(col) => self.resolver.resolve_column(col),
            _ => {
                debug!("Unsupported comparison operand: {expr}");
                None
            }
        }
    }

    fn eval_binary(&self, op: BinaryOperator, left: &Expr, right: &Expr) -> Option<bool> {
        if op.is_arithmetic() {
            debug!("Arithmetic is not a predicate: {left} {op} {right}");
            return None;
        }
        compare(op, &self.operand(left)?, &self.operand(right)?)
    }
}

fn as_boolean(value: &Scalar) -> Option<bool> {
    match value {
        Scalar::Boolean(value) => Some(*value),
        _ => None,
    }
}

/// Applies a comparison operator to two scalars. NULLs and values of different types compare as
/// unknown, except under DISTINCT.
pub(crate) fn compare(op: BinaryOperator, left: &Scalar, right: &Scalar) -> Option<bool> {
    use BinaryOperator::*;
    if op == Distinct {
        return distinct(left, right);
    }
    let ordering = left.partial_cmp(right)?;
    match op {
        Equal => Some(ordering == Ordering::Equal),
        NotEqual => Some(ordering != Ordering::Equal),
        LessThan => Some(ordering == Ordering::Less),
        LessThanOrEqual => Some(ordering != Ordering::Greater),
        GreaterThan => Some(ordering == Ordering::Greater),
        GreaterThanOrEqual => Some(ordering != Ordering::Less),
        Distinct | Plus | Minus | Multiply | Divide => None,
    }
}

/// `DISTINCT(a, b)` is NULL-safe inequality: two NULLs are not distinct, a NULL and a value are.
fn distinct(left: &Scalar, right: &Scalar) -> Option<bool> {
    match (left.is_null(), right.is_null()) {
        (true, true) => Some(false),
        (true, false) | (false, true) => Some(true),
        (false, false) => Some(left.partial_cmp(right)? != Ordering::Equal),
    }
}

/// Combines junction inputs lazily. A dominating input (`false` for AND, `true` for OR) decides
/// the result on its own; otherwise any unknown input makes the result unknown.
fn junction(op: JunctionOperator, values: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let dominator = op == JunctionOperator::Or;
    let mut unknown = false;
    for value in values {
        match value {
            Some(value) if value == dominator => return Some(dominator),
            Some(_) => {}
            None => unknown = true,
        }
    }
    (!unknown).then_some(!dominator)
}

impl Expr {
    /// Three-valued evaluation of this predicate, given the values of some of its fields. Returns
    /// `None` (unknown) if the result depends on fields without a known value.
    pub fn evaluate(&self, known: &KnownFieldValues) -> Option<bool> {
        TruthEvaluator::from(known).eval(self)
    }

    /// Whether this expression implies `other`, judged from the field values this expression
    /// guarantees (see [`Expr::known_field_values`]).
    ///
    /// `Some(true)`: every row satisfying `self` satisfies `other`. `Some(false)`: no row
    /// satisfying `self` satisfies `other`, so data described by `self` can be pruned against the
    /// filter `other`. `None`: undecided.
    pub fn implies(&self, other: &Expr) -> Option<bool> {
        other.satisfiable_under(&self.known_field_values())
    }

    /// Evaluates this filter with SQL WHERE semantics given known field values. `Some(false)`
    /// means no row with those values can pass the filter.
    pub fn satisfiable_under(&self, known: &KnownFieldValues) -> Option<bool> {
        TruthEvaluator::from(known).eval_sql_where(self)
    }
}
