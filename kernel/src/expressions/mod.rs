//! The expression tree shared by filters, projections and the partition expressions attached to
//! fragments and directories.

use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

use itertools::Itertools;

pub use self::bind::{bind_filter, bind_partition, bind_projection};
pub use self::column_names::{column_expr, column_name, ColumnName};
pub use self::scalars::Scalar;
use crate::arrow::datatypes::DataType;

mod bind;
mod column_names;
mod scalars;

/// Field values known to hold for every row of some unit of data, e.g. the partition values of a
/// fragment. A [`Scalar::Null`] binding means the field is known to be null.
pub type KnownFieldValues = HashMap<ColumnName, Scalar>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    Not,
    IsNull,
}

/// Comparisons, which produce booleans, and arithmetic, which produces numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    /// NULL-safe inequality
    Distinct,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOperator {
    /// Comparisons whose result is NULL whenever an operand is NULL. `DISTINCT` is not one.
    pub(crate) fn is_null_intolerant_comparison(&self) -> bool {
        !self.is_arithmetic() && *self != Self::Distinct
    }

    pub(crate) fn is_arithmetic(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus | Self::Multiply | Self::Divide)
    }
}

/// AND or OR over any number of operands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JunctionOperator {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnaryExpression {
    pub op: UnaryOperator,
    pub expr: Box<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BinaryExpression {
    pub op: BinaryOperator,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JunctionExpression {
    pub op: JunctionOperator,
    pub exprs: Vec<Expression>,
}

/// A call to a named function, resolved through a
/// [`FunctionRegistry`](crate::functions::FunctionRegistry) when the expression is bound.
#[derive(Clone, Debug, PartialEq)]
pub struct CallExpression {
    pub name: String,
    pub args: Vec<Expression>,
}

/// A filter, projection or partition expression.
///
/// Expressions carry no types apart from those of their literals. Filters and projections are
/// checked against a schema by [`bind_filter`] and [`bind_projection`] before they touch data;
/// partition expressions are only ever evaluated over [`KnownFieldValues`].
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Scalar),
    Column(ColumnName),
    Unary(UnaryExpression),
    Binary(BinaryExpression),
    Junction(JunctionExpression),
    Call(CallExpression),
}

macro_rules! binary_builders {
    ( $( $name:ident => $op:ident, $sql:literal );* $(;)? ) => {
        $(
            #[doc = concat!("`self ", $sql, " other`")]
            pub fn $name(self, other: impl Into<Self>) -> Self {
                Self::binary(BinaryOperator::$op, self, other)
            }
        )*
    };
}

impl Expression {
    pub fn column(name: impl Into<ColumnName>) -> Self {
        Self::Column(name.into())
    }

    pub fn literal(value: impl Into<Scalar>) -> Self {
        Self::Literal(value.into())
    }

    /// A NULL literal of `data_type`.
    pub const fn null_literal(data_type: DataType) -> Self {
        Self::Literal(Scalar::Null(data_type))
    }

    /// The `true` literal, which is the partition expression of unpartitioned data.
    pub fn always_true() -> Self {
        Self::literal(true)
    }

    pub fn not(expr: impl Into<Self>) -> Self {
        Self::unary(UnaryOperator::Not, expr)
    }

    pub fn is_null(self) -> Self {
        Self::unary(UnaryOperator::IsNull, self)
    }

    pub fn is_not_null(self) -> Self {
        Self::not(self.is_null())
    }

    binary_builders! {
        eq => Equal, "=";
        ne => NotEqual, "!=";
        lt => LessThan, "<";
        le => LessThanOrEqual, "<=";
        gt => GreaterThan, ">";
        ge => GreaterThanOrEqual, ">=";
    }

    /// `DISTINCT(self, other)`, i.e. NULL-safe inequality.
    pub fn distinct(self, other: impl Into<Self>) -> Self {
        Self::binary(BinaryOperator::Distinct, self, other)
    }

    pub fn and(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::and_from([a.into(), b.into()])
    }

    pub fn or(a: impl Into<Self>, b: impl Into<Self>) -> Self {
        Self::or_from([a.into(), b.into()])
    }

    pub fn and_from(exprs: impl IntoIterator<Item = Self>) -> Self {
        Self::junction(JunctionOperator::And, exprs)
    }

    pub fn or_from(exprs: impl IntoIterator<Item = Self>) -> Self {
        Self::junction(JunctionOperator::Or, exprs)
    }

    /// A call of the function registered as `name`.
    pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Self>) -> Self {
        Self::Call(CallExpression {
            name: name.into(),
            args: args.into_iter().collect(),
        })
    }

    pub fn unary(op: UnaryOperator, expr: impl Into<Self>) -> Self {
        Self::Unary(UnaryExpression {
            op,
            expr: Box::new(expr.into()),
        })
    }

    pub fn binary(op: BinaryOperator, left: impl Into<Self>, right: impl Into<Self>) -> Self {
        Self::Binary(BinaryExpression {
            op,
            left: Box::new(left.into()),
            right: Box::new(right.into()),
        })
    }

    pub fn junction(op: JunctionOperator, exprs: impl IntoIterator<Item = Self>) -> Self {
        Self::Junction(JunctionExpression {
            op,
            exprs: exprs.into_iter().collect(),
        })
    }

    /// The direct subexpressions of this expression.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Self::Literal(_) | Self::Column(_) => vec![],
            Self::Unary(UnaryExpression { expr, .. }) => vec![expr.as_ref()],
            Self::Binary(BinaryExpression { left, right, .. }) => {
                vec![left.as_ref(), right.as_ref()]
            }
            Self::Junction(JunctionExpression { exprs, .. })
            | Self::Call(CallExpression { args: exprs, .. }) => exprs.iter().collect(),
        }
    }

    /// Every column this expression reads.
    pub fn references(&self) -> HashSet<&ColumnName> {
        let mut references = HashSet::new();
        let mut pending = vec![self];
        while let Some(expr) = pending.pop() {
            if let Self::Column(name) = expr {
                references.insert(name);
            }
            pending.extend(expr.children());
        }
        references
    }

    pub fn is_always_true(&self) -> bool {
        matches!(self, Self::Literal(Scalar::Boolean(true)))
    }

    /// The top-level conjuncts of this expression, with nested ANDs flattened. The literal `true`
    /// contributes nothing.
    pub fn conjuncts(&self) -> Vec<&Expression> {
        match self {
            Self::Junction(JunctionExpression {
                op: JunctionOperator::And,
                exprs,
            }) => exprs.iter().flat_map(Self::conjuncts).collect(),
            expr if expr.is_always_true() => vec![],
            expr => vec![expr],
        }
    }

    /// Conjunction of `exprs` with nested ANDs flattened and repeated conjuncts dropped. An empty
    /// conjunction is the literal `true`, and a single conjunct is returned unwrapped.
    pub fn conjunction(exprs: impl IntoIterator<Item = Self>) -> Self {
        let exprs: Vec<_> = exprs.into_iter().collect();
        // Scalar holds floats, so expressions are only PartialEq
        let mut unique: Vec<Expression> = vec![];
        for conjunct in exprs.iter().flat_map(Self::conjuncts) {
            if !unique.contains(conjunct) {
                unique.push(conjunct.clone());
            }
        }
        match unique.len() {
            0 => Self::always_true(),
            1 => unique.remove(0),
            _ => Self::and_from(unique),
        }
    }

    /// Extracts the field values this expression guarantees: `col = literal` and `col IS NULL`
    /// conjuncts. Anything else is ignored, so the result may be empty.
    pub fn known_field_values(&self) -> KnownFieldValues {
        let mut known = KnownFieldValues::new();
        self.insert_known_field_values(&mut known);
        known
    }

    /// Adds the field values this expression guarantees to `known`, replacing earlier bindings of
    /// the same fields.
    pub fn insert_known_field_values(&self, known: &mut KnownFieldValues) {
        for conjunct in self.conjuncts() {
            let binding = match conjunct {
                Self::Binary(BinaryExpression {
                    op: BinaryOperator::Equal,
                    left,
                    right,
                }) => match (left.as_ref(), right.as_ref()) {
                    (Self::Column(col), Self::Literal(value))
                    | (Self::Literal(value), Self::Column(col)) => Some((col, value.clone())),
                    _ => None,
                },
                Self::Unary(UnaryExpression {
                    op: UnaryOperator::IsNull,
                    expr,
                }) => match expr.as_ref() {
                    Self::Column(col) => Some((col, Scalar::Null(DataType::Null))),
                    _ => None,
                },
                _ => None,
            };
            if let Some((col, value)) = binding {
                known.insert(col.clone(), value);
            }
        }
    }
}

impl BinaryOperator {
    fn symbol(&self) -> &'static str {
        use BinaryOperator::*;
        match self {
            LessThan => "<",
            LessThanOrEqual => "<=",
            GreaterThan => ">",
            GreaterThanOrEqual => ">=",
            Equal => "=",
            NotEqual => "!=",
            Distinct => "DISTINCT",
            Plus => "+",
            Minus => "-",
            Multiply => "*",
            Divide => "/",
        }
    }
}

impl Display for BinaryOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

// Comma-separated argument list
fn join_args(f: &mut Formatter<'_>, name: &str, args: &[Expression]) -> std::fmt::Result {
    write!(f, "{name}({})", args.iter().join(", "))
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Column(name) => write!(f, "Column({name})"),
            Self::Unary(UnaryExpression {
                op: UnaryOperator::Not,
                expr,
            }) => write!(f, "NOT {expr}"),
            Self::Unary(UnaryExpression {
                op: UnaryOperator::IsNull,
                expr,
            }) => write!(f, "{expr} IS NULL"),
            Self::Binary(BinaryExpression { op, left, right }) => match op {
                BinaryOperator::Distinct => write!(f, "DISTINCT({left}, {right})"),
                op => write!(f, "{left} {op} {right}"),
            },
            Self::Junction(JunctionExpression { op, exprs }) => {
                let name = match op {
                    JunctionOperator::And => "AND",
                    JunctionOperator::Or => "OR",
                };
                join_args(f, name, exprs)
            }
            Self::Call(CallExpression { name, args }) => join_args(f, name, args),
        }
    }
}

impl From<Scalar> for Expression {
    fn from(value: Scalar) -> Self {
        Self::literal(value)
    }
}

impl From<ColumnName> for Expression {
    fn from(value: ColumnName) -> Self {
        Self::Column(value)
    }
}

impl<R: Into<Expression>> std::ops::Add<R> for Expression {
    type Output = Self;

    fn add(self, rhs: R) -> Self::Output {
        Self::binary(BinaryOperator::Plus, self, rhs)
    }
}

impl<R: Into<Expression>> std::ops::Sub<R> for Expression {
    type Output = Self;

    fn sub(self, rhs: R) -> Self {
        Self::binary(BinaryOperator::Minus, self, rhs)
    }
}

impl<R: Into<Expression>> std::ops::Mul<R> for Expression {
    type Output = Self;

    fn mul(self, rhs: R) -> Self {
        Self::binary(BinaryOperator::Multiply, self, rhs)
    }
}

impl<R: Into<Expression>> std::ops::Div<R> for Expression {
    type Output = Self;

    fn div(self, rhs: R) -> Self {
        Self::binary(BinaryOperator::Divide, self, rhs)
    }
}
