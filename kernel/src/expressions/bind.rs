//! Type checking of expressions against a schema.
//!
//! Binding resolves every column reference, validates operand types, and casts literals that are
//! compared or combined with a column to that column's type, so `i64_col = 1` compares two
//! `Int64` values. Unbound expressions can still be evaluated for partition pruning; a literal of
//! the wrong type merely makes the comparison unknown there.

use std::sync::Arc;

use tracing::debug;

use super::{
    BinaryExpression, CallExpression, Expression, JunctionExpression, Scalar, UnaryExpression,
    UnaryOperator,
};
use crate::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use crate::functions::{common_numeric_type, FunctionRegistry};
use crate::utils::require;
use crate::{DatasetResult, Error};

/// Validates `filter` against `schema`, returning the bound filter. Fails if the filter references
/// an unknown column or function, combines incompatible types, or is not boolean.
pub fn bind_filter(
    filter: &Expression,
    schema: &Schema,
    registry: &dyn FunctionRegistry,
) -> DatasetResult<Expression> {
    let bound = bind(filter, schema, registry)?;
    require!(
        matches!(bound.data_type, DataType::Boolean | DataType::Null),
        Error::validation(format!(
            "Filter {filter} must produce booleans, but produces {}",
            bound.data_type
        ))
    );
    Ok(bound.expr)
}

/// Validates projection expressions against `schema` and derives the projected schema, naming
/// each output column after the corresponding entry of `names`.
pub fn bind_projection(
    exprs: &[Expression],
    names: &[String],
    schema: &Schema,
    registry: &dyn FunctionRegistry,
) -> DatasetResult<(Vec<Expression>, SchemaRef)> {
    require!(
        exprs.len() == names.len(),
        Error::validation(format!(
            "Projection has {} expressions but {} names",
            exprs.len(),
            names.len()
        ))
    );
    let mut bound_exprs = Vec::with_capacity(exprs.len());
    let mut fields = Vec::with_capacity(exprs.len());
    for (expr, name) in exprs.iter().zip(names) {
        let bound = bind(expr, schema, registry)?;
        fields.push(Field::new(name, bound.data_type, bound.nullable));
        bound_exprs.push(bound.expr);
    }
    Ok((bound_exprs, Arc::new(Schema::new(fields))))
}

/// Casts the literals of `partition` compared with a column of `schema` to that column's type, so
/// that they compare with the bound filters they prune. Columns missing from `schema` are left
/// alone: a root partition may describe fields the data does not store.
pub fn bind_partition(partition: &Expression, schema: &Schema) -> DatasetResult<Expression> {
    fn column_type<'a>(expr: &Expression, schema: &'a Schema) -> Option<&'a DataType> {
        match expr {
            Expression::Column(name) => schema.field_with_name(name).ok().map(|f| f.data_type()),
            _ => None,
        }
    }
    Ok(match partition {
        Expression::Binary(BinaryExpression { op, left, right }) => {
            let cast = |value: &Scalar, to: &DataType| {
                if value.data_type() == *to {
                    Ok(Expression::Literal(value.clone()))
                } else {
                    cast_literal(partition, value, to)
                }
            };
            let types = (column_type(left, schema), column_type(right, schema));
            match (left.as_ref(), right.as_ref(), types.0, types.1) {
                (column, Expression::Literal(value), Some(to), _) => {
                    Expression::binary(*op, column.clone(), cast(value, to)?)
                }
                (Expression::Literal(value), column, _, Some(to)) => {
                    Expression::binary(*op, cast(value, to)?, column.clone())
                }
                (left, right, ..) => Expression::binary(
                    *op,
                    bind_partition(left, schema)?,
                    bind_partition(right, schema)?,
                ),
            }
        }
        Expression::Unary(UnaryExpression { op, expr }) => {
            Expression::unary(*op, bind_partition(expr, schema)?)
        }
        Expression::Junction(JunctionExpression { op, exprs }) => Expression::junction(
            *op,
            exprs
                .iter()
                .map(|expr| bind_partition(expr, schema))
                .collect::<DatasetResult<Vec<_>>>()?,
        ),
        Expression::Call(CallExpression { name, args }) => Expression::call(
            name.clone(),
            args.iter()
                .map(|arg| bind_partition(arg, schema))
                .collect::<DatasetResult<Vec<_>>>()?,
        ),
        Expression::Literal(_) | Expression::Column(_) => partition.clone(),
    })
}

struct Bound {
    expr: Expression,
    data_type: DataType,
    nullable: bool,
}

impl Bound {
    fn new(expr: Expression, data_type: DataType) -> Self {
        Self {
            expr,
            data_type,
            nullable: true,
        }
    }
}

fn bind(expr: &Expression, schema: &Schema, registry: &dyn FunctionRegistry) -> DatasetResult<Bound> {
    match expr {
        Expression::Literal(value) => Ok(Bound::new(expr.clone(), value.data_type())),
        Expression::Column(name) => {
            let field = schema.field_with_name(name).map_err(|_| {
                Error::missing_column(format!("Expression references unknown column: {name}"))
            })?;
            Ok(Bound {
                expr: expr.clone(),
                data_type: field.data_type().clone(),
                nullable: field.is_nullable(),
            })
        }
        Expression::Unary(UnaryExpression { op, expr: child }) => {
            let child = bind(child, schema, registry)?;
            if *op == UnaryOperator::Not {
                require!(
                    matches!(child.data_type, DataType::Boolean | DataType::Null),
                    Error::validation(format!("NOT requires a boolean operand: {expr}"))
                );
            }
            Ok(Bound::new(Expression::unary(*op, child.expr), DataType::Boolean))
        }
        Expression::Binary(BinaryExpression { op, left, right }) => {
            let left = bind(left, schema, registry)?;
            let right = bind(right, schema, registry)?;
            let (left, right, operand_type) = coerce_operands(expr, left, right)?;
            let result_type = if op.is_arithmetic() {
                require!(
                    operand_type.is_numeric(),
                    Error::validation(format!(
                        "Arithmetic requires numeric operands, got {operand_type}: {expr}"
                    ))
                );
                operand_type
            } else {
                DataType::Boolean
            };
            Ok(Bound::new(Expression::binary(*op, left, right), result_type))
        }
        Expression::Junction(JunctionExpression { op, exprs }) => {
            let exprs = exprs
                .iter()
                .map(|child| {
                    let bound = bind(child, schema, registry)?;
                    match bound.data_type {
                        DataType::Boolean => Ok(bound.expr),
                        DataType::Null => Ok(Expression::null_literal(DataType::Boolean)),
                        other => Err(Error::validation(format!(
                            "{child} in {expr} must produce booleans, but produces {other}"
                        ))),
                    }
                })
                .collect::<DatasetResult<Vec<_>>>()?;
            Ok(Bound::new(Expression::junction(*op, exprs), DataType::Boolean))
        }
        Expression::Call(CallExpression { name, args }) => {
            let function = registry
                .get_function(name)
                .ok_or_else(|| Error::validation(format!("Unknown function {name} in {expr}")))?;
            let args = args
                .iter()
                .map(|arg| bind(arg, schema, registry))
                .collect::<DatasetResult<Vec<_>>>()?;
            let arg_types: Vec<_> = args.iter().map(|arg| arg.data_type.clone()).collect();
            let data_type = function.return_type(&arg_types)?;
            debug!("Bound call {name}({arg_types:?}) -> {data_type}");
            Ok(Bound::new(
                Expression::call(name.clone(), args.into_iter().map(|arg| arg.expr)),
                data_type,
            ))
        }
    }
}

// Brings both operands of a binary expression to a single type by casting a literal operand to
// the type of the other side. Two non-literal operands must already agree.
fn coerce_operands(
    expr: &Expression,
    left: Bound,
    right: Bound,
) -> DatasetResult<(Expression, Expression, DataType)> {
    if left.data_type == right.data_type {
        return Ok((left.expr, right.expr, left.data_type));
    }
    match (&left.expr, &right.expr) {
        (_, Expression::Literal(value)) => {
            let value = cast_literal(expr, value, &left.data_type)?;
            Ok((left.expr, value, left.data_type))
        }
        (Expression::Literal(value), _) => {
            let value = cast_literal(expr, value, &right.data_type)?;
            Ok((value, right.expr, right.data_type))
        }
        _ => match common_numeric_type(&left.data_type, &right.data_type) {
            Some(_) => Err(Error::validation(format!(
                "Operands of {expr} have different numeric types {} and {}; use a function call \
                 to combine them",
                left.data_type, right.data_type
            ))),
            None => Err(Error::validation(format!(
                "Operands of {expr} have incompatible types {} and {}",
                left.data_type, right.data_type
            ))),
        },
    }
}

fn cast_literal(expr: &Expression, value: &Scalar, to: &DataType) -> DatasetResult<Expression> {
    let from = value.data_type();
    let allowed = value.is_null()
        || (from.is_numeric() && to.is_numeric())
        || (from == DataType::Utf8 && to.is_temporal());
    require!(
        allowed,
        Error::validation(format!(
            "Cannot compare {to} with a literal of type {from}: {expr}"
        ))
    );
    let cast = value.try_cast(to).map_err(|err| {
        Error::validation(format!("Literal {value} in {expr} does not fit {to}: {err}"))
    })?;
    Ok(Expression::Literal(cast))
}
