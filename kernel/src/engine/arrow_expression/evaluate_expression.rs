//! Row-wise evaluation of bound expressions with the arrow compute kernels.
use std::sync::Arc;

use itertools::Itertools;

use crate::arrow::array::{new_null_array, Array, ArrayRef, AsArray, BooleanArray, RecordBatch};
use crate::arrow::compute::kernels::{cmp, numeric};
use crate::arrow::compute::{and_kleene, is_null, not, or_kleene};
use crate::arrow::datatypes::DataType;
use crate::arrow::error::ArrowError;
use crate::error::{DatasetResult, Error};
use crate::expressions::{
    BinaryExpression, BinaryOperator, CallExpression, Expression, JunctionExpression,
    JunctionOperator, UnaryExpression, UnaryOperator,
};
use crate::functions::FunctionRegistry;

fn as_bool_array(array: &dyn Array) -> DatasetResult<&BooleanArray> {
    array.as_boolean_opt().ok_or_else(|| {
        Error::invalid_expression(format!("expected boolean array, got {}", array.data_type()))
    })
}

/// Evaluates `expression` against every row of `batch`. Function calls are resolved through
/// `registry`. The expression should have been bound against the batch's schema first, so that
/// both operands of a binary expression share a type.
pub fn evaluate_expression(
    expression: &Expression,
    batch: &RecordBatch,
    registry: &dyn FunctionRegistry,
) -> DatasetResult<ArrayRef> {
    let num_rows = batch.num_rows();
    match expression {
        // Untyped nulls only survive in unbound expressions; make them boolean so they can take
        // part in junctions
        Expression::Literal(value) if value.is_null() => match value.data_type() {
            DataType::Null => Ok(new_null_array(&DataType::Boolean, num_rows)),
            data_type => Ok(new_null_array(&data_type, num_rows)),
        },
        Expression::Literal(value) => Ok(value.to_array(num_rows)),
        Expression::Column(name) => batch
            .column_by_name(name)
            .cloned()
            .ok_or_else(|| Error::missing_column(format!("No such field: {name}"))),
        Expression::Unary(UnaryExpression { op, expr }) => {
            let input = evaluate_expression(expr, batch, registry)?;
            let output = match op {
                UnaryOperator::Not => not(as_bool_array(&input)?)?,
                UnaryOperator::IsNull => is_null(&input)?,
            };
            Ok(Arc::new(output))
        }
        Expression::Binary(BinaryExpression { op, left, right }) => {
            let left = evaluate_expression(left, batch, registry)?;
            let right = evaluate_expression(right, batch, registry)?;
            apply_binary(*op, &left, &right)
                .map_err(|err| Error::invalid_expression(format!("{expression}: {err}")))
        }
        Expression::Junction(JunctionExpression { op, exprs }) => {
            let combine = match op {
                JunctionOperator::And => and_kleene,
                JunctionOperator::Or => or_kleene,
            };
            let mut inputs = exprs
                .iter()
                .map(|expr| evaluate_expression(expr, batch, registry));
            let Some(first) = inputs.next() else {
                // AND() is true and OR() is false
                let empty = *op == JunctionOperator::And;
                return Ok(Arc::new(BooleanArray::from(vec![empty; num_rows])));
            };
            let mut acc = as_bool_array(&first?)?.clone();
            for input in inputs {
                acc = combine(&acc, as_bool_array(&input?)?)?;
            }
            Ok(Arc::new(acc))
        }
        Expression::Call(call) => evaluate_call(call, batch, registry),
    }
}

fn apply_binary(
    op: BinaryOperator,
    left: &ArrayRef,
    right: &ArrayRef,
) -> Result<ArrayRef, ArrowError> {
    use BinaryOperator::*;
    let compared = match op {
        Plus => return numeric::add(left, right),
        Minus => return numeric::sub(left, right),
        Multiply => return numeric::mul(left, right),
        Divide => return numeric::div(left, right),
        LessThan => cmp::lt(left, right),
        LessThanOrEqual => cmp::lt_eq(left, right),
        GreaterThan => cmp::gt(left, right),
        GreaterThanOrEqual => cmp::gt_eq(left, right),
        Equal => cmp::eq(left, right),
        NotEqual => cmp::neq(left, right),
        Distinct => cmp::distinct(left, right),
    }?;
    Ok(Arc::new(compared))
}

fn evaluate_call(
    call: &CallExpression,
    batch: &RecordBatch,
    registry: &dyn FunctionRegistry,
) -> DatasetResult<ArrayRef> {
    let CallExpression { name, args } = call;
    let function = registry
        .get_function(name)
        .ok_or_else(|| Error::invalid_expression(format!("Unknown function {name}")))?;
    let args: Vec<_> = args
        .iter()
        .map(|arg| evaluate_expression(arg, batch, registry))
        .try_collect()?;
    let result = function.invoke(&args)?;
    if result.len() != batch.num_rows() {
        return Err(Error::invalid_expression(format!(
            "Function {name} returned {} rows for a batch of {}",
            result.len(),
            batch.num_rows()
        )));
    }
    Ok(result)
}

/// Evaluates a boolean `predicate` against `batch`, failing if it produces anything else.
pub fn evaluate_predicate(
    predicate: &Expression,
    batch: &RecordBatch,
    registry: &dyn FunctionRegistry,
) -> DatasetResult<BooleanArray> {
    let result = evaluate_expression(predicate, batch, registry)?;
    Ok(as_bool_array(&result)?.clone())
}
