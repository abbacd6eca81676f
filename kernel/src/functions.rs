//! Named scalar functions that expressions can call.
//!
//! There is no process-wide registry: a [`FunctionRegistry`] is handed to the scanner (see
//! [`ScannerBuilder::with_function_registry`](crate::scan::ScannerBuilder::with_function_registry)),
//! which makes it easy to substitute deterministic stand-ins in tests.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

use crate::arrow::array::ArrayRef;
use crate::arrow::compute::cast;
use crate::arrow::compute::kernels::numeric::{add, div, mul, sub};
use crate::arrow::datatypes::DataType;
use crate::expressions::BinaryOperator;
use crate::utils::require;
use crate::{DatasetResult, Error};

pub type ScalarFunctionRef = Arc<dyn ScalarFunction>;

/// A function from equally long argument arrays to a result array of the same length.
pub trait ScalarFunction: Send + Sync + Debug {
    /// The name expressions use to call this function.
    fn name(&self) -> &str;

    /// Validates the argument types and returns the type of the result.
    fn return_type(&self, arg_types: &[DataType]) -> DatasetResult<DataType>;

    /// Applies the function. Arguments have already been validated by [`Self::return_type`].
    fn invoke(&self, args: &[ArrayRef]) -> DatasetResult<ArrayRef>;
}

/// Looks up functions by name.
pub trait FunctionRegistry: Send + Sync + Debug {
    fn get_function(&self, name: &str) -> Option<ScalarFunctionRef>;
}

/// A [`FunctionRegistry`] backed by a map. [`DefaultFunctionRegistry::new`] pre-registers the
/// arithmetic functions `add`, `subtract`, `multiply` and `divide`.
#[derive(Debug, Clone)]
pub struct DefaultFunctionRegistry {
    functions: HashMap<String, ScalarFunctionRef>,
}

impl DefaultFunctionRegistry {
    /// A registry with the built-in functions.
    pub fn new() -> Self {
        let mut functions: HashMap<String, ScalarFunctionRef> = HashMap::new();
        for (name, op) in [
            ("add", BinaryOperator::Plus),
            ("subtract", BinaryOperator::Minus),
            ("multiply", BinaryOperator::Multiply),
            ("divide", BinaryOperator::Divide),
        ] {
            functions.insert(name.to_string(), Arc::new(ArithmeticFunction { name, op }));
        }
        Self { functions }
    }

    /// A registry with no functions at all.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// Registers a function. Fails if a function of the same name already exists.
    pub fn register(&mut self, function: ScalarFunctionRef) -> DatasetResult<()> {
        let name = function.name().to_string();
        require!(
            !self.functions.contains_key(&name),
            Error::generic(format!("Function {name} is already registered"))
        );
        self.functions.insert(name, function);
        Ok(())
    }

    /// Builder-style variant of [`Self::register`].
    pub fn with_function(mut self, function: ScalarFunctionRef) -> DatasetResult<Self> {
        self.register(function)?;
        Ok(self)
    }
}

impl Default for DefaultFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry for DefaultFunctionRegistry {
    fn get_function(&self, name: &str) -> Option<ScalarFunctionRef> {
        self.functions.get(name).cloned()
    }
}

/// The wider of two numeric types, e.g. `Int64` for `Int32` and `Int64`.
pub(crate) fn common_numeric_type(a: &DataType, b: &DataType) -> Option<DataType> {
    fn rank(data_type: &DataType) -> Option<u8> {
        match data_type {
            DataType::Int8 => Some(0),
            DataType::Int16 => Some(1),
            DataType::Int32 => Some(2),
            DataType::Int64 => Some(3),
            DataType::Float32 => Some(4),
            DataType::Float64 => Some(5),
            _ => None,
        }
    }
    let (rank_a, rank_b) = (rank(a)?, rank(b)?);
    Some(if rank_a >= rank_b { a.clone() } else { b.clone() })
}

#[derive(Debug)]
struct ArithmeticFunction {
    name: &'static str,
    op: BinaryOperator,
}

impl ScalarFunction for ArithmeticFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn return_type(&self, arg_types: &[DataType]) -> DatasetResult<DataType> {
        let [left, right] = arg_types else {
            return Err(Error::validation(format!(
                "{} expects 2 arguments, got {}",
                self.name,
                arg_types.len()
            )));
        };
        common_numeric_type(left, right).ok_or_else(|| {
            Error::validation(format!(
                "{} expects numeric arguments, got {left} and {right}",
                self.name
            ))
        })
    }

    fn invoke(&self, args: &[ArrayRef]) -> DatasetResult<ArrayRef> {
        let [left, right] = args else {
            return Err(Error::invalid_expression(format!(
                "{} expects 2 arguments",
                self.name
            )));
        };
        let result_type = self.return_type(&[left.data_type().clone(), right.data_type().clone()])?;
        let left = cast(left, &result_type)?;
        let right = cast(right, &result_type)?;
        let result = match self.op {
            BinaryOperator::Plus => add(&left, &right)?,
            BinaryOperator::Minus => sub(&left, &right)?,
            BinaryOperator::Multiply => mul(&left, &right)?,
            BinaryOperator::Divide => div(&left, &right)?,
            op => {
                return Err(Error::invalid_expression(format!(
                    "{op} is not an arithmetic operator"
                )))
            }
        };
        Ok(result)
    }
}
