//! Execution support: evaluating bound expressions over arrow record batches, and the executor
//! abstraction that scans and writes schedule their tasks on.

pub mod arrow_expression;
pub mod executor;
