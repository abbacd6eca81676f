//! Schema handling: checking that one schema can stand in for another, and presenting record
//! batches of a fragment's physical schema under the dataset's logical schema.

use std::sync::Arc;

use crate::arrow::array::{new_null_array, ArrayRef, RecordBatch, RecordBatchOptions};
use crate::arrow::datatypes::Schema;
use crate::expressions::KnownFieldValues;
use crate::DatasetResult;

pub use crate::arrow::datatypes::SchemaRef;
pub use compare::ProjectionError;
pub(crate) use compare::SchemaComparison;

mod compare;

/// Checks that data described by `existing` can be presented as `target`: shared fields keep
/// their type and do not tighten nullability, and fields new in `target` are nullable. Fields
/// absent from `target` are dropped.
pub fn check_projectable(existing: &Schema, target: &Schema) -> DatasetResult<()> {
    existing.can_project_onto(target)?;
    Ok(())
}

/// Presents `batch` under `target`. Columns are matched by name. A target column missing from the
/// batch is filled from `known` (a fragment's partition values) if possible, and with nulls
/// otherwise. Columns of the batch absent from `target` are dropped.
pub(crate) fn project_batch(
    batch: &RecordBatch,
    target: &SchemaRef,
    known: &KnownFieldValues,
) -> DatasetResult<RecordBatch> {
    let num_rows = batch.num_rows();
    let columns = target
        .fields()
        .iter()
        .map(|field| -> DatasetResult<ArrayRef> {
            if let Some(column) = batch.column_by_name(field.name()) {
                let existing = batch
                    .schema_ref()
                    .field_with_name(field.name())?
                    .clone()
                    .with_nullable(column.null_count() > 0);
                existing.can_project_onto(field.as_ref())?;
                return Ok(column.clone());
            }
            match known.get(field.name().as_str()) {
                Some(value) => Ok(value.try_cast(field.data_type())?.to_array(num_rows)),
                None => {
                    // Absent non-nullable fields fail when the batch is assembled below
                    Ok(new_null_array(field.data_type(), num_rows))
                }
            }
        })
        .collect::<DatasetResult<Vec<_>>>()?;
    let options = RecordBatchOptions::new().with_row_count(Some(num_rows));
    Ok(RecordBatch::try_new_with_options(
        Arc::clone(target),
        columns,
        &options,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::array::{AsArray, Int32Array, StringArray};
    use crate::arrow::datatypes::{DataType, Field, Int32Type};
    use crate::expressions::{ColumnName, Scalar};

    #[test]
    fn test_project_batch_fills_partition_and_missing_columns() {
        let physical = Arc::new(Schema::new(vec![
            Field::new("value", DataType::Int32, false),
            Field::new("dropped", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            physical,
            vec![
                Arc::new(Int32Array::from(vec![1, 2])),
                Arc::new(StringArray::from(vec!["x", "y"])),
            ],
        )
        .unwrap();
        let target = Arc::new(Schema::new(vec![
            Field::new("state", DataType::Utf8, true),
            Field::new("value", DataType::Int32, true),
            Field::new("extra", DataType::Int64, true),
        ]));
        let known = KnownFieldValues::from([(ColumnName::new("state"), Scalar::from("CA"))]);

        let projected = project_batch(&batch, &target, &known).unwrap();
        assert_eq!(projected.schema(), target);
        let states = projected.column(0).as_string::<i32>();
        assert!(states.iter().all(|s| s == Some("CA")));
        assert_eq!(projected.column(1).as_primitive::<Int32Type>().values(), &[1, 2]);
        assert_eq!(projected.column(2).null_count(), 2);
    }

    #[test]
    fn test_project_batch_rejects_type_changes() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("value", DataType::Int32, true)])),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )
        .unwrap();
        let target = Arc::new(Schema::new(vec![Field::new("value", DataType::Utf8, true)]));
        let err = project_batch(&batch, &target, &KnownFieldValues::new()).unwrap_err();
        assert!(err.is_validation(), "{err}");
    }

    #[test]
    fn test_project_batch_rejects_absent_non_nullable() {
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("value", DataType::Int32, true)])),
            vec![Arc::new(Int32Array::from(vec![1]))],
        )
        .unwrap();
        let target = Arc::new(Schema::new(vec![Field::new("other", DataType::Int32, false)]));
        assert!(project_batch(&batch, &target, &KnownFieldValues::new()).is_err());
    }
}
