//! Provides utilities to check whether data of one schema can be presented under another. The
//! api is [`SchemaComparison::can_project_onto`].
//!
//! # Examples
//!  ```rust, ignore
//!  # use dataset_kernel::arrow::datatypes::{DataType, Field, Schema};
//!  let schema = Schema::new(vec![
//!     Field::new("id", DataType::Int64, false),
//!     Field::new("value", DataType::Utf8, true),
//!  ]);
//!  let new_schema = Schema::new(vec![
//!     Field::new("id", DataType::Int64, true),
//!     Field::new("year", DataType::Int32, true),
//!  ]);
//!  // Compatible: `value` is dropped and the new column `year` is nullable
//!  assert!(schema.can_project_onto(&new_schema).is_ok());
//!  ````
use std::collections::HashMap;

use crate::arrow::datatypes::{DataType, Field, Fields, Schema};
use crate::utils::require;

/// The nullability flag of a schema's field. This can be compared with a target field's
/// nullability flag using [`Nullable::can_project_onto`].
#[derive(Clone, Copy)]
pub(crate) struct Nullable(bool);

/// Represents the ways a schema comparison can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProjectionError {
    #[error("The nullability was tightened for field {0}")]
    NullabilityTightening(String),
    #[error("Schema is invalid: field {0} appears more than once")]
    DuplicateField(String),
    #[error("Field {0} is not nullable, but is absent from the data")]
    NewNonNullableColumn(String),
    #[error("Field {name} has type {existing}, which does not match {requested}")]
    TypeMismatch {
        name: String,
        existing: DataType,
        requested: DataType,
    },
}

/// A [`std::result::Result`] that has the schema comparison [`ProjectionError`] as the error
/// variant.
pub(crate) type SchemaComparisonResult = Result<(), ProjectionError>;

/// Represents a schema compatibility check for the type. If data of `self` can be presented as
/// `target`, this function returns `Ok(())`. Otherwise, this function returns `Err`.
pub(crate) trait SchemaComparison {
    fn can_project_onto(&self, target: &Self) -> SchemaComparisonResult;
}

impl Nullable {
    /// Returns `Ok` if the target nullability is the same or wider than the nullability of self.
    fn can_project_onto(&self, target: &Nullable, name: &str) -> SchemaComparisonResult {
        // The case to avoid is a nullable column presented as non-nullable, i.e.
        // !target && existing. Hence we check that target || !existing.
        require!(
            target.0 || !self.0,
            ProjectionError::NullabilityTightening(name.to_string())
        );
        Ok(())
    }
}

impl SchemaComparison for Field {
    /// Returns `Ok` if this [`Field`] can be presented as `target`. Two requirements must be
    /// satisfied:
    ///     1. The target field mustn't be non-nullable if this [`Field`] is nullable.
    ///     2. This field's data type can be presented as the target's data type.
    fn can_project_onto(&self, target: &Self) -> SchemaComparisonResult {
        Nullable(self.is_nullable()).can_project_onto(&Nullable(target.is_nullable()), self.name())?;
        can_project_data_type(self.name(), self.data_type(), target.data_type())
    }
}

impl SchemaComparison for Fields {
    /// Returns `Ok` if these fields can be presented as `target`. This is the case when:
    ///     1. Neither set of fields contains a duplicate name.
    ///     2. Every field present on both sides can be projected (see [`Field::can_project_onto`]).
    ///     3. Every field present only in `target` is nullable.
    ///
    /// Fields absent from `target` are simply dropped.
    fn can_project_onto(&self, target: &Self) -> SchemaComparisonResult {
        let existing = field_map(self)?;
        field_map(target)?;
        for target_field in target.iter() {
            match existing.get(target_field.name().as_str()) {
                Some(existing_field) => existing_field.can_project_onto(target_field)?,
                None => require!(
                    target_field.is_nullable(),
                    ProjectionError::NewNonNullableColumn(target_field.name().clone())
                ),
            }
        }
        Ok(())
    }
}

impl SchemaComparison for Schema {
    fn can_project_onto(&self, target: &Self) -> SchemaComparisonResult {
        self.fields().can_project_onto(target.fields())
    }
}

fn field_map(fields: &Fields) -> Result<HashMap<&str, &Field>, ProjectionError> {
    let mut map = HashMap::with_capacity(fields.len());
    for field in fields.iter() {
        require!(
            map.insert(field.name().as_str(), field.as_ref()).is_none(),
            ProjectionError::DuplicateField(field.name().clone())
        );
    }
    Ok(map)
}

/// Returns `Ok` if data of type `existing` can be presented as `requested`. This is the case when:
///     1. The data types are the same.
///     2. For lists and structs, the nested types are compatible as defined by
///        [`SchemaComparison`], and nullability of nested values is not tightened.
fn can_project_data_type(
    name: &str,
    existing: &DataType,
    requested: &DataType,
) -> SchemaComparisonResult {
    match (existing, requested) {
        (DataType::List(existing_item), DataType::List(requested_item))
        | (DataType::LargeList(existing_item), DataType::LargeList(requested_item)) => {
            Nullable(existing_item.is_nullable())
                .can_project_onto(&Nullable(requested_item.is_nullable()), name)?;
            can_project_data_type(name, existing_item.data_type(), requested_item.data_type())
        }
        (DataType::Struct(existing_fields), DataType::Struct(requested_fields)) => {
            existing_fields.can_project_onto(requested_fields)
        }
        (a, b) => {
            require!(
                a == b,
                ProjectionError::TypeMismatch {
                    name: name.to_string(),
                    existing: a.clone(),
                    requested: b.clone(),
                }
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("i32", DataType::Int32, true),
            Field::new("f64", DataType::Float64, true),
            Field::new("id", DataType::Int64, false),
        ])
    }

    #[test]
    fn can_project_is_reflexive() {
        let nested = Field::new_struct(
            "nested",
            vec![Field::new("name", DataType::Utf8, false)],
            true,
        );
        let list = Field::new_list("list", Field::new_list_field(DataType::Int64, false), true);
        let schema = Schema::new(vec![Field::new("id", DataType::Int64, false), nested, list]);
        assert!(schema.can_project_onto(&schema).is_ok());
    }

    #[test]
    fn dropping_fields_is_allowed() {
        let target = Schema::new(vec![Field::new("i32", DataType::Int32, true)]);
        assert!(schema().can_project_onto(&target).is_ok());
        assert!(schema().can_project_onto(&Schema::empty()).is_ok());
    }

    #[test]
    fn adding_nullable_fields_is_allowed() {
        let mut fields: Vec<Field> = schema().fields().iter().map(|f| f.as_ref().clone()).collect();
        fields.push(Field::new("str", DataType::Utf8, true));
        assert!(schema().can_project_onto(&Schema::new(fields)).is_ok());
    }

    #[test]
    fn adding_non_nullable_fields_fails() {
        let target = Schema::new(vec![Field::new("str", DataType::Utf8, false)]);
        assert_eq!(
            schema().can_project_onto(&target),
            Err(ProjectionError::NewNonNullableColumn("str".to_string()))
        );
    }

    #[test]
    fn changing_types_fails() {
        let target = Schema::new(vec![Field::new("i32", DataType::Utf8, true)]);
        assert!(matches!(
            schema().can_project_onto(&target),
            Err(ProjectionError::TypeMismatch { name, .. }) if name == "i32"
        ));
    }

    #[test]
    fn nullability_can_widen_but_not_tighten() {
        let widened = Schema::new(vec![Field::new("id", DataType::Int64, true)]);
        assert!(schema().can_project_onto(&widened).is_ok());

        let tightened = Schema::new(vec![Field::new("i32", DataType::Int32, false)]);
        assert_eq!(
            schema().can_project_onto(&tightened),
            Err(ProjectionError::NullabilityTightening("i32".to_string()))
        );
    }

    #[test]
    fn nested_nullability_tightening_fails() {
        let existing = Schema::new(vec![Field::new_list(
            "list",
            Field::new_list_field(DataType::Int64, true),
            true,
        )]);
        let target = Schema::new(vec![Field::new_list(
            "list",
            Field::new_list_field(DataType::Int64, false),
            true,
        )]);
        assert!(matches!(
            existing.can_project_onto(&target),
            Err(ProjectionError::NullabilityTightening(_))
        ));
    }

    #[test]
    fn duplicate_fields_are_invalid() {
        let fields = Fields::from(vec![
            Arc::new(Field::new("a", DataType::Int32, true)),
            Arc::new(Field::new("a", DataType::Int32, true)),
        ]);
        let target = Fields::from(vec![Field::new("a", DataType::Int32, true)]);
        assert_eq!(
            fields.can_project_onto(&target),
            Err(ProjectionError::DuplicateField("a".to_string()))
        );
    }
}
