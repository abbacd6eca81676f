//! Partitioning schemes map directory names to partition field values and back.
//!
//! Reading a dataset uses [`Partitioning::parse_segment`] to turn every directory below the base
//! directory into a partition expression; writing uses [`Partitioning::format_path`] to derive the
//! directory a row belongs in from its partition key values.

use std::fmt::Debug;
use std::sync::Arc;

use itertools::Itertools;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::arrow::datatypes::{Field, FieldRef};
use crate::expressions::{ColumnName, Expression, Scalar};
use crate::schema::SchemaRef;
use crate::utils::require;
use crate::{DatasetResult, Error};

pub(crate) use tree::PartitionTree;

mod tree;

pub type PartitioningRef = Arc<dyn Partitioning>;

/// The value Hive-style paths use for null partition values.
pub const DEFAULT_HIVE_NULL_FALLBACK: &str = "__HIVE_DEFAULT_PARTITION__";

/// Bytes escaped in partition path segments: the path delimiter, the escape character, the Hive
/// key separator, and the characters object stores reject in keys.
const SEGMENT_ESCAPES: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b'=')
    .add(b'\\')
    .add(b'{')
    .add(b'}')
    .add(b'[')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'~')
    .add(b'#')
    .add(b'|')
    .add(b'*')
    .add(b'?');

/// Escapes `raw` for use as (part of) a single path segment.
pub fn escape_segment(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT_ESCAPES).to_string()
}

/// Reverses [`escape_segment`].
pub fn unescape_segment(segment: &str) -> DatasetResult<String> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|err| Error::invalid_partition_path(segment, format!("invalid escape: {err}")))
}

/// A partitioning scheme.
pub trait Partitioning: Send + Sync + Debug {
    /// A short name, e.g. `"hive"`.
    fn type_name(&self) -> &str;

    /// The partition fields, in path order.
    fn schema(&self) -> &SchemaRef;

    /// The field bindings encoded by the directory `segment`, found `depth` levels below the
    /// dataset's base directory. A segment that encodes nothing yields no bindings.
    fn parse_segment(&self, depth: usize, segment: &str) -> DatasetResult<Vec<(ColumnName, Scalar)>>;

    /// The relative directory for rows whose partition fields take `values`, given in the order of
    /// [`Self::schema`]. Segments are separated by `/` and escaped with [`escape_segment`], so a
    /// value never spans more than one segment.
    fn format_path(&self, values: &[Scalar]) -> DatasetResult<String>;

    /// The partition expression of the directory `segment`: the conjunction of `field = value` (or
    /// `field IS NULL`) over its bindings, or `true` if there are none.
    fn segment_expression(&self, depth: usize, segment: &str) -> DatasetResult<Expression> {
        let bindings = self.parse_segment(depth, segment)?;
        Ok(Expression::conjunction(bindings.into_iter().map(
            |(name, value)| match value {
                Scalar::Null(_) => Expression::column(name).is_null(),
                value => Expression::column(name).eq(Expression::literal(value)),
            },
        )))
    }
}

fn field_at<'a>(schema: &'a SchemaRef, depth: usize) -> Option<&'a FieldRef> {
    schema.fields().get(depth)
}

fn parse_value(field: &Field, raw: &str, segment: &str) -> DatasetResult<Scalar> {
    Scalar::parse(raw, field.data_type()).map_err(|err| {
        Error::invalid_partition_path(
            segment,
            format!("cannot parse '{raw}' as {} for field {}: {err}", field.data_type(), field.name()),
        )
    })
}

fn check_arity(partitioning: &dyn Partitioning, values: &[Scalar]) -> DatasetResult<()> {
    let expected = partitioning.schema().fields().len();
    require!(
        values.len() == expected,
        Error::generic(format!(
            "{} partitioning expects {expected} values, got {}",
            partitioning.type_name(),
            values.len()
        ))
    );
    Ok(())
}

/// Partitioning where the directory at depth *i* holds the bare value of field *i*, e.g.
/// `2009/11` for the fields `year` and `month`. Directories deeper than the number of fields are
/// ignored. Null values cannot be represented.
#[derive(Debug, Clone)]
pub struct DirectoryPartitioning {
    schema: SchemaRef,
}

impl DirectoryPartitioning {
    pub fn new(schema: SchemaRef) -> Self {
        Self { schema }
    }
}

impl Partitioning for DirectoryPartitioning {
    fn type_name(&self) -> &str {
        "directory"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn parse_segment(&self, depth: usize, segment: &str) -> DatasetResult<Vec<(ColumnName, Scalar)>> {
        let Some(field) = field_at(&self.schema, depth) else {
            return Ok(vec![]);
        };
        let value = parse_value(field, &unescape_segment(segment)?, segment)?;
        Ok(vec![(ColumnName::new(field.name()), value)])
    }

    fn format_path(&self, values: &[Scalar]) -> DatasetResult<String> {
        check_arity(self, values)?;
        let segments: Vec<_> = values
            .iter()
            .zip(self.schema.fields())
            .map(|(value, field)| match value.to_partition_value()? {
                Some(raw) if !raw.is_empty() => Ok(escape_segment(&raw)),
                Some(_) => Err(Error::unsupported(format!(
                    "Directory partitioning cannot encode an empty value for {}",
                    field.name()
                ))),
                None => Err(Error::unsupported(format!(
                    "Directory partitioning cannot encode a null value for {}",
                    field.name()
                ))),
            })
            .try_collect()?;
        Ok(segments.join("/"))
    }
}

/// Partitioning where every directory names its field, as in `year=2009/month=11`. Segments
/// without a `=` and keys that are not partition fields are ignored. Null values are written as
/// the null fallback, [`DEFAULT_HIVE_NULL_FALLBACK`] unless configured otherwise.
#[derive(Debug, Clone)]
pub struct HivePartitioning {
    schema: SchemaRef,
    null_fallback: String,
}

impl HivePartitioning {
    pub fn new(schema: SchemaRef) -> Self {
        Self {
            schema,
            null_fallback: DEFAULT_HIVE_NULL_FALLBACK.to_string(),
        }
    }

    pub fn with_null_fallback(mut self, null_fallback: impl Into<String>) -> Self {
        self.null_fallback = null_fallback.into();
        self
    }

    pub fn null_fallback(&self) -> &str {
        &self.null_fallback
    }
}

impl Partitioning for HivePartitioning {
    fn type_name(&self) -> &str {
        "hive"
    }

    fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    fn parse_segment(&self, _depth: usize, segment: &str) -> DatasetResult<Vec<(ColumnName, Scalar)>> {
        let Some((key, raw)) = segment.split_once('=') else {
            return Ok(vec![]);
        };
        let key = unescape_segment(key)?;
        let Ok(field) = self.schema.field_with_name(&key) else {
            return Ok(vec![]);
        };
        let value = if raw == self.null_fallback {
            Scalar::Null(field.data_type().clone())
        } else {
            parse_value(field, &unescape_segment(raw)?, segment)?
        };
        Ok(vec![(ColumnName::new(key), value)])
    }

    fn format_path(&self, values: &[Scalar]) -> DatasetResult<String> {
        check_arity(self, values)?;
        let segments: Vec<_> = values
            .iter()
            .zip(self.schema.fields())
            .map(|(value, field)| -> DatasetResult<_> {
                let raw = match value.to_partition_value()? {
                    Some(raw) => escape_segment(&raw),
                    None => self.null_fallback.clone(),
                };
                Ok(format!("{}={raw}", escape_segment(field.name())))
            })
            .try_collect()?;
        Ok(segments.join("/"))
    }
}
