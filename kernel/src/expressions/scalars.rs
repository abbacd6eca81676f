use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::iter::repeat;
use std::sync::Arc;

use crate::arrow::array::types::{
    Date32Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    TimestampMicrosecondType,
};
use crate::arrow::array::{
    new_null_array, Array, ArrayRef, AsArray, BinaryArray, BooleanArray, Date32Array,
    Float32Array, Float64Array, Int16Array, Int32Array, Int64Array, Int8Array, StringArray,
    TimestampMicrosecondArray,
};
use crate::arrow::compute::{cast_with_options, CastOptions};
use crate::arrow::datatypes::{DataType, TimeUnit};
use crate::{DatasetResult, Error};

/// A single value, which has an explicit type. Null values carry the type they would have had.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// 32bit integer
    Integer(i32),
    /// 64bit integer
    Long(i64),
    /// 16bit integer
    Short(i16),
    /// 8bit integer
    Byte(i8),
    /// 32bit floating point
    Float(f32),
    /// 64bit floating point
    Double(f64),
    /// utf-8 encoded string.
    String(String),
    /// true or false value
    Boolean(bool),
    /// Microsecond precision timestamp, without a time zone.
    Timestamp(i64),
    /// Date stored as a signed 32bit int days since UNIX epoch 1970-01-01
    Date(i32),
    /// Binary data
    Binary(Vec<u8>),
    /// Null value with a given data type.
    Null(DataType),
}

impl Scalar {
    /// Returns the data type of this scalar.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Integer(_) => DataType::Int32,
            Self::Long(_) => DataType::Int64,
            Self::Short(_) => DataType::Int16,
            Self::Byte(_) => DataType::Int8,
            Self::Float(_) => DataType::Float32,
            Self::Double(_) => DataType::Float64,
            Self::String(_) => DataType::Utf8,
            Self::Boolean(_) => DataType::Boolean,
            Self::Timestamp(_) => DataType::Timestamp(TimeUnit::Microsecond, None),
            Self::Date(_) => DataType::Date32,
            Self::Binary(_) => DataType::Binary,
            Self::Null(data_type) => data_type.clone(),
        }
    }

    /// Returns true if this scalar is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }

    /// Materializes this scalar as an arrow array that repeats it `num_rows` times.
    pub fn to_array(&self, num_rows: usize) -> ArrayRef {
        match self {
            Self::Integer(val) => Arc::new(Int32Array::from_value(*val, num_rows)),
            Self::Long(val) => Arc::new(Int64Array::from_value(*val, num_rows)),
            Self::Short(val) => Arc::new(Int16Array::from_value(*val, num_rows)),
            Self::Byte(val) => Arc::new(Int8Array::from_value(*val, num_rows)),
            Self::Float(val) => Arc::new(Float32Array::from_value(*val, num_rows)),
            Self::Double(val) => Arc::new(Float64Array::from_value(*val, num_rows)),
            Self::String(val) => Arc::new(StringArray::from_iter_values(
                repeat(val.as_str()).take(num_rows),
            )),
            Self::Boolean(val) => Arc::new(BooleanArray::from(vec![*val; num_rows])),
            Self::Timestamp(val) => Arc::new(TimestampMicrosecondArray::from_value(*val, num_rows)),
            Self::Date(val) => Arc::new(Date32Array::from_value(*val, num_rows)),
            Self::Binary(val) => Arc::new(BinaryArray::from_iter_values(
                repeat(val.as_slice()).take(num_rows),
            )),
            Self::Null(data_type) => new_null_array(data_type, num_rows),
        }
    }

    /// Extracts the value at `index` of `array` as a scalar.
    pub fn try_from_array(array: &dyn Array, index: usize) -> DatasetResult<Self> {
        if array.is_null(index) {
            return Ok(Self::Null(array.data_type().clone()));
        }
        let scalar = match array.data_type() {
            DataType::Boolean => Self::Boolean(array.as_boolean().value(index)),
            DataType::Int8 => Self::Byte(array.as_primitive::<Int8Type>().value(index)),
            DataType::Int16 => Self::Short(array.as_primitive::<Int16Type>().value(index)),
            DataType::Int32 => Self::Integer(array.as_primitive::<Int32Type>().value(index)),
            DataType::Int64 => Self::Long(array.as_primitive::<Int64Type>().value(index)),
            DataType::Float32 => Self::Float(array.as_primitive::<Float32Type>().value(index)),
            DataType::Float64 => Self::Double(array.as_primitive::<Float64Type>().value(index)),
            DataType::Utf8 => Self::String(array.as_string::<i32>().value(index).to_string()),
            DataType::LargeUtf8 => Self::String(array.as_string::<i64>().value(index).to_string()),
            DataType::Binary => Self::Binary(array.as_binary::<i32>().value(index).to_vec()),
            DataType::Date32 => Self::Date(array.as_primitive::<Date32Type>().value(index)),
            DataType::Timestamp(TimeUnit::Microsecond, None) => {
                Self::Timestamp(array.as_primitive::<TimestampMicrosecondType>().value(index))
            }
            other => {
                return Err(Error::unsupported(format!(
                    "Cannot extract a scalar value of type {other}"
                )))
            }
        };
        Ok(scalar)
    }

    /// Parses the string form of a value (as found in a partition path) into a scalar of
    /// `data_type`.
    pub fn parse(raw: &str, data_type: &DataType) -> DatasetResult<Self> {
        if *data_type == DataType::Utf8 {
            return Ok(Self::String(raw.to_string()));
        }
        let raw = StringArray::from(vec![raw]);
        let parsed = cast_with_options(&raw, data_type, &strict_cast())?;
        Self::try_from_array(parsed.as_ref(), 0)
    }

    /// Converts this scalar to another type, failing if the value cannot be represented.
    pub fn try_cast(&self, data_type: &DataType) -> DatasetResult<Self> {
        if self.data_type() == *data_type {
            return Ok(self.clone());
        }
        if self.is_null() {
            return Ok(Self::Null(data_type.clone()));
        }
        let cast = cast_with_options(&self.to_array(1), data_type, &strict_cast())?;
        Self::try_from_array(cast.as_ref(), 0)
    }

    /// The unquoted string form of this value, as it would be written into a partition path.
    /// Null values have no string form.
    pub fn to_partition_value(&self) -> DatasetResult<Option<String>> {
        match self {
            Self::Null(_) => Ok(None),
            Self::String(val) => Ok(Some(val.clone())),
            other => match other.try_cast(&DataType::Utf8)? {
                Self::String(val) => Ok(Some(val)),
                _ => Err(Error::generic(format!("Cannot format {other} as a string"))),
            },
        }
    }
}

fn strict_cast() -> CastOptions<'static> {
    CastOptions {
        safe: false,
        ..Default::default()
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Long(i) => write!(f, "{i}"),
            Self::Short(i) => write!(f, "{i}"),
            Self::Byte(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::Double(fl) => write!(f, "{fl}"),
            Self::Timestamp(ts) => write!(f, "{ts}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::String(s) => write!(f, "'{s}'"),
            Self::Binary(b) => {
                write!(f, "X'")?;
                for byte in b {
                    write!(f, "{byte:02X}")?;
                }
                write!(f, "'")
            }
            Self::Null(_) => write!(f, "null"),
        }
    }
}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        use Scalar::*;
        match (self, other) {
            // NOTE: null values are incomparable and not equal to each other
            (Null(_), _) | (_, Null(_)) => None,
            (Integer(a), Integer(b)) => a.partial_cmp(b),
            (Long(a), Long(b)) => a.partial_cmp(b),
            (Short(a), Short(b)) => a.partial_cmp(b),
            (Byte(a), Byte(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (String(a), String(b)) => a.partial_cmp(b),
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Timestamp(a), Timestamp(b)) => a.partial_cmp(b),
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Binary(a), Binary(b)) => a.partial_cmp(b),
            // Values of different types are incomparable; callers cast literals beforehand
            _ => None,
        }
    }
}

macro_rules! impl_from_for_scalar {
    ( $( $from:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$from> for Scalar {
                fn from(value: $from) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_scalar!(
    i32 => Integer,
    i64 => Long,
    i16 => Short,
    i8 => Byte,
    f32 => Float,
    f64 => Double,
    bool => Boolean,
    String => String,
    Vec<u8> => Binary,
);

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::String(s.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_array_repeats_value() {
        let array = Scalar::from("Franklin").to_array(3);
        let strings = array.as_string::<i32>();
        assert_eq!(strings.len(), 3);
        assert!(strings.iter().all(|s| s == Some("Franklin")));

        let nulls = Scalar::Null(DataType::Int64).to_array(2);
        assert_eq!(nulls.data_type(), &DataType::Int64);
        assert_eq!(nulls.null_count(), 2);
    }

    #[test]
    fn test_try_from_array() {
        let array = Int32Array::from(vec![Some(4), None]);
        assert_eq!(Scalar::try_from_array(&array, 0).unwrap(), Scalar::Integer(4));
        assert_eq!(
            Scalar::try_from_array(&array, 1).unwrap(),
            Scalar::Null(DataType::Int32)
        );
    }

    #[test]
    fn test_parse_partition_values() {
        assert_eq!(
            Scalar::parse("2024", &DataType::Int32).unwrap(),
            Scalar::Integer(2024)
        );
        assert_eq!(
            Scalar::parse("San Francisco", &DataType::Utf8).unwrap(),
            Scalar::from("San Francisco")
        );
        assert_eq!(
            Scalar::parse("true", &DataType::Boolean).unwrap(),
            Scalar::Boolean(true)
        );
        assert_eq!(
            Scalar::parse("1970-01-11", &DataType::Date32).unwrap(),
            Scalar::Date(10)
        );
        assert!(Scalar::parse("not a number", &DataType::Int64).is_err());
    }

    #[test]
    fn test_try_cast() {
        assert_eq!(
            Scalar::Integer(1).try_cast(&DataType::Int64).unwrap(),
            Scalar::Long(1)
        );
        assert_eq!(
            Scalar::Double(3.0).try_cast(&DataType::Float32).unwrap(),
            Scalar::Float(3.0)
        );
        assert_eq!(
            Scalar::Null(DataType::Int32)
                .try_cast(&DataType::Utf8)
                .unwrap(),
            Scalar::Null(DataType::Utf8)
        );
        assert!(Scalar::Long(1 << 40).try_cast(&DataType::Int32).is_err());
    }

    #[test]
    fn test_partition_value() {
        assert_eq!(
            Scalar::Integer(5).to_partition_value().unwrap(),
            Some("5".to_string())
        );
        assert_eq!(
            Scalar::from("CA").to_partition_value().unwrap(),
            Some("CA".to_string())
        );
        assert_eq!(Scalar::Null(DataType::Utf8).to_partition_value().unwrap(), None);
    }

    #[test]
    fn test_partial_cmp() {
        assert_eq!(
            Scalar::Integer(1).partial_cmp(&Scalar::Integer(2)),
            Some(Ordering::Less)
        );
        assert_eq!(Scalar::Integer(1).partial_cmp(&Scalar::Long(1)), None);
        assert_eq!(
            Scalar::Null(DataType::Int32).partial_cmp(&Scalar::Null(DataType::Int32)),
            None
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Scalar::from("NY").to_string(), "'NY'");
        assert_eq!(Scalar::Binary(vec![0xab, 1]).to_string(), "X'AB01'");
        assert_eq!(Scalar::Null(DataType::Int8).to_string(), "null");
    }
}
