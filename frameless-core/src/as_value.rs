use crate::{Error, Result, Value, truncate_long};
use std::{any, borrow::Cow};
use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339,
    macros::format_description,
};
use uuid::Uuid;

/// Conversion between native Rust types and the dynamically typed [`Value`].
///
/// `try_from_value` is lenient on purpose of reading from different backends: integers accept
/// any width that fits, strings accept blobs holding UTF-8, JSON accepts its text encoding.
///
/// ```rust
/// use frameless_core::{AsValue, Value};
/// let v = 42i64.as_value();
/// assert_eq!(v, Value::Int64(Some(42)));
/// let n: i32 = AsValue::try_from_value(v).unwrap();
/// assert_eq!(n, 42);
/// ```
pub trait AsValue {
    /// Typed NULL for this type.
    fn as_empty_value() -> Value;
    fn as_value(self) -> Value;
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
}

impl<T: AsValue> From<T> for Value {
    fn from(value: T) -> Self {
        value.as_value()
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Varchar(Some(value.into()))
    }
}

fn mismatch<T>(value: &Value) -> Error {
    Error::msg(format!(
        "Cannot convert {} to {}",
        truncate_long!(format!("{value:?}")),
        any::type_name::<T>(),
    ))
}

macro_rules! impl_as_value {
    ($source:ty, $destination:path) => {
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                $destination(None)
            }
            fn as_value(self) -> Value {
                $destination(Some(self as _))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                let out_of_range = |v: &dyn std::fmt::Display| {
                    Error::msg(format!(
                        "Value {v} is out of range for {}",
                        any::type_name::<Self>()
                    ))
                };
                match value {
                    Value::Int32(Some(v)) => <$source>::try_from(v).map_err(|_| out_of_range(&v)),
                    Value::Int64(Some(v)) => <$source>::try_from(v).map_err(|_| out_of_range(&v)),
                    Value::UInt64(Some(v)) => <$source>::try_from(v).map_err(|_| out_of_range(&v)),
                    Value::Boolean(Some(v)) => Ok(v as _),
                    Value::Varchar(Some(ref v)) => v.trim().parse::<$source>().map_err(|e| {
                        Error::new(e).context(format!(
                            "Cannot parse `{}` as {}",
                            truncate_long!(v),
                            any::type_name::<Self>()
                        ))
                    }),
                    _ => Err(mismatch::<Self>(&value)),
                }
            }
        }
    };
}
impl_as_value!(i32, Value::Int32);
impl_as_value!(i64, Value::Int64);
impl_as_value!(u64, Value::UInt64);

impl AsValue for u32 {
    fn as_empty_value() -> Value {
        Value::Int64(None)
    }
    fn as_value(self) -> Value {
        Value::Int64(Some(self as _))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        let v = i64::try_from_value(value)?;
        u32::try_from(v).map_err(|_| Error::msg(format!("Value {v} is out of range for u32")))
    }
}

impl AsValue for bool {
    fn as_empty_value() -> Value {
        Value::Boolean(None)
    }
    fn as_value(self) -> Value {
        Value::Boolean(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(Some(v)) => Ok(v),
            Value::Int32(Some(v)) => Ok(v != 0),
            Value::Int64(Some(v)) => Ok(v != 0),
            Value::UInt64(Some(v)) => Ok(v != 0),
            Value::Varchar(Some(ref v)) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(mismatch::<Self>(&value)),
            },
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for f64 {
    fn as_empty_value() -> Value {
        Value::Float64(None)
    }
    fn as_value(self) -> Value {
        Value::Float64(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Float64(Some(v)) => Ok(v),
            Value::Int32(Some(v)) => Ok(v as _),
            Value::Int64(Some(v)) => Ok(v as _),
            Value::UInt64(Some(v)) => Ok(v as _),
            Value::Varchar(Some(ref v)) => v
                .trim()
                .parse()
                .map_err(|e| Error::new(e).context(format!("Cannot parse `{v}` as f64"))),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for String {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(Some(v)) => Ok(v),
            Value::Blob(Some(v)) => String::from_utf8(v.into_vec())
                .map_err(|e| Error::new(e).context("Cannot convert a blob to String")),
            Value::Json(Some(serde_json::Value::String(v))) => Ok(v),
            Value::Json(Some(v)) => Ok(v.to_string()),
            Value::Uuid(Some(v)) => Ok(v.to_string()),
            Value::Int32(Some(v)) => Ok(v.to_string()),
            Value::Int64(Some(v)) => Ok(v.to_string()),
            Value::UInt64(Some(v)) => Ok(v.to_string()),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl<'a> AsValue for Cow<'a, str> {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self.into_owned()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        String::try_from_value(value).map(Cow::Owned)
    }
}

impl AsValue for Vec<u8> {
    fn as_empty_value() -> Value {
        Value::Blob(None)
    }
    fn as_value(self) -> Value {
        Value::Blob(Some(self.into_boxed_slice()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(Some(v)) => Ok(v.into_vec()),
            Value::Varchar(Some(v)) => Ok(v.into_bytes()),
            Value::Json(Some(v)) => Ok(serde_json::to_vec(&v)?),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for serde_json::Value {
    fn as_empty_value() -> Value {
        Value::Json(None)
    }
    fn as_value(self) -> Value {
        Value::Json(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Json(Some(v)) => Ok(v),
            Value::Varchar(Some(v)) => serde_json::from_str(&v).map_err(|e| {
                Error::new(e).context(format!("Cannot parse `{}` as json", truncate_long!(v)))
            }),
            Value::Blob(Some(v)) => serde_json::from_slice(&v)
                .map_err(|e| Error::new(e).context("Cannot parse a blob as json")),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for Uuid {
    fn as_empty_value() -> Value {
        Value::Uuid(None)
    }
    fn as_value(self) -> Value {
        Value::Uuid(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Uuid(Some(v)) => Ok(v),
            Value::Varchar(Some(ref v)) => Uuid::parse_str(v.trim())
                .map_err(|e| Error::new(e).context(format!("Cannot parse `{v}` as uuid"))),
            Value::Blob(Some(ref v)) if v.len() == 16 => Ok(Uuid::from_slice(v)?),
            Value::Blob(Some(ref v)) => Uuid::try_parse_ascii(v)
                .map_err(|e| Error::new(e).context("Cannot parse a blob as uuid")),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

fn parse_timestamp(input: &str) -> Result<PrimitiveDateTime> {
    let space = format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let t = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
    );
    let input = input.trim();
    PrimitiveDateTime::parse(input, space)
        .or_else(|_| PrimitiveDateTime::parse(input, t))
        .or_else(|_| OffsetDateTime::parse(input, &Rfc3339).map(to_utc_primitive))
        .map_err(|e| Error::new(e).context(format!("Cannot parse `{input}` as a timestamp")))
}

fn to_utc_primitive(v: OffsetDateTime) -> PrimitiveDateTime {
    let v = v.to_offset(time::UtcOffset::UTC);
    PrimitiveDateTime::new(v.date(), v.time())
}

impl AsValue for PrimitiveDateTime {
    fn as_empty_value() -> Value {
        Value::Timestamp(None)
    }
    fn as_value(self) -> Value {
        Value::Timestamp(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Timestamp(Some(v)) => Ok(v),
            Value::TimestampWithTimezone(Some(v)) => Ok(to_utc_primitive(v)),
            Value::Varchar(Some(ref v)) => parse_timestamp(v),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for OffsetDateTime {
    fn as_empty_value() -> Value {
        Value::TimestampWithTimezone(None)
    }
    fn as_value(self) -> Value {
        Value::TimestampWithTimezone(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::TimestampWithTimezone(Some(v)) => Ok(v),
            Value::Timestamp(Some(v)) => Ok(v.assume_utc()),
            Value::Varchar(Some(ref v)) => OffsetDateTime::parse(v.trim(), &Rfc3339)
                .or_else(|_| parse_timestamp(v).map(PrimitiveDateTime::assume_utc)),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl<T: AsValue> AsValue for Option<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => T::as_empty_value(),
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::try_from_value(value).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn integers_accept_any_width_in_range() {
        assert_eq!(i64::try_from_value(Value::Int32(Some(7))).unwrap(), 7);
        assert_eq!(i32::try_from_value(Value::UInt64(Some(7))).unwrap(), 7);
        assert_eq!(u64::try_from_value(Value::Varchar(Some(" 12 ".into()))).unwrap(), 12);
        assert!(i32::try_from_value(Value::Int64(Some(i64::MAX))).is_err());
        assert!(u64::try_from_value(Value::Int64(Some(-1))).is_err());
    }

    #[test]
    fn strings_and_blobs() {
        let s = String::try_from_value(Value::Blob(Some(b"hello".to_vec().into()))).unwrap();
        assert_eq!(s, "hello");
        let b = Vec::<u8>::try_from_value(Value::Varchar(Some("abc".into()))).unwrap();
        assert_eq!(b, b"abc");
        assert!(String::try_from_value(Value::Boolean(Some(true))).is_err());
    }

    #[test]
    fn json_from_text() {
        let v = serde_json::Value::try_from_value(Value::Varchar(Some(r#"{"a":1}"#.into())))
            .unwrap();
        assert_eq!(v["a"], 1);
        let v = serde_json::Value::try_from_value(Value::Blob(Some(b"[1,2]".to_vec().into())))
            .unwrap();
        assert_eq!(v, serde_json::json!([1, 2]));
    }

    #[test]
    fn optional_values() {
        assert_eq!(Option::<i64>::None.as_value(), Value::Int64(None));
        assert_eq!(Option::<i64>::try_from_value(Value::Null).unwrap(), None);
        assert_eq!(Option::<String>::try_from_value(Value::Varchar(None)).unwrap(), None);
        assert_eq!(
            Option::<bool>::try_from_value(Value::Int32(Some(1))).unwrap(),
            Some(true)
        );
    }

    #[test]
    fn timestamps() {
        let expected = datetime!(2024-03-01 10:20:30.5);
        let parsed =
            PrimitiveDateTime::try_from_value(Value::Varchar(Some("2024-03-01 10:20:30.5".into())))
                .unwrap();
        assert_eq!(parsed, expected);
        let with_tz = OffsetDateTime::try_from_value(Value::Timestamp(Some(expected))).unwrap();
        assert_eq!(with_tz, expected.assume_utc());
        let back = PrimitiveDateTime::try_from_value(Value::TimestampWithTimezone(Some(
            datetime!(2024-03-01 12:20:30.5 +2),
        )))
        .unwrap();
        assert_eq!(back, expected);
    }

    #[test]
    fn uuid_from_text() {
        let id = Uuid::now_v7();
        assert_eq!(Uuid::try_from_value(Value::Varchar(Some(id.to_string()))).unwrap(), id);
        assert_eq!(
            Uuid::try_from_value(Value::Blob(Some(id.as_bytes().to_vec().into()))).unwrap(),
            id
        );
    }
}
