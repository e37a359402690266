use std::fmt::{self, Display};
use time::{OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

/// Dynamically typed value moved between Rust types and the drivers.
///
/// Every variant carries an `Option`: `None` is a typed NULL, which lets drivers bind a NULL
/// parameter with the correct type.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum Value {
    /// Untyped NULL.
    #[default]
    Null,
    Boolean(Option<bool>),
    Int32(Option<i32>),
    Int64(Option<i64>),
    UInt64(Option<u64>),
    Float64(Option<f64>),
    Varchar(Option<String>),
    Blob(Option<Box<[u8]>>),
    Json(Option<serde_json::Value>),
    Uuid(Option<Uuid>),
    Timestamp(Option<PrimitiveDateTime>),
    TimestampWithTimezone(Option<OffsetDateTime>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Boolean(None)
                | Value::Int32(None)
                | Value::Int64(None)
                | Value::UInt64(None)
                | Value::Float64(None)
                | Value::Varchar(None)
                | Value::Blob(None)
                | Value::Json(None)
                | Value::Uuid(None)
                | Value::Timestamp(None)
                | Value::TimestampWithTimezone(None)
        )
    }

    pub fn same_type(&self, other: &Self) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }

    /// Integer content of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int32(Some(v)) => Some(*v as i64),
            Value::Int64(Some(v)) => Some(*v),
            Value::UInt64(Some(v)) => i64::try_from(*v).ok(),
            Value::Varchar(Some(v)) => v.trim().parse().ok(),
            _ => None,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("NULL");
        }
        match self {
            Value::Boolean(Some(v)) => write!(f, "{v}"),
            Value::Int32(Some(v)) => write!(f, "{v}"),
            Value::Int64(Some(v)) => write!(f, "{v}"),
            Value::UInt64(Some(v)) => write!(f, "{v}"),
            Value::Float64(Some(v)) => write!(f, "{v}"),
            Value::Varchar(Some(v)) => write!(f, "'{}'", crate::truncate_long!(v)),
            Value::Blob(Some(v)) => write!(f, "<{} bytes>", v.len()),
            Value::Json(Some(v)) => write!(f, "{v}"),
            Value::Uuid(Some(v)) => write!(f, "{v}"),
            Value::Timestamp(Some(v)) => write!(f, "{v}"),
            Value::TimestampWithTimezone(Some(v)) => write!(f, "{v}"),
            _ => f.write_str("NULL"),
        }
    }
}
