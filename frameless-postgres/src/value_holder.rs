use bytes::BytesMut;
use frameless_core::Value;
use std::{error::Error, io::Read};
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

/// Bridges [`Value`] and the binary encoding of tokio-postgres. Parameters are encoded after the
/// type the server inferred for them, so integers of any width and textual ids fit any column.
#[derive(Debug)]
pub struct ValueHolder(pub Value);

impl From<Value> for ValueHolder {
    fn from(value: Value) -> Self {
        ValueHolder(value)
    }
}

impl<'a> FromSql<'a> for ValueHolder {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Self::from_sql_nullable(ty, Some(raw))
    }
    fn from_sql_null(ty: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Self::from_sql_nullable(ty, None)
    }
    fn from_sql_nullable(
        ty: &Type,
        raw: Option<&'a [u8]>,
    ) -> Result<Self, Box<dyn Error + Sync + Send>> {
        macro_rules! to_value {
            ($ty_var:ident, $raw:ident, $($($ty:path)|+ => ( $value:path, $source:ty ) ,)+) => {
                match *$ty_var {
                    $($($ty)|+ => $value(if let Some($raw) = $raw { Some(<$source>::from_sql($ty_var, $raw)?.into()) } else { None }),)+
                    _ => {
                        if let Some(mut raw) = $raw {
                            let mut buf = String::new();
                            let _ = raw.read_to_string(&mut buf);
                            return Err(frameless_core::Error::msg(format!("Cannot decode sql type: `{}`, value: `{}`", $ty_var, buf)).into());
                        }
                        Value::Null
                    }
                }
            };
        }
        let value = to_value!(ty, raw,
            Type::BOOL => (Value::Boolean, bool),
            Type::INT2 => (Value::Int32, i16),
            Type::INT4 => (Value::Int32, i32),
            Type::INT8 => (Value::Int64, i64),
            Type::OID => (Value::Int64, u32),
            Type::FLOAT4 => (Value::Float64, f32),
            Type::FLOAT8 => (Value::Float64, f64),
            Type::VARCHAR
            | Type::TEXT
            | Type::NAME
            | Type::BPCHAR
            | Type::XML
            | Type::UNKNOWN => (Value::Varchar, String),
            Type::JSON | Type::JSONB => (Value::Json, serde_json::Value),
            Type::BYTEA => (Value::Blob, Vec<u8>),
            Type::TIMESTAMP => (Value::Timestamp, PrimitiveDateTime),
            Type::TIMESTAMPTZ => (Value::TimestampWithTimezone, OffsetDateTime),
            Type::UUID => (Value::Uuid, Uuid),
        );
        Ok(value.into())
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn is_text(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn integer_to_sql(
    value: i64,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
    match *ty {
        Type::INT2 => i16::try_from(value)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(value)?.to_sql(ty, out),
        Type::OID => u32::try_from(value)?.to_sql(ty, out),
        Type::FLOAT4 => (value as f32).to_sql(ty, out),
        Type::FLOAT8 => (value as f64).to_sql(ty, out),
        Type::BOOL => (value != 0).to_sql(ty, out),
        _ if is_text(ty) => value.to_string().to_sql(ty, out),
        _ => value.to_sql(ty, out),
    }
}

impl ToSql for ValueHolder {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>>
    where
        Self: Sized,
    {
        if self.0.is_null() {
            return Ok(IsNull::Yes);
        }
        match &self.0 {
            Value::Boolean(Some(v)) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Boolean(Some(v)) => v.to_sql(ty, out),
            Value::Int32(Some(v)) => integer_to_sql(*v as i64, ty, out),
            Value::Int64(Some(v)) => integer_to_sql(*v, ty, out),
            Value::UInt64(Some(v)) => integer_to_sql(i64::try_from(*v)?, ty, out),
            Value::Float64(Some(v)) if *ty == Type::FLOAT4 => (*v as f32).to_sql(ty, out),
            Value::Float64(Some(v)) => v.to_sql(ty, out),
            Value::Varchar(Some(v)) => match *ty {
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(v)?.to_sql(ty, out)
                }
                Type::UUID => Uuid::parse_str(v)?.to_sql(ty, out),
                _ => v.as_str().to_sql(ty, out),
            },
            Value::Blob(Some(v)) => v.as_ref().to_sql(ty, out),
            Value::Json(Some(v)) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Json(Some(v)) => v.to_sql(ty, out),
            Value::Uuid(Some(v)) if is_text(ty) => v.to_string().to_sql(ty, out),
            Value::Uuid(Some(v)) => v.to_sql(ty, out),
            Value::Timestamp(Some(v)) => v.to_sql(ty, out),
            Value::TimestampWithTimezone(Some(v)) => v.to_sql(ty, out),
            other => Err(frameless_core::Error::msg(format!(
                "Value {:?} is not supported by Postgres",
                other
            ))
            .into()),
        }
    }

    fn accepts(_ty: &Type) -> bool
    where
        Self: Sized,
    {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: Value, ty: &Type) -> BytesMut {
        let mut out = BytesMut::new();
        ValueHolder(value).to_sql(ty, &mut out).unwrap();
        out
    }

    #[test]
    fn integers_follow_the_parameter_type() {
        assert_eq!(encode(Value::Int64(Some(7)), &Type::INT4).len(), 4);
        assert_eq!(encode(Value::Int32(Some(7)), &Type::INT8).len(), 8);
        assert_eq!(&encode(Value::Int64(Some(42)), &Type::TEXT)[..], b"42");
        let mut out = BytesMut::new();
        assert!(
            ValueHolder(Value::Int64(Some(i64::MAX)))
                .to_sql(&Type::INT2, &mut out)
                .is_err()
        );
    }

    #[test]
    fn null_and_round_trip() {
        let mut out = BytesMut::new();
        let is_null = ValueHolder(Value::Varchar(None))
            .to_sql(&Type::TEXT, &mut out)
            .unwrap();
        assert!(matches!(is_null, IsNull::Yes));
        let raw = encode(Value::Uuid(Some(Uuid::nil())), &Type::UUID);
        let decoded = ValueHolder::from_sql(&Type::UUID, &raw).unwrap();
        assert_eq!(decoded.0, Value::Uuid(Some(Uuid::nil())));
        let decoded = ValueHolder::from_sql_null(&Type::INT8).unwrap();
        assert_eq!(decoded.0, Value::Int64(None));
    }
}
