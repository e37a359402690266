use frameless_core::{Error, Result, Value};
use mysql_async::consts::{ColumnFlags, ColumnType};
use time::{Date, Month, PrimitiveDateTime, Time};

/// Character set number MySQL reports for binary strings.
const BINARY_CHARSET: u16 = 63;

pub(crate) struct ValueWrap(pub(crate) Value);

impl From<Value> for ValueWrap {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<ValueWrap> for Value {
    fn from(value: ValueWrap) -> Self {
        value.0
    }
}

impl ValueWrap {
    /// Decode a value received for `column`. The text protocol sends everything as bytes, the
    /// column type tells what they hold.
    pub(crate) fn decode(value: mysql_async::Value, column: &mysql_async::Column) -> Result<Self> {
        type MySQLValue = mysql_async::Value;
        Ok(Self(match value {
            MySQLValue::NULL => Value::Null,
            MySQLValue::Int(v) => Value::Int64(Some(v)),
            MySQLValue::UInt(v) => Value::UInt64(Some(v)),
            MySQLValue::Float(v) => Value::Float64(Some(v as _)),
            MySQLValue::Double(v) => Value::Float64(Some(v)),
            MySQLValue::Date(year, month, day, hour, minute, second, micro) => {
                let date = Date::from_calendar_date(year as _, Month::try_from(month)?, day)?;
                let time = Time::from_hms_micro(hour, minute, second, micro)?;
                Value::Timestamp(Some(PrimitiveDateTime::new(date, time)))
            }
            MySQLValue::Time(negative, days, hours, minutes, seconds, micro) => {
                Value::Varchar(Some(format!(
                    "{}{:02}:{:02}:{:02}.{:06}",
                    if negative { "-" } else { "" },
                    days * 24 + hours as u32,
                    minutes,
                    seconds,
                    micro
                )))
            }
            MySQLValue::Bytes(bytes) => decode_bytes(bytes, column)?,
        }))
    }
}

fn decode_bytes(bytes: Vec<u8>, column: &mysql_async::Column) -> Result<Value> {
    let text = |bytes: Vec<u8>| {
        String::from_utf8(bytes).map_err(|e| {
            Error::new(e).context(format!("Column `{}` is not valid UTF-8", column.name_str()))
        })
    };
    Ok(match column.column_type() {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => {
            let text = text(bytes)?;
            if column.flags().contains(ColumnFlags::UNSIGNED_FLAG) {
                Value::UInt64(Some(text.trim().parse()?))
            } else {
                Value::Int64(Some(text.trim().parse()?))
            }
        }
        ColumnType::MYSQL_TYPE_FLOAT
        | ColumnType::MYSQL_TYPE_DOUBLE
        | ColumnType::MYSQL_TYPE_DECIMAL
        | ColumnType::MYSQL_TYPE_NEWDECIMAL => Value::Float64(Some(text(bytes)?.trim().parse()?)),
        ColumnType::MYSQL_TYPE_JSON => Value::Json(Some(serde_json::from_slice(&bytes)?)),
        _ if column.character_set() == BINARY_CHARSET => Value::Blob(Some(bytes.into())),
        _ => Value::Varchar(Some(text(bytes)?)),
    })
}

impl TryFrom<ValueWrap> for mysql_async::Value {
    type Error = Error;

    fn try_from(value: ValueWrap) -> Result<Self> {
        type MySQLValue = mysql_async::Value;
        fn date_time(v: PrimitiveDateTime) -> Result<MySQLValue> {
            let year = u16::try_from(v.year())
                .map_err(|_| Error::msg(format!("Date {} is out of range for MySQL", v)))?;
            Ok(MySQLValue::Date(
                year,
                v.month().into(),
                v.day(),
                v.hour(),
                v.minute(),
                v.second(),
                v.microsecond(),
            ))
        }
        Ok(match value.0 {
            v if v.is_null() => MySQLValue::NULL,
            Value::Boolean(Some(v)) => MySQLValue::from(v),
            Value::Int32(Some(v)) => MySQLValue::from(v),
            Value::Int64(Some(v)) => MySQLValue::from(v),
            Value::UInt64(Some(v)) => MySQLValue::from(v),
            Value::Float64(Some(v)) => MySQLValue::from(v),
            Value::Varchar(Some(v)) => MySQLValue::from(v),
            Value::Blob(Some(v)) => MySQLValue::from(v.into_vec()),
            Value::Json(Some(v)) => MySQLValue::from(v.to_string()),
            Value::Uuid(Some(v)) => MySQLValue::from(v.to_string()),
            Value::Timestamp(Some(v)) => date_time(v)?,
            Value::TimestampWithTimezone(Some(v)) => {
                let v = v.to_offset(time::UtcOffset::UTC);
                date_time(PrimitiveDateTime::new(v.date(), v.time()))?
            }
            v => {
                return Err(Error::msg(format!(
                    "Value {:?} is not supported by MySQL",
                    v
                )));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn timestamps_are_sent_in_utc() {
        let value = mysql_async::Value::try_from(ValueWrap(Value::TimestampWithTimezone(Some(
            datetime!(2024-03-01 12:00:00.25 +2),
        ))))
        .unwrap();
        assert_eq!(value, mysql_async::Value::Date(2024, 3, 1, 10, 0, 0, 250_000));
    }

    #[test]
    fn null_and_json() {
        assert_eq!(
            mysql_async::Value::try_from(ValueWrap(Value::Int64(None))).unwrap(),
            mysql_async::Value::NULL
        );
        assert_eq!(
            mysql_async::Value::try_from(ValueWrap(Value::Json(Some(serde_json::json!([1]))))).unwrap(),
            mysql_async::Value::Bytes(b"[1]".to_vec())
        );
    }
}
