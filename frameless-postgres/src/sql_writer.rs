use frameless_core::{ColumnType, SqlWriter};

/// The default dialect of [`SqlWriter`] is the Postgres one, only the column types differ.
pub struct PostgresSqlWriter {}

impl SqlWriter for PostgresSqlWriter {
    fn write_column_type(&self, out: &mut String, value: ColumnType) {
        out.push_str(match value {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Serial => "BIGSERIAL",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text | ColumnType::Key => "TEXT",
            ColumnType::Json => "JSONB",
            ColumnType::Blob => "BYTEA",
            ColumnType::Uuid => "UUID",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::TimestampWithTimezone => "TIMESTAMP WITH TIME ZONE",
        });
    }
}
