use frameless_core::{
    ColumnDef, ColumnDefault, ColumnType, GenericSqlWriter, Query, SqlWriter, TxOptions, Value,
    separated_by,
};

#[derive(Default)]
pub struct MySQLSqlWriter {}

impl SqlWriter for MySQLSqlWriter {
    fn write_identifier_quoted(&self, out: &mut String, value: &str) {
        out.push('`');
        self.write_escaped(out, value, '`', "``");
        out.push('`');
    }

    fn write_arg(&self, query: &mut Query, value: Value) {
        query.args.push(value);
        query.sql.push('?');
    }

    fn supports_returning(&self) -> bool {
        false
    }

    fn write_column_type(&self, out: &mut String, value: ColumnType) {
        out.push_str(match value {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Serial => "BIGINT AUTO_INCREMENT",
            ColumnType::Float => "DOUBLE",
            ColumnType::Text => "TEXT",
            ColumnType::Key => "VARCHAR(255)",
            ColumnType::Json => "JSON",
            ColumnType::Blob => "LONGBLOB",
            ColumnType::Uuid => "CHAR(36)",
            // Stored in UTC
            ColumnType::Timestamp | ColumnType::TimestampWithTimezone => "DATETIME(6)",
        });
    }

    fn write_value_literal(&self, out: &mut String, value: &Value) {
        // Backslash is an escape character in MySQL strings
        let text = match value {
            Value::Varchar(Some(v)) => v.clone(),
            Value::Json(Some(v)) => v.to_string(),
            Value::Boolean(Some(v)) => {
                out.push_str(if *v { "1" } else { "0" });
                return;
            }
            _ => return GenericSqlWriter.write_value_literal(out, value),
        };
        let mut escaped = String::with_capacity(text.len());
        self.write_escaped(&mut escaped, &text, '\\', r"\\");
        out.push('\'');
        self.write_escaped(out, &escaped, '\'', "''");
        out.push('\'');
    }

    fn write_column_default(&self, out: &mut String, column: &ColumnDef) {
        match &column.default {
            Some(ColumnDefault::Now) => out.push_str(" DEFAULT CURRENT_TIMESTAMP(6)"),
            Some(ColumnDefault::Value(v)) => {
                out.push_str(" DEFAULT ");
                self.write_value_literal(out, v);
            }
            None => {}
        }
    }

    fn write_insert_update_fragment(&self, out: &mut String, key: &[&str], columns: &[&str]) {
        out.push_str("\nON DUPLICATE KEY UPDATE\n");
        let update = columns
            .iter()
            .filter(|c| !key.contains(*c))
            .collect::<Vec<_>>();
        if update.is_empty() {
            // Nothing to change, keep the row as it is
            let Some(first) = key.first() else {
                return;
            };
            self.write_identifier_quoted(out, first);
            out.push_str(" = ");
            self.write_identifier_quoted(out, first);
            return;
        }
        separated_by(
            out,
            update,
            |out, v| {
                self.write_identifier_quoted(out, v);
                out.push_str(" = VALUES(");
                self.write_identifier_quoted(out, v);
                out.push(')');
            },
            ",\n",
        );
    }

    fn write_transaction_begin(&self, out: &mut String, options: &TxOptions) {
        if let Some(isolation) = options.isolation {
            out.push_str("SET TRANSACTION ISOLATION LEVEL ");
            self.write_isolation_level(out, isolation);
            out.push_str(";\n");
        }
        out.push_str("START TRANSACTION");
        if options.read_only {
            out.push_str(" READ ONLY");
        }
        out.push(';');
    }

    fn write_lock_wait_nowait(&self, out: &mut String) {
        out.push_str("SET SESSION innodb_lock_wait_timeout = 1;");
    }

    fn write_lock_wait_reset(&self, out: &mut String) {
        out.push_str("SET SESSION innodb_lock_wait_timeout = DEFAULT;");
    }
}
