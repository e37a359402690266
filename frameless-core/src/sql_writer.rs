use crate::{
    Args, ColumnDef, ColumnDefault, ColumnType, IsolationLevel, Query, TableDef, TxOptions,
    Value, separated_by,
};
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Row locking clause appended to a `SELECT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locking {
    #[default]
    None,
    ForUpdate,
    ForUpdateNowait,
    ForUpdateSkipLocked,
}

/// Everything a statement selecting rows needs, see [`SqlWriter::write_select`].
#[derive(Debug, Clone, Copy)]
pub struct Select<'a> {
    pub table: &'a str,
    pub columns: &'a [&'a str],
    /// Disjunction of conjunctions: every `Args` matches the columns it lists, any of them
    /// selects the row. `None` selects every row.
    pub filter: Option<&'a [Args]>,
    pub order_by: &'a [(&'a str, Order)],
    pub limit: Option<u32>,
    pub locking: Locking,
}

impl<'a> Select<'a> {
    pub fn new(table: &'a str, columns: &'a [&'a str]) -> Self {
        Self {
            table,
            columns,
            filter: None,
            order_by: &[],
            limit: None,
            locking: Locking::None,
        }
    }
}

/// Dialect specific SQL generation.
///
/// Statement writers append both the text and the arguments to a [`Query`]; the placeholder of
/// an argument is emitted by the same call that pushes it (see [`SqlWriter::write_arg`]).
pub trait SqlWriter: Send + Sync {
    fn write_escaped(&self, out: &mut String, value: &str, search: char, replace: &str) {
        let mut position = 0;
        for (i, c) in value.char_indices() {
            if c == search {
                out.push_str(&value[position..i]);
                out.push_str(replace);
                position = i + c.len_utf8();
            }
        }
        out.push_str(&value[position..]);
    }

    fn write_identifier_quoted(&self, out: &mut String, value: &str) {
        out.push('"');
        self.write_escaped(out, value, '"', r#""""#);
        out.push('"');
    }

    /// Push `value` as the next positional argument and write its placeholder.
    fn write_arg(&self, query: &mut Query, value: Value) {
        query.args.push(value);
        let _ = write!(query.sql, "${}", query.args.len());
    }

    /// Whether `INSERT`, `UPDATE` and `DELETE` accept a `RETURNING` clause.
    fn supports_returning(&self) -> bool {
        true
    }

    fn write_column_type(&self, out: &mut String, value: ColumnType) {
        out.push_str(match value {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Serial => "BIGSERIAL",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Key => "TEXT",
            ColumnType::Json => "JSON",
            ColumnType::Blob => "BYTEA",
            ColumnType::Uuid => "UUID",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::TimestampWithTimezone => "TIMESTAMPTZ",
        });
    }

    fn write_value_literal(&self, out: &mut String, value: &Value) {
        match value {
            v if v.is_null() => out.push_str("NULL"),
            Value::Boolean(Some(v)) => out.push_str(if *v { "TRUE" } else { "FALSE" }),
            Value::Int32(Some(v)) => {
                let _ = write!(out, "{v}");
            }
            Value::Int64(Some(v)) => {
                let _ = write!(out, "{v}");
            }
            Value::UInt64(Some(v)) => {
                let _ = write!(out, "{v}");
            }
            Value::Float64(Some(v)) => {
                let _ = write!(out, "{v:?}");
            }
            other => {
                let text = match other {
                    Value::Varchar(Some(v)) => v.clone(),
                    Value::Json(Some(v)) => v.to_string(),
                    _ => other.to_string(),
                };
                out.push('\'');
                self.write_escaped(out, &text, '\'', "''");
                out.push('\'');
            }
        }
    }

    fn write_column_default(&self, out: &mut String, column: &ColumnDef) {
        match &column.default {
            Some(ColumnDefault::Now) => out.push_str(" DEFAULT CURRENT_TIMESTAMP"),
            Some(ColumnDefault::Value(v)) => {
                out.push_str(" DEFAULT ");
                self.write_value_literal(out, v);
            }
            None => {}
        }
    }

    fn write_create_table_column_fragment(&self, out: &mut String, column: &ColumnDef) {
        self.write_identifier_quoted(out, &column.name);
        out.push(' ');
        self.write_column_type(out, column.column_type);
        if !column.nullable {
            out.push_str(" NOT NULL");
        }
        self.write_column_default(out, column);
    }

    fn write_create_table(&self, out: &mut String, table: &TableDef, if_not_exists: bool) {
        out.push_str("CREATE TABLE ");
        if if_not_exists {
            out.push_str("IF NOT EXISTS ");
        }
        self.write_identifier_quoted(out, &table.name);
        out.push_str(" (\n");
        separated_by(
            out,
            &table.columns,
            |out, v| self.write_create_table_column_fragment(out, v),
            ",\n",
        );
        if !table.primary_key.is_empty() {
            out.push_str(",\nPRIMARY KEY (");
            separated_by(
                out,
                &table.primary_key,
                |out, v| self.write_identifier_quoted(out, v),
                ", ",
            );
            out.push(')');
        }
        out.push_str("\n);");
    }

    fn write_drop_table(&self, out: &mut String, table: &str, if_exists: bool) {
        out.push_str("DROP TABLE ");
        if if_exists {
            out.push_str("IF EXISTS ");
        }
        self.write_identifier_quoted(out, table);
        out.push(';');
    }

    fn write_column_list<'a>(&self, out: &mut String, columns: impl IntoIterator<Item = &'a str>)
    where
        Self: Sized,
    {
        separated_by(
            out,
            columns,
            |out, v| self.write_identifier_quoted(out, v),
            ", ",
        );
    }

    fn write_returning(&self, out: &mut String, columns: &[&str])
    where
        Self: Sized,
    {
        if columns.is_empty() || !self.supports_returning() {
            return;
        }
        out.push_str("\nRETURNING ");
        self.write_column_list(out, columns.iter().copied());
    }

    /// Conjunction of `column = value` predicates.
    fn write_match(&self, query: &mut Query, args: &Args) {
        if args.is_empty() {
            query.sql.push_str("TRUE");
            return;
        }
        let mut first = true;
        for (name, value) in args.iter() {
            if !first {
                query.sql.push_str(" AND ");
            }
            first = false;
            self.write_identifier_quoted(&mut query.sql, name);
            query.sql.push_str(" = ");
            self.write_arg(query, value.clone());
        }
    }

    /// Disjunction of [`SqlWriter::write_match`] predicates. Single column filters become an
    /// `IN` list.
    fn write_filter(&self, query: &mut Query, filter: &[Args]) {
        match filter {
            [] => query.sql.push_str("FALSE"),
            [single] => self.write_match(query, single),
            [first, ..] if first.len() == 1 => {
                let column = first.names().next().unwrap_or_default().to_string();
                if filter.iter().all(|v| v.len() == 1 && v.get(&column).is_some()) {
                    self.write_identifier_quoted(&mut query.sql, &column);
                    query.sql.push_str(" IN (");
                    let mut first = true;
                    for args in filter {
                        if !first {
                            query.sql.push_str(", ");
                        }
                        first = false;
                        if let Some(value) = args.get(&column) {
                            self.write_arg(query, value.clone());
                        }
                    }
                    query.sql.push(')');
                } else {
                    self.write_filter_disjunction(query, filter);
                }
            }
            _ => self.write_filter_disjunction(query, filter),
        }
    }

    fn write_filter_disjunction(&self, query: &mut Query, filter: &[Args]) {
        let mut first = true;
        for args in filter {
            if !first {
                query.sql.push_str(" OR ");
            }
            first = false;
            query.sql.push('(');
            self.write_match(query, args);
            query.sql.push(')');
        }
    }

    fn write_locking(&self, out: &mut String, locking: Locking) {
        match locking {
            Locking::None => {}
            Locking::ForUpdate => out.push_str("\nFOR UPDATE"),
            Locking::ForUpdateNowait => out.push_str("\nFOR UPDATE NOWAIT"),
            Locking::ForUpdateSkipLocked => out.push_str("\nFOR UPDATE SKIP LOCKED"),
        }
    }

    /// `SELECT` without the trailing semicolon, to be embedded in other statements.
    fn write_select_fragment(&self, query: &mut Query, select: &Select)
    where
        Self: Sized,
    {
        query.sql.push_str("SELECT ");
        self.write_column_list(&mut query.sql, select.columns.iter().copied());
        query.sql.push_str("\nFROM ");
        self.write_identifier_quoted(&mut query.sql, select.table);
        if let Some(filter) = select.filter {
            query.sql.push_str("\nWHERE ");
            self.write_filter(query, filter);
        }
        if !select.order_by.is_empty() {
            query.sql.push_str("\nORDER BY ");
            separated_by(
                &mut query.sql,
                select.order_by,
                |out, (column, order)| {
                    self.write_identifier_quoted(out, column);
                    out.push_str(match order {
                        Order::Asc => " ASC",
                        Order::Desc => " DESC",
                    });
                },
                ", ",
            );
        }
        if let Some(limit) = select.limit {
            let _ = write!(query.sql, "\nLIMIT {}", limit);
        }
        self.write_locking(&mut query.sql, select.locking);
    }

    fn write_select(&self, query: &mut Query, select: &Select)
    where
        Self: Sized,
    {
        self.write_select_fragment(query, select);
        query.sql.push(';');
    }

    /// `SELECT COUNT(*)` over the rows selected by `select`.
    fn write_count(&self, query: &mut Query, select: &Select)
    where
        Self: Sized,
    {
        query.sql.push_str("SELECT COUNT(*) AS ");
        self.write_identifier_quoted(&mut query.sql, "count");
        query.sql.push_str(" FROM (");
        self.write_select_fragment(query, select);
        query.sql.push_str(") AS ");
        self.write_identifier_quoted(&mut query.sql, "t");
        query.sql.push(';');
    }

    fn write_insert_into(&self, query: &mut Query, table: &str, rows: &[Args])
    where
        Self: Sized,
    {
        let Some(first) = rows.first() else {
            return;
        };
        query.sql.push_str("INSERT INTO ");
        self.write_identifier_quoted(&mut query.sql, table);
        query.sql.push_str(" (");
        self.write_column_list(&mut query.sql, first.names());
        query.sql.push_str(") VALUES\n");
        let mut first_row = true;
        for row in rows {
            if !first_row {
                query.sql.push_str(",\n");
            }
            first_row = false;
            query.sql.push('(');
            let mut first_value = true;
            for name in first.names() {
                if !first_value {
                    query.sql.push_str(", ");
                }
                first_value = false;
                let value = row.get(name).cloned().unwrap_or_default();
                self.write_arg(query, value);
            }
            query.sql.push(')');
        }
    }

    /// Insert one or more rows, all having the columns of the first one.
    fn write_insert(&self, query: &mut Query, table: &str, rows: &[Args], returning: &[&str])
    where
        Self: Sized,
    {
        if rows.is_empty() {
            return;
        }
        self.write_insert_into(query, table, rows);
        self.write_returning(&mut query.sql, returning);
        query.sql.push(';');
    }

    fn write_insert_update_fragment(&self, out: &mut String, key: &[&str], columns: &[&str])
    where
        Self: Sized,
    {
        out.push_str("\nON CONFLICT (");
        self.write_column_list(out, key.iter().copied());
        let mut columns = columns.iter().filter(|c| !key.contains(*c)).collect::<Vec<_>>();
        if columns.is_empty() {
            // A no-op update, so RETURNING still reports the existing row
            columns = key.iter().collect();
        }
        out.push_str(") DO UPDATE SET\n");
        separated_by(
            out,
            columns,
            |out, v| {
                self.write_identifier_quoted(out, v);
                out.push_str(" = EXCLUDED.");
                self.write_identifier_quoted(out, v);
            },
            ",\n",
        );
    }

    /// Insert the row or update it when a row with the same `key` columns exists.
    fn write_upsert(&self, query: &mut Query, table: &str, args: &Args, key: &[&str], returning: &[&str])
    where
        Self: Sized,
    {
        self.write_insert_into(query, table, std::slice::from_ref(args));
        let columns = args.names().collect::<Vec<_>>();
        self.write_insert_update_fragment(&mut query.sql, key, &columns);
        self.write_returning(&mut query.sql, returning);
        query.sql.push(';');
    }

    fn write_update(&self, query: &mut Query, table: &str, set: &Args, filter: &Args)
    where
        Self: Sized,
    {
        query.sql.push_str("UPDATE ");
        self.write_identifier_quoted(&mut query.sql, table);
        query.sql.push_str(" SET\n");
        let mut first = true;
        for (name, value) in set.iter() {
            if !first {
                query.sql.push_str(",\n");
            }
            first = false;
            self.write_identifier_quoted(&mut query.sql, name);
            query.sql.push_str(" = ");
            self.write_arg(query, value.clone());
        }
        query.sql.push_str("\nWHERE ");
        self.write_match(query, filter);
        query.sql.push(';');
    }

    /// Delete the rows matched by `filter`, every row when `None`.
    fn write_delete(&self, query: &mut Query, table: &str, filter: Option<&[Args]>)
    where
        Self: Sized,
    {
        query.sql.push_str("DELETE FROM ");
        self.write_identifier_quoted(&mut query.sql, table);
        if let Some(filter) = filter {
            query.sql.push_str("\nWHERE ");
            self.write_filter(query, filter);
        }
        query.sql.push(';');
    }

    /// Delete the first row of `select` (which is expected to lock with `SKIP LOCKED`) and return
    /// it. Only meaningful when [`SqlWriter::supports_returning`].
    fn write_delete_first(&self, query: &mut Query, key: &str, select: &Select, returning: &[&str])
    where
        Self: Sized,
    {
        query.sql.push_str("DELETE FROM ");
        self.write_identifier_quoted(&mut query.sql, select.table);
        query.sql.push_str("\nWHERE ");
        self.write_identifier_quoted(&mut query.sql, key);
        query.sql.push_str(" = (");
        self.write_select_fragment(query, select);
        query.sql.push(')');
        self.write_returning(&mut query.sql, returning);
        query.sql.push(';');
    }

    fn write_isolation_level(&self, out: &mut String, isolation: IsolationLevel) {
        out.push_str(match isolation {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        });
    }

    fn write_transaction_begin(&self, out: &mut String, options: &TxOptions) {
        out.push_str("BEGIN");
        if let Some(isolation) = options.isolation {
            out.push_str(" ISOLATION LEVEL ");
            self.write_isolation_level(out, isolation);
        }
        if options.read_only {
            out.push_str(" READ ONLY");
        }
        out.push(';');
    }

    fn write_transaction_commit(&self, out: &mut String) {
        out.push_str("COMMIT;");
    }

    fn write_transaction_rollback(&self, out: &mut String) {
        out.push_str("ROLLBACK;");
    }

    /// Make the lock waits of the current transaction fail immediately.
    fn write_lock_wait_nowait(&self, out: &mut String) {
        out.push_str("SET LOCAL lock_timeout = '1ms';");
    }

    /// Undo [`SqlWriter::write_lock_wait_nowait`] when it outlives the transaction.
    fn write_lock_wait_reset(&self, _out: &mut String) {}
}

pub struct GenericSqlWriter;
impl GenericSqlWriter {
    pub fn new() -> Self {
        Self {}
    }
}
impl SqlWriter for GenericSqlWriter {}
