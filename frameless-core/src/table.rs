use crate::Value;
use std::borrow::Cow;

/// Column values addressed by column name, in a stable order.
///
/// The same iteration drives both the column list and the placeholders of a statement, so the
/// position of every argument always agrees with its column.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct Args(Vec<(Cow<'static, str>, Value)>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }
    /// Builder flavor of [`Args::push`].
    pub fn with(mut self, name: impl Into<Cow<'static, str>>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }
    /// Set the value of a column, replacing the previous one if already present.
    pub fn push(&mut self, name: impl Into<Cow<'static, str>>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_ref())
    }
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(n, v)| (n.as_ref(), v))
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    /// Drop the columns not accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.0.retain(|(n, _)| keep(n));
    }
}

impl<K: Into<Cow<'static, str>>, V: Into<Value>> FromIterator<(K, V)> for Args {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut args = Args::new();
        for (k, v) in iter {
            args.push(k, v);
        }
        args
    }
}

impl IntoIterator for Args {
    type Item = (Cow<'static, str>, Value);
    type IntoIter = std::vec::IntoIter<Self::Item>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Portable column types, rendered by each dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    /// Auto incrementing 64 bits key.
    Serial,
    Float,
    /// Unbounded text, not usable as key on every backend.
    Text,
    /// Text usable as primary key.
    Key,
    Json,
    Blob,
    Uuid,
    Timestamp,
    TimestampWithTimezone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// Current time at insertion.
    Now,
    Value(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: Cow<'static, str>,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub default: Option<ColumnDefault>,
}

impl ColumnDef {
    pub fn new(name: impl Into<Cow<'static, str>>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            default: None,
        }
    }
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
    pub fn default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declarative table shape, rendered to DDL through [`crate::SqlWriter::write_create_table`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: Cow<'static, str>,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<Cow<'static, str>>,
}

impl TableDef {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }
    pub fn primary_key<K: Into<Cow<'static, str>>>(
        mut self,
        columns: impl IntoIterator<Item = K>,
    ) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_replaces_existing_column() {
        let mut args = Args::new().with("a", 1i64).with("b", "x");
        args.push("a", 2i64);
        assert_eq!(args.len(), 2);
        assert_eq!(args.get("a"), Some(&Value::Int64(Some(2))));
        assert_eq!(args.names().collect::<Vec<_>>(), ["a", "b"]);
        args.retain(|n| n != "a");
        assert_eq!(args.names().collect::<Vec<_>>(), ["b"]);
    }
}
