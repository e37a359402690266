use frameless::{
    Args, ColumnDef, ColumnType, ConnectionAdapter, Context, Driver, Mapping, Result, RowLabeled,
    SqlWriter, TableDef,
};

pub const TEST_ENTITIES: &str = "test_entities";

pub fn test_entities_table() -> TableDef {
    TableDef::new(TEST_ENTITIES)
        .column(ColumnDef::new("id", ColumnType::Serial))
        .column(ColumnDef::new("foo", ColumnType::Text))
        .column(ColumnDef::new("bar", ColumnType::Text))
        .column(ColumnDef::new("baz", ColumnType::Text))
        .primary_key(["id"])
}

/// Row of [`TEST_ENTITIES`], the id is assigned by the database when zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TestEntity {
    pub id: i64,
    pub foo: String,
    pub bar: String,
    pub baz: String,
}

impl TestEntity {
    pub fn new(foo: &str, bar: &str, baz: &str) -> Self {
        Self {
            id: 0,
            foo: foo.into(),
            bar: bar.into(),
            baz: baz.into(),
        }
    }
}

pub struct TestEntityMapping;

impl Mapping for TestEntityMapping {
    type Entity = TestEntity;
    type Id = i64;

    fn table_name(&self) -> &str {
        TEST_ENTITIES
    }
    fn columns(&self) -> &[&str] {
        &["id", "foo", "bar", "baz"]
    }
    fn scan(&self, row: &RowLabeled) -> Result<TestEntity> {
        Ok(TestEntity {
            id: row.get("id")?,
            foo: row.get("foo")?,
            bar: row.get("bar")?,
            baz: row.get("baz")?,
        })
    }
    fn to_args(&self, entity: &TestEntity) -> Result<Args> {
        let mut args = Args::new();
        if entity.id != 0 {
            args.push("id", entity.id);
        }
        args.push("foo", entity.foo.clone());
        args.push("bar", entity.bar.clone());
        args.push("baz", entity.baz.clone());
        Ok(args)
    }
    fn query_id(&self, id: &i64) -> Args {
        Args::new().with("id", *id)
    }
    fn id(&self, entity: &TestEntity) -> Option<i64> {
        Some(entity.id)
    }
    fn set_id(&self, entity: &mut TestEntity, id: i64) -> bool {
        entity.id = id;
        true
    }
}

pub const TEST_TAGS: &str = "test_tags";

pub fn test_tags_table() -> TableDef {
    TableDef::new(TEST_TAGS)
        .column(ColumnDef::new("name", ColumnType::Key))
        .primary_key(["name"])
}

/// Row of [`TEST_TAGS`], made of its key alone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
}

pub struct TagMapping;

impl Mapping for TagMapping {
    type Entity = Tag;
    type Id = String;

    fn table_name(&self) -> &str {
        TEST_TAGS
    }
    fn columns(&self) -> &[&str] {
        &["name"]
    }
    fn scan(&self, row: &RowLabeled) -> Result<Tag> {
        Ok(Tag {
            name: row.get("name")?,
        })
    }
    fn to_args(&self, entity: &Tag) -> Result<Args> {
        Ok(Args::new().with("name", entity.name.clone()))
    }
    fn query_id(&self, id: &String) -> Args {
        Args::new().with("name", id.clone())
    }
    fn id(&self, entity: &Tag) -> Option<String> {
        Some(entity.name.clone())
    }
}

/// Drop and create the table, so every run starts from an empty one.
pub async fn recreate_table<D: Driver>(connection: &ConnectionAdapter<D>, table: &TableDef) {
    let ctx = Context::background();
    let writer = connection.sql_writer();
    let mut sql = String::new();
    writer.write_drop_table(&mut sql, &table.name, true);
    connection
        .exec(&ctx, sql)
        .await
        .unwrap_or_else(|e| panic!("Failed to drop the table {}: {:#}", table.name, e));
    let mut sql = String::new();
    writer.write_create_table(&mut sql, table, false);
    connection
        .exec(&ctx, sql)
        .await
        .unwrap_or_else(|e| panic!("Failed to create the table {}: {:#}", table.name, e));
}
