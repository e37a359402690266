use crate::{
    Args, ColumnDef, ColumnDefault, ColumnType, ConnectionAdapter, Context, Driver, Error,
    ErrorKind, Identifier, Mapping, Repository, Result, RowLabeled, SqlWriter, TableDef, clock,
    short_type_name,
    stream::TryStreamExt,
};
use anyhow::Context as _;
use serde::{Serialize, de::DeserializeOwned};
use time::{OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

/// Projection of an identifier to the text stored in the cache tables.
pub trait CacheKey: Identifier {
    fn to_cache_key(&self) -> String {
        self.to_string()
    }
    fn from_cache_key(key: &str) -> Result<Self>;
}

impl CacheKey for String {
    fn from_cache_key(key: &str) -> Result<Self> {
        Ok(key.to_owned())
    }
}

macro_rules! impl_cache_key {
    ($($ty:ty),+) => {
        $(impl CacheKey for $ty {
            fn from_cache_key(key: &str) -> Result<Self> {
                key.parse::<$ty>()
                    .with_context(|| format!("Cache key `{}` is not a valid {}", key, stringify!($ty)))
            }
        })+
    };
}
impl_cache_key!(i32, i64, u32, u64, Uuid);

/// How an entity is stored in the cache: a JSON document decoupled from the entity type, so the
/// entity can evolve without invalidating the cache.
pub trait JsonMapping: Send + Sync + 'static {
    type Entity: Send + Sync;
    type Id: CacheKey;

    fn id(&self, entity: &Self::Entity) -> Option<Self::Id>;
    fn to_json(&self, entity: &Self::Entity) -> Result<serde_json::Value>;
    fn from_json(&self, value: serde_json::Value) -> Result<Self::Entity>;
}

/// [`JsonMapping`] storing the serde representation of the entity.
pub struct SerdeJsonMapping<E, I> {
    id: fn(&E) -> Option<I>,
}

impl<E, I> SerdeJsonMapping<E, I> {
    pub fn new(id: fn(&E) -> Option<I>) -> Self {
        Self { id }
    }
}

impl<E, I> JsonMapping for SerdeJsonMapping<E, I>
where
    E: Serialize + DeserializeOwned + Send + Sync + 'static,
    I: CacheKey,
{
    type Entity = E;
    type Id = I;

    fn id(&self, entity: &E) -> Option<I> {
        (self.id)(entity)
    }
    fn to_json(&self, entity: &E) -> Result<serde_json::Value> {
        serde_json::to_value(entity)
            .with_context(|| format!("While encoding {} to json", short_type_name::<E>()))
    }
    fn from_json(&self, value: serde_json::Value) -> Result<E> {
        serde_json::from_value(value)
            .with_context(|| format!("While decoding {} from json", short_type_name::<E>()))
    }
}

/// Query fingerprint pointing to the ids of the entities that answered it.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<I> {
    pub query_id: String,
    pub entity_ids: Vec<I>,
    pub timestamp: OffsetDateTime,
}

impl<I> Hit<I> {
    pub fn new(query_id: impl Into<String>, entity_ids: Vec<I>) -> Self {
        let now = clock::now_utc();
        Self {
            query_id: query_id.into(),
            entity_ids,
            timestamp: now
                .replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
                .unwrap_or(now),
        }
    }
}

/// Names of the two tables of a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTables {
    pub entities: String,
    pub hits: String,
}

impl CacheTables {
    /// [`ErrorKind::Validation`] when `prefix` is empty.
    pub fn new(prefix: &str) -> Result<Self> {
        if prefix.is_empty() {
            return Err(Error::new(ErrorKind::Validation)
                .context("The cache repository needs a non empty id"));
        }
        Ok(Self {
            entities: format!("{prefix}_cache_entities"),
            hits: format!("{prefix}_cache_hits"),
        })
    }

    pub fn entities_def(&self) -> TableDef {
        TableDef::new(self.entities.clone())
            .column(ColumnDef::new("id", ColumnType::Key))
            .column(ColumnDef::new("data", ColumnType::Json))
            .primary_key(["id"])
    }

    pub fn hits_def(&self) -> TableDef {
        TableDef::new(self.hits.clone())
            .column(ColumnDef::new("query_id", ColumnType::Key))
            .column(ColumnDef::new("ent_ids", ColumnType::Json))
            .column(
                ColumnDef::new("timestamp", ColumnType::Timestamp).default(ColumnDefault::Now),
            )
            .primary_key(["query_id"])
    }
}

/// Mapping of the cached entities table.
pub struct CacheEntityMapping<J> {
    table: String,
    json: J,
}

impl<J: JsonMapping> Mapping for CacheEntityMapping<J> {
    type Entity = J::Entity;
    type Id = J::Id;

    fn table_name(&self) -> &str {
        &self.table
    }
    fn columns(&self) -> &[&str] {
        &["id", "data"]
    }
    fn scan(&self, row: &RowLabeled) -> Result<J::Entity> {
        self.json.from_json(row.get("data")?)
    }
    fn to_args(&self, entity: &J::Entity) -> Result<Args> {
        let Some(id) = self.id(entity) else {
            return Err(Error::new(ErrorKind::MissingId).context(format!(
                "Cannot cache {} without id",
                short_type_name::<J::Entity>()
            )));
        };
        Ok(Args::new()
            .with("id", id.to_cache_key())
            .with("data", self.json.to_json(entity)?))
    }
    fn query_id(&self, id: &J::Id) -> Args {
        Args::new().with("id", id.to_cache_key())
    }
    fn id(&self, entity: &J::Entity) -> Option<J::Id> {
        self.json.id(entity)
    }
}

/// Mapping of the hits table.
pub struct CacheHitMapping<I> {
    table: String,
    _id: std::marker::PhantomData<fn() -> I>,
}

impl<I: CacheKey> Mapping for CacheHitMapping<I> {
    type Entity = Hit<I>;
    type Id = String;

    fn table_name(&self) -> &str {
        &self.table
    }
    fn columns(&self) -> &[&str] {
        &["query_id", "ent_ids", "timestamp"]
    }
    fn scan(&self, row: &RowLabeled) -> Result<Hit<I>> {
        let keys: Vec<String> = serde_json::from_value(row.get("ent_ids")?)
            .context("The ids of a cache hit must be a json array of strings")?;
        Ok(Hit {
            query_id: row.get("query_id")?,
            entity_ids: keys
                .iter()
                .map(|k| I::from_cache_key(k))
                .collect::<Result<_>>()?,
            timestamp: row.get::<PrimitiveDateTime>("timestamp")?.assume_utc(),
        })
    }
    fn to_args(&self, hit: &Hit<I>) -> Result<Args> {
        let keys = hit
            .entity_ids
            .iter()
            .map(|id| serde_json::Value::String(id.to_cache_key()))
            .collect::<Vec<_>>();
        let timestamp = hit.timestamp.to_offset(time::UtcOffset::UTC);
        Ok(Args::new()
            .with("query_id", hit.query_id.clone())
            .with("ent_ids", serde_json::Value::Array(keys))
            .with(
                "timestamp",
                PrimitiveDateTime::new(timestamp.date(), timestamp.time()),
            ))
    }
    fn query_id(&self, id: &String) -> Args {
        Args::new().with("query_id", id.clone())
    }
    fn id(&self, hit: &Hit<I>) -> Option<String> {
        Some(hit.query_id.clone())
    }
}

/// Storage of a cache: the entities as JSON documents plus an index from query fingerprints to
/// the entity ids answering them.
pub struct CacheRepository<J: JsonMapping, D: Driver> {
    tables: CacheTables,
    entities: Repository<CacheEntityMapping<J>, D>,
    hits: Repository<CacheHitMapping<J::Id>, D>,
}

impl<J: JsonMapping, D: Driver> CacheRepository<J, D> {
    /// [`ErrorKind::Validation`] when `id` is empty.
    pub fn new(id: &str, json: J, connection: ConnectionAdapter<D>) -> Result<Self> {
        let tables = CacheTables::new(id)?;
        Ok(Self {
            entities: Repository::new(
                CacheEntityMapping {
                    table: tables.entities.clone(),
                    json,
                },
                connection.clone(),
            ),
            hits: Repository::new(
                CacheHitMapping {
                    table: tables.hits.clone(),
                    _id: Default::default(),
                },
                connection,
            ),
            tables,
        })
    }

    pub fn tables(&self) -> &CacheTables {
        &self.tables
    }

    pub fn entities(&self) -> &Repository<CacheEntityMapping<J>, D> {
        &self.entities
    }

    pub fn hits(&self) -> &Repository<CacheHitMapping<J::Id>, D> {
        &self.hits
    }

    /// Create the tables when missing.
    pub async fn migrate(&self, ctx: &Context) -> Result<()> {
        let connection = self.entities.connection();
        let writer = connection.sql_writer();
        for table in [self.tables.entities_def(), self.tables.hits_def()] {
            let mut sql = String::new();
            writer.write_create_table(&mut sql, &table, true);
            connection
                .exec(ctx, sql)
                .await
                .with_context(|| format!("While creating the cache table {}", table.name))?;
        }
        log::debug!("Cache tables with prefix of {} ready", self.tables.entities);
        Ok(())
    }

    /// Store the entities and the hit pointing to them in one transaction.
    pub async fn save_hit(
        &self,
        ctx: &Context,
        query_id: &str,
        entities: &mut [J::Entity],
    ) -> Result<Hit<J::Id>> {
        let connection = self.entities.connection().clone();
        connection
            .with_tx(ctx, |ctx| async move {
                let mut ids = Vec::with_capacity(entities.len());
                for entity in entities.iter_mut() {
                    self.entities.save(&ctx, entity).await?;
                    if let Some(id) = self.entities.mapping().id(entity) {
                        ids.push(id);
                    }
                }
                let mut hit = Hit::new(query_id, ids);
                self.hits.save(&ctx, &mut hit).await?;
                Ok(hit)
            })
            .await
    }

    /// Entities answering `query_id`, `None` on a cache miss. An id of the hit without entity
    /// fails with [`ErrorKind::NotFound`].
    pub async fn find_hit_entities(
        &self,
        ctx: &Context,
        query_id: &str,
    ) -> Result<Option<Vec<J::Entity>>> {
        let Some(hit) = self.hits.find_by_id(ctx, &query_id.to_owned()).await? else {
            return Ok(None);
        };
        let found = self
            .entities
            .find_by_ids(ctx, hit.entity_ids.iter().cloned())
            .try_collect::<Vec<_>>()
            .await?;
        Ok(Some(found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorExt, RowNames, Value};
    use std::sync::Arc;

    #[test]
    fn empty_prefix_is_rejected() {
        assert!(CacheTables::new("").is_kind(ErrorKind::Validation));
    }

    #[test]
    fn table_names() {
        let tables = CacheTables::new("books").unwrap();
        assert_eq!(tables.entities, "books_cache_entities");
        assert_eq!(tables.hits, "books_cache_hits");
        assert_eq!(tables.hits_def().primary_key, ["query_id"]);
    }

    #[test]
    fn hit_scanned_from_text_json() {
        let mapping = CacheHitMapping::<i64> {
            table: "t_cache_hits".into(),
            _id: Default::default(),
        };
        let names: RowNames = Arc::from(vec![
            "query_id".to_string(),
            "ent_ids".to_string(),
            "timestamp".to_string(),
        ]);
        let row = RowLabeled::new(
            names,
            Box::new([
                Value::Varchar(Some("q1".into())),
                Value::Varchar(Some(r#"["3", "1"]"#.into())),
                Value::Varchar(Some("2024-03-01 10:00:00".into())),
            ]),
        );
        let hit = mapping.scan(&row).unwrap();
        assert_eq!(hit.query_id, "q1");
        assert_eq!(hit.entity_ids, [3, 1]);
        assert_eq!(hit.timestamp.hour(), 10);
    }

    #[test]
    fn entity_without_id_cannot_be_cached() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Book {
            id: String,
        }
        let mapping = CacheEntityMapping {
            table: "t_cache_entities".into(),
            json: SerdeJsonMapping::new(|b: &Book| Some(b.id.clone()).filter(|v| !v.is_empty())),
        };
        let args = mapping.to_args(&Book { id: "b1".into() }).unwrap();
        assert_eq!(args.get("id"), Some(&Value::Varchar(Some("b1".into()))));
        let error = mapping.to_args(&Book { id: "".into() }).unwrap_err();
        assert!(error.is_kind(ErrorKind::MissingId));
    }
}
