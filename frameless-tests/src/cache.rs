use frameless::{
    CacheRepository, ConnectionAdapter, Context, Driver, ErrorExt, ErrorKind, SerdeJsonMapping,
    SqlWriter,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub tags: Vec<String>,
}

impl Article {
    fn new(id: i64, title: &str) -> Self {
        Self {
            id,
            title: title.into(),
            tags: vec!["cached".into()],
        }
    }
}

pub async fn cache<D: Driver>(connection: &ConnectionAdapter<D>) {
    let ctx = Context::background();
    let cache = CacheRepository::new(
        "articles",
        SerdeJsonMapping::new(|a: &Article| Some(a.id).filter(|id| *id != 0)),
        connection.clone(),
    )
    .expect("Failed to create the cache repository");
    assert!(
        CacheRepository::new(
            "",
            SerdeJsonMapping::new(|a: &Article| Some(a.id)),
            connection.clone(),
        )
        .is_kind(ErrorKind::Validation)
    );
    let writer = connection.sql_writer();
    for table in [&cache.tables().entities, &cache.tables().hits] {
        let mut sql = String::new();
        writer.write_drop_table(&mut sql, table, true);
        connection
            .exec(&ctx, sql)
            .await
            .expect("Failed to drop the cache table");
    }
    cache
        .migrate(&ctx)
        .await
        .expect("Failed to create the cache tables");
    cache
        .migrate(&ctx)
        .await
        .expect("The cache migration must be idempotent");

    // Miss
    assert_eq!(
        cache
            .find_hit_entities(&ctx, "latest")
            .await
            .expect("Failed to look for a missing hit"),
        None
    );

    // Hit
    let mut articles = vec![Article::new(1, "first"), Article::new(2, "second")];
    let hit = cache
        .save_hit(&ctx, "latest", &mut articles)
        .await
        .expect("Failed to save the hit");
    assert_eq!(hit.entity_ids, [1, 2]);
    let mut found = cache
        .find_hit_entities(&ctx, "latest")
        .await
        .expect("Failed to find the hit")
        .expect("The hit just saved is missing");
    found.sort_by_key(|a| a.id);
    assert_eq!(found, articles);
    let stored = cache
        .hits()
        .find_by_id(&ctx, &"latest".to_string())
        .await
        .expect("Failed to read the hit")
        .expect("The hit is missing");
    assert_eq!(stored.entity_ids, [1, 2]);

    // Saving again overwrites both the entities and the hit
    let mut articles = vec![Article::new(2, "second, edited")];
    cache
        .save_hit(&ctx, "latest", &mut articles)
        .await
        .expect("Failed to overwrite the hit");
    let found = cache
        .find_hit_entities(&ctx, "latest")
        .await
        .expect("Failed to find the hit")
        .expect("The hit is missing");
    assert_eq!(found, articles);
    assert_eq!(
        cache.entities().count(&ctx).await.expect("Failed to count"),
        2
    );

    // An entity evicted from the cache makes the hit unusable
    cache
        .entities()
        .delete_by_id(&ctx, &2)
        .await
        .expect("Failed to delete the cached entity");
    assert!(
        cache
            .find_hit_entities(&ctx, "latest")
            .await
            .is_kind(ErrorKind::NotFound)
    );

    // Entities without id cannot be cached
    let result = cache
        .save_hit(&ctx, "anonymous", &mut [Article::new(0, "anonymous")])
        .await;
    assert!(result.is_kind(ErrorKind::MissingId));
    assert_eq!(
        cache
            .find_hit_entities(&ctx, "anonymous")
            .await
            .expect("Failed to look for the rolled back hit"),
        None
    );
}
