use crate::{
    Tag, TagMapping, TestEntity, TestEntityMapping, recreate_table, test_entities_table,
    test_tags_table,
};
use frameless::{
    ConnectionAdapter, Context, Driver, ErrorExt, ErrorKind, Repository,
    stream::TryStreamExt,
};
use std::{collections::BTreeSet, sync::LazyLock};
use tokio::sync::Mutex;

/// Every test of this module uses the same table.
pub(crate) static MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub async fn repository<D: Driver>(connection: &ConnectionAdapter<D>) {
    let _lock = MUTEX.lock().await;
    recreate_table(connection, &test_entities_table()).await;
    let repository = Repository::new(TestEntityMapping, connection.clone());
    let ctx = Context::background();

    // Create assigns the id
    let mut entity = TestEntity::new("f", "b", "z");
    repository
        .create(&ctx, &mut entity)
        .await
        .expect("Failed to create the entity");
    assert_ne!(entity.id, 0);
    let id = entity.id;
    let found = repository
        .find_by_id(&ctx, &id)
        .await
        .expect("Failed to find the entity")
        .expect("The entity just created is missing");
    assert_eq!(found, entity);

    // Update
    let mut update = TestEntity {
        id,
        foo: "F".into(),
        ..Default::default()
    };
    repository
        .update(&ctx, &mut update)
        .await
        .expect("Failed to update the entity");
    assert_eq!(update.foo, "F");
    let found = repository
        .find_by_id(&ctx, &id)
        .await
        .expect("Failed to find the updated entity")
        .expect("The updated entity is missing");
    assert_eq!(found.foo, "F");
    assert_eq!(found.bar, "");

    // Update errors
    let result = repository
        .update(&ctx, &mut TestEntity::new("x", "y", "z"))
        .await;
    assert!(result.is_kind(ErrorKind::MissingId));
    let result = repository
        .update(
            &ctx,
            &mut TestEntity {
                id: id + 1000,
                ..Default::default()
            },
        )
        .await;
    assert!(result.is_kind(ErrorKind::NotFound));

    // Delete
    repository
        .delete_by_id(&ctx, &id)
        .await
        .expect("Failed to delete the entity");
    assert_eq!(
        repository
            .find_by_id(&ctx, &id)
            .await
            .expect("Failed to look for the deleted entity"),
        None
    );
    let result = repository.delete_by_id(&ctx, &id).await;
    assert!(result.is_kind(ErrorKind::NotFound));

    // Save inserts then overwrites
    let mut saved = TestEntity {
        id: 7,
        ..TestEntity::new("a", "b", "c")
    };
    repository
        .save(&ctx, &mut saved)
        .await
        .expect("Failed to save a new entity");
    saved.baz = "changed".into();
    repository
        .save(&ctx, &mut saved)
        .await
        .expect("Failed to save an existing entity");
    assert_eq!(
        repository
            .find_by_id(&ctx, &7)
            .await
            .expect("Failed to find the saved entity")
            .map(|e| e.baz),
        Some("changed".into())
    );

    // Find all and by ids
    for name in ["one", "two", "three"] {
        repository
            .create(&ctx, &mut TestEntity::new(name, name, name))
            .await
            .expect("Failed to create the entity");
    }
    let all = repository
        .find_all(&ctx)
        .try_collect::<Vec<_>>()
        .await
        .expect("Failed to find all the entities");
    assert_eq!(all.len(), 4);
    assert_eq!(repository.count(&ctx).await.expect("Failed to count"), 4);
    let ids = all.iter().map(|e| e.id).take(2).collect::<Vec<_>>();
    let some = repository
        .find_by_ids(&ctx, ids.clone())
        .try_collect::<Vec<_>>()
        .await
        .expect("Failed to find the entities by id");
    assert_eq!(
        some.iter().map(|e| e.id).collect::<BTreeSet<_>>(),
        ids.iter().copied().collect::<BTreeSet<_>>()
    );
    let none = repository
        .find_by_ids(&ctx, Vec::new())
        .try_collect::<Vec<_>>()
        .await
        .expect("Failed to find no entities");
    assert!(none.is_empty());
    let repeated = repository
        .find_by_ids(&ctx, [ids[0], ids[1], ids[0]])
        .try_collect::<Vec<_>>()
        .await
        .expect("Failed to find the entities by repeated ids");
    assert_eq!(repeated.len(), 2, "Repeated ids yield their entity once");
    assert_eq!(
        repeated.iter().map(|e| e.id).collect::<BTreeSet<_>>(),
        ids.iter().copied().collect::<BTreeSet<_>>()
    );
    assert!(
        repository
            .find_by_ids(&ctx, [-1, -1])
            .try_collect::<Vec<_>>()
            .await
            .is_kind(ErrorKind::NotFound)
    );
    let result = repository
        .find_by_ids(&ctx, [ids[0], -1])
        .try_collect::<Vec<_>>()
        .await;
    assert!(result.is_kind(ErrorKind::NotFound));

    repository
        .delete_all(&ctx)
        .await
        .expect("Failed to delete every entity");
    assert_eq!(repository.count(&ctx).await.expect("Failed to count"), 0);
}

pub async fn repository_concurrent_create<D: Driver>(connection: &ConnectionAdapter<D>) {
    let _lock = MUTEX.lock().await;
    recreate_table(connection, &test_entities_table()).await;
    let repository = Repository::new(TestEntityMapping, connection.clone());
    let ctx = Context::background();
    let mut first = TestEntity {
        id: 42,
        ..TestEntity::new("first", "", "")
    };
    let mut second = TestEntity {
        id: 42,
        ..TestEntity::new("second", "", "")
    };
    let (a, b) = tokio::join!(
        repository.create(&ctx, &mut first),
        repository.create(&ctx, &mut second)
    );
    assert!(
        a.is_ok() != b.is_ok(),
        "Exactly one create must succeed: {:?} {:?}",
        a,
        b
    );
    let error = a.err().or(b.err()).expect("Expected one failure");
    assert!(error.is_kind(ErrorKind::AlreadyExists), "{:#}", error);

    // Sequential duplicate as well
    let result = repository
        .create(
            &ctx,
            &mut TestEntity {
                id: 42,
                ..Default::default()
            },
        )
        .await;
    assert!(result.is_kind(ErrorKind::AlreadyExists));
}

pub async fn repository_isolation<D: Driver>(connection: &ConnectionAdapter<D>) {
    let _lock = MUTEX.lock().await;
    recreate_table(connection, &test_entities_table()).await;
    let repository = Repository::new(TestEntityMapping, connection.clone());
    let background = Context::background();
    let ctx1 = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the transaction");
    let mut entity = TestEntity {
        id: 1,
        ..TestEntity::new("isolated", "", "")
    };
    repository
        .create(&ctx1, &mut entity)
        .await
        .expect("Failed to create inside the transaction");
    assert!(
        repository
            .find_by_id(&ctx1, &1)
            .await
            .expect("Failed to read inside the transaction")
            .is_some()
    );
    assert_eq!(
        repository
            .find_by_id(&background, &1)
            .await
            .expect("Failed to read outside the transaction"),
        None
    );
    connection
        .commit_tx(&ctx1)
        .await
        .expect("Failed to commit the transaction");
    assert!(
        repository
            .find_by_id(&background, &1)
            .await
            .expect("Failed to read after the commit")
            .is_some()
    );
}

pub async fn repository_key_only<D: Driver>(connection: &ConnectionAdapter<D>) {
    recreate_table(connection, &test_tags_table()).await;
    let repository = Repository::new(TagMapping, connection.clone());
    let ctx = Context::background();
    let mut tag = Tag {
        name: "rust".into(),
    };
    repository
        .save(&ctx, &mut tag)
        .await
        .expect("Failed to save the new tag");
    repository
        .save(&ctx, &mut tag)
        .await
        .expect("Saving an existing key only row must keep it");
    assert_eq!(tag.name, "rust");
    assert_eq!(repository.count(&ctx).await.expect("Failed to count"), 1);
    assert_eq!(
        repository
            .find_by_id(&ctx, &"rust".to_string())
            .await
            .expect("Failed to find the tag"),
        Some(tag)
    );
}
