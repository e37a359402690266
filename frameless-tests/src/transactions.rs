use crate::{
    TestEntity, TestEntityMapping, recreate_table, repository::MUTEX, test_entities_table,
};
use frameless::{
    ConnectionAdapter, Context, Driver, ErrorExt, ErrorKind, Repository,
    stream::{StreamExt, TryStreamExt},
};
use std::{pin::pin, time::Duration};

pub async fn transaction_nested<D: Driver>(connection: &ConnectionAdapter<D>) {
    let _lock = MUTEX.lock().await;
    recreate_table(connection, &test_entities_table()).await;
    let repository = Repository::new(TestEntityMapping, connection.clone());
    let background = Context::background();

    // The rollback of the outer scope discards the work of the nested one
    let outer = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the outer transaction");
    assert!(connection.in_tx(&outer));
    let inner = connection
        .begin_tx(&outer)
        .await
        .expect("Failed to begin the nested transaction");
    let mut entity = TestEntity {
        id: 10,
        ..TestEntity::new("nested", "", "")
    };
    repository
        .create(&inner, &mut entity)
        .await
        .expect("Failed to create inside the nested transaction");
    connection
        .commit_tx(&inner)
        .await
        .expect("Failed to commit the nested transaction");
    assert!(connection.in_tx(&outer), "The outer scope must still be open");
    assert!(
        repository
            .find_by_id(&outer, &10)
            .await
            .expect("Failed to read inside the outer transaction")
            .is_some()
    );
    connection
        .rollback_tx(&outer)
        .await
        .expect("Failed to roll back the outer transaction");
    assert!(!connection.in_tx(&outer));
    assert_eq!(
        repository
            .find_by_id(&background, &10)
            .await
            .expect("Failed to read after the rollback"),
        None
    );

    // The commit of the outer scope persists the nested work
    let outer = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the outer transaction");
    let inner = connection
        .begin_tx(&outer)
        .await
        .expect("Failed to begin the nested transaction");
    repository
        .create(&inner, &mut entity)
        .await
        .expect("Failed to create inside the nested transaction");
    connection
        .commit_tx(&inner)
        .await
        .expect("Failed to commit the nested transaction");
    connection
        .commit_tx(&outer)
        .await
        .expect("Failed to commit the outer transaction");
    assert!(
        repository
            .find_by_id(&background, &10)
            .await
            .expect("Failed to read after the commit")
            .is_some()
    );

    // with_tx commits on success and rolls back on failure
    let result = connection
        .with_tx(&background, |ctx| {
            let repository = &repository;
            async move {
                repository
                    .create(&ctx, &mut TestEntity::new("kept", "", ""))
                    .await?;
                repository
                    .create(
                        &ctx,
                        &mut TestEntity {
                            id: 10,
                            ..Default::default()
                        },
                    )
                    .await
            }
        })
        .await;
    assert!(result.is_kind(ErrorKind::AlreadyExists));
    assert_eq!(
        repository.count(&background).await.expect("Failed to count"),
        1,
        "The failed closure must leave nothing behind"
    );
}

pub async fn transaction_errors<D: Driver>(connection: &ConnectionAdapter<D>) {
    let background = Context::background();
    assert!(
        connection
            .commit_tx(&background)
            .await
            .is_kind(ErrorKind::NoContext)
    );
    assert!(
        connection
            .rollback_tx(&background)
            .await
            .is_kind(ErrorKind::NoContext)
    );

    let ctx = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the transaction");
    connection
        .commit_tx(&ctx)
        .await
        .expect("Failed to commit the transaction");
    assert!(connection.commit_tx(&ctx).await.is_kind(ErrorKind::TxDone));
    connection
        .rollback_tx(&ctx)
        .await
        .expect("A rollback after the end of the transaction must be a no-op");
    assert!(
        connection
            .exec(&ctx, "SELECT 1;")
            .await
            .is_kind(ErrorKind::TxDone),
        "A finished transaction cannot run statements"
    );

    // A new transaction can start from the context of a finished one
    let next = connection
        .begin_tx(&ctx)
        .await
        .expect("Failed to begin a transaction after the previous one finished");
    connection
        .rollback_tx(&next)
        .await
        .expect("Failed to roll back the transaction");
}

pub async fn transaction_cancellation<D: Driver>(connection: &ConnectionAdapter<D>) {
    let _lock = MUTEX.lock().await;
    recreate_table(connection, &test_entities_table()).await;
    let repository = Repository::new(TestEntityMapping, connection.clone());
    let background = Context::background();

    let parent = background.child();
    let ctx = connection
        .begin_tx(&parent)
        .await
        .expect("Failed to begin the transaction");
    repository
        .create(
            &ctx,
            &mut TestEntity {
                id: 5,
                ..TestEntity::new("cancelled", "", "")
            },
        )
        .await
        .expect("Failed to create inside the transaction");
    parent.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!connection.in_tx(&ctx));
    assert!(connection.commit_tx(&ctx).await.is_kind(ErrorKind::Cancelled));
    assert_eq!(
        repository
            .find_by_id(&background, &5)
            .await
            .expect("Failed to read after the cancellation"),
        None
    );

    // Deadline
    let ctx = connection
        .begin_tx(&background.with_timeout(Duration::from_millis(50)))
        .await
        .expect("Failed to begin the transaction");
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(
        connection
            .commit_tx(&ctx)
            .await
            .is_kind(ErrorKind::DeadlineExceeded)
    );

    // Cancelling the transaction context rolls back without touching its parent
    let live = background.child();
    let ctx = connection
        .begin_tx(&live)
        .await
        .expect("Failed to begin the transaction");
    repository
        .create(
            &ctx,
            &mut TestEntity {
                id: 6,
                ..TestEntity::new("cancelled", "", "")
            },
        )
        .await
        .expect("Failed to create inside the transaction");
    ctx.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!connection.in_tx(&ctx));
    assert!(!live.is_cancelled());
    assert!(connection.commit_tx(&ctx).await.is_kind(ErrorKind::Cancelled));
    assert_eq!(
        repository
            .find_by_id(&live, &6)
            .await
            .expect("Failed to read after the cancellation"),
        None
    );

    // A cancelled context cannot begin
    assert!(
        connection
            .begin_tx(&parent)
            .await
            .is_kind(ErrorKind::Cancelled)
    );
}

pub async fn transaction_nested_rollback<D: Driver>(connection: &ConnectionAdapter<D>) {
    let _lock = MUTEX.lock().await;
    recreate_table(connection, &test_entities_table()).await;
    let repository = Repository::new(TestEntityMapping, connection.clone());
    let background = Context::background();

    // The rollback of a nested scope rolls back the whole transaction
    let outer = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the outer transaction");
    repository
        .create(
            &outer,
            &mut TestEntity {
                id: 20,
                ..TestEntity::new("outer", "", "")
            },
        )
        .await
        .expect("Failed to create inside the outer transaction");
    let inner = connection
        .begin_tx(&outer)
        .await
        .expect("Failed to begin the nested transaction");
    repository
        .create(
            &inner,
            &mut TestEntity {
                id: 21,
                ..TestEntity::new("inner", "", "")
            },
        )
        .await
        .expect("Failed to create inside the nested transaction");
    connection
        .rollback_tx(&inner)
        .await
        .expect("Failed to roll back the nested transaction");
    assert!(!connection.in_tx(&outer));
    assert!(connection.commit_tx(&outer).await.is_kind(ErrorKind::TxDone));
    connection
        .rollback_tx(&outer)
        .await
        .expect("A rollback after the end of the transaction must be a no-op");
    assert_eq!(
        repository.count(&background).await.expect("Failed to count"),
        0,
        "Neither scope may persist anything"
    );

    // A failing repository call inside an outer transaction ends it
    let outer = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the outer transaction");
    let mut entity = TestEntity {
        id: 22,
        ..TestEntity::new("twice", "", "")
    };
    repository
        .create(&outer, &mut entity)
        .await
        .expect("Failed to create inside the outer transaction");
    assert!(
        repository
            .create(&outer, &mut entity)
            .await
            .is_kind(ErrorKind::AlreadyExists)
    );
    assert!(connection.commit_tx(&outer).await.is_kind(ErrorKind::TxDone));
    assert_eq!(
        repository
            .find_by_id(&background, &22)
            .await
            .expect("Failed to read after the rollback"),
        None
    );
}

pub async fn transaction_open_stream<D: Driver>(connection: &ConnectionAdapter<D>) {
    let _lock = MUTEX.lock().await;
    recreate_table(connection, &test_entities_table()).await;
    let repository = Repository::new(TestEntityMapping, connection.clone());
    let background = Context::background();

    let ctx = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the transaction");
    for name in ["first", "second"] {
        repository
            .create(&ctx, &mut TestEntity::new(name, "", ""))
            .await
            .expect("Failed to create inside the transaction");
    }
    {
        let mut entities = pin!(repository.find_all(&ctx));
        entities
            .next()
            .await
            .expect("The stream must yield a first entity")
            .expect("Failed to read the first entity");

        // The transaction connection is not held by the open stream
        tokio::time::timeout(
            Duration::from_secs(5),
            repository.create(&ctx, &mut TestEntity::new("third", "", "")),
        )
        .await
        .expect("A statement must not wait for the open stream")
        .expect("Failed to create while the stream is open");
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(5), repository.count(&ctx))
                .await
                .expect("A count must not wait for the open stream")
                .expect("Failed to count while the stream is open"),
            3
        );

        let rest = entities
            .try_collect::<Vec<_>>()
            .await
            .expect("Failed to read the rest of the stream");
        assert_eq!(rest.len(), 1, "The stream reflects the rows at its start");
    }
    connection
        .commit_tx(&ctx)
        .await
        .expect("Failed to commit the transaction");
    assert_eq!(
        repository.count(&background).await.expect("Failed to count"),
        3
    );
}
