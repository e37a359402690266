use frameless::{ConnectionAdapter, Context, Driver, ErrorExt, ErrorKind, Locker, LockerFactory};
use std::time::{Duration, Instant};

pub async fn locker<D: Driver>(connection: &ConnectionAdapter<D>) {
    let background = Context::background();
    let locker = Locker::new("frameless_tests_locker", connection.clone());
    locker
        .migrate(&background)
        .await
        .expect("Failed to create the locks table");

    // The second locker waits for the first one to release
    let (waited, _) = tokio::join!(
        async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let start = Instant::now();
            let ctx = locker
                .lock(&background)
                .await
                .expect("B failed to acquire the lock");
            let waited = start.elapsed();
            locker.unlock(&ctx).await.expect("B failed to unlock");
            waited
        },
        async {
            let ctx = locker
                .lock(&background)
                .await
                .expect("A failed to acquire the lock");
            tokio::time::sleep(Duration::from_millis(200)).await;
            locker.unlock(&ctx).await.expect("A failed to unlock");
        }
    );
    assert!(
        waited >= Duration::from_millis(140),
        "The lock was acquired after {:?} while held by someone else",
        waited
    );

    // Try lock
    let held = locker
        .lock(&background)
        .await
        .expect("Failed to acquire the lock");
    assert!(
        locker
            .try_lock(&background)
            .await
            .expect("Failed to try the lock")
            .is_none(),
        "The lock is already held"
    );

    // Reentrancy
    let again = locker
        .lock(&held)
        .await
        .expect("Failed to lock again with the context holding the lock");
    let tried = locker
        .try_lock(&held)
        .await
        .expect("Failed to try the lock with the context holding it");
    assert!(tried.is_some());
    locker.unlock(&again).await.expect("Failed to unlock");
    locker
        .unlock(&held)
        .await
        .expect("Unlocking twice must be a no-op");
    assert!(held.is_cancelled(), "The lock context ends with the lock");

    let free = locker
        .try_lock(&background)
        .await
        .expect("Failed to try the released lock")
        .expect("The released lock must be available");
    locker.unlock(&free).await.expect("Failed to unlock");

    // Unlock without lock
    assert!(locker.unlock(&background).await.is_kind(ErrorKind::NoLock));
    let other = Locker::new("frameless_tests_other", connection.clone());
    let ctx = locker
        .lock(&background)
        .await
        .expect("Failed to acquire the lock");
    assert!(other.unlock(&ctx).await.is_kind(ErrorKind::NoLock));
    locker.unlock(&ctx).await.expect("Failed to unlock");

    // Cancelling the context passed to lock releases it
    let parent = background.child();
    let ctx = locker
        .lock(&parent)
        .await
        .expect("Failed to acquire the lock");
    parent.cancel();
    assert!(ctx.is_cancelled());
    let reacquired = tokio::time::timeout(Duration::from_secs(5), locker.lock(&background))
        .await
        .expect("The lock of a cancelled context was not released")
        .expect("Failed to acquire the lock again");
    locker.unlock(&reacquired).await.expect("Failed to unlock");

    // A cancelled context stops waiting
    let held = locker
        .lock(&background)
        .await
        .expect("Failed to acquire the lock");
    let waiting = background.with_timeout(Duration::from_millis(100));
    let result = locker.lock(&waiting).await;
    assert!(result.is_kind(ErrorKind::DeadlineExceeded));
    locker.unlock(&held).await.expect("Failed to unlock");
}

pub async fn locker_factory<D: Driver>(connection: &ConnectionAdapter<D>) {
    let ctx = Context::background();
    let factory = LockerFactory::<u64, D>::with_namespace("tests", connection.clone());
    factory
        .migrate(&ctx)
        .await
        .expect("Failed to create the locks table");
    assert_eq!(factory.lock_name(&7), "tests/u64:7");
    assert_eq!(
        LockerFactory::<u64, D>::new(connection.clone()).lock_name(&7),
        "u64:7"
    );

    let first = factory.locker_for(&1);
    let second = factory.locker_for(&2);
    let ctx1 = first.lock(&ctx).await.expect("Failed to lock the first key");
    let ctx2 = second
        .try_lock(&ctx)
        .await
        .expect("Failed to try the second key")
        .expect("Different keys must not contend");
    assert!(
        factory
            .locker_for(&1)
            .try_lock(&ctx)
            .await
            .expect("Failed to try the first key")
            .is_none()
    );
    first.unlock(&ctx1).await.expect("Failed to unlock");
    second.unlock(&ctx2).await.expect("Failed to unlock");
}
