use frameless::{ConnectionAdapter, Context, NotifyBus, NotifyDriver, Subscription};
use std::time::Duration;

async fn receive(subscription: &mut Subscription) -> Option<(String, String)> {
    tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .ok()
        .flatten()
        .map(|n| (n.channel, n.payload))
}

pub async fn notify<D: NotifyDriver>(connection: &ConnectionAdapter<D>) {
    let background = Context::background();
    let scope = background.child();
    let bus = NotifyBus::start(&scope, connection.clone());

    let mut first = bus
        .subscribe(&background, "frameless_tests")
        .await
        .expect("Failed to subscribe");
    assert_eq!(first.channel(), "frameless_tests");
    bus.notify(&background, "frameless_tests", "hello")
        .await
        .expect("Failed to notify");
    assert_eq!(
        receive(&mut first).await,
        Some(("frameless_tests".into(), "hello".into()))
    );

    // Every subscriber of the channel receives the notification
    let mut second = bus
        .subscribe(&background, "frameless_tests")
        .await
        .expect("Failed to subscribe again");
    let mut other = bus
        .subscribe(&background, "frameless_tests_other")
        .await
        .expect("Failed to subscribe to another channel");
    bus.notify(&background, "frameless_tests", "both")
        .await
        .expect("Failed to notify");
    assert_eq!(receive(&mut first).await.map(|n| n.1), Some("both".into()));
    assert_eq!(receive(&mut second).await.map(|n| n.1), Some("both".into()));

    // Within a transaction the notification waits for the commit
    let ctx = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the transaction");
    bus.notify(&ctx, "frameless_tests_other", "committed")
        .await
        .expect("Failed to notify inside the transaction");
    assert!(
        tokio::time::timeout(Duration::from_millis(300), other.recv())
            .await
            .is_err(),
        "The notification was delivered before the commit"
    );
    connection
        .commit_tx(&ctx)
        .await
        .expect("Failed to commit the transaction");
    assert_eq!(
        receive(&mut other).await.map(|n| n.1),
        Some("committed".into())
    );

    // A rolled back notification is never delivered
    let ctx = connection
        .begin_tx(&background)
        .await
        .expect("Failed to begin the transaction");
    bus.notify(&ctx, "frameless_tests_other", "discarded")
        .await
        .expect("Failed to notify inside the transaction");
    connection
        .rollback_tx(&ctx)
        .await
        .expect("Failed to roll back the transaction");
    assert!(
        tokio::time::timeout(Duration::from_millis(300), other.recv())
            .await
            .is_err()
    );

    // Stopping the bus ends the subscriptions
    scope.cancel();
    assert_eq!(receive(&mut first).await, None);
}
