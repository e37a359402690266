use frameless::{
    ConnectionAdapter, Context, Driver, Queue, QueueOptions,
    stream::{Stream, StreamExt},
};
use std::{collections::BTreeSet, pin::pin, time::Duration};

const LETTERS: [&str; 3] = ["a", "b", "c"];

async fn setup<D: Driver>(
    connection: &ConnectionAdapter<D>,
    name: &str,
    options: QueueOptions,
) -> Queue<String, D> {
    let ctx = Context::background();
    let queue = Queue::with_options(name, connection.clone(), options);
    queue
        .migrate(&ctx)
        .await
        .expect("Failed to create the queue table");
    queue.purge(&ctx).await.expect("Failed to purge the queue");
    queue
}

/// Receive messages until `count` of them were acknowledged or the subscription ends.
async fn consume<D: Driver>(
    subscription: impl Stream<Item = frameless::Result<frameless::Message<String, D>>>,
    count: usize,
) -> Vec<String> {
    let mut subscription = pin!(subscription);
    let mut received = Vec::new();
    while received.len() < count {
        let Some(message) = subscription.next().await else {
            break;
        };
        let message = message.expect("Failed to receive a message");
        message.ack().await.expect("Failed to acknowledge the message");
        received.push(message.data.clone());
    }
    received
}

pub async fn queue_fifo<D: Driver>(connection: &ConnectionAdapter<D>) {
    let queue = setup(connection, "tests_fifo", QueueOptions::default()).await;
    let background = Context::background();
    queue
        .publish(&background, LETTERS.map(String::from))
        .await
        .expect("Failed to publish");
    let ctx = background.with_timeout(Duration::from_secs(10));
    let received = consume(queue.subscribe(&ctx), LETTERS.len()).await;
    assert_eq!(received, LETTERS);

    // Nack puts the message back
    queue
        .publish(&background, ["retry".to_string()])
        .await
        .expect("Failed to publish");
    {
        let mut subscription = pin!(queue.subscribe(&ctx));
        let message = subscription
            .next()
            .await
            .expect("The subscription ended")
            .expect("Failed to receive the message");
        let id = message.id().to_string();
        message.nack().await.expect("Failed to nack the message");
        let message = subscription
            .next()
            .await
            .expect("The subscription ended")
            .expect("Failed to receive the message again");
        assert_eq!(message.id(), id);
        assert_eq!(message.data, "retry");
        message.ack().await.expect("Failed to acknowledge the message");
    }

    // The subscription ends once its context is cancelled
    let cancelled = background.child();
    cancelled.cancel();
    assert!(pin!(queue.subscribe(&cancelled)).next().await.is_none());

    // A blocking publish returns once its messages were consumed
    let blocking = Queue::<String, D>::with_options(
        "tests_fifo",
        connection.clone(),
        QueueOptions {
            blocking: true,
            ..Default::default()
        },
    );
    let (published, received) = tokio::join!(
        blocking.publish(&ctx, ["blocking".to_string()]),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            consume(queue.subscribe(&ctx), 1).await
        }
    );
    published.expect("Failed to publish while blocking");
    assert_eq!(received, ["blocking"]);
}

pub async fn queue_lifo<D: Driver>(connection: &ConnectionAdapter<D>) {
    let queue = setup(
        connection,
        "tests_lifo",
        QueueOptions {
            lifo: true,
            ..Default::default()
        },
    )
    .await;
    let background = Context::background();
    queue
        .publish(&background, LETTERS.map(String::from))
        .await
        .expect("Failed to publish");
    let ctx = background.with_timeout(Duration::from_secs(10));
    let received = consume(queue.subscribe(&ctx), LETTERS.len()).await;
    assert_eq!(received, ["c", "b", "a"]);
}

pub async fn queue_two_consumers<D: Driver>(connection: &ConnectionAdapter<D>) {
    let queue = setup(connection, "tests_consumers", QueueOptions::default()).await;
    let background = Context::background();
    queue
        .publish(&background, LETTERS.map(String::from))
        .await
        .expect("Failed to publish");
    let ctx1 = background.with_timeout(Duration::from_secs(2));
    let ctx2 = background.with_timeout(Duration::from_secs(2));
    let (first, second) = tokio::join!(
        consume(queue.subscribe(&ctx1), LETTERS.len()),
        consume(queue.subscribe(&ctx2), LETTERS.len())
    );
    let all = first.iter().chain(second.iter()).collect::<Vec<_>>();
    assert_eq!(all.len(), LETTERS.len(), "{:?} {:?}", first, second);
    assert_eq!(
        all.into_iter().map(String::as_str).collect::<BTreeSet<_>>(),
        BTreeSet::from(LETTERS)
    );
}

pub async fn queue_at_least_once<D: Driver>(connection: &ConnectionAdapter<D>) {
    let queue = setup(connection, "tests_redelivery", QueueOptions::default()).await;
    let background = Context::background();
    queue
        .publish(&background, ["x".to_string()])
        .await
        .expect("Failed to publish");

    // The consumer dies before acknowledging
    let id = {
        let ctx = background.child();
        let mut subscription = pin!(queue.subscribe(&ctx));
        let message = subscription
            .next()
            .await
            .expect("The subscription ended")
            .expect("Failed to receive the message");
        ctx.cancel();
        message.id().to_string()
    };

    let ctx = background.with_timeout(Duration::from_secs(5));
    let mut subscription = pin!(queue.subscribe(&ctx));
    let message = subscription
        .next()
        .await
        .expect("The message was not delivered again")
        .expect("Failed to receive the message");
    assert_eq!(message.id(), id);
    assert_eq!(message.data, "x");
    message.ack().await.expect("Failed to acknowledge the message");
}

pub async fn queue_undecodable<D: Driver>(connection: &ConnectionAdapter<D>) {
    let queue = setup(connection, "tests_undecodable", QueueOptions::default()).await;
    let background = Context::background();
    queue
        .publish(&background, ["not a number".to_string()])
        .await
        .expect("Failed to publish");

    // A message that cannot be decoded ends the subscription with the error and stays queued
    let numbers = Queue::<i64, D>::new("tests_undecodable", connection.clone());
    let ctx = background.with_timeout(Duration::from_secs(5));
    crate::silent_logs! {
        assert!(
            pin!(numbers.subscribe(&ctx))
                .next()
                .await
                .expect("The subscription ended without the error")
                .is_err()
        );
    }

    let received = consume(queue.subscribe(&ctx), 1).await;
    assert_eq!(received, ["not a number"]);
}
