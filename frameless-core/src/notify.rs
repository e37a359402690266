use crate::{
    ConnectionAdapter, Context, Driver, Error, ErrorKind, ExponentialBackoff, FailureCount, Query,
    Result, RetryPolicy,
    stream::Stream,
};
use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    task::{self, Poll},
    time::Duration,
};
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Dedicated connection receiving the notifications of the channels it listens to.
pub trait NotifyListener: Send + 'static {
    fn listen(&mut self, channel: &str) -> impl Future<Output = Result<()>> + Send;
    fn unlisten(&mut self, channel: &str) -> impl Future<Output = Result<()>> + Send;
    /// Next notification. An error means the connection is lost.
    fn recv(&mut self) -> impl Future<Output = Result<Notification>> + Send;
}

/// Driver able to publish and receive notifications.
pub trait NotifyDriver: Driver {
    type Listener: NotifyListener;

    fn listener(&self) -> impl Future<Output = Result<Self::Listener>> + Send;
    fn write_notify(&self, query: &mut Query, channel: &str, payload: &str);
}

enum Command {
    Listen(String, oneshot::Sender<Result<()>>),
    Unlisten(String),
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Notification>,
}

#[derive(Default)]
struct Subscribers {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl Subscribers {
    fn channels(&self) -> Vec<String> {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Drop every sender, ending the subscriptions.
    fn close(&self) {
        self.channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    fn dispatch(&self, notification: Notification) {
        let channels = self
            .channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(subscribers) = channels.get(&notification.channel) else {
            return;
        };
        for subscriber in subscribers {
            if let Err(mpsc::error::TrySendError::Full(..)) =
                subscriber.sender.try_send(notification.clone())
            {
                log::warn!(
                    "Dropped a notification of {}: subscriber {} is not keeping up",
                    notification.channel,
                    subscriber.id
                );
            }
        }
    }
}

/// Cancels the worker once the last bus handle is gone.
struct WorkerGuard(Context);

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Fans the notifications received on a single dedicated connection out to in-process
/// subscribers.
///
/// A subscriber with a full buffer misses notifications rather than slowing down the others. A
/// lost connection is reestablished with an exponential backoff, listening again to every
/// channel; notifications sent while disconnected are lost.
pub struct NotifyBus<D: NotifyDriver> {
    connection: ConnectionAdapter<D>,
    subscribers: Arc<Subscribers>,
    commands: mpsc::UnboundedSender<Command>,
    buffer: usize,
    worker: Arc<WorkerGuard>,
}

impl<D: NotifyDriver> Clone for NotifyBus<D> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            subscribers: self.subscribers.clone(),
            commands: self.commands.clone(),
            buffer: self.buffer,
            worker: self.worker.clone(),
        }
    }
}

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

impl<D: NotifyDriver> NotifyBus<D> {
    /// Spawn the worker. It stops when `ctx` is cancelled or every handle of the bus is dropped.
    pub fn start(ctx: &Context, connection: ConnectionAdapter<D>) -> Self {
        Self::with_buffer(ctx, connection, DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(ctx: &Context, connection: ConnectionAdapter<D>, buffer: usize) -> Self {
        let scope = ctx.child();
        let subscribers = Arc::new(Subscribers::default());
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(
            scope.clone(),
            connection.clone(),
            subscribers.clone(),
            receiver,
        ));
        Self {
            connection,
            subscribers,
            commands,
            buffer: buffer.max(1),
            worker: Arc::new(WorkerGuard(scope)),
        }
    }

    /// Receive the notifications of `channel` from now on. Returns once the connection listens to
    /// the channel.
    pub async fn subscribe(&self, ctx: &Context, channel: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(channel.to_owned())
            .or_default()
            .push(Subscriber { id, sender });
        let subscription = Subscription {
            channel: channel.to_owned(),
            id,
            receiver,
            subscribers: self.subscribers.clone(),
            commands: self.commands.clone(),
        };
        let (done, listening) = oneshot::channel();
        if self
            .commands
            .send(Command::Listen(channel.to_owned(), done))
            .is_err()
        {
            return Err(Error::msg("The notification bus is stopped"));
        }
        tokio::select! {
            result = listening => result.map_err(|_| Error::msg("The notification bus is stopped"))??,
            _ = ctx.cancelled() => return Err(ctx.err().unwrap_or(ErrorKind::Cancelled).into()),
        }
        Ok(subscription)
    }

    /// Publish `payload` on `channel`. Within a transaction the notification is delivered on commit.
    pub async fn notify(&self, ctx: &Context, channel: &str, payload: &str) -> Result<()> {
        let mut query = Query::default();
        self.connection
            .driver()
            .write_notify(&mut query, channel, payload);
        self.connection.exec(ctx, query).await?;
        Ok(())
    }
}

/// Notifications of a channel. Dropping it unsubscribes.
pub struct Subscription {
    channel: String,
    id: u64,
    receiver: mpsc::Receiver<Notification>,
    subscribers: Arc<Subscribers>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// `None` once the bus is stopped.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut channels = self
            .subscribers
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(subscribers) = channels.get_mut(&self.channel) {
            subscribers.retain(|s| s.id != self.id);
            if subscribers.is_empty() {
                channels.remove(&self.channel);
                let _ = self.commands.send(Command::Unlisten(self.channel.clone()));
            }
        }
    }
}

const RECONNECT_BACKOFF: ExponentialBackoff = ExponentialBackoff {
    delay: Duration::from_millis(100),
    timeout: None,
    attempts: Some(u32::MAX),
};
/// Caps the reconnection wait to `delay · 2^6`.
const MAX_BACKOFF_EXPONENT: u32 = 6;

async fn connect<D: NotifyDriver>(
    connection: &ConnectionAdapter<D>,
    subscribers: &Subscribers,
) -> Result<D::Listener> {
    let mut listener = connection.driver().listener().await?;
    for channel in subscribers.channels() {
        listener.listen(&channel).await?;
    }
    Ok(listener)
}

async fn run_worker<D: NotifyDriver>(
    ctx: Context,
    connection: ConnectionAdapter<D>,
    subscribers: Arc<Subscribers>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut failures = 0;
    'connection: loop {
        let connected = tokio::select! {
            listener = connect(&connection, &subscribers) => listener,
            _ = ctx.cancelled() => break,
        };
        let mut listener = match connected {
            Ok(listener) => {
                if failures > 0 {
                    log::info!("Notification listener reconnected");
                }
                failures = 0;
                listener
            }
            Err(e) => {
                log::error!("{:#}", e.context("While connecting the notification listener"));
                failures += 1;
                let count = FailureCount(failures.min(MAX_BACKOFF_EXPONENT));
                if !RECONNECT_BACKOFF.should_try(&ctx, count).await {
                    break;
                }
                continue;
            }
        };
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break 'connection,
                command = commands.recv() => match command {
                    Some(Command::Listen(channel, done)) => {
                        let result = listener.listen(&channel).await;
                        let lost = result.is_err();
                        let _ = done.send(result);
                        if lost {
                            break;
                        }
                    }
                    Some(Command::Unlisten(channel)) => {
                        if let Err(e) = listener.unlisten(&channel).await {
                            log::warn!("While unlistening {}: {:#}", channel, e);
                            break;
                        }
                    }
                    None => break 'connection,
                },
                notification = listener.recv() => match notification {
                    Ok(notification) => subscribers.dispatch(notification),
                    Err(e) => {
                        log::warn!("Notification listener disconnected: {:#}", e);
                        break;
                    }
                },
            }
        }
        failures += 1;
    }
    subscribers.close();
    log::debug!("Notification bus stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscriber(subscribers: &Subscribers, channel: &str, buffer: usize) -> mpsc::Receiver<Notification> {
        let (sender, receiver) = mpsc::channel(buffer);
        let id = subscribers.next_id.fetch_add(1, Ordering::Relaxed);
        subscribers
            .channels
            .write()
            .unwrap()
            .entry(channel.to_owned())
            .or_default()
            .push(Subscriber { id, sender });
        receiver
    }

    fn notification(channel: &str, payload: &str) -> Notification {
        Notification {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    #[test]
    fn dispatch_by_channel() {
        let subscribers = Subscribers::default();
        let mut a = subscriber(&subscribers, "a", 4);
        let mut b = subscriber(&subscribers, "b", 4);
        subscribers.dispatch(notification("a", "1"));
        subscribers.dispatch(notification("c", "2"));
        assert_eq!(a.try_recv().unwrap().payload, "1");
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn full_subscriber_does_not_block_the_others() {
        let subscribers = Subscribers::default();
        let mut slow = subscriber(&subscribers, "a", 1);
        let mut fast = subscriber(&subscribers, "a", 8);
        for i in 0..3 {
            subscribers.dispatch(notification("a", &i.to_string()));
        }
        assert_eq!(slow.try_recv().unwrap().payload, "0");
        assert!(slow.try_recv().is_err());
        for i in 0..3 {
            assert_eq!(fast.try_recv().unwrap().payload, i.to_string());
        }
    }
}
