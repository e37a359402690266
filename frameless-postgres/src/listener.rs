use crate::{PostgresSqlWriter, Tls};
use frameless_core::{
    Error, Notification, NotifyListener, Result, SqlWriter,
    stream::{self, StreamExt},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_postgres::{AsyncMessage, Connection, NoTls};

/// Dedicated session issuing `LISTEN`. The notifications are read by a task polling the
/// connection and handed over through a channel.
pub struct PostgresListener {
    client: tokio_postgres::Client,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

impl PostgresListener {
    pub(crate) async fn connect(config: &tokio_postgres::Config, tls: &Tls) -> Result<Self> {
        let (client, notifications) = match tls {
            Tls::Disabled => {
                let (client, connection) = config.connect(NoTls).await?;
                (client, forward(connection))
            }
            Tls::Enabled(connector) => {
                let (client, connection) = config.connect(connector.clone()).await?;
                (client, forward(connection))
            }
        };
        Ok(Self {
            client,
            notifications,
        })
    }

    async fn command(&self, command: &str, channel: &str) -> Result<()> {
        let mut sql = String::from(command);
        sql.push(' ');
        PostgresSqlWriter {}.write_identifier_quoted(&mut sql, channel);
        sql.push(';');
        self.client.batch_execute(&sql).await.map_err(|e| {
            let e = Error::new(e).context(format!("While running `{}`", sql));
            log::error!("{:#}", e);
            e
        })
    }
}

fn forward<S, T>(mut connection: Connection<S, T>) -> mpsc::UnboundedReceiver<Notification>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut messages = stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notification(notification)) => {
                    let notification = Notification {
                        channel: notification.channel().to_owned(),
                        payload: notification.payload().to_owned(),
                    };
                    if sender.send(notification).is_err() {
                        break;
                    }
                }
                Ok(AsyncMessage::Notice(notice)) => log::debug!("Postgres notice: {}", notice),
                Ok(..) => {}
                Err(e) => {
                    if !e.is_closed() {
                        log::warn!("Postgres listener connection error: {:#}", e);
                    }
                    break;
                }
            }
        }
    });
    receiver
}

impl NotifyListener for PostgresListener {
    async fn listen(&mut self, channel: &str) -> Result<()> {
        self.command("LISTEN", channel).await
    }

    async fn unlisten(&mut self, channel: &str) -> Result<()> {
        self.command("UNLISTEN", channel).await
    }

    async fn recv(&mut self) -> Result<Notification> {
        self.notifications
            .recv()
            .await
            .ok_or_else(|| Error::msg("The Postgres listener connection was closed"))
    }
}
