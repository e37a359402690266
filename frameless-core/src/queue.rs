use crate::{
    Args, ColumnDef, ColumnType, ConnectionAdapter, Context, Driver, Error, ErrorExt, ErrorKind,
    Locking, Order, Query, Result, RowLabeled, Select, SqlWriter, TableDef, clock, merge_error,
    stream::Stream,
};
use anyhow::Context as _;
use async_stream::try_stream;
use serde::{Serialize, de::DeserializeOwned};
use std::{marker::PhantomData, time::Duration};
use time::OffsetDateTime;
use uuid::Uuid;

pub const QUEUE_TABLE: &str = "frameless_queue_messages";

const COLUMNS: &[&str] = &["id", "queue", "data", "created_at"];
const ID_COLUMN: &[&str] = &["id"];

pub fn queue_table() -> TableDef {
    TableDef::new(QUEUE_TABLE)
        .column(ColumnDef::new("id", ColumnType::Key))
        .column(ColumnDef::new("queue", ColumnType::Text))
        .column(ColumnDef::new("data", ColumnType::Json))
        .column(ColumnDef::new("created_at", ColumnType::TimestampWithTimezone))
        .primary_key(["id"])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Pause of a subscription finding the queue empty.
    pub empty_queue_break_time: Duration,
    /// `publish` returns only once every published message was consumed.
    pub blocking: bool,
    /// Deliver the newest message first.
    pub lifo: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            empty_queue_break_time: Duration::from_millis(42),
            blocking: false,
            lifo: false,
        }
    }
}

const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(333);

/// Durable queue stored in [`QUEUE_TABLE`], shared by every process using the same `name`.
///
/// Consumers pop messages inside a transaction: a message is gone for good once acknowledged,
/// and comes back for another consumer when the transaction is rolled back or the consumer dies.
pub struct Queue<T, D: Driver> {
    name: String,
    connection: ConnectionAdapter<D>,
    options: QueueOptions,
    _data: PhantomData<fn() -> T>,
}

impl<T, D: Driver> Clone for Queue<T, D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            connection: self.connection.clone(),
            options: self.options,
            _data: PhantomData,
        }
    }
}

/// Message received from a subscription. Its context carries the transaction that popped it:
/// work done with it commits together with [`Message::ack`].
pub struct Message<T, D: Driver> {
    pub context: Context,
    pub data: T,
    id: String,
    connection: ConnectionAdapter<D>,
}

impl<T, D: Driver> Message<T, D> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the message from the queue for good.
    pub async fn ack(&self) -> Result<()> {
        self.connection
            .commit_tx(&self.context.without_cancel())
            .await
            .with_context(|| format!("While acknowledging the message {}", self.id))
    }

    /// Put the message back in the queue.
    pub async fn nack(&self) -> Result<()> {
        self.connection
            .rollback_tx(&self.context.without_cancel())
            .await
    }
}

impl<T, D: Driver> Drop for Message<T, D> {
    fn drop(&mut self) {
        if !self.connection.in_tx(&self.context) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let connection = self.connection.clone();
        let context = self.context.without_cancel();
        runtime.spawn(async move {
            if let Err(e) = connection.rollback_tx(&context).await {
                log::warn!("While returning a dropped message to the queue: {:#}", e);
            }
        });
    }
}

impl<T, D> Queue<T, D>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    D: Driver,
{
    pub fn new(name: impl Into<String>, connection: ConnectionAdapter<D>) -> Self {
        Self::with_options(name, connection, QueueOptions::default())
    }

    pub fn with_options(
        name: impl Into<String>,
        connection: ConnectionAdapter<D>,
        options: QueueOptions,
    ) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "The queue needs a name");
        Self {
            name,
            connection,
            options,
            _data: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Create the messages table when missing.
    pub async fn migrate(&self, ctx: &Context) -> Result<()> {
        let mut sql = String::new();
        self.connection
            .sql_writer()
            .write_create_table(&mut sql, &queue_table(), true);
        self.connection.exec(ctx, sql).await?;
        Ok(())
    }

    /// Insert the messages with a single statement, in the given order.
    pub async fn publish(&self, ctx: &Context, items: impl IntoIterator<Item = T>) -> Result<()> {
        let base = clock::now_utc();
        let base = base
            .replace_nanosecond(base.nanosecond() / 1_000 * 1_000)
            .unwrap_or(base);
        let mut ids = Vec::new();
        let mut rows = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let id = Uuid::now_v7().to_string();
            let data = serde_json::to_value(&item)
                .with_context(|| format!("While encoding a message of the queue {}", self.name))?;
            let created_at: OffsetDateTime = base + Duration::from_micros(i as u64);
            rows.push(
                Args::new()
                    .with("id", id.clone())
                    .with("queue", self.name.clone())
                    .with("data", data)
                    .with("created_at", created_at),
            );
            ids.push(id);
        }
        if rows.is_empty() {
            return Ok(());
        }
        let mut query = Query::default();
        self.connection
            .sql_writer()
            .write_insert(&mut query, QUEUE_TABLE, &rows, &[]);
        self.connection.exec(ctx, query).await?;
        log::debug!("Published {} messages on {}", ids.len(), self.name);
        if self.options.blocking {
            self.wait_consumed(ctx, &ids).await?;
        }
        Ok(())
    }

    async fn wait_consumed(&self, ctx: &Context, ids: &[String]) -> Result<()> {
        let filter = ids
            .iter()
            .map(|id| Args::new().with("id", id.clone()))
            .collect::<Vec<_>>();
        let mut query = Query::default();
        self.connection.sql_writer().write_count(
            &mut query,
            &Select {
                filter: Some(&filter),
                ..Select::new(QUEUE_TABLE, ID_COLUMN)
            },
        );
        loop {
            let pending = self
                .connection
                .query_row(ctx, query.clone())
                .await?
                .get_index::<i64>(0)?;
            if pending == 0 {
                return Ok(());
            }
            clock::sleep(ctx, BLOCKING_POLL_INTERVAL).await?;
        }
    }

    /// Pull the messages one at a time, each one in its own transaction. The stream ends once
    /// `ctx` is cancelled, rolling back the messages not acknowledged yet.
    pub fn subscribe(&self, ctx: &Context) -> impl Stream<Item = Result<Message<T, D>>> + Send + '_ {
        let ctx = ctx.clone();
        try_stream! {
            loop {
                if ctx.is_cancelled() {
                    break;
                }
                let tx_ctx = match self.connection.begin_tx(&ctx).await {
                    Ok(tx_ctx) => tx_ctx,
                    Err(e) if e.kind().is_some_and(|k| k.is_context_error()) => break,
                    Err(e) => Err(e)?,
                };
                let popped = match self.pop(&tx_ctx).await {
                    Ok(popped) => popped,
                    Err(e) => {
                        let rollback = self.connection.rollback_tx(&tx_ctx).await.err();
                        if ctx.is_cancelled() {
                            if let Some(rollback) = rollback {
                                log::warn!(
                                    "While rolling back the pop from {}: {:#}",
                                    self.name,
                                    rollback
                                );
                            }
                            break;
                        }
                        Err(merge_error(e, rollback))?
                    }
                };
                match popped {
                    Some((id, data)) => {
                        log::trace!("Received message {} from {}", id, self.name);
                        yield Message {
                            context: tx_ctx,
                            data,
                            id,
                            connection: self.connection.clone(),
                        };
                    }
                    None => {
                        self.connection.rollback_tx(&tx_ctx).await?;
                        if clock::sleep(&ctx, self.options.empty_queue_break_time).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn pop(&self, ctx: &Context) -> Result<Option<(String, T)>> {
        let order = if self.options.lifo {
            Order::Desc
        } else {
            Order::Asc
        };
        let filter = [Args::new().with("queue", self.name.clone())];
        let order_by = [("created_at", order), ("id", order)];
        let writer = self.connection.sql_writer();
        let returning = writer.supports_returning();
        let select = Select {
            filter: Some(&filter),
            order_by: &order_by,
            limit: Some(1),
            locking: Locking::ForUpdateSkipLocked,
            ..Select::new(QUEUE_TABLE, if returning { ID_COLUMN } else { COLUMNS })
        };
        let mut query = Query::default();
        if returning {
            writer.write_delete_first(&mut query, "id", &select, COLUMNS);
        } else {
            writer.write_select(&mut query, &select);
        }
        let row = match self.connection.query_row(ctx, query).await {
            Ok(row) => row,
            Err(e) if e.is_kind(ErrorKind::NoRows) => return Ok(None),
            Err(e) => return Err(e),
        };
        let (id, data) = self.decode(&row)?;
        if !returning {
            let mut delete = Query::default();
            writer.write_delete(
                &mut delete,
                QUEUE_TABLE,
                Some(&[Args::new().with("id", id.clone())]),
            );
            let affected = self.connection.exec(ctx, delete).await?;
            if affected.rows_affected != 1 {
                return Err(Error::msg(format!(
                    "The message {} locked for consumption was deleted concurrently",
                    id
                )));
            }
        }
        Ok(Some((id, data)))
    }

    fn decode(&self, row: &RowLabeled) -> Result<(String, T)> {
        let id = row.get::<String>("id")?;
        let data = serde_json::from_value(row.get("data")?)
            .with_context(|| format!("While decoding the message {} of {}", id, self.name))?;
        Ok((id, data))
    }

    /// Delete every message of the queue.
    pub async fn purge(&self, ctx: &Context) -> Result<()> {
        let mut query = Query::default();
        self.connection.sql_writer().write_delete(
            &mut query,
            QUEUE_TABLE,
            Some(&[Args::new().with("queue", self.name.clone())]),
        );
        let affected = self.connection.exec(ctx, query).await?;
        log::debug!("Purged {} messages from {}", affected.rows_affected, self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = QueueOptions::default();
        assert_eq!(options.empty_queue_break_time, Duration::from_millis(42));
        assert!(!options.blocking);
        assert!(!options.lifo);
    }

    #[test]
    fn table_shape() {
        let table = queue_table();
        assert_eq!(table.name, QUEUE_TABLE);
        assert_eq!(
            table.columns.iter().map(|c| c.name.as_ref()).collect::<Vec<_>>(),
            COLUMNS
        );
    }
}
