use crate::{
    Context, ContextKey, Driver, DriverConnection, DriverErrorKind, Error, ErrorKind, Executor,
    PoolConfig, Query, QueryResult, Result, RowLabeled, RowsAffected, SqlWriter, TxHandle,
    TxOptions, TxStage, merge_errors,
    stream::{self, Stream, StreamExt},
};
use anyhow::Context as _;
use async_stream::try_stream;
use futures::future::{self, Either};
use std::{
    future::Future,
    pin::pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::sync::OwnedMutexGuard;

static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

struct Inner<D> {
    id: u64,
    driver: D,
}

/// Entry point to a database: owns the driver pool and routes every statement either to the
/// transaction carried by the [`Context`] or to a pooled connection.
///
/// Cloning is cheap, clones share the pool and the identity of the adapter.
pub struct ConnectionAdapter<D: Driver> {
    inner: Arc<Inner<D>>,
}

impl<D: Driver> Clone for ConnectionAdapter<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Connection serving a single statement.
pub(crate) enum Lease<C> {
    Pooled(C),
    Shared(OwnedMutexGuard<Option<C>>),
}

impl<C: DriverConnection> Lease<C> {
    fn connection(&mut self) -> Option<&mut C> {
        match self {
            Lease::Pooled(connection) => Some(connection),
            Lease::Shared(guard) => guard.as_mut(),
        }
    }

    async fn abort(self) {
        match self {
            Lease::Pooled(connection) => connection.abort().await,
            Lease::Shared(mut guard) => {
                if let Some(connection) = guard.take() {
                    connection.abort().await;
                }
            }
        }
    }
}

impl<C: DriverConnection> Executor for Lease<C> {
    fn run(&mut self, query: Query) -> impl Stream<Item = Result<QueryResult>> + Send {
        match self.connection() {
            Some(connection) => Either::Left(connection.run(query)),
            None => Either::Right(stream::once(future::ready(Err(Error::new(
                ErrorKind::TxDone,
            )
            .context("The transaction connection is gone"))))),
        }
    }
}

fn context_error(ctx: &Context) -> Error {
    ctx.err().unwrap_or(ErrorKind::Cancelled).into()
}

/// When the context is done its error takes precedence over whatever the driver reported.
fn surface(ctx: &Context, error: Error) -> Error {
    match ctx.err() {
        Some(kind) => merge_errors([Some(kind.into()), Some(error)]).unwrap_or_else(|| kind.into()),
        None => error,
    }
}

impl<D: Driver> ConnectionAdapter<D> {
    /// Connect using the pool configuration from the environment, see [`PoolConfig::from_env`].
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, &PoolConfig::from_env()?).await
    }

    pub async fn connect_with(url: &str, config: &PoolConfig) -> Result<Self> {
        let driver = D::connect(url, config).await.with_context(|| {
            format!(
                "While connecting to {} using {}",
                url.split('@').next_back().unwrap_or_default(),
                D::NAME
            )
        })?;
        let adapter = Self::new(driver);
        log::debug!("Connection adapter {} ready ({})", adapter.id(), D::NAME);
        Ok(adapter)
    }

    pub fn new(driver: D) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed),
                driver,
            }),
        }
    }

    /// Process unique identity, used to key the transaction of this adapter in a [`Context`].
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    pub fn sql_writer(&self) -> D::SqlWriter {
        self.inner.driver.sql_writer()
    }

    pub fn classify_error(&self, error: &Error) -> Option<DriverErrorKind> {
        self.inner.driver.classify_error(error)
    }

    fn tx_key(&self) -> ContextKey {
        ContextKey::with_discriminator::<TxHandle<D::Connection>>(self.inner.id)
    }

    fn tx_handle(&self, ctx: &Context) -> Option<Arc<TxHandle<D::Connection>>> {
        ctx.value::<TxHandle<D::Connection>>(self.tx_key())
    }

    /// Whether `ctx` carries a live transaction of this adapter.
    pub fn in_tx(&self, ctx: &Context) -> bool {
        self.tx_handle(ctx).is_some_and(|h| h.is_open())
    }

    pub async fn begin_tx(&self, ctx: &Context) -> Result<Context> {
        self.begin_tx_with(ctx, TxOptions::default()).await
    }

    /// Start a transaction, or join the one `ctx` already carries for this adapter. The returned
    /// context must be used by every statement that should take part in the transaction.
    pub async fn begin_tx_with(&self, ctx: &Context, options: TxOptions) -> Result<Context> {
        ctx.check()?;
        if let Some(handle) = self.tx_handle(ctx) {
            let mut state = handle.state();
            if state.stage == TxStage::Open {
                state.depth += 1;
                log::trace!("Nested begin of transaction {} (depth {})", handle.id, state.depth);
                return Ok(ctx.clone());
            }
        }
        let mut connection = tokio::select! {
            connection = self.driver().acquire() => connection?,
            _ = ctx.cancelled() => return Err(context_error(ctx)),
        };
        let mut sql = String::new();
        self.sql_writer().write_transaction_begin(&mut sql, &options);
        let outcome = {
            let begin = connection.execute(Query::new(sql));
            tokio::select! {
                result = begin => Some(result),
                _ = ctx.cancelled() => None,
            }
        };
        match outcome {
            Some(Ok(..)) => {}
            Some(Err(e)) => return Err(surface(ctx, e)),
            None => {
                connection.abort().await;
                return Err(context_error(ctx));
            }
        }
        let handle = Arc::new(TxHandle::new(
            NEXT_TX_ID.fetch_add(1, Ordering::Relaxed),
            connection,
        ));
        log::debug!("Begin transaction {} on adapter {}", handle.id, self.id());
        let tx_ctx = ctx.child().with_shared(self.tx_key(), handle.clone());
        let adapter = self.clone();
        let cancelled = tx_ctx.cancelled_owned();
        tokio::spawn(async move {
            let done = handle.done.clone();
            tokio::select! {
                _ = cancelled => {
                    if let Err(e) = adapter.finish_tx(&handle, false).await {
                        log::warn!("While rolling back the cancelled transaction {}: {:#}", handle.id, e);
                    }
                }
                _ = done.cancelled() => {}
            }
        });
        Ok(tx_ctx)
    }

    /// Commit the outermost scope, or close a nested one.
    pub async fn commit_tx(&self, ctx: &Context) -> Result<()> {
        let Some(handle) = self.tx_handle(ctx) else {
            return Err(ErrorKind::NoContext.into());
        };
        {
            let mut state = handle.state();
            if state.stage != TxStage::Open {
                drop(state);
                return Err(ctx.err().unwrap_or(ErrorKind::TxDone).into());
            }
            if state.depth > 0 {
                state.depth -= 1;
                return Ok(());
            }
        }
        if let Some(kind) = ctx.err() {
            if let Err(e) = self.finish_tx(&handle, false).await {
                log::warn!("{:#}", e);
            }
            return Err(kind.into());
        }
        self.finish_tx(&handle, true).await
    }

    /// Roll back the whole transaction, whatever the nesting depth of `ctx`. Enclosing scopes
    /// then fail to commit with [`ErrorKind::TxDone`]. Calls after the transaction is finished
    /// are no-ops.
    pub async fn rollback_tx(&self, ctx: &Context) -> Result<()> {
        let Some(handle) = self.tx_handle(ctx) else {
            return Err(ErrorKind::NoContext.into());
        };
        if !handle.is_open() {
            return Ok(());
        }
        self.finish_tx(&handle, false).await
    }

    async fn finish_tx(&self, handle: &TxHandle<D::Connection>, commit: bool) -> Result<()> {
        {
            let mut state = handle.state();
            if state.stage != TxStage::Open {
                drop(state);
                return if commit {
                    Err(ErrorKind::TxDone.into())
                } else {
                    Ok(())
                };
            }
            state.stage = TxStage::Finishing;
        }
        let connection = handle.connection.lock().await.take();
        let result = match connection {
            Some(mut connection) => {
                let mut sql = String::new();
                let writer = self.sql_writer();
                if commit {
                    writer.write_transaction_commit(&mut sql);
                } else {
                    writer.write_transaction_rollback(&mut sql);
                }
                let result = connection.execute(Query::new(sql)).await.map(|_| ());
                if result.is_err() {
                    connection.abort().await;
                }
                result
            }
            None if commit => Err(Error::new(ErrorKind::TxDone)
                .context("The transaction connection was interrupted before commit")),
            None => Ok(()),
        };
        handle.finish();
        log::debug!(
            "{} transaction {}",
            if commit { "Commit" } else { "Rollback" },
            handle.id
        );
        result
    }

    /// Run `f` inside a transaction: commit when it succeeds, roll back otherwise. The error of
    /// `f` wins over the one of the rollback. When `ctx` already carries a transaction, a failure
    /// rolls back all of it.
    pub async fn with_tx<T, F, Fut>(&self, ctx: &Context, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tx_ctx = self.begin_tx(ctx).await?;
        match f(tx_ctx.clone()).await {
            Ok(value) => {
                self.commit_tx(&tx_ctx).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback_tx(&tx_ctx).await {
                    log::warn!("{:#}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn lease(&self, ctx: &Context) -> Result<Lease<D::Connection>> {
        ctx.check()?;
        if let Some(handle) = self.tx_handle(ctx) {
            if !handle.is_open() {
                return Err(ErrorKind::TxDone.into());
            }
            let guard = tokio::select! {
                guard = handle.connection.clone().lock_owned() => guard,
                _ = ctx.cancelled() => return Err(context_error(ctx)),
            };
            if guard.is_none() {
                return Err(ErrorKind::TxDone.into());
            }
            return Ok(Lease::Shared(guard));
        }
        tokio::select! {
            connection = self.driver().acquire() => Ok(Lease::Pooled(connection?)),
            _ = ctx.cancelled() => Err(context_error(ctx)),
        }
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn exec(&self, ctx: &Context, query: impl Into<Query>) -> Result<RowsAffected> {
        let query = query.into();
        let mut lease = self.lease(ctx).await?;
        let outcome = {
            let execute = lease.execute(query);
            tokio::select! {
                result = execute => Some(result),
                _ = ctx.cancelled() => None,
            }
        };
        match outcome {
            Some(result) => result.map_err(|e| surface(ctx, e)),
            None => {
                lease.abort().await;
                Err(context_error(ctx))
            }
        }
    }

    /// Stream the rows of a query. Outside a transaction the rows are read lazily and dropping
    /// the stream releases the connection. Inside one, the result is read in full before the first
    /// row is yielded, so the transaction connection is free for other statements while the
    /// stream is still open. A cancellation of `ctx` interrupts the statement and ends the stream
    /// with the context error.
    pub fn query(
        &self,
        ctx: &Context,
        query: impl Into<Query>,
    ) -> impl Stream<Item = Result<RowLabeled>> + Send + '_ {
        let ctx = ctx.clone();
        let query = query.into();
        try_stream! {
            let mut lease = self.lease(&ctx).await?;
            let shared = matches!(lease, Lease::Shared(..));
            let mut buffered = Vec::new();
            let mut interrupted = false;
            {
                let mut rows = pin!(lease.fetch(query));
                loop {
                    let next = tokio::select! {
                        next = rows.next() => next,
                        _ = ctx.cancelled() => {
                            interrupted = true;
                            None
                        }
                    };
                    match next {
                        Some(Ok(row)) if shared => buffered.push(row),
                        Some(Ok(row)) => yield row,
                        Some(Err(e)) => Err::<(), Error>(surface(&ctx, e))?,
                        None => break,
                    }
                }
            }
            if interrupted {
                lease.abort().await;
                Err::<(), Error>(context_error(&ctx))?;
            } else {
                drop(lease);
            }
            for row in buffered {
                yield row;
            }
        }
    }

    /// First row of the query, [`ErrorKind::NoRows`] when the result is empty.
    pub async fn query_row(&self, ctx: &Context, query: impl Into<Query>) -> Result<RowLabeled> {
        let mut rows = pin!(self.query(ctx, query));
        match rows.next().await {
            Some(row) => row,
            None => Err(ErrorKind::NoRows.into()),
        }
    }

    /// Close the pool. Transactions still open are rolled back by the server.
    pub async fn close(&self) -> Result<()> {
        log::debug!("Closing connection adapter {}", self.id());
        self.inner.driver.close().await
    }
}
