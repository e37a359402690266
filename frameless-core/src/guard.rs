use crate::{
    Args, ColumnDef, ColumnType, ConnectionAdapter, Context, ContextKey, Driver, DriverConnection,
    DriverErrorKind, Error, ErrorKind, Executor, IsolationLevel, Locking, Query, Result, Select,
    SqlWriter, TableDef, TxOptions, merge_error, short_type_name,
    stream::TryStreamExt,
};
use std::{
    fmt::Display,
    hash::{DefaultHasher, Hash, Hasher},
    marker::PhantomData,
    pin::pin,
    slice,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::task::JoinHandle;

pub const LOCKS_TABLE: &str = "frameless_guard_locks";

pub fn locks_table() -> TableDef {
    TableDef::new(LOCKS_TABLE)
        .column(ColumnDef::new("name", ColumnType::Key))
        .primary_key(["name"])
}

/// Lock held by a context: the connection of the lock transaction and the hooks releasing it.
struct LockHandle<C> {
    name: String,
    connection: tokio::sync::Mutex<Option<C>>,
    released: AtomicBool,
    /// Context passed to `lock`.
    outer: Context,
    /// Scope of the lock context, cancelled on release.
    scope: Context,
    after_cancel: Mutex<Option<JoinHandle<()>>>,
}

/// Mutual exclusion across processes, coordinated by the database.
///
/// Holding the lock means holding an open transaction that inserted the row `name` in
/// [`LOCKS_TABLE`]. Other lockers block on the unique key until that transaction is rolled back,
/// which happens on [`Locker::unlock`], when the context passed to [`Locker::lock`] is cancelled,
/// or when the connection is lost.
pub struct Locker<D: Driver> {
    name: String,
    connection: ConnectionAdapter<D>,
}

impl<D: Driver> Clone for Locker<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<D: Driver> Locker<D> {
    pub fn new(name: impl Into<String>, connection: ConnectionAdapter<D>) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the locks table when missing.
    pub async fn migrate(&self, ctx: &Context) -> Result<()> {
        let mut sql = String::new();
        self.connection
            .sql_writer()
            .write_create_table(&mut sql, &locks_table(), true);
        self.connection.exec(ctx, sql).await?;
        Ok(())
    }

    fn key(&self) -> ContextKey {
        let mut hasher = DefaultHasher::new();
        self.connection.id().hash(&mut hasher);
        self.name.hash(&mut hasher);
        ContextKey::with_discriminator::<LockHandle<D::Connection>>(hasher.finish())
    }

    fn handle(&self, ctx: &Context) -> Option<Arc<LockHandle<D::Connection>>> {
        ctx.value::<LockHandle<D::Connection>>(self.key())
            .filter(|h| h.name == self.name)
    }

    fn held(&self, ctx: &Context) -> bool {
        self.handle(ctx)
            .is_some_and(|h| !h.released.load(Ordering::Acquire))
    }

    /// Block until the lock is acquired. The returned context carries the lock, which is released
    /// once it is cancelled. Locking again with a context already holding the lock returns it
    /// unchanged.
    pub async fn lock(&self, ctx: &Context) -> Result<Context> {
        if self.held(ctx) {
            return Ok(ctx.clone());
        }
        let mut connection = self.begin(ctx).await?;
        let insert = self.insert_query();
        let outcome = {
            let execute = connection.execute(insert);
            tokio::select! {
                result = execute => Some(result),
                _ = ctx.cancelled() => None,
            }
        };
        match outcome {
            Some(Ok(..)) => {}
            Some(Err(e)) => return Err(self.discard(connection, e).await),
            None => {
                connection.abort().await;
                return Err(ctx.err().unwrap_or(ErrorKind::Cancelled).into());
            }
        }
        Ok(self.attach(ctx, connection))
    }

    /// Acquire the lock only if nobody holds it, `None` otherwise.
    pub async fn try_lock(&self, ctx: &Context) -> Result<Option<Context>> {
        if self.held(ctx) {
            return Ok(Some(ctx.clone()));
        }
        let mut connection = self.begin(ctx).await?;
        let writer = self.connection.sql_writer();
        let mut sql = String::new();
        writer.write_lock_wait_nowait(&mut sql);
        if !sql.is_empty() {
            if let Err(e) = connection.execute(Query::new(sql)).await {
                return Err(self.discard(connection, e).await);
            }
        }
        let filter = [Args::new().with("name", self.name.clone())];
        let mut check = Query::default();
        writer.write_select(
            &mut check,
            &Select {
                filter: Some(&filter),
                limit: Some(1),
                locking: Locking::ForUpdateNowait,
                ..Select::new(LOCKS_TABLE, &["name"])
            },
        );
        let checked = {
            let rows = pin!(connection.fetch(check));
            rows.try_collect::<Vec<_>>().await
        };
        let free = match checked {
            Ok(rows) => rows.is_empty(),
            Err(e) if self.is_unavailable(&e) => false,
            Err(e) => return Err(self.discard(connection, e).await),
        };
        let acquired = free
            && match connection.execute(self.insert_query()).await {
                Ok(..) => true,
                Err(e) if self.is_unavailable(&e) => false,
                Err(e) => return Err(self.discard(connection, e).await),
            };
        if !acquired {
            self.rollback(connection).await?;
            log::debug!("Lock {} is held by someone else", self.name);
            return Ok(None);
        }
        let mut sql = String::new();
        writer.write_lock_wait_reset(&mut sql);
        if !sql.is_empty() {
            if let Err(e) = connection.execute(Query::new(sql)).await {
                return Err(self.discard(connection, e).await);
            }
        }
        Ok(Some(self.attach(ctx, connection)))
    }

    /// Release the lock carried by `ctx`. Releasing twice is fine, [`ErrorKind::NoLock`] when
    /// `ctx` never held it.
    pub async fn unlock(&self, ctx: &Context) -> Result<()> {
        let Some(handle) = self.handle(ctx) else {
            return Err(Error::new(ErrorKind::NoLock).context(format!(
                "The context does not hold the lock {}",
                self.name
            )));
        };
        self.release(&handle, true).await
    }

    async fn begin(&self, ctx: &Context) -> Result<D::Connection> {
        ctx.check()?;
        let mut connection = tokio::select! {
            connection = self.connection.driver().acquire_dedicated() => connection?,
            _ = ctx.cancelled() => return Err(ctx.err().unwrap_or(ErrorKind::Cancelled).into()),
        };
        let mut sql = String::new();
        self.connection.sql_writer().write_transaction_begin(
            &mut sql,
            &TxOptions::isolation(IsolationLevel::ReadCommitted),
        );
        if let Err(e) = connection.execute(Query::new(sql)).await {
            connection.abort().await;
            return Err(e);
        }
        Ok(connection)
    }

    fn insert_query(&self) -> Query {
        let mut query = Query::default();
        self.connection.sql_writer().write_insert(
            &mut query,
            LOCKS_TABLE,
            slice::from_ref(&Args::new().with("name", self.name.clone())),
            &[],
        );
        query
    }

    fn is_unavailable(&self, error: &Error) -> bool {
        matches!(
            self.connection.classify_error(error),
            Some(DriverErrorKind::LockNotAvailable | DriverErrorKind::UniqueViolation)
        )
    }

    async fn rollback(&self, mut connection: D::Connection) -> Result<()> {
        let mut sql = String::new();
        self.connection
            .sql_writer()
            .write_transaction_rollback(&mut sql);
        let result = connection.execute(Query::new(sql)).await.map(|_| ());
        if result.is_err() {
            connection.abort().await;
        }
        result
    }

    /// Roll back a lock transaction that failed, keeping both errors.
    async fn discard(&self, connection: D::Connection, error: Error) -> Error {
        let error = error.context(format!("While acquiring the lock {}", self.name));
        let rollback = self.rollback(connection).await.err();
        merge_error(error, rollback)
    }

    fn attach(&self, ctx: &Context, connection: D::Connection) -> Context {
        let scope = ctx.child();
        let handle = Arc::new(LockHandle {
            name: self.name.clone(),
            connection: tokio::sync::Mutex::new(Some(connection)),
            released: AtomicBool::new(false),
            outer: ctx.clone(),
            scope: scope.clone(),
            after_cancel: Mutex::new(None),
        });
        let lock_ctx = scope.with_shared(self.key(), handle.clone());
        let locker = self.clone();
        let released = handle.clone();
        let after_cancel = scope.after_cancel(move || async move {
            if let Err(e) = locker.release(&released, false).await {
                log::error!("{:#}", e);
            }
        });
        *handle
            .after_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(after_cancel);
        log::debug!("Acquired lock {}", self.name);
        lock_ctx
    }

    async fn release(&self, handle: &LockHandle<D::Connection>, explicit: bool) -> Result<()> {
        if handle.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if explicit {
            if let Some(task) = handle
                .after_cancel
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take()
            {
                task.abort();
            }
        }
        let connection = handle.connection.lock().await.take();
        let result = match connection {
            Some(connection) => self.rollback(connection).await,
            None => Ok(()),
        };
        handle.scope.cancel();
        log::debug!("Released lock {}", self.name);
        match result {
            Err(e)
                if handle.outer.is_cancelled()
                    && self.connection.classify_error(&e)
                        == Some(DriverErrorKind::BadConnection) =>
            {
                log::warn!("While releasing the lock {}: {:#}", self.name, e);
                Ok(())
            }
            result => result.map_err(|e| e.context(format!("While releasing the lock {}", self.name))),
        }
    }
}

/// Builds the lockers of a namespace, one per key.
pub struct LockerFactory<K, D: Driver> {
    namespace: String,
    connection: ConnectionAdapter<D>,
    _key: PhantomData<fn(K)>,
}

impl<K: Display, D: Driver> LockerFactory<K, D> {
    pub fn new(connection: ConnectionAdapter<D>) -> Self {
        Self::with_namespace("", connection)
    }

    pub fn with_namespace(namespace: impl Into<String>, connection: ConnectionAdapter<D>) -> Self {
        Self {
            namespace: namespace.into(),
            connection,
            _key: PhantomData,
        }
    }

    /// `<namespace>/<type-name>:<key>`, the namespace part is omitted when empty.
    pub fn lock_name(&self, key: &K) -> String {
        lock_name::<K>(&self.namespace, key)
    }

    pub fn locker_for(&self, key: &K) -> Locker<D> {
        Locker::new(self.lock_name(key), self.connection.clone())
    }

    pub async fn migrate(&self, ctx: &Context) -> Result<()> {
        Locker::new("", self.connection.clone()).migrate(ctx).await
    }
}

fn lock_name<K: Display>(namespace: &str, key: &K) -> String {
    let type_name = short_type_name::<K>();
    if namespace.is_empty() {
        format!("{}:{}", type_name, key)
    } else {
        format!("{}/{}:{}", namespace, type_name, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TenantId(u32);
    impl Display for TenantId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[test]
    fn lock_names() {
        assert_eq!(lock_name("billing", &TenantId(7)), "billing/TenantId:7");
        assert_eq!(lock_name("", &TenantId(7)), "TenantId:7");
        assert_ne!(
            lock_name("billing", &"a".to_string()),
            lock_name("audit", &"a".to_string())
        );
    }

    #[test]
    fn locks_table_has_a_single_key() {
        let table = locks_table();
        assert_eq!(table.name, LOCKS_TABLE);
        assert_eq!(table.primary_key, ["name"]);
        assert_eq!(table.columns.len(), 1);
    }
}
