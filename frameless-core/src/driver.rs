use crate::{DriverErrorKind, Error, Executor, PoolConfig, Result, SqlWriter};
use std::future::Future;

/// A database backend: owns the connection pool and knows the dialect.
pub trait Driver: Send + Sync + Sized + 'static {
    type Connection: DriverConnection;
    type SqlWriter: SqlWriter;

    const NAME: &'static str;

    /// Create the pool and verify a connection can be established to the given URL.
    fn connect(url: &str, config: &PoolConfig) -> impl Future<Output = Result<Self>> + Send;

    fn sql_writer(&self) -> Self::SqlWriter;

    /// Take a connection from the pool. Dropping it gives it back.
    fn acquire(&self) -> impl Future<Output = Result<Self::Connection>> + Send;

    /// Open a connection outside the pool, used for long lived sessions like advisory locks.
    fn acquire_dedicated(&self) -> impl Future<Output = Result<Self::Connection>> + Send {
        self.acquire()
    }

    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    /// Recognize the native errors the runtime reacts to.
    fn classify_error(&self, error: &Error) -> Option<DriverErrorKind>;
}

pub trait DriverConnection: Executor + Send + 'static {
    /// Interrupt whatever the connection is running and make sure it is never reused.
    fn abort(self) -> impl Future<Output = ()> + Send;
}
