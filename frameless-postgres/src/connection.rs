use crate::{
    Tls,
    util::{stream_postgres_query, stream_postgres_simple_query},
};
use deadpool_postgres::Object;
use frameless_core::{
    DriverConnection, Error, Executor, Query, QueryResult, Result,
    future::Either,
    stream::{Stream, TryStreamExt},
};
use std::sync::Arc;
use tokio_postgres::NoTls;

pub(crate) enum Client {
    Pooled(Object),
    /// Opened outside the pool, closed when dropped.
    Dedicated(tokio_postgres::Client),
}

pub struct PostgresConnection {
    client: Client,
    tls: Tls,
}

impl PostgresConnection {
    pub(crate) fn new(client: Client, tls: Tls) -> Self {
        Self { client, tls }
    }

    pub fn client(&self) -> &tokio_postgres::Client {
        match &self.client {
            Client::Pooled(object) => object,
            Client::Dedicated(client) => client,
        }
    }
}

/// More than one statement, which only the simple query protocol accepts.
fn is_batch(sql: &str) -> bool {
    sql.trim().trim_end_matches(';').contains(';')
}

impl Executor for PostgresConnection {
    fn run(&mut self, query: Query) -> impl Stream<Item = Result<QueryResult>> + Send {
        let context = Arc::new(format!("While running the query:\n{}", query));
        let client = self.client();
        let stream = if query.args.is_empty() && is_batch(&query.sql) {
            Either::Left(stream_postgres_simple_query(client, query.sql))
        } else {
            Either::Right(stream_postgres_query(client, query))
        };
        stream.map_err(move |e: Error| {
            let e = e.context(context.clone());
            log::error!("{:#}", e);
            e
        })
    }
}

impl DriverConnection for PostgresConnection {
    async fn abort(self) {
        let token = self.client().cancel_token();
        let cancelled = match &self.tls {
            Tls::Disabled => token.cancel_query(NoTls).await,
            Tls::Enabled(connector) => token.cancel_query(connector.clone()).await,
        };
        if let Err(e) = cancelled {
            log::warn!("While cancelling the running Postgres query: {:#}", e);
        }
        if let Client::Pooled(object) = self.client {
            drop(Object::take(object));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::is_batch;

    #[test]
    fn batch_detection() {
        assert!(!is_batch("SELECT 1;"));
        assert!(!is_batch("BEGIN ISOLATION LEVEL READ COMMITTED;  "));
        assert!(is_batch("CREATE TABLE a (id INT);\nCREATE TABLE b (id INT);"));
    }
}
