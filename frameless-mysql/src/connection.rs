use crate::{RowWrap, ValueWrap};
use async_stream::try_stream;
use frameless_core::{
    DriverConnection, Error, Executor, Query, QueryResult, Result, RowNames, RowsAffected,
    stream::{Stream, StreamExt, TryStreamExt},
};
use mysql_async::{Conn, Params, Pool, prelude::Queryable};
use std::{pin::pin, sync::Arc};

pub struct MySQLConnection {
    conn: Conn,
    /// Used to reach the server while `conn` is busy.
    pool: Pool,
}

impl MySQLConnection {
    pub(crate) fn new(conn: Conn, pool: Pool) -> Self {
        Self { conn, pool }
    }

    pub fn conn(&mut self) -> &mut Conn {
        &mut self.conn
    }
}

impl Executor for MySQLConnection {
    /// Queries without arguments go through the text protocol, which also accepts several
    /// statements. The others are prepared and run through the binary protocol.
    fn run(&mut self, query: Query) -> impl Stream<Item = Result<QueryResult>> + Send {
        let context = Arc::new(format!("While running the query:\n{}", query));
        try_stream! {
            if query.args.is_empty() {
                let mut result = self.conn.query_iter(query.sql).await?;
                while let Some(stream) = result.stream::<mysql_async::Row>().await? {
                    let mut stream = pin!(stream);
                    let mut labels: Option<RowNames> = None;
                    while let Some(row) = stream.next().await.transpose()? {
                        yield RowWrap::decode(row, &mut labels)?.0.into();
                    }
                }
                yield RowsAffected {
                    rows_affected: result.affected_rows(),
                    last_affected_id: result.last_insert_id().map(|v| v as i64),
                }
                .into();
            } else {
                let params = query
                    .args
                    .into_iter()
                    .map(|v| ValueWrap(v).try_into())
                    .collect::<Result<Vec<mysql_async::Value>>>()?;
                let mut result = self
                    .conn
                    .exec_iter(query.sql, Params::Positional(params))
                    .await?;
                while let Some(stream) = result.stream::<mysql_async::Row>().await? {
                    let mut stream = pin!(stream);
                    let mut labels: Option<RowNames> = None;
                    while let Some(row) = stream.next().await.transpose()? {
                        yield RowWrap::decode(row, &mut labels)?.0.into();
                    }
                }
                yield RowsAffected {
                    rows_affected: result.affected_rows(),
                    last_affected_id: result.last_insert_id().map(|v| v as i64),
                }
                .into();
            }
        }
        .map_err(move |e: Error| {
            let e = e.context(context.clone());
            log::error!("{:#}", e);
            e
        })
    }
}

impl DriverConnection for MySQLConnection {
    async fn abort(self) {
        let id = self.conn.id();
        match self.pool.get_conn().await {
            Ok(mut killer) => {
                if let Err(e) = killer.query_drop(format!("KILL QUERY {}", id)).await {
                    log::warn!("While killing the running MySQL query: {:#}", e);
                }
            }
            Err(e) => log::warn!("While connecting to kill the running MySQL query: {:#}", e),
        }
        if let Err(e) = self.conn.disconnect().await {
            log::warn!("While closing the aborted MySQL connection: {:#}", e);
        }
    }
}
