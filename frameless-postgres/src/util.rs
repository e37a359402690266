use crate::ValueHolder;
use async_stream::try_stream;
use frameless_core::{
    Error, Query, QueryResult, Result, Row, RowLabeled, RowNames, RowsAffected, Value,
    stream::{Stream, StreamExt},
};
use std::pin::pin;
use tokio_postgres::SimpleQueryMessage;

pub(crate) fn row_to_values(row: tokio_postgres::Row) -> Result<Row> {
    (0..row.len())
        .map(|i| match row.try_get::<_, ValueHolder>(i) {
            Ok(v) => Ok(v.0),
            Err(e) => {
                let col = &row.columns()[i];
                Err(Error::new(e).context(format!(
                    "Could not deserialize column {} `{}`: {}",
                    i,
                    col.name(),
                    col.type_()
                )))
            }
        })
        .collect()
}

/// Extended protocol: typed parameters and typed results, a single statement.
pub(crate) fn stream_postgres_query(
    client: &tokio_postgres::Client,
    query: Query,
) -> impl Stream<Item = Result<QueryResult>> + Send + '_ {
    try_stream! {
        let sql = query.sql.trim_end().trim_end_matches(';');
        let params = query.args.into_iter().map(ValueHolder).collect::<Vec<_>>();
        let rows = client.query_raw(sql, params).await?;
        let mut rows = pin!(rows);
        let mut labels: Option<RowNames> = None;
        while let Some(row) = rows.next().await.transpose()? {
            let labels = labels
                .get_or_insert_with(|| row.columns().iter().map(|c| c.name().to_string()).collect())
                .clone();
            yield RowLabeled::new(labels, row_to_values(row)?).into();
        }
        if let Some(rows_affected) = rows.rows_affected() {
            yield RowsAffected {
                rows_affected,
                last_affected_id: None,
            }
            .into();
        }
    }
}

/// Simple protocol: several statements, every value comes back as text.
pub(crate) fn stream_postgres_simple_query(
    client: &tokio_postgres::Client,
    sql: String,
) -> impl Stream<Item = Result<QueryResult>> + Send + '_ {
    try_stream! {
        let messages = client.simple_query_raw(&sql).await?;
        let mut messages = pin!(messages);
        let mut labels: Option<RowNames> = None;
        while let Some(message) = messages.next().await.transpose()? {
            match message {
                SimpleQueryMessage::Row(row) => {
                    let labels = labels
                        .get_or_insert_with(|| {
                            row.columns().iter().map(|c| c.name().to_string()).collect()
                        })
                        .clone();
                    let values = (0..row.len())
                        .map(|i| Value::Varchar(row.get(i).map(Into::into)))
                        .collect::<Row>();
                    yield RowLabeled::new(labels, values).into();
                }
                SimpleQueryMessage::CommandComplete(rows_affected) => {
                    labels = None;
                    yield RowsAffected {
                        rows_affected,
                        last_affected_id: None,
                    }
                    .into();
                }
                _ => {}
            }
        }
    }
}
