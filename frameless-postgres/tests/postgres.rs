mod init;

#[cfg(test)]
mod tests {
    use super::init::init;
    use frameless::{ConnectionAdapter, Context, PoolConfig, Value};
    use frameless_postgres::PostgresDriver;
    use frameless_tests::{execute_notify_tests, execute_tests, init_logs, silent_logs};
    use std::{sync::Mutex, time::Duration};

    static MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn postgres() {
        init_logs();
        let _guard = MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let (url, container) = init().await;
        let error_msg = format!("Could not connect to `{url}`");
        let connection = ConnectionAdapter::<PostgresDriver>::connect(&url)
            .await
            .expect(&error_msg);
        execute_tests(&connection).await;
        execute_notify_tests(&connection).await;
        connection.close().await.expect("Could not close the pool");
        drop(container);
    }

    #[tokio::test]
    async fn simple_protocol_batches() {
        init_logs();
        let _guard = MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let (url, container) = init().await;
        let connection = ConnectionAdapter::<PostgresDriver>::connect_with(
            &url,
            &PoolConfig {
                max_open: 2,
                max_idle: 1,
                max_lifetime: Duration::from_secs(60),
            },
        )
        .await
        .expect("Could not connect");
        let ctx = Context::background();
        let affected = connection
            .exec(
                &ctx,
                "CREATE TEMPORARY TABLE batch (id INT); INSERT INTO batch VALUES (1), (2);",
            )
            .await
            .expect("Could not run the batch");
        assert_eq!(affected.rows_affected, 2);
        let row = connection
            .query_row(&ctx, "SELECT 'text' AS t, 42::INT8 AS n;")
            .await
            .expect("Could not run the query");
        assert_eq!(row.get::<String>("t").expect("Missing t"), "text");
        assert_eq!(row.get_column("n"), Some(&Value::Int64(Some(42))));
        connection.close().await.expect("Could not close the pool");
        drop(container);
    }

    #[tokio::test]
    async fn wrong_url() {
        silent_logs! {
            assert!(
                ConnectionAdapter::<PostgresDriver>::connect("mysql://some_url")
                    .await
                    .is_err()
            );
        }
    }
}
