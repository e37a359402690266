mod init;

#[cfg(test)]
mod tests {
    use super::init::init;
    use frameless::{ConnectionAdapter, Context, Query, Value};
    use frameless_mysql::MySQLDriver;
    use frameless_tests::{execute_tests, init_logs, silent_logs};
    use std::sync::Mutex;

    static MUTEX: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn mysql() {
        init_logs();
        let _guard = MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let (url, container) = init().await;
        let error_msg = format!("Could not connect to `{url}`");
        let connection = ConnectionAdapter::<MySQLDriver>::connect(&url)
            .await
            .expect(&error_msg);
        execute_tests(&connection).await;
        connection.close().await.expect("Could not close the pool");
        drop(container);
    }

    #[tokio::test]
    async fn text_and_binary_protocols() {
        init_logs();
        let _guard = MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let (url, container) = init().await;
        let connection = ConnectionAdapter::<MySQLDriver>::connect(&url)
            .await
            .expect("Could not connect");
        let ctx = Context::background();
        let row = connection
            .query_row(&ctx, "SELECT 'text' AS t, CAST(42 AS SIGNED) AS n;")
            .await
            .expect("Could not run the query");
        assert_eq!(row.get::<String>("t").expect("Missing t"), "text");
        assert_eq!(row.get_column("n"), Some(&Value::Int64(Some(42))));
        let row = connection
            .query_row(&ctx, Query::new("SELECT CONCAT(?, '!') AS t;").bind("bound".to_string()))
            .await
            .expect("Could not run the prepared query");
        assert_eq!(row.get::<String>("t").expect("Missing t"), "bound!");
        connection.close().await.expect("Could not close the pool");
        drop(container);
    }

    #[tokio::test]
    async fn wrong_url() {
        silent_logs! {
            assert!(
                ConnectionAdapter::<MySQLDriver>::connect("postgres://some_url")
                    .await
                    .is_err()
            );
        }
    }
}
