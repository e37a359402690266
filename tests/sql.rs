#[cfg(test)]
mod tests {
    use frameless::{
        Args, ColumnDef, ColumnDefault, ColumnType, IsolationLevel, Locking, Order, Query,
        Select, SqlWriter, TableDef, TxOptions, Value,
    };
    use frameless_mysql::MySQLSqlWriter;
    use frameless_postgres::PostgresSqlWriter;
    use indoc::indoc;

    const POSTGRES: PostgresSqlWriter = PostgresSqlWriter {};

    fn users() -> TableDef {
        TableDef::new("users")
            .column(ColumnDef::new("id", ColumnType::Serial))
            .column(ColumnDef::new("name", ColumnType::Text).nullable())
            .column(
                ColumnDef::new("created", ColumnType::TimestampWithTimezone)
                    .default(ColumnDefault::Now),
            )
            .primary_key(["id"])
    }

    fn kv() -> Args {
        Args::new().with("k", "a").with("v", 1i64)
    }

    #[test]
    fn create_and_drop_table() {
        let mut out = String::new();
        POSTGRES.write_create_table(&mut out, &users(), true);
        assert_eq!(
            out,
            indoc! {r#"
                CREATE TABLE IF NOT EXISTS "users" (
                "id" BIGSERIAL NOT NULL,
                "name" TEXT,
                "created" TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY ("id")
                );
            "#}
            .trim()
        );
        let mut out = String::new();
        MySQLSqlWriter::default().write_create_table(&mut out, &users(), true);
        assert_eq!(
            out,
            indoc! {"
                CREATE TABLE IF NOT EXISTS `users` (
                `id` BIGINT AUTO_INCREMENT NOT NULL,
                `name` TEXT,
                `created` DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                PRIMARY KEY (`id`)
                );
            "}
            .trim()
        );
        let mut out = String::new();
        POSTGRES.write_drop_table(&mut out, "my \"table\"", true);
        assert_eq!(out, r#"DROP TABLE IF EXISTS "my ""table""";"#);
    }

    #[test]
    fn select() {
        let filter = [Args::new().with("id", 1i64)];
        let select = Select {
            table: "jobs",
            columns: &["id", "data"],
            filter: Some(&filter),
            order_by: &[("id", Order::Desc)],
            limit: Some(1),
            locking: Locking::ForUpdateSkipLocked,
        };
        let mut query = Query::default();
        POSTGRES.write_select(&mut query, &select);
        assert_eq!(
            query.sql,
            indoc! {r#"
                SELECT "id", "data"
                FROM "jobs"
                WHERE "id" = $1
                ORDER BY "id" DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED;
            "#}
            .trim()
        );
        assert_eq!(query.args, [Value::Int64(Some(1))]);

        let mut query = Query::default();
        MySQLSqlWriter::default().write_select(&mut query, &select);
        assert_eq!(
            query.sql,
            indoc! {"
                SELECT `id`, `data`
                FROM `jobs`
                WHERE `id` = ?
                ORDER BY `id` DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED;
            "}
            .trim()
        );
    }

    #[test]
    fn filters() {
        let mut query = Query::default();
        POSTGRES.write_filter(
            &mut query,
            &[Args::new().with("id", 1i64), Args::new().with("id", 2i64)],
        );
        assert_eq!(query.sql, r#""id" IN ($1, $2)"#);

        let mut query = Query::default();
        POSTGRES.write_filter(
            &mut query,
            &[
                Args::new().with("a", 1i64).with("b", 2i64),
                Args::new().with("a", 3i64),
            ],
        );
        assert_eq!(query.sql, r#"("a" = $1 AND "b" = $2) OR ("a" = $3)"#);
        assert_eq!(query.args.len(), 3);

        let mut query = Query::default();
        POSTGRES.write_filter(&mut query, &[]);
        assert_eq!(query.sql, "FALSE");
    }

    #[test]
    fn count() {
        let mut query = Query::default();
        POSTGRES.write_count(&mut query, &Select::new("kv", &["k"]));
        assert_eq!(
            query.sql,
            "SELECT COUNT(*) AS \"count\" FROM (SELECT \"k\"\nFROM \"kv\") AS \"t\";"
        );
    }

    #[test]
    fn upsert() {
        let mut query = Query::default();
        POSTGRES.write_upsert(&mut query, "kv", &kv(), &["k"], &["k"]);
        assert_eq!(
            query.sql,
            indoc! {r#"
                INSERT INTO "kv" ("k", "v") VALUES
                ($1, $2)
                ON CONFLICT ("k") DO UPDATE SET
                "v" = EXCLUDED."v"
                RETURNING "k";
            "#}
            .trim()
        );
        assert_eq!(
            query.args,
            [Value::Varchar(Some("a".into())), Value::Int64(Some(1))]
        );

        let mut query = Query::default();
        MySQLSqlWriter::default().write_upsert(&mut query, "kv", &kv(), &["k"], &["k"]);
        assert_eq!(
            query.sql,
            indoc! {"
                INSERT INTO `kv` (`k`, `v`) VALUES
                (?, ?)
                ON DUPLICATE KEY UPDATE
                `v` = VALUES(`v`);
            "}
            .trim()
        );

        let mut query = Query::default();
        POSTGRES.write_upsert(&mut query, "keys", &Args::new().with("k", "a"), &["k"], &["k"]);
        assert_eq!(
            query.sql,
            indoc! {r#"
                INSERT INTO "keys" ("k") VALUES
                ($1)
                ON CONFLICT ("k") DO UPDATE SET
                "k" = EXCLUDED."k"
                RETURNING "k";
            "#}
            .trim()
        );
    }

    #[test]
    fn update_and_delete() {
        let mut query = Query::default();
        POSTGRES.write_update(
            &mut query,
            "kv",
            &Args::new().with("v", 2i64),
            &Args::new().with("k", "a"),
        );
        assert_eq!(
            query.sql,
            indoc! {r#"
                UPDATE "kv" SET
                "v" = $1
                WHERE "k" = $2;
            "#}
            .trim()
        );
        let mut query = Query::default();
        POSTGRES.write_delete(&mut query, "kv", None);
        assert_eq!(query.sql, r#"DELETE FROM "kv";"#);
    }

    #[test]
    fn delete_first() {
        let select = Select {
            order_by: &[("id", Order::Asc)],
            limit: Some(1),
            locking: Locking::ForUpdateSkipLocked,
            ..Select::new("jobs", &["id"])
        };
        let mut query = Query::default();
        POSTGRES.write_delete_first(&mut query, "id", &select, &["id", "data"]);
        assert_eq!(
            query.sql,
            indoc! {r#"
                DELETE FROM "jobs"
                WHERE "id" = (SELECT "id"
                FROM "jobs"
                ORDER BY "id" ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED)
                RETURNING "id", "data";
            "#}
            .trim()
        );
    }

    #[test]
    fn transactions() {
        let options = TxOptions {
            isolation: Some(IsolationLevel::Serializable),
            read_only: true,
        };
        let mut out = String::new();
        POSTGRES.write_transaction_begin(&mut out, &options);
        assert_eq!(out, "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY;");
        let mut out = String::new();
        MySQLSqlWriter::default().write_transaction_begin(&mut out, &options);
        assert_eq!(
            out,
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE;\nSTART TRANSACTION READ ONLY;"
        );
        let mut out = String::new();
        MySQLSqlWriter::default().write_transaction_begin(&mut out, &TxOptions::default());
        assert_eq!(out, "START TRANSACTION;");
    }

    #[test]
    fn literals() {
        let mut out = String::new();
        POSTGRES.write_value_literal(&mut out, &Value::Varchar(Some(r"it's \ x".into())));
        assert_eq!(out, r"'it''s \ x'");
        let mut out = String::new();
        MySQLSqlWriter::default()
            .write_value_literal(&mut out, &Value::Varchar(Some(r"it's \ x".into())));
        assert_eq!(out, r"'it''s \\ x'");
        let mut out = String::new();
        MySQLSqlWriter::default().write_value_literal(&mut out, &Value::Boolean(Some(false)));
        assert_eq!(out, "0");
        let mut out = String::new();
        MySQLSqlWriter::default().write_value_literal(&mut out, &Value::Int64(None));
        assert_eq!(out, "NULL");
    }
}
