use frameless::{
    ColumnDef, ColumnType, ConnectionAdapter, Context, CreateTable, Driver, ErrorExt, ErrorKind,
    MigrationState, MigrationStateId, MigrationStep, Migrator, Result, SqlStep, SqlWriter,
    TableDef, future::BoxFuture,
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use uuid::Uuid;

/// Step counting how many times it ran.
#[derive(Default, Clone)]
struct Counting(Arc<AtomicUsize>);

impl Counting {
    fn runs(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

impl<D: Driver> MigrationStep<ConnectionAdapter<D>> for Counting {
    fn migrate_up<'a>(
        &'a self,
        _resource: &'a ConnectionAdapter<D>,
        _ctx: &'a Context,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
    }
}

fn unique_namespace(name: &str) -> String {
    format!("tests_{}_{}", name, Uuid::now_v7().simple())
}

async fn drop_table<D: Driver>(connection: &ConnectionAdapter<D>, table: &str) {
    let mut sql = String::new();
    connection
        .sql_writer()
        .write_drop_table(&mut sql, table, true);
    connection
        .exec(&Context::background(), sql)
        .await
        .expect("Failed to drop the table");
}

fn migrated_table(name: &'static str) -> TableDef {
    TableDef::new(name)
        .column(ColumnDef::new("id", ColumnType::BigInt))
        .column(ColumnDef::new("label", ColumnType::Text).nullable())
        .primary_key(["id"])
}

pub async fn migrator<D: Driver>(connection: &ConnectionAdapter<D>) {
    let ctx = Context::background();
    let table = "frameless_tests_migrated";
    drop_table(connection, table).await;
    let counting = Counting::default();
    let namespace = unique_namespace("migrator");
    let migrator = Migrator::new(&namespace, connection.clone(), connection.clone())
        .step("001", CreateTable(migrated_table(table)))
        .step(
            "002",
            SqlStep::new([format!("INSERT INTO {table} (id, label) VALUES (1, 'one');")]),
        )
        .step("003", counting.clone());
    migrator.migrate(&ctx).await.expect("Failed to migrate");
    assert_eq!(counting.runs(), 1);
    migrator
        .migrate(&ctx)
        .await
        .expect("Failed to migrate again");
    assert_eq!(counting.runs(), 1, "An applied step must not run again");

    let row = connection
        .query_row(&ctx, format!("SELECT label FROM {table} WHERE id = 1;"))
        .await
        .expect("Failed to read the migrated table");
    assert_eq!(row.get::<String>("label").expect("Missing label"), "one");
    for version in ["001", "002", "003"] {
        let state = migrator
            .state_repository()
            .find_by_id(
                &ctx,
                &MigrationStateId {
                    namespace: namespace.clone(),
                    version: version.into(),
                },
            )
            .await
            .expect("Failed to read the migration state")
            .expect("The migration state is missing");
        assert!(!state.dirty);
    }

    // Steps added later run on the next migration
    let later = Counting::default();
    Migrator::new(&namespace, connection.clone(), connection.clone())
        .step("001", CreateTable(migrated_table(table)))
        .step("002", SqlStep::new(Vec::<String>::new()))
        .step("003", counting.clone())
        .step("004", later.clone())
        .migrate(&ctx)
        .await
        .expect("Failed to migrate the new step");
    assert_eq!(counting.runs(), 1);
    assert_eq!(later.runs(), 1);

    // Dirty state
    let dirty = unique_namespace("dirty");
    let migrator = Migrator::new(&dirty, connection.clone(), connection.clone())
        .step("001", Counting::default());
    migrator
        .state_repository()
        .create(
            &ctx,
            &mut MigrationState {
                id: MigrationStateId {
                    namespace: dirty.clone(),
                    version: "001".into(),
                },
                dirty: true,
            },
        )
        .await
        .expect("Failed to store a dirty state");
    assert!(
        migrator
            .migrate(&ctx)
            .await
            .is_kind(ErrorKind::MigrationDirty)
    );
}

pub async fn migrator_gap<D: Driver>(connection: &ConnectionAdapter<D>) {
    let ctx = Context::background();
    let namespace = unique_namespace("gap");
    let second = Counting::default();
    Migrator::new(&namespace, connection.clone(), connection.clone())
        .step("2", second.clone())
        .migrate(&ctx)
        .await
        .expect("Failed to migrate");
    assert_eq!(second.runs(), 1);

    let first = Counting::default();
    let result = Migrator::new(&namespace, connection.clone(), connection.clone())
        .step("1", first.clone())
        .step("2", second.clone())
        .migrate(&ctx)
        .await;
    assert!(result.is_kind(ErrorKind::MigrationGap));
    assert_eq!(first.runs(), 0, "No step may run when a gap is detected");
    assert_eq!(second.runs(), 1);
}

pub async fn migrator_rollback<D: Driver>(connection: &ConnectionAdapter<D>) {
    let ctx = Context::background();
    let table = "frameless_tests_rolled_back";
    drop_table(connection, table).await;
    let namespace = unique_namespace("rollback");
    let counting = Counting::default();
    let migrator = Migrator::new(&namespace, connection.clone(), connection.clone())
        .step("001", CreateTable(migrated_table(table)))
        .step("002", counting.clone())
        .step(
            "003",
            SqlStep::new(["INSERT INTO frameless_tests_missing_table (id) VALUES (1);"]),
        );
    crate::silent_logs! {
        assert!(
            migrator.migrate(&ctx).await.is_err(),
            "The failing step must fail the migration"
        );
    }
    assert_eq!(counting.runs(), 1);
    let state = migrator
        .state_repository()
        .find_by_id(
            &ctx,
            &MigrationStateId {
                namespace: namespace.clone(),
                version: "002".into(),
            },
        )
        .await
        .expect("Failed to read the migration state");
    #[cfg(not(feature = "disable-transactional-ddl"))]
    {
        assert_eq!(state, None, "The states must be rolled back with the steps");
        crate::silent_logs! {
            assert!(
                connection
                    .exec(&ctx, format!("SELECT id FROM {table};"))
                    .await
                    .is_err(),
                "The table created by a failed migration must not exist"
            );
        }
    }
    #[cfg(feature = "disable-transactional-ddl")]
    let _ = state;
}
