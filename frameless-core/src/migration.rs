use crate::{
    Args, ColumnDef, ColumnType, ConnectionAdapter, Context, Driver, Error, ErrorKind,
    Identifier, Mapping, Repository, Result, RowLabeled, SqlWriter, TableDef, merge_error,
};
use anyhow::Context as _;
use futures::future::BoxFuture;
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
    future::Future,
};

pub const MIGRATIONS_TABLE: &str = "frameless_schema_migrations";

pub fn migrations_table() -> TableDef {
    TableDef::new(MIGRATIONS_TABLE)
        .column(ColumnDef::new("namespace", ColumnType::Key))
        .column(ColumnDef::new("version", ColumnType::Key))
        .column(ColumnDef::new("dirty", ColumnType::Boolean))
        .primary_key(["namespace", "version"])
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationStateId {
    pub namespace: String,
    pub version: String,
}

impl Display for MigrationStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.version)
    }
}

impl Identifier for MigrationStateId {
    fn is_zero(&self) -> bool {
        self.version.is_empty()
    }
}

/// Outcome of a step, stored once the step ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationState {
    pub id: MigrationStateId,
    pub dirty: bool,
}

pub struct MigrationStateMapping;

impl Mapping for MigrationStateMapping {
    type Entity = MigrationState;
    type Id = MigrationStateId;

    fn table_name(&self) -> &str {
        MIGRATIONS_TABLE
    }
    fn columns(&self) -> &[&str] {
        &["namespace", "version", "dirty"]
    }
    fn scan(&self, row: &RowLabeled) -> Result<MigrationState> {
        Ok(MigrationState {
            id: MigrationStateId {
                namespace: row.get("namespace")?,
                version: row.get("version")?,
            },
            dirty: row.get("dirty")?,
        })
    }
    fn to_args(&self, state: &MigrationState) -> Result<Args> {
        Ok(self.query_id(&state.id).with("dirty", state.dirty))
    }
    fn query_id(&self, id: &MigrationStateId) -> Args {
        Args::new()
            .with("namespace", id.namespace.clone())
            .with("version", id.version.clone())
    }
    fn id(&self, state: &MigrationState) -> Option<MigrationStateId> {
        Some(state.id.clone())
    }
}

/// Something migrations change within a transaction.
pub trait MigrationResource: Send + Sync {
    fn begin_tx(&self, ctx: &Context) -> impl Future<Output = Result<Context>> + Send;
    fn commit_tx(&self, ctx: &Context) -> impl Future<Output = Result<()>> + Send;
    fn rollback_tx(&self, ctx: &Context) -> impl Future<Output = Result<()>> + Send;
}

impl<D: Driver> MigrationResource for ConnectionAdapter<D> {
    fn begin_tx(&self, ctx: &Context) -> impl Future<Output = Result<Context>> + Send {
        ConnectionAdapter::begin_tx(self, ctx)
    }
    fn commit_tx(&self, ctx: &Context) -> impl Future<Output = Result<()>> + Send {
        ConnectionAdapter::commit_tx(self, ctx)
    }
    fn rollback_tx(&self, ctx: &Context) -> impl Future<Output = Result<()>> + Send {
        ConnectionAdapter::rollback_tx(self, ctx)
    }
}

/// One versioned change of a resource. `ctx` carries the transaction of the resource.
pub trait MigrationStep<R>: Send + Sync {
    fn migrate_up<'a>(&'a self, resource: &'a R, ctx: &'a Context) -> BoxFuture<'a, Result<()>>;
}

/// Plain SQL statements, optionally specialized for some drivers (matched against
/// [`Driver::NAME`]).
#[derive(Debug, Clone, Default)]
pub struct SqlStep {
    statements: Vec<String>,
    per_driver: Vec<(&'static str, Vec<String>)>,
}

impl SqlStep {
    pub fn new<S: Into<String>>(statements: impl IntoIterator<Item = S>) -> Self {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
            per_driver: Vec::new(),
        }
    }

    pub fn for_driver<S: Into<String>>(
        mut self,
        driver: &'static str,
        statements: impl IntoIterator<Item = S>,
    ) -> Self {
        self.per_driver
            .push((driver, statements.into_iter().map(Into::into).collect()));
        self
    }

    pub fn statements(&self, driver: &str) -> &[String] {
        self.per_driver
            .iter()
            .find(|(name, _)| *name == driver)
            .map(|(_, statements)| statements.as_slice())
            .unwrap_or(&self.statements)
    }
}

impl<D: Driver> MigrationStep<ConnectionAdapter<D>> for SqlStep {
    fn migrate_up<'a>(
        &'a self,
        resource: &'a ConnectionAdapter<D>,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for statement in self.statements(D::NAME) {
                resource.exec(ctx, statement.as_str()).await?;
            }
            Ok(())
        })
    }
}

/// Create a table, rendering its definition with the dialect of the resource.
#[derive(Debug, Clone)]
pub struct CreateTable(pub TableDef);

impl<D: Driver> MigrationStep<ConnectionAdapter<D>> for CreateTable {
    fn migrate_up<'a>(
        &'a self,
        resource: &'a ConnectionAdapter<D>,
        ctx: &'a Context,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut sql = String::new();
            resource
                .sql_writer()
                .write_create_table(&mut sql, &self.0, true);
            resource.exec(ctx, sql).await?;
            Ok(())
        })
    }
}

/// Runs, once per namespace, the steps not applied yet, in version order.
///
/// Versions compare as strings: zero pad numbers or use timestamps. The states and the resource
/// are changed in two transactions committed together once every step succeeded.
pub struct Migrator<R: MigrationResource, D: Driver> {
    namespace: String,
    resource: R,
    steps: BTreeMap<String, Box<dyn MigrationStep<R>>>,
    states: Repository<MigrationStateMapping, D>,
    ensure_state_table: bool,
}

impl<R: MigrationResource, D: Driver> Migrator<R, D> {
    /// Panics when `namespace` is empty.
    pub fn new(namespace: impl Into<String>, resource: R, states: ConnectionAdapter<D>) -> Self {
        let namespace = namespace.into();
        assert!(!namespace.is_empty(), "The migrator needs a namespace");
        Self {
            namespace,
            resource,
            steps: BTreeMap::new(),
            states: Repository::new(MigrationStateMapping, states),
            ensure_state_table: true,
        }
    }

    pub fn step(mut self, version: impl Into<String>, step: impl MigrationStep<R> + 'static) -> Self {
        self.steps.insert(version.into(), Box::new(step));
        self
    }

    /// Whether [`Migrator::migrate`] creates the states table when missing, the default.
    pub fn ensure_state_table(mut self, ensure: bool) -> Self {
        self.ensure_state_table = ensure;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state_repository(&self) -> &Repository<MigrationStateMapping, D> {
        &self.states
    }

    fn state_id(&self, version: &str) -> MigrationStateId {
        MigrationStateId {
            namespace: self.namespace.clone(),
            version: version.to_owned(),
        }
    }

    pub async fn migrate(&self, ctx: &Context) -> Result<()> {
        let connection = self.states.connection();
        if self.ensure_state_table {
            let mut sql = String::new();
            connection
                .sql_writer()
                .write_create_table(&mut sql, &migrations_table(), true);
            connection.exec(ctx, sql).await?;
        }
        let mut states = Vec::with_capacity(self.steps.len());
        for version in self.steps.keys() {
            states.push(self.states.find_by_id(ctx, &self.state_id(version)).await?);
        }
        self.check_gaps(&states)?;
        if states.iter().all(|s| s.as_ref().is_some_and(|s| !s.dirty)) {
            log::debug!("Migrations of {} are up to date", self.namespace);
            return Ok(());
        }

        let state_ctx = connection.begin_tx(ctx).await?;
        let resource_ctx = match self.resource.begin_tx(&state_ctx).await {
            Ok(resource_ctx) => resource_ctx,
            Err(e) => {
                let rollback = connection.rollback_tx(&state_ctx).await.err();
                return Err(merge_error(e, rollback));
            }
        };
        if let Err(e) = self.apply(&resource_ctx, &states).await {
            let resource = self.resource.rollback_tx(&resource_ctx).await.err();
            let state = connection.rollback_tx(&state_ctx).await.err();
            return Err(merge_error(merge_error(e, resource), state));
        }
        if let Err(e) = connection.commit_tx(&state_ctx).await {
            let resource = self.resource.rollback_tx(&resource_ctx).await.err();
            return Err(merge_error(e, resource));
        }
        self.resource.commit_tx(&resource_ctx).await
    }

    /// A step already applied after one that is not means an older step was introduced late.
    fn check_gaps(&self, states: &[Option<MigrationState>]) -> Result<()> {
        let versions = self.steps.keys().collect::<Vec<_>>();
        if let Some(applied) = states.iter().rposition(Option::is_some) {
            if let Some(missing) = states[..applied].iter().position(Option::is_none) {
                return Err(Error::new(ErrorKind::MigrationGap).context(format!(
                    "Migration {}/{} is missing while the later {} was already applied",
                    self.namespace, versions[missing], versions[applied]
                )));
            }
        }
        Ok(())
    }

    async fn apply(&self, ctx: &Context, states: &[Option<MigrationState>]) -> Result<()> {
        for ((version, step), state) in self.steps.iter().zip(states) {
            match state {
                Some(state) if state.dirty => {
                    return Err(Error::new(ErrorKind::MigrationDirty).context(format!(
                        "Migration {} is dirty and needs a manual recovery",
                        state.id
                    )));
                }
                Some(..) => continue,
                None => {}
            }
            log::info!("Applying migration {}/{}", self.namespace, version);
            step.migrate_up(&self.resource, ctx)
                .await
                .with_context(|| format!("While applying migration {}/{}", self.namespace, version))?;
            let mut state = MigrationState {
                id: self.state_id(version),
                dirty: false,
            };
            self.states.create(ctx, &mut state).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_specific_statements() {
        let step = SqlStep::new(["CREATE TABLE a (id BIGSERIAL PRIMARY KEY);"]).for_driver(
            "mysql",
            ["CREATE TABLE a (id BIGINT AUTO_INCREMENT PRIMARY KEY);"],
        );
        assert!(step.statements("postgres")[0].contains("BIGSERIAL"));
        assert!(step.statements("mysql")[0].contains("AUTO_INCREMENT"));
    }

    #[test]
    fn state_keys() {
        let mapping = MigrationStateMapping;
        let state = MigrationState {
            id: MigrationStateId {
                namespace: "n".into(),
                version: "2".into(),
            },
            dirty: false,
        };
        let args = mapping.to_args(&state).unwrap();
        assert_eq!(
            args.names().collect::<Vec<_>>(),
            ["namespace", "version", "dirty"]
        );
        assert_eq!(state.id.to_string(), "n/2");
        assert_eq!(migrations_table().primary_key, ["namespace", "version"]);
    }
}
