use crate::{
    Args, ColumnDef, ColumnType, ConnectionAdapter, CreateTable, Driver, Mapping, Repository,
    Result, RowLabeled, TableDef,
};
use time::OffsetDateTime;

pub const SCHEDULE_STATES_TABLE: &str = "frameless_tasker_schedule_states";

pub fn schedule_states_table() -> TableDef {
    TableDef::new(SCHEDULE_STATES_TABLE)
        .column(ColumnDef::new("id", ColumnType::Key))
        .column(ColumnDef::new("timestamp", ColumnType::TimestampWithTimezone))
        .primary_key(["id"])
}

/// Last time a scheduled task ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    pub id: String,
    pub timestamp: OffsetDateTime,
}

pub struct ScheduleStateMapping;

impl Mapping for ScheduleStateMapping {
    type Entity = ScheduleState;
    type Id = String;

    fn table_name(&self) -> &str {
        SCHEDULE_STATES_TABLE
    }
    fn columns(&self) -> &[&str] {
        &["id", "timestamp"]
    }
    fn scan(&self, row: &RowLabeled) -> Result<ScheduleState> {
        Ok(ScheduleState {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
        })
    }
    fn to_args(&self, state: &ScheduleState) -> Result<Args> {
        Ok(Args::new()
            .with("id", state.id.clone())
            .with("timestamp", state.timestamp))
    }
    fn query_id(&self, id: &String) -> Args {
        Args::new().with("id", id.clone())
    }
    fn id(&self, state: &ScheduleState) -> Option<String> {
        Some(state.id.clone())
    }
}

pub type ScheduleStateRepository<D> = Repository<ScheduleStateMapping, D>;

pub fn schedule_state_repository<D: Driver>(
    connection: ConnectionAdapter<D>,
) -> ScheduleStateRepository<D> {
    Repository::new(ScheduleStateMapping, connection)
}

/// Migration step creating [`SCHEDULE_STATES_TABLE`].
pub fn schedule_states_migration() -> CreateTable {
    CreateTable(schedule_states_table())
}
