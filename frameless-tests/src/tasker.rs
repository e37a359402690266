use frameless::{
    ConnectionAdapter, Context, Driver, MigrationStateId, Migrator, ScheduleState, clock,
    schedule_state_repository, schedule_states_migration,
};
use time::Duration;

pub async fn tasker<D: Driver>(connection: &ConnectionAdapter<D>) {
    let ctx = Context::background();
    let migrator = Migrator::new("frameless_tasker", connection.clone(), connection.clone())
        .step("001", schedule_states_migration());
    migrator
        .migrate(&ctx)
        .await
        .expect("Failed to create the schedule states table");
    assert!(
        migrator
            .state_repository()
            .find_by_id(
                &ctx,
                &MigrationStateId {
                    namespace: "frameless_tasker".into(),
                    version: "001".into(),
                },
            )
            .await
            .expect("Failed to read the migration state")
            .is_some()
    );

    let repository = schedule_state_repository(connection.clone());
    let now = clock::now_utc();
    let now = now
        .replace_nanosecond(now.nanosecond() / 1_000 * 1_000)
        .expect("Failed to truncate the timestamp");
    let mut state = ScheduleState {
        id: "frameless_tests_report".into(),
        timestamp: now,
    };
    repository
        .save(&ctx, &mut state)
        .await
        .expect("Failed to save the schedule state");
    let found = repository
        .find_by_id(&ctx, &state.id)
        .await
        .expect("Failed to find the schedule state")
        .expect("The schedule state is missing");
    assert_eq!(found.timestamp, now);

    state.timestamp = now + Duration::hours(1);
    repository
        .save(&ctx, &mut state)
        .await
        .expect("Failed to update the schedule state");
    let found = repository
        .find_by_id(&ctx, &state.id)
        .await
        .expect("Failed to find the schedule state")
        .expect("The schedule state is missing");
    assert_eq!(found.timestamp, now + Duration::hours(1));
}
