mod cache;
mod entities;
mod locker;
mod migrator;
mod notify;
mod queue;
mod repository;
mod tasker;
mod transactions;

pub use entities::*;

use crate::{
    cache::cache,
    locker::{locker, locker_factory},
    migrator::{migrator, migrator_gap, migrator_rollback},
    notify::notify,
    queue::{
        queue_at_least_once, queue_fifo, queue_lifo, queue_two_consumers, queue_undecodable,
    },
    repository::{
        repository, repository_concurrent_create, repository_isolation, repository_key_only,
    },
    tasker::tasker,
    transactions::{
        transaction_cancellation, transaction_errors, transaction_nested,
        transaction_nested_rollback, transaction_open_stream,
    },
};
use frameless::{ConnectionAdapter, Driver, NotifyDriver};
use log::LevelFilter;
use std::env;

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

pub async fn execute_tests<D: Driver>(connection: &ConnectionAdapter<D>) {
    repository(connection).await;
    repository_concurrent_create(connection).await;
    repository_isolation(connection).await;
    repository_key_only(connection).await;
    transaction_nested(connection).await;
    transaction_nested_rollback(connection).await;
    transaction_open_stream(connection).await;
    transaction_errors(connection).await;
    transaction_cancellation(connection).await;
    cache(connection).await;
    locker(connection).await;
    locker_factory(connection).await;
    queue_fifo(connection).await;
    queue_lifo(connection).await;
    queue_two_consumers(connection).await;
    queue_at_least_once(connection).await;
    queue_undecodable(connection).await;
    migrator(connection).await;
    migrator_gap(connection).await;
    migrator_rollback(connection).await;
    tasker(connection).await;
}

/// Tests of the drivers implementing LISTEN / NOTIFY.
pub async fn execute_notify_tests<D: NotifyDriver>(connection: &ConnectionAdapter<D>) {
    notify(connection).await;
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}
