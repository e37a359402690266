mod as_value;
mod cache;
pub mod clock;
mod config;
mod connection;
mod context;
mod driver;
mod errors;
mod executor;
mod guard;
mod mapping;
mod migration;
mod notify;
mod query;
mod queue;
mod rate_limit;
mod repository;
mod retry;
mod sql_writer;
mod table;
mod tasker;
mod transaction;
mod util;
mod value;

pub use as_value::*;
pub use cache::*;
pub use config::*;
pub use connection::*;
pub use context::*;
pub use driver::*;
pub use errors::*;
pub use executor::*;
pub use guard::*;
pub use mapping::*;
pub use migration::*;
pub use notify::*;
pub use query::*;
pub use queue::*;
pub use rate_limit::*;
pub use repository::*;
pub use retry::*;
pub use sql_writer::*;
pub use table::*;
pub use tasker::*;
pub use transaction::*;
pub use util::*;
pub use value::*;
pub mod stream {
    pub use ::futures::stream::*;
}
pub use ::futures::future;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
