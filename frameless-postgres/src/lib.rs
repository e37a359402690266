mod connection;
mod driver;
mod listener;
mod sql_writer;
mod util;
mod value_holder;

pub use connection::*;
pub use driver::*;
pub use listener::*;
pub use sql_writer::*;
pub use value_holder::*;
