//! Relational data-access runtime: repositories over a mapping, ambient transactions carried by
//! a [`Context`], a query cache, advisory locks, a durable queue, migrations and resilience
//! policies. Backends live in their own crates (`frameless-postgres`, `frameless-mysql`).
//!
//! ```rust,no_run
//! use frameless::{ConnectionAdapter, Context, Driver, Result};
//!
//! async fn transfer<D: Driver>(connection: &ConnectionAdapter<D>) -> Result<()> {
//!     connection
//!         .with_tx(&Context::background(), |ctx| async move {
//!             connection.exec(&ctx, "UPDATE accounts SET balance = balance - 1 WHERE id = 1;").await?;
//!             connection.exec(&ctx, "UPDATE accounts SET balance = balance + 1 WHERE id = 2;").await?;
//!             Ok(())
//!         })
//!         .await
//! }
//! ```
pub use frameless_core::*;
