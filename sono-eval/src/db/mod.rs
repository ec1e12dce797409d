//! Repositories for the evaluation service
//!
//! Each repository owns a clone of the injected pool. Multi-statement writes
//! open their own transaction and pass the connection down to the helpers
//! that need to take part in it.

pub mod evaluations;
pub mod ledger;
pub mod selections;
pub mod taxonomy;

pub use evaluations::AggregationEngine;
pub use ledger::{AttemptLedger, AttemptReceipt, ResponseInput};
pub use selections::SelectionRecorder;
pub use taxonomy::TaxonomyStore;

use sono_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};

/// Transaction holding the write lock from its first statement
///
/// Concurrent writers queue on the busy timeout instead of failing when a
/// read would otherwise have to upgrade to a write.
pub(crate) async fn begin_write(pool: &SqlitePool) -> Result<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}
