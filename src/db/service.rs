//! Service Facade (spec §4.5): a process-wide handle to a single named
//! pool, started once at boot and exposed through a single `query(sql)`
//! entry point.

use once_cell::sync::OnceCell;

use super::parser::QueryResult;
use super::pool::Pool;
use crate::config::{DbConfig, PoolConfig};
use crate::error::AppError;

static POOL: OnceCell<Pool> = OnceCell::new();

/// Boots the process-wide pool. Must be called exactly once, before any
/// call to [`query`]. Blocks until the pool reports ready (spec §4.5).
pub async fn start(db: DbConfig, pool: PoolConfig) {
  let started = Pool::start(db, pool.size, pool.prepare_plans).await;
  POOL
    .set(started)
    .unwrap_or_else(|_| panic!("database service already started"));
}

/// Runs one query against the process-wide pool: Acquire -> worker.Query ->
/// Release (spec §4.5). The worker is always released, even on failure.
pub async fn query(sql: impl Into<String>) -> Result<QueryResult, AppError> {
  let pool = POOL.get().ok_or(AppError::PoolClosed)?;
  let sql = sql.into();

  let worker = pool.acquire().await;
  let result = worker.query(sql).await;
  pool.release(worker).await;

  result.map_err(AppError::from)
}
