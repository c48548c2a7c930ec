//! Controllers: assemble SQL text and call the Service Facade. Out of scope
//! per spec §1 beyond this contract — these are the "controller functions
//! that assemble SQL strings" the spec explicitly keeps thin.
//!
//! Values are substituted lexically into the `EXECUTE` call rather than
//! bound through the extended query protocol (spec §9, "inline SQL and
//! injection" — a documented, spec-mandated limitation of this system, not
//! an oversight of this rewrite).

use crate::db::QueryResult;
use crate::error::AppError;

/// Doubles embedded single quotes, the minimum hygiene the original naive
/// controllers apply before inlining a value into `EXECUTE`. This does not
/// make the construction safe against every injection vector — see spec §9.
fn escape_sql_literal(value: &str) -> String {
  value.replace('\'', "''")
}

pub async fn insert_ping(device_id: &str, epoch_time: i64) -> Result<QueryResult, AppError> {
  let sql = format!(
    "EXECUTE insert_ping('{}', {})",
    escape_sql_literal(device_id),
    epoch_time
  );
  crate::db::service::query(sql).await
}

pub async fn pings_in_range(device_id: &str, from: i64, to: i64) -> Result<QueryResult, AppError> {
  let sql = format!(
    "EXECUTE select_pings_in_range('{}', {}, {})",
    escape_sql_literal(device_id),
    from,
    to
  );
  crate::db::service::query(sql).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn escapes_embedded_quotes() {
    assert_eq!(escape_sql_literal("o'brien"), "o''brien");
  }
}
