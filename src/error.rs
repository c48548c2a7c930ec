use thiserror::Error;

/// Errors the database access core can produce. See spec §7.
#[derive(Debug, Error)]
pub enum DbError {
  #[error("protocol framing error: {0}")]
  Framing(String),

  #[error("unexpected message tag {tag:?} ({context})")]
  UnexpectedTag { tag: u8, context: &'static str },

  #[error("authentication denied: {0}")]
  AuthDenied(String),

  #[error("socket error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors surfaced above the core, to the HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
  #[error(transparent)]
  Db(#[from] DbError),

  #[error("pool is shutting down")]
  PoolClosed,

  #[error("bad request: {0}")]
  BadRequest(String),
}
