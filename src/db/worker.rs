//! Connection Worker (spec §4.3): one task per physical socket. Performs
//! startup + MD5 authentication + `PREPARE` once at birth, then serves one
//! `Query` at a time for the rest of its life.

use bytes::Buf;
use md5::{Digest, Md5};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use super::parser::{parse_query_response, QueryResult};
use super::pool::{PoolMsg, WorkerId};
use super::wire::{write_password, write_query, write_startup, FrameReader};
use crate::config::DbConfig;
use crate::error::DbError;

/// A query request sent to a worker's service loop.
pub struct WorkerRequest {
  pub sql: String,
  pub reply: oneshot::Sender<Result<QueryResult, DbError>>,
}

/// A cheap, cloneable reference to a running worker. Handed out by the pool
/// on `Acquire`; handed back on `Release`.
#[derive(Clone)]
pub struct WorkerHandle {
  pub id: WorkerId,
  tx: mpsc::Sender<WorkerRequest>,
}

impl WorkerHandle {
  /// Sends one query to the owning worker task and awaits its response.
  /// The worker serializes requests internally; callers never need to wait
  /// on anything but this single round trip.
  pub async fn query(&self, sql: impl Into<String>) -> Result<QueryResult, DbError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    self
      .tx
      .send(WorkerRequest {
        sql: sql.into(),
        reply: reply_tx,
      })
      .await
      .map_err(|_| DbError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker is gone")))?;

    reply_rx
      .await
      .map_err(|_| DbError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker died before replying")))?
  }
}

/// Spawns a worker task: connects, runs startup, reports back to the pool
/// via `pool_tx`, then serves requests until a fatal error or channel
/// closure ends it.
pub fn spawn(id: WorkerId, db: DbConfig, prepare_plans: Vec<String>, pool_tx: mpsc::Sender<PoolMsg>) {
  tokio::spawn(async move {
    match connect_and_startup(&db, &prepare_plans).await {
      Ok((reader, writer)) => {
        let (tx, rx) = mpsc::channel(8);
        let handle = WorkerHandle { id, tx };
        tracing::info!(worker_id = id, "worker startup complete");
        if pool_tx.send(PoolMsg::Spawned(handle)).await.is_err() {
          return;
        }
        serve(id, reader, writer, rx, pool_tx).await;
      }
      Err(err) => {
        tracing::warn!(worker_id = id, error = %err, "worker startup failed");
        let _ = pool_tx.send(PoolMsg::SpawnFailed(id)).await;
      }
    }
  });
}

/// Startup sequence (spec §4.3): TCP connect, startup message, MD5
/// challenge/response, then run every configured `PREPARE` plan. Any
/// deviation from the expected message sequence is a fatal startup error.
async fn connect_and_startup(
  db: &DbConfig,
  prepare_plans: &[String],
) -> Result<(FrameReader<OwnedReadHalf>, OwnedWriteHalf), DbError> {
  let stream = TcpStream::connect((db.host.as_str(), db.port)).await?;
  let (read_half, mut write_half) = stream.into_split();
  let mut reader = FrameReader::new(read_half);

  write_startup(&mut write_half, &db.username, &db.dbname).await?;

  let challenge = reader.read_message().await?;
  if challenge.tag != b'R' || challenge.payload.len() != 8 {
    return Err(DbError::AuthDenied(
      "expected an MD5 authentication challenge".to_string(),
    ));
  }
  let mut body = challenge.payload.clone();
  let subcode = body.get_i32();
  if subcode != 5 {
    return Err(DbError::AuthDenied(format!(
      "unsupported authentication method (code {subcode}); only MD5 is supported"
    )));
  }
  let salt = &body[..4];

  let digest = md5_auth_payload(&db.password, &db.username, salt);
  write_password(&mut write_half, &digest).await?;

  let auth_result = reader.read_message().await?;
  if auth_result.tag != b'R' {
    return Err(DbError::AuthDenied("authentication was rejected".to_string()));
  }

  for sql in prepare_plans {
    write_query(&mut write_half, sql).await?;
    let first = reader.read_message().await?;
    if first.tag != b'C' {
      return Err(DbError::UnexpectedTag {
        tag: first.tag,
        context: "PREPARE at worker startup",
      });
    }
    loop {
      let msg = reader.read_message().await?;
      if msg.tag == b'Z' {
        break;
      }
    }
  }

  Ok((reader, write_half))
}

/// Computes `"md5" || lower_hex(md5(lower_hex(md5(password||user)) || salt))`
/// (spec §4.3, §6, §8).
pub fn md5_auth_payload(password: &str, user: &str, salt: &[u8]) -> String {
  let mut hasher = Md5::new();
  hasher.update(password.as_bytes());
  hasher.update(user.as_bytes());
  let s1 = hasher.finalize_reset();

  hasher.update(format!("{s1:x}"));
  hasher.update(salt);
  let s2 = hasher.finalize();

  format!("md5{s2:x}")
}

/// Serves one request at a time until the worker dies or the pool drops
/// its channel. Every request is a full write-then-read round trip; there
/// is no pipelining (spec §4.3, §5).
async fn serve(
  id: WorkerId,
  mut reader: FrameReader<OwnedReadHalf>,
  mut writer: OwnedWriteHalf,
  mut rx: mpsc::Receiver<WorkerRequest>,
  pool_tx: mpsc::Sender<PoolMsg>,
) {
  while let Some(req) = rx.recv().await {
    let result = run_query(&mut writer, &mut reader, &req.sql).await;
    let fatal = result.is_err();
    // Tell the pool before replying to the caller: the caller releases only
    // after seeing this reply, so sending `Died` first guarantees the pool
    // removes this id from `workers` before it can ever observe the matching
    // `Release` — otherwise a release-with-waiters could hand a corpse to
    // the next waiter (spec §4.4, §7).
    if fatal {
      tracing::warn!(worker_id = id, "worker died mid-query");
      let _ = pool_tx.send(PoolMsg::Died(id)).await;
    }
    let _ = req.reply.send(result);
    if fatal {
      return;
    }
  }
}

async fn run_query(
  writer: &mut OwnedWriteHalf,
  reader: &mut FrameReader<OwnedReadHalf>,
  sql: &str,
) -> Result<QueryResult, DbError> {
  write_query(writer, sql).await?;
  parse_query_response(reader).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn md5_recipe_matches_fixed_vector() {
    // spec §8: auth_payload("secret", "alice", {0x01,0x02,0x03,0x04})
    let salt = [0x01u8, 0x02, 0x03, 0x04];
    let got = md5_auth_payload("secret", "alice", &salt);

    let mut hasher = Md5::new();
    hasher.update(b"secret");
    hasher.update(b"alice");
    let s1 = format!("{:x}", hasher.finalize_reset());
    hasher.update(s1.as_bytes());
    hasher.update(salt);
    let want = format!("md5{:x}", hasher.finalize());

    assert_eq!(got, want);
  }
}
