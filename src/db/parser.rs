//! Result Parser (spec §4.2): folds the sequence of server messages that
//! follow a `Query` into a `QueryResult`.

use bytes::{Buf, Bytes};

use super::wire::{FrameReader, WireMessage};
use crate::error::DbError;
use tokio::io::AsyncRead;

/// Column metadata from a `RowDescription` (`T`) message. Eight fields are
/// present per column on the wire; only name and type oid are kept (spec
/// §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
  pub name: String,
  pub type_oid: i32,
}

/// A decoded column value. `Null` is the explicit sentinel for a wire-level
/// `-1` length (spec §3 `Row`); it must never collapse into an empty
/// string.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Text(String),
  Int8(i64),
  Raw(Bytes),
}

pub type Row = Vec<Value>;

/// The accumulated outcome of one `Query` call (spec §3). Every field is
/// optional; absence means the corresponding server message never arrived.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
  pub fields: Option<Vec<ColumnDescriptor>>,
  pub rows: Option<Vec<Row>>,
  pub command: Option<String>,
  pub status: Option<u8>,
  pub error: Option<u8>,
}

impl QueryResult {
  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }
}

/// Looks up the decoder for a type oid, falling back to raw bytes for
/// anything not in the table (spec §4.2, §9 — a lookup rather than a
/// hardcoded chain, since only two oids are ever interpreted).
fn decode_value(type_oid: i32, bytes: &[u8]) -> Value {
  match type_oid {
    1043 => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
    20 => match std::str::from_utf8(bytes).ok().and_then(|s| s.parse::<i64>().ok()) {
      Some(n) => Value::Int8(n),
      None => Value::Raw(Bytes::copy_from_slice(bytes)),
    },
    _ => Value::Raw(Bytes::copy_from_slice(bytes)),
  }
}

fn read_cstr(buf: &mut Bytes) -> Result<String, DbError> {
  let nul = buf
    .iter()
    .position(|&b| b == 0)
    .ok_or_else(|| DbError::Framing("missing null terminator in C-style string".to_string()))?;
  let s = String::from_utf8_lossy(&buf[..nul]).into_owned();
  buf.advance(nul + 1);
  Ok(s)
}

/// Folds one server message into the accumulating result. Returns `true`
/// once `Z` (ready-for-query) has been folded, signalling the caller to
/// stop.
fn fold_message(result: &mut QueryResult, msg: WireMessage) -> Result<bool, DbError> {
  let WireMessage { tag, mut payload } = msg;

  match tag {
    b'T' => {
      let count = payload.get_i16();
      let mut fields = Vec::with_capacity(count.max(0) as usize);
      for _ in 0..count {
        let name = read_cstr(&mut payload)?;
        payload.advance(6); // table oid + column attr number
        let type_oid = payload.get_i32();
        payload.advance(8); // type size + type modifier + format code
        fields.push(ColumnDescriptor { name, type_oid });
      }
      result.fields = Some(fields);
      result.rows.get_or_insert_with(Vec::new);
    }
    b'D' => {
      let fields = result
        .fields
        .as_ref()
        .ok_or_else(|| DbError::Framing("DataRow with no preceding RowDescription".to_string()))?;
      let count = payload.get_i16() as usize;
      let mut row = Vec::with_capacity(count);
      for i in 0..count {
        let len = payload.get_i32();
        if len == -1 {
          row.push(Value::Null);
        } else {
          let len = len as usize;
          let bytes = payload.split_to(len);
          let type_oid = fields.get(i).map(|f| f.type_oid).unwrap_or(0);
          row.push(decode_value(type_oid, &bytes));
        }
      }
      // Prepended, per spec §4.2 — reversed once at fold completion so the
      // public result reads in arrival order (see SPEC_FULL.md, open
      // question D).
      result.rows.get_or_insert_with(Vec::new).insert(0, row);
    }
    b'C' => {
      result.command = Some(read_cstr(&mut payload)?);
    }
    b'Z' => {
      result.status = Some(payload[0]);
      return Ok(true);
    }
    b'E' => {
      result.error = Some(payload[0]);
    }
    other => {
      return Err(DbError::UnexpectedTag {
        tag: other,
        context: "query response",
      });
    }
  }
  Ok(false)
}

/// Reads server messages from `reader` until `Z` (ready-for-query) is
/// folded, producing one `QueryResult`. Rows are returned in arrival order.
pub async fn parse_query_response<R: AsyncRead + Unpin>(reader: &mut FrameReader<R>) -> Result<QueryResult, DbError> {
  let mut result = QueryResult::default();
  loop {
    let msg = reader.read_message().await?;
    if fold_message(&mut result, msg)? {
      break;
    }
  }
  if let Some(rows) = result.rows.as_mut() {
    rows.reverse();
  }
  Ok(result)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::wire::FrameReader;
  use tokio::io::duplex;

  fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
  }

  fn row_description(cols: &[(&str, i32)]) -> Vec<u8> {
    let mut body = (cols.len() as i16).to_be_bytes().to_vec();
    for (name, oid) in cols {
      body.extend_from_slice(name.as_bytes());
      body.push(0);
      body.extend_from_slice(&0i32.to_be_bytes()); // table oid
      body.extend_from_slice(&0i16.to_be_bytes()); // attr number
      body.extend_from_slice(&oid.to_be_bytes());
      body.extend_from_slice(&0i16.to_be_bytes()); // type size
      body.extend_from_slice(&0i32.to_be_bytes()); // type modifier
      body.extend_from_slice(&0i16.to_be_bytes()); // format code
    }
    message(b'T', &body)
  }

  fn data_row(values: &[Option<&str>]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for v in values {
      match v {
        Some(s) => {
          body.extend_from_slice(&(s.len() as i32).to_be_bytes());
          body.extend_from_slice(s.as_bytes());
        }
        None => body.extend_from_slice(&(-1i32).to_be_bytes()),
      }
    }
    message(b'D', &body)
  }

  fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = tag.as_bytes().to_vec();
    body.push(0);
    message(b'C', &body)
  }

  fn ready_for_query(status: u8) -> Vec<u8> {
    message(b'Z', &[status])
  }

  async fn parse(bytes: Vec<u8>) -> QueryResult {
    let (mut client, server) = duplex(8192);
    client.write_all(&bytes).await.unwrap();
    drop(client);
    let mut reader = FrameReader::new(server);
    parse_query_response(&mut reader).await.unwrap()
  }

  use tokio::io::AsyncWriteExt;

  #[tokio::test]
  async fn single_device_ping_count() {
    let mut bytes = row_description(&[("device_id", 1043), ("epoch_time", 20)]);
    bytes.extend(data_row(&[Some("d1"), Some("100")]));
    bytes.extend(data_row(&[Some("d1"), Some("200")]));
    bytes.extend(command_complete("SELECT 2"));
    bytes.extend(ready_for_query(b'I'));

    let result = parse(bytes).await;
    assert_eq!(result.command.as_deref(), Some("SELECT 2"));
    assert!(!result.is_error());
    let rows = result.rows.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], Value::Int8(100));
    assert_eq!(rows[1][1], Value::Int8(200));
  }

  #[tokio::test]
  async fn empty_result_set() {
    let mut bytes = row_description(&[("device_id", 1043)]);
    bytes.extend(command_complete("SELECT 0"));
    bytes.extend(ready_for_query(b'I'));

    let result = parse(bytes).await;
    assert_eq!(result.command.as_deref(), Some("SELECT 0"));
    assert_eq!(result.status, Some(b'I'));
    assert_eq!(result.rows, Some(vec![]));
    assert!(result.fields.is_some());
  }

  #[tokio::test]
  async fn null_field_is_a_sentinel_not_empty_string() {
    let mut bytes = row_description(&[("x", 1043)]);
    bytes.extend(data_row(&[None]));
    bytes.extend(command_complete("SELECT 1"));
    bytes.extend(ready_for_query(b'I'));

    let result = parse(bytes).await;
    let rows = result.rows.unwrap();
    assert_eq!(rows[0][0], Value::Null);
  }

  #[tokio::test]
  async fn row_order_is_forward() {
    let mut bytes = row_description(&[("x", 1043)]);
    bytes.extend(data_row(&[Some("a")]));
    bytes.extend(data_row(&[Some("b")]));
    bytes.extend(data_row(&[Some("c")]));
    bytes.extend(command_complete("SELECT 3"));
    bytes.extend(ready_for_query(b'I'));

    let result = parse(bytes).await;
    let rows = result.rows.unwrap();
    let values: Vec<_> = rows
      .iter()
      .map(|r| match &r[0] {
        Value::Text(s) => s.clone(),
        _ => panic!("expected text"),
      })
      .collect();
    assert_eq!(values, vec!["a", "b", "c"]);
  }

  #[tokio::test]
  async fn error_response_mid_flight() {
    let mut bytes = message(b'E', b"S");
    bytes.extend(ready_for_query(b'E'));

    let result = parse(bytes).await;
    assert_eq!(result.error, Some(b'S'));
    assert!(result.rows.is_none());
    assert_eq!(result.status, Some(b'E'));
  }

  #[tokio::test]
  async fn unknown_type_oid_is_preserved_raw() {
    let mut bytes = row_description(&[("x", 9999)]);
    bytes.extend(data_row(&[Some("\x01\x02")]));
    bytes.extend(command_complete("SELECT 1"));
    bytes.extend(ready_for_query(b'I'));

    let result = parse(bytes).await;
    let rows = result.rows.unwrap();
    assert!(matches!(rows[0][0], Value::Raw(_)));
  }
}
