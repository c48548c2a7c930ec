//! JSON encoding of `QueryResult` (spec §1 lists this as a thin, out-of-scope
//! collaborator; only the contract with the core is specified here).

use serde_json::{json, Value as Json};

use crate::db::{QueryResult, Value};

fn value_to_json(value: &Value) -> Json {
  match value {
    Value::Null => Json::Null,
    Value::Text(s) => json!(s),
    Value::Int8(n) => json!(n),
    Value::Raw(bytes) => json!(bytes.to_vec()),
  }
}

pub fn query_result_to_json(result: &QueryResult) -> Json {
  let rows = result.rows.as_ref().map(|rows| {
    rows
      .iter()
      .map(|row| row.iter().map(value_to_json).collect::<Vec<_>>())
      .collect::<Vec<_>>()
  });

  let fields = result.fields.as_ref().map(|fields| {
    fields
      .iter()
      .map(|f| json!({ "name": f.name, "type_oid": f.type_oid }))
      .collect::<Vec<_>>()
  });

  json!({
    "fields": fields,
    "rows": rows,
    "command": result.command,
    "status": result.status.map(|b| (b as char).to_string()),
    "error": result.error.map(|b| (b as char).to_string()),
  })
}
