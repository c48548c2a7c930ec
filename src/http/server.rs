//! Thin HTTP listener (spec §1's "HTTP surface" — explicitly a thin,
//! out-of-scope collaborator; no gzip, no generic router, two routes).

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};

use super::handlers;
use super::json::query_result_to_json;
use crate::error::AppError;

pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
  let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(route)) });

  tracing::info!(%addr, "listening");
  Server::bind(&addr)
    .serve(make_svc)
    .await
    .map_err(std::io::Error::other)
}

async fn route(req: Request<Body>) -> Result<Response<Body>, Infallible> {
  let params = query_params(req.uri().query().unwrap_or(""));

  let outcome = match (req.method(), req.uri().path()) {
    (&Method::POST, "/pings") => handle_insert(&params).await,
    (&Method::GET, "/pings") => handle_range_query(&params).await,
    _ => Err(AppError::BadRequest("no such route".to_string())),
  };

  Ok(render(outcome))
}

fn query_params(query: &str) -> HashMap<String, String> {
  url::form_urlencoded::parse(query.as_bytes())
    .into_owned()
    .collect()
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, AppError> {
  params
    .get(key)
    .map(String::as_str)
    .ok_or_else(|| AppError::BadRequest(format!("missing query parameter `{key}`")))
}

fn parse_epoch(params: &HashMap<String, String>, key: &str) -> Result<i64, AppError> {
  required(params, key)?
    .parse()
    .map_err(|_| AppError::BadRequest(format!("`{key}` must be an integer epoch timestamp")))
}

async fn handle_insert(params: &HashMap<String, String>) -> Result<crate::db::QueryResult, AppError> {
  let device_id = required(params, "device_id")?;
  let epoch_time = parse_epoch(params, "epoch_time")?;
  handlers::insert_ping(device_id, epoch_time).await
}

async fn handle_range_query(params: &HashMap<String, String>) -> Result<crate::db::QueryResult, AppError> {
  let device_id = required(params, "device_id")?;
  let from = parse_epoch(params, "from")?;
  let to = parse_epoch(params, "to")?;
  handlers::pings_in_range(device_id, from, to).await
}

/// Maps the controller outcome to an HTTP response (spec §7): a
/// `QueryResult.error` is a 400-class response, a runtime fault is a 500,
/// and success carries the JSON-encoded result.
fn render(outcome: Result<crate::db::QueryResult, AppError>) -> Response<Body> {
  match outcome {
    Ok(result) if result.is_error() => json_response(StatusCode::BAD_REQUEST, &query_result_to_json(&result)),
    Ok(result) => json_response(StatusCode::OK, &query_result_to_json(&result)),
    Err(AppError::BadRequest(msg)) => {
      json_response(StatusCode::BAD_REQUEST, &serde_json::json!({ "error": msg }))
    }
    Err(err) => {
      tracing::error!(error = %err, "request failed");
      json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &serde_json::json!({ "error": err.to_string() }),
      )
    }
  }
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Body> {
  Response::builder()
    .status(status)
    .header("content-type", "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}
