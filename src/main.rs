use pingwatch::{config::AppConfig, db, http};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let config = AppConfig::from_env().unwrap_or_else(|err| {
    tracing::error!(error = %err, "failed to load configuration");
    std::process::exit(1);
  });

  tracing::info!(pool_size = config.pool.size, "starting database pool");
  db::service::start(config.db.clone(), config.pool.clone()).await;

  if let Err(err) = http::server::serve(config.bind_addr).await {
    tracing::error!(error = %err, "server exited");
    std::process::exit(1);
  }
}
