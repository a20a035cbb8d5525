use std::sync::Arc;

use clinic_comms_service::config::Config;
use clinic_comms_service::error::AppError;
use clinic_comms_service::middleware::logging::add_tracing;
use clinic_comms_service::services::collaborators::{
    LocalFileStore, PassthroughCipher, TracingNotifier,
};
use clinic_comms_service::state::AppState;
use clinic_comms_service::{db, logging, migrations, routes};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    logging::init_tracing();

    let config = Arc::new(Config::from_env()?);
    let pool = db::init_pool(&config.database_url).await?;
    migrations::run_all(&pool).await?;

    let state = AppState::new(
        pool,
        Arc::clone(&config),
        Arc::new(PassthroughCipher),
        Arc::new(LocalFileStore::default()),
        Arc::new(TracingNotifier),
    );

    let app = add_tracing(routes::router(state));

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::StartServer(e.to_string()))?;
    Ok(())
}
