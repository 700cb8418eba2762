use axum::error_handling::HandleErrorLayer;
use axum::routing::get;
use axum::{Extension, Json, Router};
use dotenv::dotenv;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tracing::{error, info};

use rate_limiter::{handle_error, init_logging, LimiterConfig, RateLimitInfo, RateLimitLayer, RateLimiter};

async fn status(Extension(info): Extension<RateLimitInfo>) -> Json<RateLimitInfo> {
    Json(info)
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();
    info!("Rate limiter starting up");

    if let Err(e) = run().await {
        error!(error = %e, "Rate limiter server stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = LimiterConfig::from_env()?;
    info!(
        window_ms = config.window.as_millis() as u64,
        max = config.max,
        store = ?config.store,
        "Configuration loaded"
    );

    let limiter = RateLimiter::from_config(config).await?;

    let app = Router::new().route("/", get(status)).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_error))
            .layer(RateLimitLayer::new(limiter)),
    );

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
