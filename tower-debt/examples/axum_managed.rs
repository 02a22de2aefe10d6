use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use debt_limit::DebtLimiter;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_debt::LimitError;
use tower_debt::ManagedRateLimitLayer;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().init();

    // 10 requests per second, with up to 5 banked after a quiet spell
    let limiter = Arc::new(DebtLimiter::new(10, 5, Duration::from_secs(1)));

    // Requests wait up to 500ms for their slot before being turned away
    let managed_layer =
        ManagedRateLimitLayer::<_, Request>::spinning(limiter, Duration::from_millis(500));

    let app = Router::new()
        .route("/", get(|| async { "Hello, Debt!" }))
        .layer(
            ServiceBuilder::new()
                // Outermost: turns BoxError back into a response
                .layer(HandleErrorLayer::new(handle_limit_error))
                .layer(managed_layer)
                // Route is Infallible; the managed layer wants BoxError
                .map_err(BoxError::from),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_limit_error(err: BoxError) -> impl IntoResponse {
    match err.downcast_ref::<LimitError>() {
        Some(limit_err) => limit_err.clone().into_response(),
        None => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response(),
    }
}
