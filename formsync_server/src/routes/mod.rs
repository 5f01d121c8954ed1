use axum::Router;
use axum::routing::get;

pub mod forms;
pub mod health;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router() -> Router {
    Router::new().nest(
        "/api/v1",
        Router::new()
            .route("/health", get(health::get_health))
            .merge(forms::router()),
    )
}
