pub mod health;
pub mod ingest;
pub mod merge;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

pub use health::healthz;
pub use ingest::import_upload;
pub use merge::merge;

use crate::state::AppState;

/// The service's routes, without transport layers (rate limiting, timeouts).
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/import",
            post(import_upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/merge", post(merge))
        .with_state(state)
}
