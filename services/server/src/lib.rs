pub mod demo;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::{Router, routing::get};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/live", get(ws::ws_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
