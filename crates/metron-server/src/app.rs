use crate::state::AppState;
use crate::{api, logging};
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::Router;

pub fn build_http_app(state: AppState) -> Router {
    api::routes()
        .layer(DefaultBodyLimit::max(logging::MAX_BODY_BYTES))
        .layer(middleware::from_fn(logging::request_logging))
        .with_state(state)
}
