pub mod error;
pub mod routes;

use axum::Router;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::guard_routes::router())
        .with_state(state)
}
