use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::{handlers, state::AppState};

/// Route table of the service. Paths that are not listed here, including
/// any other `/hello/*` sub-path, fall through to axum's default 404.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/hello", get(handlers::hello))
        .route("/hello/json", get(handlers::hello_json))
        .route("/helloext", get(handlers::hello_ext))
        .route("/greeting/:name", get(handlers::greeting))
        .route(
            "/fruits",
            get(handlers::list_fruits).post(handlers::create_fruit),
        )
        .route(
            "/fruits/:id",
            get(handlers::get_fruit)
                .put(handlers::update_fruit)
                .delete(handlers::delete_fruit),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
