use crate::state::AppState;
use crate::{api, logging, middleware};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;

pub fn build_http_app(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(api::dashboard))
        .route("/ping", get(api::ping))
        .route("/update/", post(api::update_json))
        .route("/update/:kind/:name/:value", post(api::update_by_path))
        .route("/updates/", post(api::updates_json))
        .route("/value/", post(api::value_json))
        .route("/value/:kind/:name", get(api::value_by_path));

    // Outermost first.
    let stack = ServiceBuilder::new()
        .layer(from_fn(logging::request_logging))
        .layer(from_fn(middleware::compress_response))
        .layer(from_fn_with_state(state.clone(), middleware::decrypt_request))
        .layer(from_fn(middleware::decompress_request))
        .layer(from_fn_with_state(state.clone(), middleware::trusted_subnet))
        .layer(from_fn_with_state(state.clone(), middleware::verify_hash))
        .layer(from_fn_with_state(state.clone(), middleware::sign_response));

    routes.layer(stack).with_state(state)
}
