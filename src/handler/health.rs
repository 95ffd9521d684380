//! Readiness check.

use axum::{
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};

/// 200 with a JSON content type on GET, 405 for every other method.
pub async fn readiness(method: Method) -> Response {
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::CONTENT_LENGTH, "0")]).into_response();
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/json")]).into_response()
}

/// Mount the check at `path` on `router`.
pub fn mount(router: Router, path: &str) -> Router {
    router.route(path, any(readiness))
}
