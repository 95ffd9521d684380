//! Cross-origin policy stage, built on `tower_http::cors`.

use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowMethods, AllowOrigin, CorsLayer};

use crate::config::Settings;

pub const ORIGINS_KEY: &str = "HH_CORS_ALLOWED_ORIGINS";
pub const METHODS_KEY: &str = "HH_CORS_ALLOWED_METHOD";
pub const CREDENTIALS_KEY: &str = "HH_CORS_ALLOW_CREDENTIALS";

pub const DEFAULT_ORIGINS: &str = "*";
pub const DEFAULT_METHODS: &str = "HEAD,GET";
pub const DEFAULT_CREDENTIALS: bool = true;

const X_REQUESTED_WITH: HeaderName = HeaderName::from_static("x-requested-with");

/// Build the policy from settings.
///
/// A wildcard origin combined with credentials cannot be sent literally, so
/// the request origin is echoed back instead.
pub fn cors_layer(settings: &Settings) -> CorsLayer {
    let origins = settings.list(ORIGINS_KEY, DEFAULT_ORIGINS);
    let methods = settings.list(METHODS_KEY, DEFAULT_METHODS);
    let credentials = settings.boolean(CREDENTIALS_KEY, DEFAULT_CREDENTIALS);

    let allow_origin = if origins.iter().any(|o| o == "*") {
        if credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        }
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()))
    };

    let allow_methods = if methods.iter().any(|m| m == "*") {
        if credentials {
            AllowMethods::mirror_request()
        } else {
            AllowMethods::any()
        }
    } else {
        AllowMethods::list(
            methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(allow_methods)
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::ORIGIN, X_REQUESTED_WITH])
        .allow_credentials(credentials)
}
