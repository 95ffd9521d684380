//! Content fingerprint stage.
//!
//! Hashes the response body as it streams past and attaches the hex MD5
//! digest as the `ETag` header once the body ends. The header is late: it
//! reaches the client in the response head only when a block buffer sits
//! further out in the pipeline.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::http::middleware::capture::{CaptureBody, ResponseCapture, Tee};

/// Incremental MD5 over every teed byte.
pub struct Fingerprint {
    context: md5::Context,
}

impl Fingerprint {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
        }
    }

    /// Hex digest of everything written so far; resets the hasher.
    pub fn finish(&mut self) -> String {
        let context = std::mem::replace(&mut self.context, md5::Context::new());
        format!("{:x}", context.compute())
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Tee for Fingerprint {
    fn write(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn late_headers(&mut self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.finish()) {
            headers.insert(header::ETAG, value);
        }
        headers
    }
}

/// Hex MD5 of a complete body.
pub fn fingerprint(body: &[u8]) -> String {
    format!("{:x}", md5::compute(body))
}

pub async fn fingerprint_body(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let capture = ResponseCapture::new();
    capture.record_status(response.status());

    response.map(|body| {
        CaptureBody::new(body, capture)
            .with_tee(Fingerprint::new())
            .into_body()
    })
}
