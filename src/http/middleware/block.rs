//! Response block buffer.
//!
//! Withholds the whole response until the inner service has produced every
//! byte, so a stage can transform or pace the body as one unit. Trailers
//! collected along the way are late headers from inner capture stages; they
//! are promoted into the response head before anything is released.
//!
//! The body is held in memory. Collection is capped by `limit` and fails
//! closed once the cap is exceeded; there is no spilling to disk.

use axum::body::Body;
use axum::http::{response::Parts, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use http_body_util::{BodyExt, Limited};

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("response body exceeds the {limit} byte buffer limit")]
    TooLarge { limit: usize },
    #[error("failed to read response body: {0}")]
    Body(axum::BoxError),
}

/// A fully buffered response waiting to be flushed.
#[derive(Debug)]
pub struct BlockResponse {
    parts: Parts,
    body: Bytes,
}

impl BlockResponse {
    /// Drain `response` into memory, holding at most `limit` body bytes.
    pub async fn buffer(response: Response, limit: usize) -> Result<Self, BlockError> {
        let (mut parts, body) = response.into_parts();

        let collected = Limited::new(body, limit).collect().await.map_err(|err| {
            if err.is::<http_body_util::LengthLimitError>() {
                BlockError::TooLarge { limit }
            } else {
                BlockError::Body(err)
            }
        })?;

        if let Some(late) = collected.trailers() {
            promote(&mut parts.headers, late);
        }

        Ok(Self {
            parts,
            body: collected.to_bytes(),
        })
    }

    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Release the buffered response unchanged.
    pub fn flush(self) -> Response {
        Response::from_parts(self.parts, Body::from(self.body))
    }

    /// Release the buffered response, replaying its body through `replay`.
    pub fn flush_through<F>(self, replay: F) -> Response
    where
        F: FnOnce(Bytes) -> Body,
    {
        Response::from_parts(self.parts, replay(self.body))
    }
}

fn promote(headers: &mut HeaderMap, late: &HeaderMap) {
    for name in late.keys() {
        headers.remove(name);
        for value in late.get_all(name) {
            headers.append(name.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::middleware::capture::{CaptureBody, ResponseCapture, Tee};
    use axum::http::HeaderValue;

    struct LateType;

    impl Tee for LateType {
        fn write(&mut self, _data: &[u8]) {}

        fn late_headers(&mut self) -> HeaderMap {
            let mut headers = HeaderMap::new();
            headers.insert("content-type", HeaderValue::from_static("text/plain"));
            headers
        }
    }

    #[tokio::test]
    async fn withholds_body_and_keeps_status() {
        let response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("x-inner", "1")
            .body(Body::from("missing"))
            .unwrap();

        let block = BlockResponse::buffer(response, 1024).await.unwrap();
        assert_eq!(block.status(), StatusCode::NOT_FOUND);
        assert_eq!(block.headers().get("x-inner").unwrap(), "1");
        assert_eq!(&block.body()[..], b"missing");

        let flushed = block.flush();
        let bytes = flushed.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"missing");
    }

    #[tokio::test]
    async fn promotes_late_headers_into_head() {
        let body = CaptureBody::new(Body::from("hi"), ResponseCapture::new())
            .with_tee(LateType)
            .into_body();
        let response = Response::builder()
            .header("content-type", "application/octet-stream")
            .body(body)
            .unwrap();

        let block = BlockResponse::buffer(response, 1024).await.unwrap();
        assert_eq!(block.headers().get("content-type").unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn fails_closed_over_limit() {
        let response = Response::new(Body::from(vec![0u8; 64]));
        let err = BlockResponse::buffer(response, 16).await.unwrap_err();
        assert!(matches!(err, BlockError::TooLarge { limit: 16 }));
    }
}
