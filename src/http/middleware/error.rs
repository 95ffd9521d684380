//! Fault isolation stage.
//!
//! Catches panics raised anywhere inside the stages and handler it wraps.
//! A panic before the response head exists becomes a bare 500. A panic
//! while the body is streaming can no longer change the status, so the body
//! ends with an error and the connection is aborted.

use axum::{
    body::Body,
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::FutureExt;
use http_body::{Frame, SizeHint};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

#[derive(Debug, thiserror::Error)]
#[error("response body panicked: {0}")]
pub struct BodyPanic(String);

pub async fn isolate_faults(request: Request, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response.map(|body| Body::new(GuardedBody::new(body))),
        Err(panic) => {
            tracing::error!(error = %panic_message(&*panic), "ERROR: request handler panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Body wrapper converting a panic during polling into a stream error.
pub struct GuardedBody {
    inner: Body,
    faulted: bool,
}

impl GuardedBody {
    pub fn new(inner: Body) -> Self {
        Self {
            inner,
            faulted: false,
        }
    }
}

impl http_body::Body for GuardedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.faulted {
            return Poll::Ready(None);
        }

        let inner = &mut this.inner;
        match catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll_frame(cx))) {
            Ok(poll) => poll,
            Err(panic) => {
                this.faulted = true;
                let message = panic_message(&*panic);
                tracing::error!(error = %message, "ERROR: response body panicked");
                Poll::Ready(Some(Err(axum::Error::new(BodyPanic(message)))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.faulted || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
