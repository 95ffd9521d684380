//! Response capture.
//!
//! A response body is streamed to the client exactly once, after its head
//! has been sent. Stages that need to observe it wrap the body in a
//! [`CaptureBody`], which forwards every frame unchanged while recording
//! how many bytes were yielded and, optionally, teeing each data frame to a
//! [`Tee`].
//!
//! Anything a tee derives from the complete body (a content hash, a sniffed
//! media type) is only known after the last byte. Those late headers are
//! emitted as a trailer frame when the stream ends. A block buffer further
//! out can promote them into the response head; otherwise they reach the
//! client only if the transport carries trailers.

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};

/// Per-response bookkeeping shared between a stage and its [`CaptureBody`].
#[derive(Debug, Clone, Default)]
pub struct ResponseCapture {
    state: Arc<CaptureState>,
}

#[derive(Debug, Default)]
struct CaptureState {
    status: OnceLock<StatusCode>,
    bytes_written: AtomicU64,
}

impl ResponseCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the response status. Only the first call has any effect,
    /// returns whether this call was the one that set it.
    pub fn record_status(&self, status: StatusCode) -> bool {
        self.state.status.set(status).is_ok()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.state.status.get().copied()
    }

    /// Bytes yielded to the consumer so far.
    pub fn bytes_written(&self) -> u64 {
        self.state.bytes_written.load(Ordering::Acquire)
    }

    fn record_bytes(&self, n: usize) {
        self.state.bytes_written.fetch_add(n as u64, Ordering::AcqRel);
    }
}

/// Secondary sink receiving a copy of every data frame, in order.
pub trait Tee: Send + 'static {
    fn write(&mut self, data: &[u8]);

    /// Headers derived from everything written, requested once at end of stream.
    fn late_headers(&mut self) -> HeaderMap {
        HeaderMap::new()
    }
}

type OnComplete = Box<dyn FnOnce(&ResponseCapture) + Send>;

/// Body wrapper that observes a response stream without altering it.
pub struct CaptureBody {
    inner: Body,
    capture: ResponseCapture,
    tee: Option<Box<dyn Tee>>,
    on_complete: Option<OnComplete>,
    done: bool,
}

impl CaptureBody {
    pub fn new(inner: Body, capture: ResponseCapture) -> Self {
        Self {
            inner,
            capture,
            tee: None,
            on_complete: None,
            done: false,
        }
    }

    pub fn with_tee(mut self, tee: impl Tee) -> Self {
        self.tee = Some(Box::new(tee));
        self
    }

    /// Run `f` once the body has finished, failed, or been dropped.
    pub fn on_complete(mut self, f: impl FnOnce(&ResponseCapture) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn into_body(self) -> Body {
        Body::new(self)
    }

    fn late_headers(&mut self) -> HeaderMap {
        self.tee
            .as_mut()
            .map(|tee| tee.late_headers())
            .unwrap_or_default()
    }

    fn complete(&mut self) {
        self.done = true;
        if let Some(f) = self.on_complete.take() {
            f(&self.capture);
        }
    }
}

impl http_body::Body for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                let frame = match frame.into_data() {
                    Ok(data) => {
                        this.capture.record_bytes(data.len());
                        if let Some(tee) = this.tee.as_mut() {
                            tee.write(&data);
                        }
                        Frame::data(data)
                    }
                    Err(frame) => match frame.into_trailers() {
                        Ok(mut trailers) => {
                            for (name, value) in this.late_headers().drain() {
                                if let Some(name) = name {
                                    trailers.insert(name, value);
                                }
                            }
                            this.complete();
                            Frame::trailers(trailers)
                        }
                        Err(frame) => frame,
                    },
                };
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                this.complete();
                Poll::Ready(Some(Err(err)))
            }
            None => {
                let late = this.late_headers();
                this.complete();
                if late.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Frame::trailers(late))))
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        if let Some(f) = self.on_complete.take() {
            f(&self.capture);
        }
    }
}
