//! Pipeline stages and the response interception they share.
//!
//! # Data Flow
//! ```text
//! request ─→ logger → error → request_id → bandwidth → ttfb → cors → mime → etag ─→ handler
//!                                              │                        │      │
//! response ←── CaptureBody ←──── BlockResponse ┘ ←────────── CaptureBody + Tee ┘
//!              (bytes, status)   (buffer, promote late        (late headers as
//!                                 headers, throttled replay)   trailers)
//! ```
//!
//! # Design Decisions
//! - Observation wraps the body; it never buffers (capture.rs)
//! - Whole-body transformation buffers with a hard cap (block.rs)
//! - Per-request parameters come from `Settings`, never cached
//! - Randomness is a fresh `SmallRng` per request

pub mod bandwidth;
pub mod block;
pub mod capture;
pub mod cors;
pub mod error;
pub mod etag;
pub mod logger;
pub mod mime;
pub mod request_id;
pub mod ttfb;

pub use bandwidth::{shape_traffic, ShapingParameters, ShapingStage};
pub use block::{BlockError, BlockResponse};
pub use capture::{CaptureBody, ResponseCapture, Tee};
pub use cors::cors_layer;
pub use error::isolate_faults;
pub use etag::fingerprint_body;
pub use logger::{log_requests, AccessLog, LogFormat};
pub use mime::detect_media_type;
pub use request_id::{assign_request_id, RequestId, RequestIdExt, X_REQUEST_ID};
pub use ttfb::{delay_first_byte, LatencyParameters};
