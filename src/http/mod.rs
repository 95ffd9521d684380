//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper HTTP/1.1, trace + write timeout layers)
//!     → pipeline.rs (named stages, first named is outermost)
//!     → middleware/ (one module per stage)
//!     → handler/ (file bytes or directory listing)
//!     → Send to client
//! ```

pub mod middleware;
pub mod pipeline;
pub mod server;

pub use middleware::{RequestId, RequestIdExt, X_REQUEST_ID};
pub use pipeline::{Pipeline, Stage, StageContext};
pub use server::{HttpServer, ServeError};
