//! Local development HTTP server.
//!
//! Serves a directory while imitating other servers: a plain static file
//! server or Python's `http.server`, with configurable latency, bandwidth,
//! CORS, media type detection and ETags layered as a pipeline of stages.

pub mod config;
pub mod handler;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod platforms;

pub use config::{ServerConfig, Settings};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use platforms::Platform;
