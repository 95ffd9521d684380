//! Access logging stage.
//!
//! One line per request, written once the response body has finished
//! streaming so the byte count is final. Two layouts exist:
//!
//! ```text
//! generic: 2025-04-13T18:02:11+00:00 3f0c...e1 GET /index.html HTTP/1.1 200 512 1.2ms
//! common:  127.0.0.1 - - [13/Apr/2025 18:02:11] "GET /index.html HTTP/1.1" 200 -
//! ```
//!
//! The common layout reproduces the Python `http.server` access log exactly.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Local};
use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::http::middleware::capture::{CaptureBody, ResponseCapture};
use crate::http::middleware::request_id::X_REQUEST_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Generic,
    Common,
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;
type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Everything one access log line is rendered from.
#[derive(Debug, Clone)]
pub struct AccessEntry {
    pub timestamp: DateTime<Local>,
    pub host: String,
    pub request_id: Option<String>,
    pub method: String,
    pub path: String,
    pub protocol: String,
    pub status: Option<StatusCode>,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// Shared access log writer.
#[derive(Clone)]
pub struct AccessLog {
    format: LogFormat,
    sink: Sink,
    clock: Clock,
}

impl AccessLog {
    /// Writes to stdout, stamped with the local wall clock.
    pub fn new(format: LogFormat) -> Self {
        Self {
            format,
            sink: Arc::new(Mutex::new(Box::new(io::stdout()))),
            clock: Arc::new(Local::now),
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_sink(mut self, sink: impl Write + Send + 'static) -> Self {
        self.sink = Arc::new(Mutex::new(Box::new(sink)));
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn render(&self, entry: &AccessEntry) -> String {
        let status = Placeholder(entry.status.map(|s| s.as_u16()));
        match self.format {
            LogFormat::Generic => format!(
                "{} {} {} {} {} {} {} {:?}\n",
                entry.timestamp.format("%Y-%m-%dT%H:%M:%S%:z"),
                Placeholder(entry.request_id.as_deref()),
                entry.method,
                entry.path,
                entry.protocol,
                status,
                entry.bytes,
                entry.elapsed,
            ),
            LogFormat::Common => format!(
                "{} - - [{}] \"{} {} {}\" {} -\n",
                entry.host,
                entry.timestamp.format("%d/%b/%Y %H:%M:%S"),
                entry.method,
                entry.path,
                entry.protocol,
                status,
            ),
        }
    }

    fn emit(&self, line: &str) {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = sink.write_all(line.as_bytes()).and_then(|_| sink.flush()) {
            tracing::error!(error = %err, "error writing log");
        }
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(LogFormat::Generic)
    }
}

impl fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLog").field("format", &self.format).finish_non_exhaustive()
    }
}

/// Renders `-` in place of a missing value.
struct Placeholder<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Placeholder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("-"),
        }
    }
}

/// Peer address when the connection is known, otherwise the `Host` header.
fn remote_host(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(':').next())
        .filter(|h| !h.is_empty())
        .unwrap_or("-")
        .to_string()
}

pub async fn log_requests(State(log): State<AccessLog>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let timestamp = (log.clock)();
    let host = remote_host(&request);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let protocol = format!("{:?}", request.version());

    let response = next.run(request).await;
    let capture = ResponseCapture::new();
    capture.record_status(response.status());
    let request_id = response
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    response.map(move |body| {
        CaptureBody::new(body, capture)
            .on_complete(move |capture| {
                let entry = AccessEntry {
                    timestamp,
                    host,
                    request_id,
                    method,
                    path,
                    protocol,
                    status: capture.status(),
                    bytes: capture.bytes_written(),
                    elapsed: started.elapsed(),
                };
                log.emit(&log.render(&entry));
            })
            .into_body()
    })
}
