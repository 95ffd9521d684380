//! HTTP server setup and connection serving.
//!
//! # Responsibilities
//! - Build the Axum router: file handler wrapped in the stage pipeline
//!   (which also applies the write timeout)
//! - Mount the readiness check outside the pipeline
//! - Serve each accepted connection over HTTP/1.1 with a header read timeout
//! - Stop accepting on shutdown and drain open connections

use axum::{extract::ConnectInfo, Router};
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::config::{ServerConfig, Settings, TimeoutConfig};
use crate::handler::{health, FileHandler};
use crate::http::pipeline::{Pipeline, StageContext};
use crate::net::{ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError};

/// How long shutdown waits for open connections before giving up on them.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The development HTTP server.
pub struct HttpServer {
    router: Router,
    config: ServerConfig,
    pipeline: Pipeline,
}

impl HttpServer {
    /// Create a server reading per-request parameters from `settings`.
    pub fn new(config: ServerConfig, settings: Settings) -> Self {
        let ctx = StageContext::new(settings, config.timeouts.write);
        Self::with_context(config, ctx)
    }

    /// Create a server with explicit stage resources (access log sink, settings).
    pub fn with_context(config: ServerConfig, ctx: StageContext) -> Self {
        let pipeline = match &config.pipeline {
            Some(names) => Pipeline::parse(names),
            None => Pipeline::default_for(config.platform),
        };
        let router = Self::build_router(&config, &pipeline, &ctx);
        Self {
            router,
            config,
            pipeline,
        }
    }

    fn build_router(config: &ServerConfig, pipeline: &Pipeline, ctx: &StageContext) -> Router {
        let terminal = FileHandler::new(&config.directory, config.platform).into_router();
        let mut router = pipeline.build(terminal, ctx);
        if let Some(path) = &config.health_path {
            router = health::mount(router, path);
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// The assembled router, for driving requests without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Accept connections on `listener` until `shutdown` resolves, then
    /// drain the connections still open.
    pub async fn run<F>(self, listener: Listener, shutdown: F) -> Result<(), ServeError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            platform = %self.config.platform,
            pipeline = %self.pipeline,
            "HTTP server starting"
        );

        let tracker = ConnectionTracker::new();
        let (close_tx, close_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(connection) => connection,
                        Err(ListenerError::Accept(err)) => {
                            tracing::warn!(error = %err, "Accept failed");
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    };
                    let connection = Connection {
                        router: self.router.clone(),
                        timeouts: self.config.timeouts.clone(),
                        peer,
                        _permit: permit,
                        guard: tracker.track(),
                    };
                    tokio::spawn(connection.serve(stream, close_rx.clone()));
                }
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        drop(listener);
        let _ = close_tx.send(true);

        if tracker.drain(DRAIN_TIMEOUT).await {
            tracing::info!("HTTP server stopped");
        } else {
            tracing::warn!(
                open_connections = tracker.active_count(),
                "Drain timed out, abandoning open connections"
            );
        }
        Ok(())
    }
}

struct Connection {
    router: Router,
    timeouts: TimeoutConfig,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
}

impl Connection {
    async fn serve(self, stream: TcpStream, mut close: watch::Receiver<bool>) {
        let router = self.router;
        let peer = self.peer;
        let service = service_fn(move |mut request: Request<Incoming>| {
            request.extensions_mut().insert(ConnectInfo(peer));
            router.clone().oneshot(request)
        });

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.timeouts.read.min(self.timeouts.idle))
            .keep_alive(true);

        let conn = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = close.changed() => {
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        if let Err(err) = result {
            tracing::debug!(
                connection_id = %self.guard.id(),
                peer_addr = %peer,
                error = %err,
                "Connection ended with error"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PIPELINE_KEY;
    use crate::http::pipeline::Stage;
    use crate::platforms::Platform;
    use axum::{body::Body, http::StatusCode};
    use http_body_util::BodyExt;
    use std::io::Write;

    fn served(dir: &tempfile::TempDir) -> ServerConfig {
        ServerConfig {
            directory: dir.path().to_path_buf(),
            ..ServerConfig::default()
        }
    }

    fn get(uri: &str) -> axum::extract::Request {
        axum::extract::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn pipeline_follows_platform_unless_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = served(&dir);
        config.platform = Platform::Python;
        let server = HttpServer::new(config.clone(), Settings::from_pairs(Vec::<(String, String)>::new()));
        assert_eq!(server.pipeline(), &Pipeline::default_for(Platform::Python));

        config.apply_settings(&Settings::from_pairs([(PIPELINE_KEY, "etag, bogus")]));
        let server = HttpServer::new(config, Settings::from_pairs(Vec::<(String, String)>::new()));
        assert_eq!(server.pipeline().stages(), &[Stage::Etag, Stage::Nop]);
    }

    #[tokio::test]
    async fn health_route_bypasses_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = served(&dir);
        config.pipeline = Some(vec!["etag".into()]);
        config.health_path = Some("/healthz".into());
        let router = HttpServer::new(config, Settings::from_pairs(Vec::<(String, String)>::new())).router();

        let health_check = router.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(health_check.status(), StatusCode::OK);
        assert!(health_check.into_body().collect().await.unwrap().trailers().is_none());

        let missing = router.oneshot(get("/nope")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let trailers = missing.into_body().collect().await.unwrap().trailers().cloned().unwrap();
        assert!(trailers.contains_key(axum::http::header::ETAG));
    }

    #[derive(Clone, Default)]
    struct LogLines(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for LogLines {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn write_timeout_is_logged_as_server_error() {
        use crate::http::middleware::logger::{AccessLog, LogFormat};

        let dir = tempfile::tempdir().unwrap();
        let mut config = served(&dir);
        config.timeouts.write = Duration::from_secs(1);
        let settings = Settings::from_pairs([
            ("HH_TIME_TO_FIRST_BYTE", "10s"),
            ("HH_TIME_TO_FIRST_BYTE_95P", "10s"),
            ("HH_TIME_TO_FIRST_BYTE_JITTER", "0ms"),
        ]);
        let lines = LogLines::default();
        let ctx = StageContext::new(settings, config.timeouts.write)
            .with_access_log(AccessLog::new(LogFormat::Generic).with_sink(lines.clone()));
        let router = HttpServer::with_context(config, ctx).router();

        let response = router.oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
        response.into_body().collect().await.unwrap();

        let log = String::from_utf8(lines.0.lock().unwrap().clone()).unwrap();
        let fields: Vec<&str> = log.split_whitespace().collect();
        assert_eq!(fields[1..6], [request_id.as_str(), "GET", "/", "HTTP/1.1", "503"]);
    }
}
