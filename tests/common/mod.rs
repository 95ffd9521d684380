//! Shared utilities for integration tests.

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use http_helper::config::{ListenerConfig, ServerConfig, Settings};
use http_helper::http::middleware::{AccessLog, LogFormat};
use http_helper::http::{HttpServer, ServeError, StageContext};
use http_helper::net::Listener;
use http_helper::{Platform, Shutdown};

/// Settings that switch off the default first-byte latency.
const NO_LATENCY: [(&str, &str); 3] = [
    ("HH_TIME_TO_FIRST_BYTE", "0ms"),
    ("HH_TIME_TO_FIRST_BYTE_95P", "0ms"),
    ("HH_TIME_TO_FIRST_BYTE_JITTER", "0ms"),
];

/// Access log sink the test can read back.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    #[allow(dead_code)]
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    #[allow(dead_code)]
    pub dir: tempfile::TempDir,
    pub access_log: SharedBuffer,
    shutdown: Shutdown,
    handle: JoinHandle<Result<(), ServeError>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Trigger shutdown and wait for the server to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

/// Start a server on an ephemeral port serving a fresh directory.
///
/// `populate` fills the directory before the first request; `settings` are
/// layered over settings that disable first-byte latency.
pub async fn start_server<F>(platform: Platform, settings: &[(&str, &str)], populate: F) -> TestServer
where
    F: FnOnce(&Path),
{
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());

    let mut config = ServerConfig {
        listener: ListenerConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
            max_connections: 64,
        },
        directory: dir.path().to_path_buf(),
        platform,
        ..ServerConfig::default()
    };
    let settings = Settings::from_pairs(NO_LATENCY.iter().chain(settings).copied());
    config.apply_settings(&settings);

    let access_log = SharedBuffer::default();
    let ctx = StageContext::new(settings, config.timeouts.write)
        .with_access_log(AccessLog::new(LogFormat::Generic).with_sink(access_log.clone()));

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::with_context(config, ctx);
    let handle = tokio::spawn(server.run(listener, shutdown.signalled()));

    TestServer {
        addr,
        dir,
        access_log,
        shutdown,
        handle,
    }
}

pub fn write_file(dir: &Path, name: &str, contents: &[u8]) {
    std::fs::write(dir.join(name), contents).unwrap();
}
