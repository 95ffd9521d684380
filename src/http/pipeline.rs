//! Pipeline composer.
//!
//! A pipeline is an ordered list of named stages around the terminal
//! handler. The first stage named is the outermost: it sees the request
//! first and the response last.
//!
//! The write timeout sits just inside the leading run of logging, fault
//! isolation and request id stages, so a timed out request is still
//! identified and logged.

use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use std::fmt;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

use crate::config::Settings;
use crate::http::middleware::{
    bandwidth::{shape_traffic, ShapingStage},
    cors::cors_layer,
    error::isolate_faults,
    etag::fingerprint_body,
    logger::{log_requests, AccessLog, LogFormat},
    mime::detect_media_type,
    request_id::assign_request_id,
    ttfb::delay_first_byte,
};
use crate::platforms::Platform;

/// Every stage the composer knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Logger,
    CommonLogger,
    Error,
    RequestId,
    Bandwidth,
    Ttfb,
    Cors,
    Mime,
    Etag,
    Nop,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Logger,
        Stage::CommonLogger,
        Stage::Error,
        Stage::RequestId,
        Stage::Bandwidth,
        Stage::Ttfb,
        Stage::Cors,
        Stage::Mime,
        Stage::Etag,
        Stage::Nop,
    ];

    fn lookup(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        match name.as_str() {
            "python-logger" => Some(Stage::CommonLogger),
            _ => Self::ALL.into_iter().find(|s| s.name() == name),
        }
    }

    /// Resolve a configured name. Unknown names become [`Stage::Nop`].
    pub fn from_name(name: &str) -> Self {
        Self::lookup(name).unwrap_or(Stage::Nop)
    }

    pub fn is_known(name: &str) -> bool {
        Self::lookup(name).is_some()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Logger => "logger",
            Stage::CommonLogger => "common-logger",
            Stage::Error => "error",
            Stage::RequestId => "request-id",
            Stage::Bandwidth => "bandwidth",
            Stage::Ttfb => "ttfb",
            Stage::Cors => "cors",
            Stage::Mime => "mime",
            Stage::Etag => "etag",
            Stage::Nop => "nop",
        }
    }

    /// Whether the stage only observes or annotates the exchange.
    fn observes(&self) -> bool {
        matches!(
            self,
            Stage::Logger | Stage::CommonLogger | Stage::Error | Stage::RequestId
        )
    }

    /// Wrap `router` in this stage.
    pub fn apply(self, router: Router, ctx: &StageContext) -> Router {
        match self {
            Stage::Logger => router.layer(from_fn_with_state(
                ctx.access_log.clone().with_format(LogFormat::Generic),
                log_requests,
            )),
            Stage::CommonLogger => router.layer(from_fn_with_state(
                ctx.access_log.clone().with_format(LogFormat::Common),
                log_requests,
            )),
            Stage::Error => router.layer(from_fn(isolate_faults)),
            Stage::RequestId => router.layer(from_fn(assign_request_id)),
            Stage::Bandwidth => router.layer(from_fn_with_state(
                ShapingStage {
                    settings: ctx.settings.clone(),
                    write_timeout: ctx.write_timeout,
                },
                shape_traffic,
            )),
            Stage::Ttfb => router.layer(from_fn_with_state(ctx.settings.clone(), delay_first_byte)),
            Stage::Cors => router.layer(cors_layer(&ctx.settings)),
            Stage::Mime => router.layer(from_fn(detect_media_type)),
            Stage::Etag => router.layer(from_fn(fingerprint_body)),
            Stage::Nop => router,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared resources handed to every stage when the pipeline is built.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub settings: Settings,
    pub access_log: AccessLog,
    pub write_timeout: Duration,
}

impl StageContext {
    pub fn new(settings: Settings, write_timeout: Duration) -> Self {
        Self {
            settings,
            access_log: AccessLog::default(),
            write_timeout,
        }
    }

    pub fn with_access_log(mut self, access_log: AccessLog) -> Self {
        self.access_log = access_log;
        self
    }
}

/// Apply `stages` around `router` in reverse order, so the first stage
/// yielded ends up outermost.
pub fn wrap<I, F>(router: Router, stages: I) -> Router
where
    I: IntoIterator<Item = F>,
    I::IntoIter: DoubleEndedIterator,
    F: FnOnce(Router) -> Router,
{
    stages
        .into_iter()
        .rev()
        .fold(router, |router, stage| stage(router))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Resolve configured names, warning about any that are unknown.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Self {
        let stages = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                if !Stage::is_known(name) {
                    tracing::warn!(stage = name, "Unknown stage name, it will pass requests through");
                }
                Stage::from_name(name)
            })
            .collect();
        Self { stages }
    }

    pub fn default_for(platform: Platform) -> Self {
        Self::new(platform.default_stages().to_vec())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Wrap `terminal` in every stage. Responses not started within the
    /// write timeout become 503.
    pub fn build(&self, terminal: Router, ctx: &StageContext) -> Router {
        let split = self.stages.iter().take_while(|s| s.observes()).count();
        let (outer, inner) = self.stages.split_at(split);
        let apply = |&stage: &Stage| move |router: Router| stage.apply(router, ctx);

        let timed = wrap(terminal, inner.iter().map(apply)).layer(
            TimeoutLayer::with_status_code(StatusCode::SERVICE_UNAVAILABLE, ctx.write_timeout),
        );
        wrap(timed, outer.iter().map(apply))
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(Stage::name).collect();
        f.write_str(&names.join(","))
    }
}
