//! Traffic shaping stage.
//!
//! Buffers the complete inner response, then replays the body through a
//! token bucket at the configured rate. Parameters are read per request.
//! A negative rate means unlimited and the buffered response is flushed
//! unchanged.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum::body::Body;
use bytes::Bytes;
use futures_util::stream;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::io;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::Settings;
use crate::http::middleware::block::BlockResponse;

pub const BPS_KEY: &str = "HH_BANDWIDTH_BPS";
pub const JITTER_KEY: &str = "HH_BANDWIDTH_JITTER";
pub const MAX_BUFFER_KEY: &str = "HH_BANDWIDTH_MAX_BUFFER";

pub const DEFAULT_BPS: i64 = -1;
pub const DEFAULT_JITTER: i64 = 0;
pub const DEFAULT_MAX_BUFFER: usize = 512 * 1024 * 1024;

/// Largest burst the limiter hands out in one chunk.
const MAX_BURST: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapingParameters {
    /// Bytes per second, negative for unlimited.
    pub rate: i64,
    /// Width of the window the rate is jittered across.
    pub jitter: i64,
}

impl ShapingParameters {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rate: settings.int(BPS_KEY, DEFAULT_BPS),
            jitter: settings.int(JITTER_KEY, DEFAULT_JITTER),
        }
    }

    /// Rate for one response, `None` when unlimited. Never below 1 B/s.
    pub fn effective_rate<R: Rng>(&self, rng: &mut R) -> Option<u64> {
        if self.rate < 0 {
            return None;
        }
        let offset = if self.jitter > 0 {
            self.jitter / 2 - rng.gen_range(0..self.jitter)
        } else {
            0
        };
        Some(self.rate.saturating_add(offset).max(1) as u64)
    }
}

/// Token bucket pacing a single replay.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    capacity: f64,
    tokens: f64,
    last_update: Instant,
}

impl RateLimiter {
    pub fn new(rate: u64, now: Instant) -> Self {
        let rate = rate.max(1);
        let capacity = (rate / 10).clamp(1, MAX_BURST) as f64;
        Self {
            rate: rate as f64,
            capacity,
            tokens: capacity,
            last_update: now,
        }
    }

    /// Take up to `want` bytes worth of tokens, or report how long to wait
    /// before the next chunk is available.
    pub fn take(&mut self, want: usize, now: Instant) -> Result<usize, Duration> {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_update = now;

        let chunk = (want as f64).min(self.capacity);
        if self.tokens >= chunk {
            self.tokens -= chunk;
            Ok(chunk as usize)
        } else {
            let wait = Duration::from_secs_f64((chunk - self.tokens) / self.rate);
            Err(wait.max(Duration::from_millis(1)))
        }
    }
}

struct Replay {
    remaining: Bytes,
    limiter: RateLimiter,
    deadline: Instant,
}

/// Stream `body` at `rate` bytes per second. The stream fails with
/// `TimedOut` rather than wait past `deadline`.
pub fn throttle(body: Bytes, rate: u64, deadline: Instant) -> Body {
    let replay = Replay {
        remaining: body,
        limiter: RateLimiter::new(rate, Instant::now()),
        deadline,
    };

    let chunks = stream::unfold(replay, |mut replay| async move {
        if replay.remaining.is_empty() {
            return None;
        }
        loop {
            let now = Instant::now();
            match replay.limiter.take(replay.remaining.len(), now) {
                Ok(n) => {
                    let chunk = replay.remaining.split_to(n);
                    return Some((Ok(chunk), replay));
                }
                Err(wait) if now + wait > replay.deadline => {
                    replay.remaining.clear();
                    let err = io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded");
                    return Some((Err(err), replay));
                }
                Err(wait) => tokio::time::sleep(wait).await,
            }
        }
    });

    Body::from_stream(chunks)
}

#[derive(Debug, Clone)]
pub struct ShapingStage {
    pub settings: Settings,
    pub write_timeout: Duration,
}

pub async fn shape_traffic(
    State(stage): State<ShapingStage>,
    request: Request,
    next: Next,
) -> Response {
    let deadline = Instant::now() + stage.write_timeout;
    let limit = usize::try_from(stage.settings.int(MAX_BUFFER_KEY, DEFAULT_MAX_BUFFER as i64))
        .unwrap_or(DEFAULT_MAX_BUFFER);

    let response = next.run(request).await;
    let mut block = match BlockResponse::buffer(response, limit).await {
        Ok(block) => block,
        Err(err) => {
            tracing::error!(error = %err, "ERROR: failed to buffer response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let params = ShapingParameters::from_settings(&stage.settings);
    match params.effective_rate(&mut SmallRng::from_entropy()) {
        None => block.flush(),
        Some(rate) => {
            let len = block.body().len();
            tracing::debug!(rate, bytes = len, "shaping response");
            block
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            block.flush_through(|body| throttle(body, rate, deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware::from_fn_with_state, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn stage(pairs: &[(&str, &str)]) -> ShapingStage {
        ShapingStage {
            settings: Settings::from_pairs(pairs.iter().copied()),
            write_timeout: Duration::from_secs(5),
        }
    }

    fn app(stage: ShapingStage, body: &'static [u8]) -> Router {
        Router::new()
            .route("/", get(move || async move { (StatusCode::CREATED, body) }))
            .layer(from_fn_with_state(stage, shape_traffic))
    }

    fn get_root() -> Request {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[test]
    fn negative_rate_is_unlimited() {
        let params = ShapingParameters { rate: -1, jitter: 100 };
        assert_eq!(params.effective_rate(&mut SmallRng::seed_from_u64(7)), None);
    }

    #[test]
    fn jittered_rate_stays_in_window_and_positive() {
        let mut rng = SmallRng::seed_from_u64(7);
        let params = ShapingParameters { rate: 100, jitter: 50 };
        for _ in 0..1000 {
            let rate = params.effective_rate(&mut rng).unwrap();
            assert!((76..=125).contains(&rate), "rate {rate}");
        }

        let starved = ShapingParameters { rate: 0, jitter: 0 };
        assert_eq!(starved.effective_rate(&mut rng), Some(1));
        let driven_negative = ShapingParameters { rate: 1, jitter: 1000 };
        for _ in 0..100 {
            assert!(driven_negative.effective_rate(&mut rng).unwrap() >= 1);
        }
    }

    #[test]
    fn limiter_hands_out_bursts_then_waits() {
        let now = Instant::now();
        let mut limiter = RateLimiter::new(1000, now);
        assert_eq!(limiter.take(500, now), Ok(100));
        let wait = limiter.take(100, now).unwrap_err();
        assert_eq!(wait, Duration::from_millis(100));
        assert_eq!(limiter.take(100, now + wait), Ok(100));
    }

    #[tokio::test]
    async fn unlimited_replay_is_byte_identical() {
        let response = app(stage(&[]), b"unshaped body").oneshot(get_root()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"unshaped body");
    }

    #[tokio::test(start_paused = true)]
    async fn limited_replay_takes_body_over_rate() {
        static BODY: [u8; 1000] = [b'x'; 1000];
        let app = app(stage(&[(BPS_KEY, "1000")]), &BODY);

        let start = Instant::now();
        let response = app.oneshot(get_root()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();

        assert_eq!(bytes.len(), 1000);
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn replay_aborts_at_write_deadline() {
        let body = throttle(Bytes::from(vec![0u8; 10_000]), 100, Instant::now() + Duration::from_secs(1));
        assert!(body.collect().await.is_err());
    }

    #[tokio::test]
    async fn oversized_body_fails_closed() {
        let app = app(stage(&[(MAX_BUFFER_KEY, "4")]), b"more than four bytes");
        let response = app.oneshot(get_root()).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
