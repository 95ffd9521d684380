//! Latency injection stage.
//!
//! Sleeps for a randomized time-to-first-byte before the rest of the
//! pipeline runs. The sleep is an ordinary tokio timer, so dropping the
//! request future (server timeout, client gone) cancels it.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::time::Duration;

use crate::config::Settings;

pub const TTFB_KEY: &str = "HH_TIME_TO_FIRST_BYTE";
pub const TTFB_TAIL_KEY: &str = "HH_TIME_TO_FIRST_BYTE_95P";
pub const TTFB_JITTER_KEY: &str = "HH_TIME_TO_FIRST_BYTE_JITTER";
pub const TTFB_TAIL_PROBABILITY_KEY: &str = "HH_TIME_TO_FIRST_BYTE_TAIL_PROBABILITY";

pub const DEFAULT_TTFB: Duration = Duration::from_millis(400);
pub const DEFAULT_TTFB_TAIL: Duration = Duration::from_millis(800);
pub const DEFAULT_TTFB_JITTER: Duration = Duration::from_millis(200);
pub const DEFAULT_TAIL_PROBABILITY: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyParameters {
    pub baseline: Duration,
    pub tail: Duration,
    pub tail_probability: f64,
    pub jitter: Duration,
}

impl LatencyParameters {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            baseline: settings.duration(TTFB_KEY, DEFAULT_TTFB),
            tail: settings.duration(TTFB_TAIL_KEY, DEFAULT_TTFB_TAIL),
            tail_probability: settings
                .float(TTFB_TAIL_PROBABILITY_KEY, DEFAULT_TAIL_PROBABILITY)
                .clamp(0.0, 1.0),
            jitter: settings.duration(TTFB_JITTER_KEY, DEFAULT_TTFB_JITTER),
        }
    }

    /// Draw one delay: the tail value with `tail_probability`, otherwise the
    /// baseline, shifted by up to half the jitter window either way.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let base = if rng.gen::<f64>() < self.tail_probability {
            self.tail
        } else {
            self.baseline
        };
        let offset = self.jitter.as_secs_f64() * (0.5 - rng.gen::<f64>());
        Duration::try_from_secs_f64(base.as_secs_f64() + offset).unwrap_or(Duration::ZERO)
    }
}

pub async fn delay_first_byte(
    State(settings): State<Settings>,
    request: Request,
    next: Next,
) -> Response {
    let delay = LatencyParameters::from_settings(&settings).sample(&mut SmallRng::from_entropy());
    tracing::trace!(?delay, "delaying first byte");
    tokio::time::sleep(delay).await;
    next.run(request).await
}
