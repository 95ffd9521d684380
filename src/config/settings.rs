//! Named settings read at request time.
//!
//! Stages look up their parameters on every request so operators can change
//! shaping and latency behaviour without a restart. Lookups never fail: a
//! missing or malformed value falls back to the caller's default.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where raw setting values come from.
pub trait Source: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct Environment;

impl Source for Environment {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl Source for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Cheaply cloneable handle to a settings source.
#[derive(Clone)]
pub struct Settings {
    source: Arc<dyn Source>,
}

impl Settings {
    pub fn new(source: impl Source) -> Self {
        Self {
            source: Arc::new(source),
        }
    }

    /// Settings backed by the process environment.
    pub fn from_env() -> Self {
        Self::new(Environment)
    }

    /// Settings backed by a fixed set of key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::new(map)
    }

    pub fn string(&self, key: &str, default: &str) -> String {
        self.source.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn int(&self, key: &str, default: i64) -> i64 {
        self.parsed(key).unwrap_or(default)
    }

    pub fn float(&self, key: &str, default: f64) -> f64 {
        self.parsed::<f64>(key)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    /// Accepts `1/t/T/TRUE/true/True` and `0/f/F/FALSE/false/False`.
    pub fn boolean(&self, key: &str, default: bool) -> bool {
        match self.source.get(key).as_deref().map(str::trim) {
            Some("1" | "t" | "T" | "TRUE" | "true" | "True") => true,
            Some("0" | "f" | "F" | "FALSE" | "false" | "False") => false,
            _ => default,
        }
    }

    /// Durations in humantime syntax, e.g. `400ms` or `5s`. Decimal
    /// components such as `1.5s` or `1h2.5m` are accepted too.
    pub fn duration(&self, key: &str, default: Duration) -> Duration {
        self.source
            .get(key)
            .and_then(|v| {
                let v = v.trim();
                humantime::parse_duration(v)
                    .ok()
                    .or_else(|| parse_decimal_duration(v))
            })
            .unwrap_or(default)
    }

    /// Comma separated list; the default is split the same way.
    pub fn list(&self, key: &str, default: &str) -> Vec<String> {
        self.string(key, default)
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.source.get(key).and_then(|v| v.trim().parse().ok())
    }
}

/// Sequence of `<decimal><unit>` components with units from `ns` to `h`.
/// A bare `0` is zero. Negative durations are rejected.
fn parse_decimal_duration(value: &str) -> Option<Duration> {
    let value = value.strip_prefix('+').unwrap_or(value);
    if value == "0" {
        return Some(Duration::ZERO);
    }
    if value.is_empty() {
        return None;
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = value;
    let mut secs = 0.0_f64;
    while !rest.is_empty() {
        let (number, tail) = rest.split_at(rest.find(|c: char| !is_number(c)).unwrap_or(rest.len()));
        let (unit, next) = tail.split_at(tail.find(is_number).unwrap_or(tail.len()));
        let scale = match unit {
            "ns" => 1e-9,
            "us" | "\u{b5}s" | "\u{3bc}s" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        secs += number.parse::<f64>().ok()? * scale;
        rest = next;
    }
    Duration::try_from_secs_f64(secs).ok()
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}
