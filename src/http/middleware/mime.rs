//! Media-type detection stage.
//!
//! Sniffs the leading bytes of the response body and sets `Content-Type`
//! after the fact, falling back to `application/octet-stream`.

use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use infer::MatcherType;

use crate::http::middleware::capture::{CaptureBody, ResponseCapture, Tee};

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
pub const TEXT_HTML: &str = "text/html; charset=utf-8";

/// Bytes examined when sniffing.
pub const SNIFF_LEN: usize = 3072;

const HTML_PREFIXES: &[&[u8]] = &[
    b"<!doctype html",
    b"<html",
    b"<head",
    b"<body",
    b"<title",
    b"<script",
    b"<style",
    b"<table",
    b"<div",
    b"<p>",
    b"<h1",
    b"<br",
    b"<!--",
];

/// Detect the media type of a body from its leading bytes.
///
/// Binary formats are recognised by their magic numbers; markup, JSON and
/// plain text by inspecting the text itself.
pub fn detect(data: &[u8]) -> &'static str {
    let data = &data[..data.len().min(SNIFF_LEN)];
    if data.is_empty() {
        return OCTET_STREAM;
    }

    match infer::get(data) {
        Some(kind) if kind.matcher_type() != MatcherType::Text => kind.mime_type(),
        _ => detect_text(data),
    }
}

fn detect_text(data: &[u8]) -> &'static str {
    let text = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    let trimmed = trim_start(text);
    let lower: Vec<u8> = trimmed
        .iter()
        .take(64)
        .map(u8::to_ascii_lowercase)
        .collect();

    if HTML_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return TEXT_HTML;
    }
    if lower.starts_with(b"<svg") {
        return "image/svg+xml";
    }
    if lower.starts_with(b"<?xml") {
        return if contains(trimmed, b"<svg") {
            "image/svg+xml"
        } else {
            "text/xml; charset=utf-8"
        };
    }
    if matches!(trimmed.first(), Some(b'{') | Some(b'['))
        && serde_json::from_slice::<serde::de::IgnoredAny>(trimmed).is_ok()
    {
        return "application/json";
    }
    if looks_like_text(text) {
        return TEXT_PLAIN;
    }
    OCTET_STREAM
}

fn trim_start(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// UTF-8 (a sequence cut short at the end is allowed) without control bytes.
fn looks_like_text(data: &[u8]) -> bool {
    let valid = match std::str::from_utf8(data) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none(),
    };
    valid
        && !data
            .iter()
            .any(|&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0C | 0x1B))
}

/// Keeps the first [`SNIFF_LEN`] bytes of the body.
#[derive(Default)]
pub struct Sniffer {
    prefix: Vec<u8>,
}

impl Tee for Sniffer {
    fn write(&mut self, data: &[u8]) {
        let room = SNIFF_LEN.saturating_sub(self.prefix.len());
        self.prefix.extend_from_slice(&data[..data.len().min(room)]);
    }

    fn late_headers(&mut self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(detect(&self.prefix)),
        );
        headers
    }
}

pub async fn detect_media_type(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let capture = ResponseCapture::new();
    capture.record_status(response.status());

    response.map(|body| {
        CaptureBody::new(body, capture)
            .with_tee(Sniffer::default())
            .into_body()
    })
}
