//! Terminal file handler.
//!
//! Resolves the request path beneath the served directory and answers with
//! the file bytes or a directory listing. Filesystem errors are answered
//! locally: missing paths are 404, anything else is 500.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, request::Parts, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use std::fs::Metadata;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::Instrument;

use crate::http::middleware::mime::{self, TEXT_HTML};
use crate::http::middleware::{RequestId, RequestIdExt};
use crate::platforms::python::{self, ListingEntry};
use crate::platforms::Platform;

#[derive(Debug, Clone)]
pub struct FileHandler {
    root: PathBuf,
    platform: Platform,
}

impl FileHandler {
    pub fn new(root: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            root: root.into(),
            platform,
        }
    }

    /// Router answering every path with this handler.
    pub fn into_router(self) -> Router {
        Router::new().fallback(serve).with_state(Arc::new(self))
    }

    pub async fn respond(&self, request: Request) -> Response {
        let span = tracing::debug_span!(
            "serve",
            request_id = %request.request_id().map_or("-", RequestId::as_str),
            path = %request.uri().path(),
        );
        let (parts, _body) = request.into_parts();
        async move {
            let mut response = match self.platform {
                Platform::Generic => self.respond_generic(&parts).await,
                Platform::Python => self.respond_python(&parts).await,
            };
            if self.platform == Platform::Python {
                response
                    .headers_mut()
                    .insert(header::SERVER, HeaderValue::from_static(python::SERVER));
            }
            tracing::debug!(status = response.status().as_u16(), "Served");
            response
        }
        .instrument(span)
        .await
    }

    async fn respond_generic(&self, request: &Parts) -> Response {
        let url_path = decoded_path(request);
        let Some(target) = self.resolve(&url_path) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        match tokio::fs::metadata(&target).await {
            Ok(meta) if meta.is_dir() => match read_listing(&target).await {
                Ok(entries) => {
                    let names = entries.into_iter().map(|e| e.name).collect();
                    html(generic_listing(&url_path, names))
                }
                Err(err) => internal_error(&target, err),
            },
            Ok(_) => match tokio::fs::read(&target).await {
                Ok(bytes) => file_response(bytes),
                Err(err) => fs_error(&target, err),
            },
            Err(err) => fs_error(&target, err),
        }
    }

    async fn respond_python(&self, request: &Parts) -> Response {
        let method = &request.method;
        if method != Method::GET && method != Method::HEAD {
            return python::error_response(
                StatusCode::NOT_IMPLEMENTED,
                &format!("Unsupported method ('{method}')"),
            );
        }

        let url_path = decoded_path(request);
        let not_found = || python::error_response(StatusCode::NOT_FOUND, "File not found");
        let Some(mut target) = self.resolve(&url_path) else {
            return not_found();
        };

        let mut meta = match tokio::fs::metadata(&target).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return not_found(),
            Err(err) => return internal_error(&target, err),
        };

        if meta.is_dir() {
            if !request.uri.path().ends_with('/') {
                return redirect_to_directory(request);
            }
            match find_index(&target).await {
                Some((index, index_meta)) => {
                    target = index;
                    meta = index_meta;
                }
                None => {
                    return match read_listing(&target).await {
                        Ok(entries) => html(python::render_listing(&url_path, entries)),
                        Err(_) => python::error_response(
                            StatusCode::NOT_FOUND,
                            "No permission to list directory",
                        ),
                    };
                }
            }
        }

        match tokio::fs::read(&target).await {
            Ok(bytes) => {
                let mut response = file_response(bytes);
                if let Some(value) = last_modified(&meta) {
                    response.headers_mut().insert(header::LAST_MODIFIED, value);
                }
                response
            }
            Err(_) => not_found(),
        }
    }

    /// Map a decoded URL path onto the served directory. Paths that try to
    /// climb out of the root resolve to nothing.
    fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let mut target = self.root.clone();
        for component in Path::new(url_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => target.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(target)
    }
}

async fn serve(State(handler): State<Arc<FileHandler>>, request: Request) -> Response {
    handler.respond(request).await
}

fn decoded_path(request: &Parts) -> String {
    percent_decode_str(request.uri.path())
        .decode_utf8_lossy()
        .into_owned()
}

fn html(page: String) -> Response {
    ([(header::CONTENT_TYPE, TEXT_HTML)], page).into_response()
}

fn file_response(bytes: Vec<u8>) -> Response {
    let content_type = mime::detect(&bytes);
    let mut response = Response::new(Body::from(bytes));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn fs_error(target: &Path, err: io::Error) -> Response {
    if err.kind() == io::ErrorKind::NotFound {
        StatusCode::NOT_FOUND.into_response()
    } else {
        internal_error(target, err)
    }
}

fn internal_error(target: &Path, err: io::Error) -> Response {
    tracing::error!(path = %target.display(), error = %err, "ERROR: failed to serve path");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

fn redirect_to_directory(request: &Parts) -> Response {
    let mut location = format!("{}/", request.uri.path());
    if let Some(query) = request.uri.query() {
        location.push('?');
        location.push_str(query);
    }
    match HeaderValue::from_str(&location) {
        Ok(location) => (
            StatusCode::MOVED_PERMANENTLY,
            [(header::LOCATION, location), (header::CONTENT_LENGTH, HeaderValue::from_static("0"))],
        )
            .into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn find_index(dir: &Path) -> Option<(PathBuf, Metadata)> {
    for name in python::INDEX_FILES {
        let candidate = dir.join(name);
        if let Ok(meta) = tokio::fs::metadata(&candidate).await {
            if meta.is_file() {
                return Some((candidate, meta));
            }
        }
    }
    None
}

fn last_modified(meta: &Metadata) -> Option<HeaderValue> {
    let modified: DateTime<Utc> = meta.modified().ok()?.into();
    HeaderValue::from_str(&modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).ok()
}

async fn read_listing(dir: &Path) -> io::Result<Vec<ListingEntry>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let is_symlink = entry.file_type().await.map(|t| t.is_symlink()).unwrap_or(false);
        let is_dir = tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        entries.push(ListingEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir,
            is_symlink,
        });
    }
    Ok(entries)
}

fn escape_html(s: &str) -> String {
    python::escape(s).replace('"', "&#34;")
}

/// Listing page of the plain file server: entries sorted by name, linked by
/// absolute path.
fn generic_listing(url_path: &str, mut names: Vec<String>) -> String {
    names.sort();
    let base = url_path.trim_end_matches('/');
    let items: String = names
        .iter()
        .map(|name| {
            format!(
                "\n\t<li><a href=\"{}/{}\">{}</a></li>\n",
                escape_html(base),
                escape_html(name),
                escape_html(name)
            )
        })
        .collect();

    format!(
        "<!DOCTYPE HTML>\n\
         <html lang=\"en\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <title>Directory listing for {path}</title>\n\
         </head>\n\
         <body>\n\
         <h1>Directory listing for {path}</h1>\n\
         <hr>\n\
         <ul>{items}</ul>\n\
         <hr>\n\
         </body>\n\
         </html>",
        path = escape_html(url_path),
    )
}
