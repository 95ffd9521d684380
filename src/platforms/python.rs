//! Wire details of Python's `http.server`.

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

pub const SERVER: &str = "SimpleHTTP/0.6 Python/3.12.3";

/// Content type Python sends with error pages (no space before charset).
pub const ERROR_CONTENT_TYPE: &str = "text/html;charset=utf-8";

/// Files served in place of a listing when present.
pub const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

/// `urllib.parse.quote` with its default safe set.
const LINK: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_dir: bool,
    pub is_symlink: bool,
}

/// `html.escape(s, quote=False)`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Render a listing the way `SimpleHTTPRequestHandler.list_directory` does.
pub fn render_listing(display_path: &str, mut entries: Vec<ListingEntry>) -> String {
    entries.sort_by_key(|e| e.name.to_lowercase());

    let title = format!("Directory listing for {}", escape(display_path));
    let mut lines = vec![
        "<!DOCTYPE HTML>".to_string(),
        "<html lang=\"en\">".to_string(),
        "<head>".to_string(),
        "<meta charset=\"utf-8\">".to_string(),
        format!("<title>{title}</title>\n</head>"),
        format!("<body>\n<h1>{title}</h1>"),
        "<hr>\n<ul>".to_string(),
    ];
    for entry in &entries {
        let (display, link) = match (entry.is_dir, entry.is_symlink) {
            (true, true) => (format!("{}@", entry.name), format!("{}/", entry.name)),
            (true, false) => (format!("{}/", entry.name), format!("{}/", entry.name)),
            (false, true) => (format!("{}@", entry.name), entry.name.clone()),
            (false, false) => (entry.name.clone(), entry.name.clone()),
        };
        lines.push(format!(
            "<li><a href=\"{}\">{}</a></li>",
            utf8_percent_encode(&link, LINK),
            escape(&display)
        ));
    }
    lines.push("</ul>\n<hr>\n</body>\n</html>\n".to_string());
    lines.join("\n")
}

fn error_page(code: StatusCode, message: &str, explanation: &str) -> String {
    format!(
        "<!DOCTYPE HTML>\n\
         <html lang=\"en\">\n    \
         <head>\n        \
         <meta charset=\"utf-8\">\n        \
         <title>Error response</title>\n    \
         </head>\n    \
         <body>\n        \
         <h1>Error response</h1>\n        \
         <p>Error code: {code}</p>\n        \
         <p>Message: {message}.</p>\n        \
         <p>Error code explanation: {code} - {explanation}.</p>\n    \
         </body>\n\
         </html>\n",
        code = code.as_u16(),
        message = escape(message),
        explanation = explanation,
    )
}

/// Response equivalent to `send_error(code, message)`.
pub fn error_response(code: StatusCode, message: &str) -> Response {
    let explanation = match code {
        StatusCode::NOT_FOUND => "Nothing matches the given URI",
        StatusCode::NOT_IMPLEMENTED => "Server does not support this operation",
        StatusCode::MOVED_PERMANENTLY => "Object moved permanently -- see URI list",
        _ => "Server got itself in trouble",
    };
    let page = error_page(code, message, explanation);

    let mut response = Response::new(Body::from(page));
    *response.status_mut() = code;
    let headers = response.headers_mut();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ERROR_CONTENT_TYPE));
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool) -> ListingEntry {
        ListingEntry {
            name: name.to_string(),
            is_dir,
            is_symlink: false,
        }
    }

    #[test]
    fn listing_matches_python_layout() {
        let listing = render_listing(
            "/",
            vec![
                entry("images", true),
                entry("WaterBottle.glb", false),
                entry("hello.go", false),
            ],
        );
        let expected = "<!DOCTYPE HTML>\n\
<html lang=\"en\">\n\
<head>\n\
<meta charset=\"utf-8\">\n\
<title>Directory listing for /</title>\n\
</head>\n\
<body>\n\
<h1>Directory listing for /</h1>\n\
<hr>\n\
<ul>\n\
<li><a href=\"hello.go\">hello.go</a></li>\n\
<li><a href=\"images/\">images/</a></li>\n\
<li><a href=\"WaterBottle.glb\">WaterBottle.glb</a></li>\n\
</ul>\n\
<hr>\n\
</body>\n\
</html>\n";
        assert_eq!(listing, expected);
        assert_eq!(listing.len(), 322);
    }

    #[test]
    fn links_are_quoted_and_names_escaped() {
        let listing = render_listing("/a&b/", vec![entry("x <y>.txt", false)]);
        assert!(listing.contains("<li><a href=\"x%20%3Cy%3E.txt\">x &lt;y&gt;.txt</a></li>"));
        assert!(listing.contains("<title>Directory listing for /a&amp;b/</title>"));
    }

    #[test]
    fn error_page_layout() {
        let page = error_page(
            StatusCode::NOT_IMPLEMENTED,
            "Unsupported method ('POST')",
            "Server does not support this operation",
        );
        assert!(page.starts_with("<!DOCTYPE HTML>\n<html lang=\"en\">\n    <head>\n        <meta charset=\"utf-8\">"));
        assert!(page.contains("\n        <p>Error code: 501</p>\n"));
        assert!(page.contains("<p>Message: Unsupported method ('POST').</p>"));
        assert!(page.contains("<p>Error code explanation: 501 - Server does not support this operation.</p>"));
        assert!(page.ends_with("    </body>\n</html>\n"));
    }
}
