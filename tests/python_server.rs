mod common;

use common::{start_server, write_file};
use http_helper::Platform;
use reqwest::{header, redirect, StatusCode};

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn identifies_as_python() {
    let server = start_server(Platform::Python, &[], |dir| {
        write_file(dir, "page.html", b"<p>hi</p>");
    })
    .await;

    let response = client().get(server.url("/page.html")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::SERVER], "SimpleHTTP/0.6 Python/3.12.3");
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert_eq!(response.text().await.unwrap(), "<p>hi</p>");

    server.stop().await;
}

#[tokio::test]
async fn redirects_directory_without_slash() {
    let server = start_server(Platform::Python, &[], |dir| {
        std::fs::create_dir(dir.join("docs")).unwrap();
    })
    .await;

    let response = client().get(server.url("/docs?x=1")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/docs/?x=1");
    assert!(!response.headers().contains_key(header::CONTENT_TYPE));

    server.stop().await;
}

#[tokio::test]
async fn unsupported_method_gets_error_page() {
    let server = start_server(Platform::Python, &[], |_| {}).await;

    let response = client().delete(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html;charset=utf-8"
    );
    assert!(response.text().await.unwrap().contains("Error code: 501"));

    server.stop().await;
}
