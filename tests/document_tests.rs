//! Document loading and stylesheet discovery tests

mod common;

use critical_css::document::Document;
use critical_css::errors::LoadError;
use critical_css::options::{Options, RawCss, RawOptions};

fn resolve(raw: RawOptions) -> Options {
    raw.resolve().unwrap()
}

#[tokio::test]
async fn test_remote_document_collects_linked_stylesheets() {
    common::init_logging();
    let mut server = mockito::Server::new_async().await;
    let html = common::page(
        r#"<link rel="stylesheet" href="/styles/site.css">"#,
        "<h1>Hi</h1>",
    );
    let page_mock = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(&html)
        .create_async()
        .await;
    let css_mock = server
        .mock("GET", "/styles/site.css")
        .with_status(200)
        .with_header("content-type", "text/css")
        .with_body("h1 { color: red }")
        .create_async()
        .await;

    let options = resolve(RawOptions {
        src: Some(server.url()),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    let document = Document::load(&options, &client).await.unwrap();

    assert_eq!(document.css, "h1 { color: red }");
    assert!(document.has_css());
    assert!(document.base_url.is_some());
    assert!(document.navigation_url.starts_with("http://"));

    page_mock.assert_async().await;
    css_mock.assert_async().await;
}

#[tokio::test]
async fn test_failing_remote_stylesheet_is_fatal() {
    let mut server = mockito::Server::new_async().await;
    let html = common::page(
        r#"<link rel="stylesheet" href="/styles/missing.css">"#,
        "",
    );
    let _page = server
        .mock("GET", "/")
        .with_status(200)
        .with_body(&html)
        .create_async()
        .await;
    let _missing = server
        .mock("GET", "/styles/missing.css")
        .with_status(404)
        .create_async()
        .await;

    let options = resolve(RawOptions {
        src: Some(server.url()),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    let err = Document::load(&options, &client).await.unwrap_err();

    match err {
        LoadError::HttpStatus { status, .. } => assert_eq!(status, 404),
        other => panic!("expected an http status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_local_discovery_wraps_link_media() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("print.css"), "body { font-size: 12pt }").unwrap();
    let html = common::page(
        r#"<link rel="stylesheet" href="print.css" media="print"><style>body { margin: 0 }</style>"#,
        "",
    );
    std::fs::write(dir.path().join("index.html"), &html).unwrap();

    let options = resolve(RawOptions {
        src: Some("index.html".to_string()),
        base: Some(dir.path().to_path_buf()),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    let document = Document::load(&options, &client).await.unwrap();

    assert_eq!(
        document.css,
        "@media print {\nbody { font-size: 12pt }\n}\nbody { margin: 0 }"
    );
    assert!(document.navigation_url.starts_with("file://"));
    assert_eq!(document.asset_dirs.len(), 1);
}

#[tokio::test]
async fn test_missing_local_stylesheet_is_skipped() {
    common::init_logging();
    let dir = tempfile::tempdir().unwrap();
    let html = common::page(
        r#"<link rel="stylesheet" href="absent.css"><style>body { margin: 0 }</style>"#,
        "",
    );
    std::fs::write(dir.path().join("index.html"), &html).unwrap();

    let options = resolve(RawOptions {
        src: Some("index.html".to_string()),
        base: Some(dir.path().to_path_buf()),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    let document = Document::load(&options, &client).await.unwrap();

    assert_eq!(document.css, "body { margin: 0 }");
}

#[tokio::test]
async fn test_explicit_css_overrides_discovery() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("override.css"), ".a { color: red }").unwrap();
    // The linked sheet does not exist; with an override it is never touched.
    let html = common::page(r#"<link rel="stylesheet" href="would-fail.css">"#, "");

    let options = resolve(RawOptions {
        html: Some(html),
        base: Some(dir.path().to_path_buf()),
        css: Some(RawCss::Many(vec![
            "override.css".to_string(),
            ".b { color: blue }".to_string(),
        ])),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    let document = Document::load(&options, &client).await.unwrap();

    assert_eq!(document.css, ".a { color: red }\n.b { color: blue }");
}

#[tokio::test]
async fn test_missing_override_stylesheet_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let options = resolve(RawOptions {
        html: Some(common::page("", "")),
        base: Some(dir.path().to_path_buf()),
        css: Some(RawCss::Single("missing.css".to_string())),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    let err = Document::load(&options, &client).await.unwrap_err();

    match err {
        LoadError::Read { path, .. } => assert!(path.ends_with("missing.css")),
        other => panic!("expected a read error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_literal_markup_is_staged_for_navigation() {
    let dir = tempfile::tempdir().unwrap();
    let html = common::page("<style>body { margin: 0 }</style>", "<p>x</p>");

    let options = resolve(RawOptions {
        html: Some(html.clone()),
        base: Some(dir.path().to_path_buf()),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    let document = Document::load(&options, &client).await.unwrap();

    assert_eq!(document.html, html);
    assert!(document.navigation_url.starts_with("file://"));
    assert!(document.navigation_url.contains(".critical-"));
}

#[tokio::test]
async fn test_credentials_and_user_agent_are_sent() {
    let mut server = mockito::Server::new_async().await;
    let html = common::page("<style>body { margin: 0 }</style>", "");
    let mock = server
        .mock("GET", "/")
        .match_header("authorization", "Basic dXNlcjpwYXNz")
        .match_header("user-agent", "TestAgent/1.0")
        .with_status(200)
        .with_body(&html)
        .create_async()
        .await;

    let options = resolve(RawOptions {
        src: Some(server.url()),
        user: Some("user".to_string()),
        pass: Some("pass".to_string()),
        user_agent: Some("TestAgent/1.0".to_string()),
        ..RawOptions::default()
    });
    let client = reqwest::Client::new();
    Document::load(&options, &client).await.unwrap();

    mock.assert_async().await;
}
