//! HTML asset server over real HTTP

use nbraster::asset_server::{HtmlAssetServer, DEFAULT_RASTER_ROUTE};
use std::sync::Arc;
use std::thread;

fn asset_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("assets")).unwrap();
    std::fs::write(dir.path().join("assets/app.js"), "console.log('app');").unwrap();
    std::fs::write(dir.path().join("assets/style.css"), "body { margin: 0 }").unwrap();
    dir
}

fn get(url: &str) -> reqwest::blocking::Response {
    reqwest::blocking::get(url).expect("request failed")
}

#[test]
fn publishes_html_after_start() {
    let dir = asset_dir();
    let server = HtmlAssetServer::start(dir.path(), DEFAULT_RASTER_ROUTE).unwrap();
    assert!(server.base_url().starts_with("http://127.0.0.1:"));
    assert_eq!(
        server.page_url(),
        format!("{}{}", server.base_url(), DEFAULT_RASTER_ROUTE)
    );

    // The document embeds the server's own URL, so it is only known after start.
    let html = format!("<html><head><base href=\"{}/\"></head></html>", server.base_url());
    server.set_html(html.clone());

    let resp = get(&server.page_url());
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    assert_eq!(resp.text().unwrap(), html);
}

#[test]
fn dynamic_route_ignores_query_string() {
    let dir = asset_dir();
    let server = HtmlAssetServer::start(dir.path(), "raster.html").unwrap();
    server.set_html("<p>v1</p>");
    assert_eq!(get(&format!("{}?t=1", server.page_url())).text().unwrap(), "<p>v1</p>");

    server.set_html("<p>v2</p>");
    assert_eq!(get(&server.page_url()).text().unwrap(), "<p>v2</p>");
}

#[test]
fn serves_static_files_with_content_type() {
    let dir = asset_dir();
    let server = HtmlAssetServer::start(dir.path(), DEFAULT_RASTER_ROUTE).unwrap();

    let resp = get(&format!("{}/assets/app.js", server.base_url()));
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.contains("javascript"), "got {}", content_type);
    assert_eq!(resp.text().unwrap(), "console.log('app');");

    let resp = get(&format!("{}/assets/style.css", server.base_url()));
    assert_eq!(resp.headers()["content-type"].to_str().unwrap(), "text/css");
}

#[test]
fn missing_files_are_404() {
    let dir = asset_dir();
    let server = HtmlAssetServer::start(dir.path(), DEFAULT_RASTER_ROUTE).unwrap();
    assert_eq!(get(&format!("{}/assets/nope.js", server.base_url())).status(), 404);
}

#[test]
fn concurrent_readers_never_see_a_partial_document() {
    let dir = asset_dir();
    let server = Arc::new(HtmlAssetServer::start(dir.path(), DEFAULT_RASTER_ROUTE).unwrap());
    let a = "a".repeat(64 * 1024);
    let b = "b".repeat(64 * 1024);
    server.set_html(a.clone());

    let writer = {
        let server = Arc::clone(&server);
        let (a, b) = (a.clone(), b.clone());
        thread::spawn(move || {
            for i in 0..50 {
                server.set_html(if i % 2 == 0 { b.clone() } else { a.clone() });
            }
        })
    };

    let url = server.page_url();
    for _ in 0..20 {
        let body = get(&url).text().unwrap();
        assert!(body == a || body == b, "torn read of {} bytes", body.len());
    }
    writer.join().unwrap();
}

#[test]
fn port_is_released_on_drop() {
    let dir = asset_dir();
    let server = HtmlAssetServer::start(dir.path(), DEFAULT_RASTER_ROUTE).unwrap();
    let url = server.page_url();
    drop(server);

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .unwrap();
    assert!(client.get(&url).send().is_err());
}
