//! Exposition endpoint tests: content type, basic auth, dedicated listener.

use std::{collections::BTreeMap, time::Duration};

use axum::{Router, body::Body, http::Request, routing::get};
use promgate::{Config, Prometheus};
use tower::ServiceExt;

fn guarded_config() -> Config {
    Config {
        accounts: Some(BTreeMap::from([("admin".to_owned(), "secret".to_owned())])),
        ..Config::default()
    }
}

#[tokio::test]
async fn dedicated_listener_serves_the_exposition_format() {
    let prom = Prometheus::new(Config::default()).unwrap();
    let addr = prom.serve_exposition("127.0.0.1:0").await.unwrap();

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_owned();
    assert!(content_type.starts_with("text/plain"));
    assert!(content_type.contains("version=0.0.4"));

    let body = response.text().await.unwrap();
    assert!(body.contains("# HELP"));
    assert!(body.contains("request_size_bytes"));
}

#[tokio::test]
async fn unauthenticated_scrape_gets_a_challenge_and_no_body() {
    let prom = Prometheus::new(guarded_config()).unwrap();
    let addr = prom.serve_exposition("127.0.0.1:0").await.unwrap();

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok()),
        Some("Basic realm=\"metrics\"")
    );
    let body = response.text().await.unwrap();
    assert!(!body.contains("request_size_bytes"));
}

#[tokio::test]
async fn valid_credentials_unlock_the_scrape() {
    let prom = Prometheus::new(guarded_config()).unwrap();
    let addr = prom.serve_exposition("127.0.0.1:0").await.unwrap();

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{addr}/metrics"))
        .basic_auth("admin", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("request_size_bytes"));

    let response = client
        .get(format!("http://{addr}/metrics"))
        .basic_auth("admin", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn configured_listen_address_moves_metrics_off_the_main_router() {
    // Reserve an ephemeral port for the dedicated listener.
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let prom = Prometheus::new(Config {
        listen_address: Some(addr.to_string()),
        ..Config::default()
    })
    .unwrap();
    let app = prom.instrument(Router::new().route("/", get(|| async { "ok" })));

    // The main router keeps its own routes but is not given the exposition
    // route.
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // The dedicated listener binds in a spawned task; poll until it serves.
    let client = reqwest::Client::new();
    let mut body = None;
    for _ in 0..50 {
        if let Ok(response) = client.get(format!("http://{addr}/metrics")).send().await {
            assert_eq!(response.status(), 200);
            body = Some(response.text().await.unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let body = body.expect("dedicated metrics listener never came up");
    assert!(body.contains("request_size_bytes"));
}

#[tokio::test]
async fn custom_metrics_path_is_honored() {
    let prom = Prometheus::new(Config {
        metrics_path: "/internal/telemetry".to_owned(),
        ..Config::default()
    })
    .unwrap();
    let app = prom.instrument(Router::new().route("/", get(|| async { "ok" })));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let response = reqwest::get(format!("http://{addr}/internal/telemetry"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("request_size_bytes"));

    let response = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(response.status(), 404);
}
