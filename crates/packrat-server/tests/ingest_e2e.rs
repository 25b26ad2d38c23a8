//! End-to-end tests over the real loopback HTTP surface: a listener on an
//! ephemeral port, a plain reqwest client, and a scratch database per test.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;

use packrat_server::api::{self, AppState};
use packrat_server::config::ServerConfig;
use packrat_server::downloader::{Downloader, DownloaderOptions};
use packrat_store::downloads::AttachmentFilter;
use packrat_store::{AlwaysUpgrade, Database, DownloadOutcome, DownloadStatus};

const TOKEN: &str = "test-session-token";

struct TestApp {
    addr: SocketAddr,
    db: Arc<Database>,
    client: reqwest::Client,
    _dir: tempfile::TempDir,
}

async fn spawn_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(
        Database::open(&dir.path().join("e2e.db"), &AlwaysUpgrade)
            .unwrap()
            .expect_opened()
            .unwrap(),
    );

    let config = ServerConfig {
        http_port: 0,
        token: TOKEN.to_string(),
        ..ServerConfig::default()
    };
    let state = AppState {
        db: Arc::clone(&db),
        config: Arc::new(config),
    };
    let (addr, server) = api::listen(state, 0).await.unwrap();
    tokio::spawn(server);

    TestApp {
        addr,
        db,
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("X-DHT-Token", TOKEN)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }
}

fn message_body(id: &str, attachments: serde_json::Value) -> serde_json::Value {
    json!([{
        "id": id,
        "sender": "10",
        "channel": "20",
        "text": "hello",
        "timestamp": 1_700_000_000_000i64,
        "attachments": attachments,
    }])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn track_channel_is_idempotent() {
    let app = spawn_app().await;
    let body = json!({
        "server": {"id": "1", "name": "S", "type": "SERVER"},
        "channel": {"id": "2", "name": "c"}
    });

    let response = app.post("/track-channel", &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.db.servers().count().unwrap(), 1);
    assert_eq!(app.db.channels().count().unwrap(), 1);

    let response = app.post("/track-channel", &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.db.servers().count().unwrap(), 1);
    assert_eq!(app.db.channels().count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn track_messages_reports_new_vs_seen() {
    let app = spawn_app().await;
    let body = message_body("100", json!([]));

    let response = app.post("/track-messages", &body).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "1");

    // Identical re-submission: nothing new, counts unchanged.
    let response = app.post("/track-messages", &body).await;
    assert_eq!(response.text().await.unwrap(), "0");
    assert_eq!(app.db.messages().count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_attachment_ids_are_deduplicated() {
    let app = spawn_app().await;
    let body = message_body(
        "100",
        json!([
            {"id": "5", "name": "a.png", "url": "https://cdn.example.com/a.png", "size": 1},
            {"id": "5", "name": "copy.png", "url": "https://cdn.example.com/copy.png", "size": 2}
        ]),
    );

    let response = app.post("/track-messages", &body).await;
    assert_eq!(response.text().await.unwrap(), "1");

    let messages = app.db.messages().get_all().unwrap();
    assert_eq!(messages[0].attachments.len(), 1);
    assert_eq!(messages[0].attachments[0].name, "a.png");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_token_is_rejected_without_touching_the_store() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/track-users"))
        .header("X-DHT-Token", "wrong")
        .header(header::CONTENT_TYPE, "application/json")
        .body(json!([{"id": "1", "name": "n"}]).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.text().await.unwrap().is_empty());
    assert_eq!(app.db.users().count().unwrap(), 0);

    // Missing token is rejected the same way.
    let response = app
        .client
        .post(app.url("/track-users"))
        .body(json!([]).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_bodies_get_precise_errors() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/track-users"))
        .header("X-DHT-Token", TOKEN)
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let response = app
        .client
        .post(app.url("/track-users"))
        .header("X-DHT-Token", TOKEN)
        .header(header::CONTENT_TYPE, "text/plain")
        .body(json!([]).to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let body = message_body("100", json!([{"id": "9", "name": "a.png", "size": 1}]));
    let response = app.post("/track-messages", &body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.text().await.unwrap(), "[0].attachments[0].url");

    assert_eq!(app.db.messages().count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_attachment_serves_archived_blob() {
    let app = spawn_app().await;
    let normalized = "https://cdn.example.com/a.png";

    let response = app
        .client
        .get(app.url("/get-attachment"))
        .query(&[("token", TOKEN), ("url", normalized)])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Archive the blob through the repository, as the engine would.
    let body = message_body(
        "100",
        json!([{"id": "5", "name": "a.png", "url": "https://cdn.example.com/a.png?hm=sig", "size": 4}]),
    );
    app.post("/track-messages", &body).await;
    app.db.downloads().enqueue(&AttachmentFilter::all()).unwrap();
    app.db.downloads().pull_next_enqueued(1).unwrap();
    app.db
        .downloads()
        .write_outcome(
            normalized,
            &DownloadOutcome::Success {
                bytes: vec![1, 2, 3, 4],
                mime_type: Some("image/png".to_string()),
            },
        )
        .unwrap();

    let response = app
        .client
        .get(app.url("/get-attachment"))
        .query(&[("token", TOKEN), ("url", normalized)])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    assert_eq!(response.bytes().await.unwrap().as_ref(), &[1, 2, 3, 4]);
}

/// Local fixture standing in for the media CDN.
async fn spawn_fixture() -> SocketAddr {
    let app = Router::new()
        .route(
            "/ok.png",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "image/png")],
                    vec![9u8, 8, 7, 6, 5],
                )
            }),
        )
        .route("/gone.png", get(|| async { StatusCode::NOT_FOUND }));

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn downloader_archives_enqueued_attachments() {
    let app = spawn_app().await;
    let fixture = spawn_fixture().await;

    let ok_url = format!("http://{fixture}/ok.png");
    let gone_url = format!("http://{fixture}/gone.png");
    let body = message_body(
        "100",
        json!([
            {"id": "1", "name": "ok.png", "url": ok_url.clone(), "size": 5},
            {"id": "2", "name": "gone.png", "url": gone_url.clone(), "size": 5}
        ]),
    );
    app.post("/track-messages", &body).await;
    assert_eq!(
        app.db.downloads().enqueue(&AttachmentFilter::all()).unwrap(),
        2
    );

    let downloader = Downloader::new(
        Arc::clone(&app.db),
        DownloaderOptions {
            workers: 2,
            batch_size: 4,
            ..DownloaderOptions::default()
        },
    );
    let mut finished = downloader.start().unwrap();

    let mut results = Vec::new();
    while results.len() < 2 {
        let item = tokio::time::timeout(Duration::from_secs(10), finished.recv())
            .await
            .expect("timed out waiting for downloads")
            .expect("finished stream closed early");
        results.push(item);
    }
    downloader.stop().await;

    let ok = results
        .iter()
        .find(|item| item.normalized_url == ok_url)
        .unwrap();
    assert_eq!(ok.status, DownloadStatus::Success);
    assert_eq!(ok.size, Some(5));

    let gone = results
        .iter()
        .find(|item| item.normalized_url == gone_url)
        .unwrap();
    assert_eq!(gone.status, DownloadStatus::HttpError(404));

    let stats = app.db.downloads().statistics().unwrap();
    assert_eq!(stats.successful.count, 1);
    assert_eq!(stats.successful.total_bytes, 5);
    assert_eq!(stats.failed.count, 1);
    assert_eq!(stats.enqueued.count, 0);

    // The archived bytes come back over the GET endpoint.
    let response = app
        .client
        .get(app.url("/get-attachment"))
        .query(&[("token", TOKEN), ("url", ok_url.as_str())])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().as_ref(), &[9, 8, 7, 6, 5]);
}
