//! Feed download tests against a mock HTTP server

use nvd_ingest::feed::{FeedConfig, FeedFetcher, FetchError, HttpFeedFetcher};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn fetcher(server: &MockServer) -> HttpFeedFetcher {
    fetcher_at(format!("{}/feeds/json/cve/1.1/", server.uri()))
}

fn fetcher_at(url_base: String) -> HttpFeedFetcher {
    HttpFeedFetcher::new(FeedConfig {
        url_base,
        file_prefix: "nvdcve-1.1-".to_string(),
        file_suffix: ".json.gz".to_string(),
    })
    .unwrap()
    .quiet()
}

#[tokio::test]
async fn test_fetch_writes_archive() {
    let server = MockServer::start().await;
    let body = b"\x1f\x8b\x08\x00archive-bytes".to_vec();

    Mock::given(method("GET"))
        .and(path("/feeds/json/cve/1.1/nvdcve-1.1-2019.json.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let fetched = fetcher(&server)
        .fetch("nvdcve-1.1-2019.json.gz", dir.path())
        .await
        .unwrap();

    assert_eq!(fetched, dir.path().join("nvdcve-1.1-2019.json.gz"));
    assert_eq!(std::fs::read(&fetched).unwrap(), body);
    assert!(!dir.path().join("nvdcve-1.1-2019.json.gz.part").exists());
}

#[tokio::test]
async fn test_fetch_creates_missing_directory() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feeds/json/cve/1.1/nvdcve-1.1-recent.json.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"recent".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let staging = dir.path().join("staging").join("nvd");
    let fetched = fetcher(&server)
        .fetch("nvdcve-1.1-recent.json.gz", &staging)
        .await
        .unwrap();

    assert!(fetched.starts_with(&staging));
    assert_eq!(std::fs::read(fetched).unwrap(), b"recent");
}

#[tokio::test]
async fn test_fetch_replaces_previous_download() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/feeds/json/cve/1.1/nvdcve-1.1-recent.json.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fresh".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("nvdcve-1.1-recent.json.gz"), b"stale and longer").unwrap();

    let fetched = fetcher(&server)
        .fetch("nvdcve-1.1-recent.json.gz", dir.path())
        .await
        .unwrap();

    assert_eq!(std::fs::read(fetched).unwrap(), b"fresh");
}

#[tokio::test]
async fn test_fetch_missing_archive_is_status_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let err = fetcher(&server)
        .fetch("nvdcve-1.1-1999.json.gz", dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 404, .. }), "{err:?}");
    assert!(!dir.path().join("nvdcve-1.1-1999.json.gz").exists());
    assert!(!dir.path().join("nvdcve-1.1-1999.json.gz.part").exists());
}

#[tokio::test]
async fn test_fetch_server_error_keeps_previous_file() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let existing = dir.path().join("nvdcve-1.1-2020.json.gz");
    std::fs::write(&existing, b"previous").unwrap();

    let result = fetcher(&server).fetch("nvdcve-1.1-2020.json.gz", dir.path()).await;

    assert!(matches!(result, Err(FetchError::Status { status: 503, .. })));
    assert_eq!(std::fs::read(existing).unwrap(), b"previous");
}

#[tokio::test]
async fn test_fetch_unreachable_host_is_request_error() {
    // Nothing listens on port 1
    let fetcher = fetcher_at("http://127.0.0.1:1/".to_string());

    let dir = TempDir::new().unwrap();
    let err = fetcher
        .fetch("nvdcve-1.1-2021.json.gz", dir.path())
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Request { .. }), "{err:?}");
}

/// Serves one response advertising `advertised` bytes, sends `body` and hangs up
async fn short_body_server(advertised: usize, body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 4096];
        let _ = socket.read(&mut request).await.unwrap();

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/gzip\r\nContent-Length: {advertised}\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(body).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{addr}/feeds/")
}

#[tokio::test]
async fn test_fetch_short_body_is_incomplete_transfer() {
    let url_base = short_body_server(100, &[0x1f; 40]).await;

    let dir = TempDir::new().unwrap();
    let err = fetcher_at(url_base)
        .fetch("nvdcve-1.1-2018.json.gz", dir.path())
        .await
        .unwrap_err();

    match &err {
        FetchError::TransferIncomplete {
            url,
            expected,
            received,
            ..
        } => {
            assert!(url.ends_with("/feeds/nvdcve-1.1-2018.json.gz"));
            assert_eq!(*expected, Some(100));
            assert!(*received < 100);
        },
        other => panic!("expected TransferIncomplete, got {other:?}"),
    }
    assert!(!dir.path().join("nvdcve-1.1-2018.json.gz").exists());
    assert!(!dir.path().join("nvdcve-1.1-2018.json.gz.part").exists());
}

#[tokio::test]
async fn test_fetch_short_body_keeps_previous_file() {
    let url_base = short_body_server(100, &[0x1f; 40]).await;

    let dir = TempDir::new().unwrap();
    let existing = dir.path().join("nvdcve-1.1-recent.json.gz");
    std::fs::write(&existing, b"previous").unwrap();

    let result = fetcher_at(url_base)
        .fetch("nvdcve-1.1-recent.json.gz", dir.path())
        .await;

    assert!(matches!(result, Err(FetchError::TransferIncomplete { .. })), "{result:?}");
    assert_eq!(std::fs::read(existing).unwrap(), b"previous");
    assert!(!dir.path().join("nvdcve-1.1-recent.json.gz.part").exists());
}
