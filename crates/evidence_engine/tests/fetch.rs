mod support;

use std::io::Write;
use std::sync::Mutex;

use evidence_engine::{part_path, FailureKind, FetchSettings, Fetcher, ReqwestFetcher};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use pretty_assertions::assert_eq;
use support::init_logging;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Records every `(received, declared)` pair the fetcher reports.
struct ByteLog {
    calls: Mutex<Vec<(u64, Option<u64>)>>,
}

impl ByteLog {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, received: u64, declared: Option<u64>) {
        self.calls.lock().unwrap().push((received, declared));
    }

    fn calls(&self) -> Vec<(u64, Option<u64>)> {
        self.calls.lock().unwrap().clone()
    }
}

fn fetcher() -> ReqwestFetcher {
    ReqwestFetcher::new(FetchSettings::default()).unwrap()
}

/// Bytes that do not compress to nothing, so wire size and file size differ visibly.
fn sample_document(len: usize) -> Vec<u8> {
    (0..len).map(|i| b"evidence of controls\n"[i % 21]).collect()
}

#[tokio::test]
async fn streams_body_to_target_and_reports_bytes() {
    init_logging();
    let server = MockServer::start().await;
    let body = sample_document(2048);
    Mock::given(method("GET"))
        .and(path("/files/report.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("report.pdf");
    let log = ByteLog::new();

    let written = fetcher()
        .fetch_to_file(
            &format!("{}/files/report.pdf", server.uri()),
            &target,
            &|received, declared| log.record(received, declared),
        )
        .await
        .unwrap();

    assert_eq!(written, 2048);
    assert_eq!(std::fs::read(&target).unwrap(), body);
    assert!(!part_path(&target).exists());

    let calls = log.calls();
    assert_eq!(calls.first(), Some(&(0, Some(2048))));
    assert_eq!(calls.last(), Some(&(2048, Some(2048))));
    assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
}

#[tokio::test]
async fn http_error_status_leaves_no_file() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("missing.pdf");

    let err = fetcher()
        .fetch_to_file(&format!("{}/missing", server.uri()), &target, &|_, _| {})
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::HttpStatus(404));
    assert_eq!(err.message, "HTTP 404 Not Found");
    assert!(!target.exists());
    assert!(!part_path(&target).exists());
}

#[tokio::test]
async fn follows_relative_redirect() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/signed/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/storage/blob.pdf"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/storage/blob.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("blob.pdf");

    fetcher()
        .fetch_to_file(&format!("{}/signed/start", server.uri()), &target, &|_, _| {})
        .await
        .unwrap();

    assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-1.7");
}

#[tokio::test]
async fn five_redirects_succeed_and_six_fail_after_six_requests() {
    init_logging();
    let server = MockServer::start().await;
    for hop in 0..6 {
        Mock::given(method("GET"))
            .and(path(format!("/hop/{hop}")))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("/hop/{}", hop + 1)),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/hop/6"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"done".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();

    // /hop/1 -> ... -> /hop/6 is five redirects.
    let ok_target = dir.path().join("ok.bin");
    fetcher()
        .fetch_to_file(&format!("{}/hop/1", server.uri()), &ok_target, &|_, _| {})
        .await
        .unwrap();
    assert_eq!(std::fs::read(&ok_target).unwrap(), b"done");
    let after_success = server.received_requests().await.unwrap().len();
    assert_eq!(after_success, 6);

    // /hop/0 needs six redirects.
    let bad_target = dir.path().join("bad.bin");
    let err = fetcher()
        .fetch_to_file(&format!("{}/hop/0", server.uri()), &bad_target, &|_, _| {})
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::TooManyRedirects);
    assert!(!bad_target.exists());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len() - after_success, 6);
}

#[tokio::test]
async fn gzip_body_is_decoded_while_progress_counts_wire_bytes() {
    init_logging();
    let document = sample_document(4000);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&document).unwrap();
    let compressed = encoder.finish().unwrap();
    assert!(compressed.len() < document.len());

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(compressed.clone()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("export.json");
    let log = ByteLog::new();

    let written = fetcher()
        .fetch_to_file(
            &format!("{}/export.json", server.uri()),
            &target,
            &|received, declared| log.record(received, declared),
        )
        .await
        .unwrap();

    assert_eq!(written, 4000);
    assert_eq!(std::fs::read(&target).unwrap(), document);
    let max_reported = log.calls().iter().map(|(received, _)| *received).max().unwrap();
    assert_eq!(max_reported, compressed.len() as u64);
}

#[tokio::test]
async fn deflate_body_is_decoded() {
    init_logging();
    let document = sample_document(3000);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&document).unwrap();
    let compressed = encoder.finish().unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/deflated"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "deflate")
                .set_body_bytes(compressed),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("deflated.txt");

    let written = fetcher()
        .fetch_to_file(&format!("{}/deflated", server.uri()), &target, &|_, _| {})
        .await
        .unwrap();

    assert_eq!(written, 3000);
    assert_eq!(std::fs::read(&target).unwrap(), document);
}

#[tokio::test]
async fn corrupt_gzip_fails_and_cleans_up() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Encoding", "gzip")
                .set_body_bytes(b"definitely not gzip".to_vec()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let target = dir.path().join("broken.bin");

    let err = fetcher()
        .fetch_to_file(&format!("{}/broken", server.uri()), &target, &|_, _| {})
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Stream);
    assert!(!target.exists());
    assert!(!part_path(&target).exists());
}

#[tokio::test]
async fn invalid_url_is_rejected_without_a_request() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("x.pdf");

    let err = fetcher()
        .fetch_to_file("", &target, &|_, _| {})
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::InvalidUrl);
    assert_eq!(err.message, "Invalid or missing download URL");
}
