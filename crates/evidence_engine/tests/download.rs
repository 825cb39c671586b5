mod support;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use evidence_engine::{
    DownloadError, DownloadOptions, DownloadProgress, DownloadStatus, Downloader, FetchSettings,
    FolderStructure, ReqwestFetcher,
};
use pretty_assertions::assert_eq;
use support::{descriptor, fast_retry, init_logging, RecordingSink};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader() -> Downloader {
    Downloader::new(Arc::new(ReqwestFetcher::new(FetchSettings::default()).unwrap()))
}

fn options(dir: &TempDir, concurrency: usize, max_retries: u32) -> DownloadOptions {
    DownloadOptions {
        concurrency,
        retry: fast_retry(max_retries),
        ..DownloadOptions::new(dir.path())
    }
}

async fn requests_for(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == route)
        .count()
}

fn last_status_by_index(events: &[DownloadProgress]) -> HashMap<usize, DownloadStatus> {
    events.iter().map(|e| (e.index, e.status)).collect()
}

#[tokio::test]
async fn mixed_batch_tallies_successes_failures_and_skips() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken/3"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken/7"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"evidence".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("file-5.pdf"), b"from an earlier run").unwrap();

    let descriptors: Vec<_> = (0..10)
        .map(|i| {
            let route = if i == 3 || i == 7 {
                format!("/broken/{i}")
            } else {
                format!("/ok/{i}")
            };
            descriptor(format!("{}{route}", server.uri()), &format!("file-{i}.pdf"), "ev")
        })
        .collect();

    let sink = Arc::new(RecordingSink::<DownloadProgress>::new());
    let summary = downloader()
        .run(descriptors, &options(&dir, 3, 3), sink.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.successes, 7);
    assert_eq!(summary.failures, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.cancelled, 0);
    assert_eq!(summary.total_size, 7 * 8 + 19);
    let failed: Vec<_> = summary.failed.iter().map(|f| f.index).collect();
    assert_eq!(failed, vec![3, 7]);
    assert_eq!(summary.failed[0].message, "HTTP 500 Internal Server Error");

    // One initial attempt plus three retries each; the skipped file is never requested.
    assert_eq!(requests_for(&server, "/broken/3").await, 4);
    assert_eq!(requests_for(&server, "/broken/7").await, 4);
    assert_eq!(requests_for(&server, "/ok/5").await, 0);
    assert_eq!(
        std::fs::read(dir.path().join("file-5.pdf")).unwrap(),
        b"from an earlier run"
    );

    let events = sink.events();
    let finals = last_status_by_index(&events);
    assert_eq!(finals.len(), 10);
    assert_eq!(finals[&3], DownloadStatus::Failed);
    assert_eq!(finals[&5], DownloadStatus::Skipped);
    assert_eq!(finals[&0], DownloadStatus::Success);
    for index in 0..10 {
        let first = events.iter().find(|e| e.index == index).unwrap();
        assert_eq!(first.status, DownloadStatus::Pending);
        let terminal = events
            .iter()
            .filter(|e| e.index == index && e.status.is_terminal())
            .count();
        assert_eq!(terminal, 1, "descriptor {index}");
    }
    assert!(events.iter().all(|e| e.total == 10));
}

#[tokio::test]
async fn second_run_skips_everything_without_requests() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let descriptors: Vec<_> = (0..4)
        .map(|i| descriptor(format!("{}/doc/{i}", server.uri()), "Policy.pdf", &format!("ev-{i}")))
        .collect();

    let first = downloader()
        .run(
            descriptors.clone(),
            &options(&dir, 2, 0),
            Arc::new(RecordingSink::<DownloadProgress>::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.successes, 4);
    let requests_after_first = server.received_requests().await.unwrap().len();

    let second = downloader()
        .run(
            descriptors,
            &options(&dir, 2, 0),
            Arc::new(RecordingSink::<DownloadProgress>::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(second.skipped, 4);
    assert_eq!(second.successes, 0);
    assert_eq!(second.total_size, first.total_size);
    assert_eq!(server.received_requests().await.unwrap().len(), requests_after_first);
}

#[tokio::test]
async fn colliding_names_are_numbered_in_input_order() {
    init_logging();
    let server = MockServer::start().await;
    for i in 0..3 {
        Mock::given(method("GET"))
            .and(path(format!("/r/{i}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(format!("copy {i}").into_bytes()))
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let descriptors: Vec<_> = (0..3)
        .map(|i| descriptor(format!("{}/r/{i}", server.uri()), "report.pdf", "ev"))
        .collect();

    let summary = downloader()
        .run(
            descriptors,
            &options(&dir, 3, 0),
            Arc::new(RecordingSink::<DownloadProgress>::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.successes, 3);
    assert_eq!(std::fs::read_to_string(dir.path().join("report.pdf")).unwrap(), "copy 0");
    assert_eq!(std::fs::read_to_string(dir.path().join("report (1).pdf")).unwrap(), "copy 1");
    assert_eq!(std::fs::read_to_string(dir.path().join("report (2).pdf")).unwrap(), "copy 2");
}

#[tokio::test]
async fn separate_structure_creates_one_folder_per_descriptor() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let descriptors = vec![
        descriptor(format!("{}/a", server.uri()), "a.pdf", "ev-a"),
        descriptor(format!("{}/b", server.uri()), "b.pdf", "ev-b"),
    ];
    let mut opts = options(&dir, 2, 0);
    opts.structure = FolderStructure::Separate;
    opts.folder_prefix = Some("soc2".to_string());

    let sink = Arc::new(RecordingSink::<DownloadProgress>::new());
    let summary = downloader()
        .run(descriptors, &opts, sink, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.successes, 2);
    assert!(dir.path().join("soc2-001__ev-a").join("a.pdf").is_file());
    assert!(dir.path().join("soc2-002__ev-b").join("b.pdf").is_file());
}

#[tokio::test]
async fn invalid_url_fails_without_touching_the_network() {
    init_logging();
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(RecordingSink::<DownloadProgress>::new());

    let summary = downloader()
        .run(
            vec![descriptor("   ", "orphan.pdf", "ev")],
            &options(&dir, 1, 3),
            sink.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.failures, 1);
    assert_eq!(summary.failed[0].message, "Invalid or missing download URL");
    assert!(server.received_requests().await.unwrap().is_empty());
    let last = sink.events().pop().unwrap();
    assert_eq!(last.status, DownloadStatus::Failed);
    assert_eq!(last.error.as_deref(), Some("Invalid or missing download URL"));
}

#[tokio::test]
async fn redirect_loop_is_not_retried() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let summary = downloader()
        .run(
            vec![descriptor(format!("{}/loop", server.uri()), "loop.pdf", "ev")],
            &options(&dir, 1, 3),
            Arc::new(RecordingSink::<DownloadProgress>::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.failures, 1);
    assert_eq!(requests_for(&server, "/loop").await, 6);
}

#[tokio::test]
async fn cancellation_stops_in_flight_and_queued_downloads() {
    init_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let descriptors: Vec<_> = (0..3)
        .map(|i| descriptor(format!("{}/slow/{i}", server.uri()), &format!("slow-{i}.pdf"), "ev"))
        .collect();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let sink = Arc::new(RecordingSink::<DownloadProgress>::new());
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        downloader().run(descriptors, &options(&dir, 1, 3), sink.clone(), cancel),
    )
    .await
    .expect("cancellation should end the run promptly")
    .unwrap();

    assert_eq!(summary.cancelled, 3);
    assert_eq!(summary.successes, 0);
    let finals = last_status_by_index(&sink.events());
    assert!(finals.values().all(|s| *s == DownloadStatus::Cancelled));
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn empty_descriptor_list_is_rejected() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let err = downloader()
        .run(
            Vec::new(),
            &options(&dir, 1, 0),
            Arc::new(RecordingSink::<DownloadProgress>::new()),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::NoDescriptors));
}
