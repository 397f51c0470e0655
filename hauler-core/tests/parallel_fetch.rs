//! Ranged fetches against a local range server: merge, failure cleanup and
//! cancellation.

mod common;

use std::time::{Duration, Instant};

use common::range_server::{self, RangeServerOptions};
use hauler_core::{
    event, spawn_observer, CancellationToken, Delivered, EngineConfig, HaulerError,
    TransferEvent, TransferOutcome,
};
use tempfile::tempdir;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn parallel_and_sequential_fetches_are_byte_identical() {
    let body = common::body(1000);
    let url = range_server::start(body.clone());
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());
    let cancel = CancellationToken::new();

    let sequential = downloader
        .fetch_to_file(&url, Some("seq.bin"), None, &cancel, None)
        .await
        .unwrap()
        .completed()
        .expect("sequential completed");
    let parallel = downloader
        .fetch_parallel(&url, Some("par.bin"), None, Some(4), &cancel, None)
        .await
        .unwrap()
        .completed()
        .expect("parallel completed");

    assert_eq!(parallel.worker_count, 4);
    assert_eq!(parallel.size_bytes, 1000);
    assert!(parallel.metric.is_complete());
    assert_eq!(parallel.output, Delivered::File(dir.path().join("par.bin")));

    let seq = std::fs::read(sequential.output.path().unwrap()).unwrap();
    let par = std::fs::read(parallel.output.path().unwrap()).unwrap();
    assert_eq!(seq, body);
    assert_eq!(par, seq);
    assert_eq!(common::listing(dir.path()), vec!["par.bin", "seq.bin"]);
}

#[tokio::test]
async fn every_worker_reports_its_own_range() {
    let url = format!("{}data.bin", range_server::start(common::body(1003)));
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());

    let (tx, rx) = event::channel();
    let observer = tokio::spawn(async move {
        let mut rx = rx;
        let mut finished = Vec::new();
        while let Some(event) = rx.recv().await {
            if let TransferEvent::WorkerCompleted { worker, metric } = event {
                finished.push((worker, metric.bytes_transferred()));
            }
        }
        finished.sort();
        finished
    });

    downloader
        .fetch_parallel(&url, None, None, Some(4), &CancellationToken::new(), Some(&tx))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(
        observer.await.unwrap(),
        vec![(0, 250), (1, 250), (2, 250), (3, 253)]
    );
}

#[tokio::test]
async fn more_threads_than_bytes_caps_workers() {
    let body = common::body(3);
    let url = format!("{}tiny.bin", range_server::start(body.clone()));
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());

    let result = downloader
        .fetch_parallel(&url, None, None, Some(8), &CancellationToken::new(), None)
        .await
        .unwrap()
        .completed()
        .expect("completed");

    assert_eq!(result.worker_count, 3);
    assert_eq!(std::fs::read(dir.path().join("tiny.bin")).unwrap(), body);
}

#[tokio::test]
async fn unknown_length_fails_before_any_worker() {
    let opts = RangeServerOptions {
        report_length: false,
        ..RangeServerOptions::default()
    };
    let url = format!(
        "{}stream.bin",
        range_server::start_with_options(common::body(1000), opts)
    );
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());

    let err = downloader
        .fetch_parallel(&url, None, None, Some(4), &CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, HaulerError::LengthUnknown { .. }));
    assert!(common::listing(dir.path()).is_empty());
}

#[tokio::test]
async fn failed_range_removes_every_part() {
    let opts = RangeServerOptions {
        fail_ranges_from: Some(500),
        ..RangeServerOptions::default()
    };
    let url = format!(
        "{}data.bin",
        range_server::start_with_options(common::body(1000), opts)
    );
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());

    let err = downloader
        .fetch_parallel(&url, None, None, Some(4), &CancellationToken::new(), None)
        .await
        .unwrap_err();

    match err {
        HaulerError::Transport { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(common::listing(dir.path()).is_empty());
}

#[tokio::test]
async fn failed_range_cancels_slow_siblings() {
    let opts = RangeServerOptions {
        fail_ranges_from: Some(76_800),
        throttle: Some(Duration::from_millis(20)),
        ..RangeServerOptions::default()
    };
    let url = format!(
        "{}slow.bin",
        range_server::start_with_options(common::body(102_400), opts)
    );
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());

    // Each healthy range is 100 throttled pieces, about two seconds on the wire.
    let started = Instant::now();
    let err = downloader
        .fetch_parallel(&url, None, None, Some(4), &CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, HaulerError::Transport { status: 500, .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(common::listing(dir.path()).is_empty());
}

#[tokio::test]
async fn cancel_during_slow_size_check_returns_promptly() {
    let mock_server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(6)))
        .mount(&mock_server)
        .await;
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());
    let url = format!("{}/slow.iso", mock_server.uri());
    let cancel = CancellationToken::new();

    let trip = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trip.cancel();
    });

    let started = Instant::now();
    let outcome = downloader
        .fetch_parallel(&url, None, None, Some(4), &cancel, None)
        .await
        .unwrap();

    assert!(matches!(outcome, TransferOutcome::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(common::listing(dir.path()).is_empty());
}

#[tokio::test]
async fn server_without_ranges_is_rejected() {
    let opts = RangeServerOptions {
        support_ranges: false,
        ..RangeServerOptions::default()
    };
    let url = format!(
        "{}data.bin",
        range_server::start_with_options(common::body(1000), opts)
    );
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());

    let err = downloader
        .fetch_parallel(&url, None, None, Some(2), &CancellationToken::new(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, HaulerError::RangeNotSupported { .. }));
    assert!(common::listing(dir.path()).is_empty());
}

#[tokio::test]
async fn single_range_accepts_full_response() {
    let body = common::body(1000);
    let opts = RangeServerOptions {
        support_ranges: false,
        ..RangeServerOptions::default()
    };
    let url = format!("{}whole.bin", range_server::start_with_options(body.clone(), opts));
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());

    let result = downloader
        .fetch_parallel(&url, None, None, Some(1), &CancellationToken::new(), None)
        .await
        .unwrap()
        .completed()
        .expect("completed");

    assert_eq!(result.worker_count, 1);
    assert_eq!(std::fs::read(dir.path().join("whole.bin")).unwrap(), body);
}

#[tokio::test]
async fn parallel_clamps_to_ceiling() {
    let body = common::body(4000);
    let url = format!("{}big.bin", range_server::start(body.clone()));
    let dir = tempdir().unwrap();
    let config = EngineConfig {
        max_download_size: 1000,
        ..EngineConfig::default()
    };
    let downloader = common::downloader(dir.path(), config);

    let result = downloader
        .fetch_parallel(&url, None, None, Some(4), &CancellationToken::new(), None)
        .await
        .unwrap()
        .completed()
        .expect("completed");

    assert_eq!(result.size_bytes, 1000);
    assert!(result.was_clamped());
    assert_eq!(
        std::fs::read(dir.path().join("big.bin")).unwrap(),
        &body[..1000]
    );
}

#[tokio::test]
async fn cancel_stops_workers_and_removes_parts() {
    let opts = RangeServerOptions {
        throttle: Some(Duration::from_millis(20)),
        ..RangeServerOptions::default()
    };
    let url = format!(
        "{}slow.bin",
        range_server::start_with_options(common::body(8192), opts)
    );
    let dir = tempdir().unwrap();
    let downloader = common::downloader(dir.path(), EngineConfig::default());
    let cancel = CancellationToken::new();

    let (tx, rx) = event::channel();
    let trip = cancel.clone();
    let observer = spawn_observer(rx, move |event| {
        if let TransferEvent::Progress { .. } = event {
            trip.cancel();
        }
    });

    let outcome = downloader
        .fetch_parallel(&url, None, None, Some(4), &cancel, Some(&tx))
        .await
        .unwrap();
    drop(tx);
    observer.await.unwrap();

    assert!(matches!(outcome, TransferOutcome::Cancelled));
    assert!(common::listing(dir.path()).is_empty());
}
