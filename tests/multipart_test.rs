//! Multipart coordinator integration tests over the mock transport

mod common;

use common::{test_executor, MockResponse, MockTransport, RecordedRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use s3stream::multipart::{MultipartOptions, MultipartUpload, UploadOutcome, UploadRequest};

const MIB: usize = 1024 * 1024;

fn part_number(url: &str) -> u32 {
    url.split("partNumber=")
        .nth(1)
        .and_then(|rest| rest.split('&').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// Routes initiate / part / commit / abort requests like a healthy S3.
fn healthy_s3(request: &RecordedRequest) -> MockResponse {
    if request.url.contains("uploads=") {
        MockResponse::initiate_ok("upload-123")
    } else if request.url.contains("partNumber=") {
        let etag = format!("etag-{}", part_number(&request.url));
        MockResponse::ok().with_header("etag", format!("\"{etag}\""))
    } else if request.method == "POST" && request.url.contains("uploadId=") {
        MockResponse::ok().with_body(
            "<CompleteMultipartUploadResult><ETag>\"final\"</ETag>\
             </CompleteMultipartUploadResult>",
        )
    } else {
        MockResponse::ok()
    }
}

fn options(queue_size: usize, retry: u8) -> MultipartOptions {
    MultipartOptions {
        queue_size,
        part_size: 5 * MIB,
        retry,
    }
}

fn start_upload(
    executor: s3stream::RequestExecutor,
    path: &str,
    options: MultipartOptions,
) -> (
    Arc<MultipartUpload>,
    tokio::sync::oneshot::Receiver<UploadOutcome>,
    Arc<AtomicUsize>,
) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_callback = calls.clone();
    let upload = MultipartUpload::start(
        executor,
        UploadRequest {
            path: path.to_string(),
            content_type: Some("application/octet-stream".to_string()),
            ..Default::default()
        },
        options,
        Box::new(move |outcome| {
            calls_in_callback.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(outcome);
        }),
    );
    (upload, rx, calls)
}

#[tokio::test]
async fn test_multipart_happy_path() {
    let transport = MockTransport::new(healthy_s3);
    let executor = test_executor(transport.clone());
    let (upload, rx, calls) = start_upload(executor, "big.bin", options(3, 3));

    let data = vec![0xA5u8; 17 * MIB];
    for chunk in data.chunks(MIB) {
        upload.write(chunk).await.unwrap();
    }
    upload.end();

    match rx.await.unwrap() {
        UploadOutcome::Success => {}
        UploadOutcome::Failure(err) => panic!("upload failed: {err}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // One initiate with the configured content type
    let initiates = transport.requests_matching("uploads=");
    assert_eq!(initiates.len(), 1);
    assert_eq!(initiates[0].method, "POST");
    assert_eq!(
        initiates[0].header("Content-Type"),
        Some("application/octet-stream")
    );

    // Four parts: 5/5/5/2 MiB, numbered 1..=4 without gaps
    let parts = transport.requests_matching("partNumber=");
    assert_eq!(parts.len(), 4);
    let mut sizes: Vec<(u32, usize)> = parts
        .iter()
        .map(|r| (part_number(&r.url), r.body.len()))
        .collect();
    sizes.sort_unstable();
    assert_eq!(
        sizes,
        vec![(1, 5 * MIB), (2, 5 * MIB), (3, 5 * MIB), (4, 2 * MIB)]
    );

    // The parts reassemble into the original payload
    let mut ordered = parts.clone();
    ordered.sort_by_key(|r| part_number(&r.url));
    let reassembled: Vec<u8> = ordered.iter().flat_map(|r| r.body.to_vec()).collect();
    assert_eq!(reassembled, data);

    // The in-flight pipeline never exceeded the slot pool
    assert!(transport.max_in_flight.load(Ordering::SeqCst) <= 3);

    // One commit listing parts 1..=4 ascending, no extra whitespace
    let commits: Vec<RecordedRequest> = transport
        .recorded()
        .into_iter()
        .filter(|r| r.method == "POST" && r.url.contains("uploadId=") && !r.url.contains("partNumber="))
        .collect();
    assert_eq!(commits.len(), 1);
    assert!(commits[0].url.contains("uploadId=upload-123"));
    let expected = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
        <Part><PartNumber>1</PartNumber><ETag>etag-1</ETag></Part>\
        <Part><PartNumber>2</PartNumber><ETag>etag-2</ETag></Part>\
        <Part><PartNumber>3</PartNumber><ETag>etag-3</ETag></Part>\
        <Part><PartNumber>4</PartNumber><ETag>etag-4</ETag></Part>\
        </CompleteMultipartUpload>";
    assert_eq!(&commits[0].body[..], expected.as_bytes());
}

#[tokio::test]
async fn test_small_payload_takes_single_put() {
    let transport = MockTransport::new(healthy_s3);
    let executor = test_executor(transport.clone());
    let (upload, rx, _) = start_upload(executor, "small.bin", options(3, 3));

    // One byte short of a part at EOF
    let data = vec![0x11u8; 5 * MIB - 1];
    upload.write(&data).await.unwrap();
    upload.end();

    assert!(matches!(rx.await.unwrap(), UploadOutcome::Success));

    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].method, "PUT");
    assert!(!recorded[0].url.contains('?'));
    assert_eq!(recorded[0].body.len(), 5 * MIB - 1);
    assert!(transport.requests_matching("uploads=").is_empty());
}

#[tokio::test]
async fn test_exact_part_size_uses_multipart() {
    let transport = MockTransport::new(healthy_s3);
    let executor = test_executor(transport.clone());
    let (upload, rx, _) = start_upload(executor, "exact.bin", options(3, 3));

    let data = vec![0x22u8; 5 * MIB];
    upload.write(&data).await.unwrap();
    upload.end();

    assert!(matches!(rx.await.unwrap(), UploadOutcome::Success));

    assert_eq!(transport.requests_matching("uploads=").len(), 1);
    let parts = transport.requests_matching("partNumber=");
    assert_eq!(parts.len(), 1);
    assert_eq!(part_number(&parts[0].url), 1);
    assert_eq!(parts[0].body.len(), 5 * MIB);
}

#[tokio::test]
async fn test_queue_size_one_serializes_parts() {
    let transport = MockTransport::with_delay(healthy_s3, "partNumber=", 10);
    let executor = test_executor(transport.clone());
    let (upload, rx, _) = start_upload(executor, "serial.bin", options(1, 3));

    let data = vec![0x33u8; 12 * MIB];
    for chunk in data.chunks(MIB) {
        upload.write(chunk).await.unwrap();
    }
    upload.end();

    assert!(matches!(rx.await.unwrap(), UploadOutcome::Success));
    assert_eq!(transport.requests_matching("partNumber=").len(), 3);
    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_part_failure_rolls_back() {
    let transport = MockTransport::new(|request: &RecordedRequest| {
        if request.url.contains("uploads=") {
            MockResponse::initiate_ok("upload-rollback")
        } else if request.url.contains("partNumber=2") {
            MockResponse::error(500, "InternalError", "injected part failure")
        } else if request.url.contains("partNumber=") {
            let etag = format!("etag-{}", part_number(&request.url));
            MockResponse::ok().with_header("etag", etag)
        } else {
            MockResponse::ok()
        }
    });
    let executor = test_executor(transport.clone());
    let (upload, rx, calls) = start_upload(executor, "doomed.bin", options(3, 0));

    let data = vec![0x44u8; 17 * MIB];
    for chunk in data.chunks(MIB) {
        if upload.write(chunk).await.is_err() {
            break;
        }
    }
    upload.end();

    match rx.await.unwrap() {
        UploadOutcome::Failure(err) => {
            assert_eq!(err.code, "InternalError");
            assert_eq!(err.message, "injected part failure");
        }
        UploadOutcome::Success => panic!("expected failure"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Rollback: a DELETE with the upload id eventually goes out
    let mut aborted = false;
    for _ in 0..100 {
        let deletes: Vec<RecordedRequest> = transport
            .recorded()
            .into_iter()
            .filter(|r| r.method == "DELETE" && r.url.contains("uploadId=upload-rollback"))
            .collect();
        if !deletes.is_empty() {
            aborted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(aborted, "abort DELETE was never issued");
}

#[tokio::test]
async fn test_part_retry_consumes_budget_then_succeeds() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_in_handler = attempts.clone();
    let transport = MockTransport::new(move |request: &RecordedRequest| {
        if request.url.contains("uploads=") {
            MockResponse::initiate_ok("upload-retry")
        } else if request.url.contains("partNumber=1") {
            let attempt = attempts_in_handler.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                MockResponse::error(503, "SlowDown", "Please reduce your request rate.")
            } else {
                MockResponse::ok().with_header("etag", "etag-1")
            }
        } else if request.url.contains("partNumber=") {
            let etag = format!("etag-{}", part_number(&request.url));
            MockResponse::ok().with_header("etag", etag)
        } else {
            MockResponse::ok()
        }
    });
    let executor = test_executor(transport.clone());
    let (upload, rx, _) = start_upload(executor, "flaky.bin", options(2, 3));

    let data = vec![0x55u8; 10 * MIB];
    upload.write(&data).await.unwrap();
    upload.end();

    assert!(matches!(rx.await.unwrap(), UploadOutcome::Success));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_missing_upload_id_fails_initiate() {
    let transport = MockTransport::new(|request: &RecordedRequest| {
        if request.url.contains("uploads=") {
            // 200 but no UploadId element
            MockResponse::ok().with_body(
                "<InitiateMultipartUploadResult><Bucket>testbucket</Bucket>\
                 </InitiateMultipartUploadResult>",
            )
        } else {
            MockResponse::ok()
        }
    });
    let executor = test_executor(transport.clone());
    let (upload, rx, _) = start_upload(executor, "noinit.bin", options(3, 3));

    let data = vec![0x66u8; 6 * MIB];
    upload.write(&data).await.unwrap();
    upload.end();

    match rx.await.unwrap() {
        UploadOutcome::Failure(err) => {
            assert_eq!(err.message, "Failed to initiate multipart upload");
        }
        UploadOutcome::Success => panic!("expected failure"),
    }
}

#[tokio::test]
async fn test_stream_check_latch() {
    let transport = MockTransport::new(healthy_s3);
    let executor = test_executor(transport.clone());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let upload = MultipartUpload::start(
        executor,
        UploadRequest {
            path: "latched.bin".to_string(),
            wait_stream_check: true,
            ..Default::default()
        },
        options(2, 3),
        Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
    );

    // EOF before any byte: the source does not exist
    upload.end();
    match rx.await.unwrap() {
        UploadOutcome::Failure(_) => {}
        UploadOutcome::Success => panic!("expected failure for empty latched stream"),
    }
    assert!(transport.recorded().is_empty());
}

#[tokio::test]
async fn test_continue_stream_releases_latch() {
    let transport = MockTransport::new(healthy_s3);
    let executor = test_executor(transport.clone());
    let (tx, rx) = tokio::sync::oneshot::channel();
    let upload = MultipartUpload::start(
        executor,
        UploadRequest {
            path: "released.bin".to_string(),
            wait_stream_check: true,
            ..Default::default()
        },
        options(2, 3),
        Box::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
    );

    upload.continue_stream();
    upload.write(&vec![0x77u8; MIB]).await.unwrap();
    upload.end();

    assert!(matches!(rx.await.unwrap(), UploadOutcome::Success));
    let recorded = transport.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].method, "PUT");
}
