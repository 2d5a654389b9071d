//! Streaming download task
//!
//! Partial-delivery reads for range-oriented consumers. Two buffers are
//! in play: the transport owns its receive stream, and the reporter
//! owns an accumulation buffer behind a lock. A one-bit atomic flag
//! coalesces bursts of chunk arrivals into a single consumer wakeup, so
//! a slow consumer sees fewer, larger deliveries instead of one call
//! per network read.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::executor::{RequestExecutor, RequestParams};
use super::types::ByteRange;
use crate::error::{self, S3ErrorResponse};
use crate::sign::Method;

/// One delivery to the consumer.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// Accumulated bytes since the last wakeup. `has_more = false`
    /// marks the final, successful delivery.
    Chunk { data: Bytes, has_more: bool },
    /// Terminal failure; any buffered bytes were abandoned.
    Failure(S3ErrorResponse),
}

/// Context-erased consumer callback.
pub type DownloadReporter = Box<dyn FnMut(DownloadEvent) + Send + 'static>;

#[derive(Clone)]
enum Terminal {
    Done,
    Failed(S3ErrorResponse),
}

struct ReportState {
    buffer: Mutex<BytesMut>,
    scheduled: AtomicBool,
    notify: Notify,
    terminal: Mutex<Option<Terminal>>,
}

impl ReportState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(BytesMut::new()),
            scheduled: AtomicBool::new(false),
            notify: Notify::new(),
            terminal: Mutex::new(None),
        })
    }

    fn push(&self, data: &[u8]) {
        {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.extend_from_slice(data);
        }
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    fn end(&self, terminal: Terminal) {
        *self.terminal.lock().unwrap() = Some(terminal);
        self.notify.notify_one();
    }
}

/// Drive one streaming GET, delivering accumulated chunks to `reporter`
/// until the body ends or fails.
///
/// Success statuses are 200/204/206. On an error status the task keeps
/// reading until the body is complete so the XML error envelope can be
/// classified, then reports exactly one `Failure`.
pub async fn stream_download(
    executor: &RequestExecutor,
    path: &str,
    range: Option<ByteRange>,
    mut reporter: DownloadReporter,
) {
    let state = ReportState::new();

    let reporter_state = state.clone();
    let reporter_task = tokio::spawn(async move {
        loop {
            reporter_state.notify.notified().await;
            reporter_state.scheduled.store(false, Ordering::Release);

            let chunk = {
                let mut buffer = reporter_state.buffer.lock().unwrap();
                if buffer.is_empty() {
                    Bytes::new()
                } else {
                    buffer.split().freeze()
                }
            };

            let terminal = reporter_state.terminal.lock().unwrap().clone();
            match terminal {
                Some(Terminal::Done) => {
                    reporter(DownloadEvent::Chunk {
                        data: chunk,
                        has_more: false,
                    });
                    return;
                }
                Some(Terminal::Failed(err)) => {
                    reporter(DownloadEvent::Failure(err));
                    return;
                }
                None => {
                    if !chunk.is_empty() {
                        reporter(DownloadEvent::Chunk {
                            data: chunk,
                            has_more: true,
                        });
                    }
                }
            }
        }
    });

    let params = RequestParams {
        path,
        method: Some(Method::Get),
        range,
        ..Default::default()
    };

    match executor.send_streaming(params).await {
        Err(err) => state.end(Terminal::Failed(err)),
        Ok(mut response) => {
            let status = response.status.as_u16();
            if matches!(status, 200 | 204 | 206) {
                let mut failed = None;
                while let Some(chunk) = response.body.next().await {
                    match chunk {
                        Ok(data) => state.push(&data),
                        Err(e) => {
                            failed = Some(S3ErrorResponse::new(e.code(), e.to_string()));
                            break;
                        }
                    }
                }
                match failed {
                    Some(err) => state.end(Terminal::Failed(err)),
                    None => state.end(Terminal::Done),
                }
            } else {
                // Wait for the whole body before classifying
                let mut body = Vec::new();
                while let Some(chunk) = response.body.next().await {
                    match chunk {
                        Ok(data) => body.extend_from_slice(&data),
                        Err(_) => break,
                    }
                }
                state.end(Terminal::Failed(error::error_with_body(status, &body)));
            }
        }
    }

    let _ = reporter_task.await;
}
