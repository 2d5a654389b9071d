//! Multipart upload coordinator
//!
//! Drives an arbitrarily large byte stream through S3's
//! Initiate → UploadPart* → Complete (or Abort) sequence with a bounded
//! number of concurrent part uploads. The slot pool is a 64-bit mask:
//! finding a clear bit below `queue_size` admits a part, and a full mask
//! at EOF means the pipeline has drained. When no slot is free the
//! producer is told to pause; bytes already handed over stay buffered.
//!
//! A payload that ends before reaching one part size never touches the
//! multipart protocol at all; it goes up as a single PUT.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::fmt::Write as FmtWrite;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::client::executor::RequestExecutor;
use crate::client::types::{CommitResult, DeleteResult, PartResult, UploadResult};
use crate::credentials::Acl;
use crate::error::{S3Error, S3ErrorResponse};

/// Hard ceiling on concurrent part slots; the slot pool is one u64.
pub const MAX_QUEUE_SIZE: usize = 64;
/// S3 part numbers run 1..=10000.
pub const MAX_PART_NUMBER: u16 = 10_000;
pub const MIN_PART_SIZE_MIB: u64 = 5;
pub const MAX_PART_SIZE_MIB: u64 = 5120;
/// Largest payload accepted on the single-PUT path.
pub const MAX_SINGLE_UPLOAD_SIZE: u64 = MAX_PART_SIZE_MIB * 1024 * 1024;

const MIB: usize = 1024 * 1024;

/// Tuning for one upload.
#[derive(Debug, Clone, Copy)]
pub struct MultipartOptions {
    /// Concurrent part slots, 1..=64
    pub queue_size: usize,
    /// Part size in bytes
    pub part_size: usize,
    /// Retry budget per part / commit / abort
    pub retry: u8,
}

impl Default for MultipartOptions {
    fn default() -> Self {
        Self {
            queue_size: 4,
            part_size: 5 * MIB,
            retry: 3,
        }
    }
}

impl MultipartOptions {
    /// Validate raw configuration values.
    ///
    /// `page_size` is in MiB and must land in `[5, 5120]`; `queue_size`
    /// is capped at 255 and then at the 64-slot pool; `retry` must land
    /// in `[0, 255]`.
    pub fn from_raw(page_size: i64, queue_size: i64, retry: i64) -> Result<Self, S3Error> {
        if page_size < MIN_PART_SIZE_MIB as i64 || page_size > MAX_PART_SIZE_MIB as i64 {
            return Err(S3Error::InvalidOption(format!(
                "pageSize must be between {MIN_PART_SIZE_MIB} and {MAX_PART_SIZE_MIB} MiB, got {page_size}"
            )));
        }
        if queue_size < 1 {
            return Err(S3Error::InvalidOption(format!(
                "queueSize must be at least 1, got {queue_size}"
            )));
        }
        if !(0..=255).contains(&retry) {
            return Err(S3Error::InvalidOption(format!(
                "retry must be between 0 and 255, got {retry}"
            )));
        }
        let queue_size = queue_size.min(255).min(MAX_QUEUE_SIZE as i64) as usize;
        Ok(Self {
            queue_size,
            part_size: page_size as usize * MIB,
            retry: retry as u8,
        })
    }
}

/// Final word on one upload, delivered to the user callback exactly once.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Success,
    Failure(S3ErrorResponse),
}

/// Context-erased completion callback.
pub type UploadCallback = Box<dyn FnOnce(UploadOutcome) + Send + 'static>;

/// What to upload and how to tag it.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub acl: Option<Acl>,
    pub proxy: Option<String>,
    /// Start latched until `continue_stream`, for producers that may
    /// discover their source is invalid before emitting a byte
    pub wait_stream_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Latched; nothing dispatches until the producer vouches for its source
    AwaitingSource,
    /// Accumulating bytes, no network traffic yet
    Buffering,
    /// Whole payload fit one PUT
    SingleShot,
    /// Initiate request in flight; sliced parts queue up pending
    Initiating,
    /// Upload id known, parts flowing
    Streaming,
    /// Callback fired; absorb any stragglers
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartState {
    Pending,
    Started,
    Completed,
    Canceled,
}

struct Part {
    data: Bytes,
    part_number: u16,
    retry_remaining: u8,
    slot: usize,
    state: PartState,
}

struct CoordState {
    state: State,
    upload_id: String,
    next_part_number: u16,
    buffered: BytesMut,
    /// Parts sliced before the upload id arrived
    pending: VecDeque<Part>,
    /// Set bits are free slots in `[0, queue_size)`
    available_mask: u64,
    /// Parts holding a slot (pending or started)
    in_flight: usize,
    etags: Vec<(u16, String)>,
    ended: bool,
    commit_started: bool,
    callback: Option<UploadCallback>,
    failure: Option<S3ErrorResponse>,
}

fn full_mask(queue_size: usize) -> u64 {
    if queue_size >= 64 {
        u64::MAX
    } else {
        (1u64 << queue_size) - 1
    }
}

fn find_free_slot(mask: u64, queue_size: usize) -> Option<usize> {
    let bounded = mask & full_mask(queue_size);
    if bounded == 0 {
        None
    } else {
        Some(bounded.trailing_zeros() as usize)
    }
}

/// Coordinator for one logical upload.
///
/// Shared as `Arc`: each spawned part task, the initiate/commit/abort
/// tasks, and the external producer all hold strong references.
pub struct MultipartUpload {
    executor: RequestExecutor,
    path: String,
    content_type: Option<String>,
    acl: Option<Acl>,
    options: MultipartOptions,
    coord: Mutex<CoordState>,
    /// Woken whenever a slot frees or the upload reaches a terminal state
    producer_gate: Notify,
}

impl MultipartUpload {
    /// Create a coordinator. Nothing is sent until data arrives.
    pub fn start(
        executor: RequestExecutor,
        request: UploadRequest,
        options: MultipartOptions,
        callback: UploadCallback,
    ) -> Arc<Self> {
        let state = if request.wait_stream_check {
            State::AwaitingSource
        } else {
            State::Buffering
        };
        Arc::new(Self {
            executor: executor.with_proxy(request.proxy),
            path: request.path,
            content_type: request.content_type,
            acl: request.acl,
            options,
            coord: Mutex::new(CoordState {
                state,
                upload_id: String::new(),
                next_part_number: 1,
                buffered: BytesMut::new(),
                pending: VecDeque::new(),
                available_mask: full_mask(options.queue_size),
                in_flight: 0,
                etags: Vec::new(),
                ended: false,
                commit_started: false,
                callback: Some(callback),
                failure: None,
            }),
            producer_gate: Notify::new(),
        })
    }

    /// Release the stream-check latch: the producer has confirmed its
    /// source exists and buffered bytes may start flowing.
    pub fn continue_stream(self: &Arc<Self>) {
        let mut st = self.coord.lock().unwrap();
        if st.state != State::AwaitingSource {
            return;
        }
        st.state = State::Buffering;
        self.pump(&mut st);
    }

    /// Push bytes (and optionally EOF) into the pipeline.
    ///
    /// The bytes are always accepted; the return value is backpressure:
    /// `false` asks the producer to pause until a slot frees.
    pub fn send_request_data(self: &Arc<Self>, chunk: &[u8], is_last: bool) -> bool {
        let mut st = self.coord.lock().unwrap();
        if st.state == State::Finished {
            return true;
        }
        if !chunk.is_empty() {
            st.buffered.extend_from_slice(chunk);
        }
        if is_last {
            st.ended = true;
        }
        if st.state == State::AwaitingSource {
            if chunk.is_empty() && is_last {
                // The producer's source turned out not to exist
                self.fail_locked(
                    st,
                    S3ErrorResponse::new("UnknownError", "source stream ended before any data"),
                );
                return true;
            }
            if !is_last && chunk.is_empty() {
                return true;
            }
            st.state = State::Buffering;
        }
        self.pump(&mut st)
    }

    /// Push a chunk, waiting out backpressure. Fails fast once the
    /// upload has already failed.
    pub async fn write(self: &Arc<Self>, chunk: &[u8]) -> Result<(), S3ErrorResponse> {
        {
            let st = self.coord.lock().unwrap();
            if let Some(err) = &st.failure {
                return Err(err.clone());
            }
        }
        if self.send_request_data(chunk, false) {
            return Ok(());
        }
        loop {
            let notified = self.producer_gate.notified();
            {
                let st = self.coord.lock().unwrap();
                if let Some(err) = &st.failure {
                    return Err(err.clone());
                }
                if st.state == State::Finished
                    || find_free_slot(st.available_mask, self.options.queue_size).is_some()
                {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Signal EOF.
    pub fn end(self: &Arc<Self>) {
        let _ = self.send_request_data(&[], true);
    }

    fn is_finished(&self) -> bool {
        self.coord.lock().unwrap().state == State::Finished
    }

    /// Slice buffered bytes into parts while slots are free, decide the
    /// single-PUT path at EOF, and kick off commit when drained.
    ///
    /// The only re-entry point after suspension: called from the
    /// producer, from initiate completion, and from each part completion.
    /// Returns `false` when a remainder stayed buffered for lack of a
    /// slot (backpressure).
    fn pump(self: &Arc<Self>, st: &mut CoordState) -> bool {
        if matches!(
            st.state,
            State::AwaitingSource | State::SingleShot | State::Finished
        ) {
            return true;
        }

        if st.ended && st.state == State::Buffering && st.buffered.len() < self.options.part_size
        {
            st.state = State::SingleShot;
            let body = st.buffered.split().freeze();
            debug!(bytes = body.len(), path = %self.path, "uploading in one request");
            self.spawn_single_shot(body);
            return true;
        }

        loop {
            let available = st.buffered.len();
            let take = if available >= self.options.part_size {
                self.options.part_size
            } else if st.ended && available > 0 && st.state != State::Buffering {
                // tail part, only once the multipart path is committed to
                available
            } else {
                break;
            };

            let Some(slot) = find_free_slot(st.available_mask, self.options.queue_size) else {
                return false;
            };
            if st.next_part_number > MAX_PART_NUMBER {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.on_upload_failed(S3ErrorResponse::new(
                        "TooManyParts",
                        "upload would exceed 10000 parts; increase the part size",
                    ));
                });
                return true;
            }

            st.available_mask &= !(1u64 << slot);
            st.in_flight += 1;
            let part = Part {
                data: st.buffered.split_to(take).freeze(),
                part_number: st.next_part_number,
                retry_remaining: self.options.retry,
                slot,
                state: PartState::Pending,
            };
            st.next_part_number += 1;

            match st.state {
                State::Buffering => {
                    st.pending.push_back(part);
                    st.state = State::Initiating;
                    debug!(path = %self.path, "initiating multipart upload");
                    self.spawn_initiate();
                }
                State::Initiating => st.pending.push_back(part),
                _ => self.dispatch_part(st, part),
            }
        }

        self.maybe_commit(st);
        true
    }

    fn dispatch_part(self: &Arc<Self>, st: &mut CoordState, mut part: Part) {
        debug_assert_eq!(part.state, PartState::Pending);
        part.state = PartState::Started;
        let upload_id = st.upload_id.clone();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_part(upload_id, part).await;
        });
    }

    async fn run_part(self: Arc<Self>, upload_id: String, mut part: Part) {
        loop {
            if self.is_finished() {
                debug!(part = part.part_number, "dropping part, upload already finished");
                return;
            }
            let result = self
                .executor
                .upload_part(&self.path, &upload_id, part.part_number, part.data.clone())
                .await;
            match result {
                PartResult::Success { etag } => {
                    part.state = PartState::Completed;
                    self.on_part_complete(part.part_number, part.slot, etag);
                    return;
                }
                PartResult::Failure(err) => {
                    if part.retry_remaining > 0 {
                        part.retry_remaining -= 1;
                        warn!(
                            part = part.part_number,
                            remaining = part.retry_remaining,
                            error = %err,
                            "part upload failed, retrying"
                        );
                        continue;
                    }
                    self.on_upload_failed(err);
                    return;
                }
            }
        }
    }

    fn on_part_complete(self: &Arc<Self>, part_number: u16, slot: usize, etag: String) {
        let mut st = self.coord.lock().unwrap();
        if st.state == State::Finished {
            return;
        }
        debug!(part = part_number, slot, "part completed");
        st.etags.push((part_number, etag));
        st.available_mask |= 1u64 << slot;
        st.in_flight -= 1;
        let _ = self.pump(&mut st);
        drop(st);
        self.producer_gate.notify_waiters();
    }

    fn maybe_commit(self: &Arc<Self>, st: &mut CoordState) {
        if st.state != State::Streaming
            || st.commit_started
            || !st.ended
            || !st.buffered.is_empty()
            || !st.pending.is_empty()
            || st.in_flight != 0
        {
            return;
        }
        st.commit_started = true;
        st.etags.sort_by_key(|(number, _)| *number);
        let body = build_commit_body(&st.etags);
        let upload_id = st.upload_id.clone();
        debug!(parts = st.etags.len(), upload_id = %upload_id, "committing multipart upload");
        let this = Arc::clone(self);
        let retry = self.options.retry;
        tokio::spawn(async move {
            this.run_commit(upload_id, body, retry).await;
        });
    }

    async fn run_commit(self: Arc<Self>, upload_id: String, body: Bytes, mut retry: u8) {
        loop {
            match self
                .executor
                .commit_multipart(&self.path, &upload_id, body.clone())
                .await
            {
                CommitResult::Success => {
                    self.finish(UploadOutcome::Success);
                    return;
                }
                CommitResult::Failure(err) => {
                    if retry > 0 {
                        retry -= 1;
                        warn!(remaining = retry, error = %err, "commit failed, retrying");
                        continue;
                    }
                    self.on_upload_failed(err);
                    return;
                }
            }
        }
    }

    fn spawn_initiate(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this
                .executor
                .initiate_multipart(&this.path, this.content_type.as_deref(), this.acl)
                .await;
            match result {
                Ok(upload_id) => this.on_initiated(upload_id),
                Err(err) => this.on_upload_failed(err),
            }
        });
    }

    fn on_initiated(self: &Arc<Self>, upload_id: String) {
        let mut st = self.coord.lock().unwrap();
        if st.state == State::Finished {
            return;
        }
        debug!(upload_id = %upload_id, "multipart upload initiated");
        st.upload_id = upload_id;
        st.state = State::Streaming;
        while let Some(part) = st.pending.pop_front() {
            self.dispatch_part(&mut st, part);
        }
        let _ = self.pump(&mut st);
        drop(st);
        self.producer_gate.notify_waiters();
    }

    fn spawn_single_shot(self: &Arc<Self>, body: Bytes) {
        let this = Arc::clone(self);
        let mut retry = self.options.retry;
        tokio::spawn(async move {
            loop {
                let result = this
                    .executor
                    .upload(
                        &this.path,
                        body.clone(),
                        this.content_type.as_deref(),
                        this.acl,
                    )
                    .await;
                match result {
                    UploadResult::Success => {
                        this.finish(UploadOutcome::Success);
                        return;
                    }
                    UploadResult::Failure(err) => {
                        if retry > 0 {
                            retry -= 1;
                            warn!(remaining = retry, error = %err, "upload failed, retrying");
                            continue;
                        }
                        this.on_upload_failed(err);
                        return;
                    }
                }
            }
        });
    }

    fn on_upload_failed(self: &Arc<Self>, err: S3ErrorResponse) {
        let st = self.coord.lock().unwrap();
        if st.state == State::Finished {
            return;
        }
        self.fail_locked(st, err);
    }

    /// Terminal failure path: cancel pending parts, fire the callback,
    /// and roll back the remote upload if one was started.
    fn fail_locked(
        self: &Arc<Self>,
        mut st: std::sync::MutexGuard<'_, CoordState>,
        err: S3ErrorResponse,
    ) {
        for part in st.pending.iter_mut() {
            part.state = PartState::Canceled;
        }
        let canceled = st.pending.len();
        st.pending.clear();
        st.buffered.clear();
        st.ended = true;
        st.failure = Some(err.clone());
        let upload_id = std::mem::take(&mut st.upload_id);
        let callback = st.callback.take();
        st.state = State::Finished;
        drop(st);

        if canceled > 0 {
            debug!(canceled, "canceled pending parts");
        }
        warn!(path = %self.path, error = %err, "upload failed");
        if let Some(callback) = callback {
            callback(UploadOutcome::Failure(err));
        }
        self.producer_gate.notify_waiters();

        if !upload_id.is_empty() {
            let this = Arc::clone(self);
            let retry = self.options.retry;
            tokio::spawn(async move {
                this.run_abort(upload_id, retry).await;
            });
        }
    }

    async fn run_abort(self: Arc<Self>, upload_id: String, mut retry: u8) {
        loop {
            match self.executor.abort_multipart(&self.path, &upload_id).await {
                DeleteResult::Success | DeleteResult::NotFound(_) => {
                    debug!(upload_id = %upload_id, "multipart upload aborted");
                    return;
                }
                DeleteResult::Failure(err) => {
                    if retry > 0 {
                        retry -= 1;
                        continue;
                    }
                    warn!(upload_id = %upload_id, error = %err, "failed to abort multipart upload");
                    return;
                }
            }
        }
    }

    fn finish(self: &Arc<Self>, outcome: UploadOutcome) {
        let mut st = self.coord.lock().unwrap();
        if st.state == State::Finished {
            return;
        }
        st.state = State::Finished;
        let callback = st.callback.take();
        drop(st);
        if let Some(callback) = callback {
            callback(outcome);
        }
        self.producer_gate.notify_waiters();
    }
}

/// Render the CompleteMultipartUpload body: parts ascending, no
/// whitespace between elements.
fn build_commit_body(etags: &[(u16, String)]) -> Bytes {
    let mut xml = String::with_capacity(etags.len() * 96 + 128);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str("<CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">");
    for (number, etag) in etags {
        let _ = write!(
            xml,
            "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
            number, etag
        );
    }
    xml.push_str("</CompleteMultipartUpload>");
    Bytes::from(xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        let options = MultipartOptions::from_raw(5, 3, 3).unwrap();
        assert_eq!(options.part_size, 5 * MIB);
        assert_eq!(options.queue_size, 3);
        assert_eq!(options.retry, 3);

        // page size outside [5, 5120]
        assert!(MultipartOptions::from_raw(4, 3, 3).is_err());
        assert!(MultipartOptions::from_raw(5121, 3, 3).is_err());
        assert!(MultipartOptions::from_raw(5, 3, -1).is_err());
        assert!(MultipartOptions::from_raw(5, 3, 256).is_err());
        assert!(MultipartOptions::from_raw(5, 0, 3).is_err());

        // queue size caps at the 64-slot pool
        let capped = MultipartOptions::from_raw(5, 1000, 0).unwrap();
        assert_eq!(capped.queue_size, MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_slot_mask() {
        assert_eq!(full_mask(1), 0b1);
        assert_eq!(full_mask(3), 0b111);
        assert_eq!(full_mask(64), u64::MAX);

        assert_eq!(find_free_slot(0b111, 3), Some(0));
        assert_eq!(find_free_slot(0b110, 3), Some(1));
        assert_eq!(find_free_slot(0b100, 3), Some(2));
        assert_eq!(find_free_slot(0, 3), None);
        // bits above queue_size never count
        assert_eq!(find_free_slot(0b1000, 3), None);
    }

    #[test]
    fn test_commit_body_format() {
        let etags = vec![
            (1u16, "etag-one".to_string()),
            (2u16, "etag-two".to_string()),
        ];
        let body = build_commit_body(&etags);
        assert_eq!(
            &body[..],
            b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
              <CompleteMultipartUpload xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
              <Part><PartNumber>1</PartNumber><ETag>etag-one</ETag></Part>\
              <Part><PartNumber>2</PartNumber><ETag>etag-two</ETag></Part>\
              </CompleteMultipartUpload>" as &[u8]
        );
    }
}
