//! Typed per-operation result variants
//!
//! Each S3 operation resolves to exactly one of these. Not-found is a
//! distinct variant for the operations where a missing key is an answer
//! rather than a failure.

use bytes::Bytes;

use crate::error::S3ErrorResponse;

/// HEAD result: object metadata parsed from response headers.
#[derive(Debug, Clone)]
pub enum StatResult {
    Success { etag: String, content_length: u64 },
    NotFound(S3ErrorResponse),
    Failure(S3ErrorResponse),
}

/// GET result: body ownership transfers to the caller on success.
#[derive(Debug, Clone)]
pub enum DownloadResult {
    Success { body: Bytes },
    NotFound(S3ErrorResponse),
    Failure(S3ErrorResponse),
}

/// Single-shot PUT result.
#[derive(Debug, Clone)]
pub enum UploadResult {
    Success,
    Failure(S3ErrorResponse),
}

/// DELETE result.
#[derive(Debug, Clone)]
pub enum DeleteResult {
    Success,
    NotFound(S3ErrorResponse),
    Failure(S3ErrorResponse),
}

/// CompleteMultipartUpload result. A 200 with an `<Error>` body is a
/// failure.
#[derive(Debug, Clone)]
pub enum CommitResult {
    Success,
    Failure(S3ErrorResponse),
}

/// UploadPart result carrying the ETag needed for commit.
#[derive(Debug, Clone)]
pub enum PartResult {
    Success { etag: String },
    Failure(S3ErrorResponse),
}

/// A byte range for partial reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    /// `None` means open-ended
    pub size: Option<u64>,
}

impl ByteRange {
    /// Render the `Range` header value: `bytes=<offset>-<end>` where
    /// `end = offset + size - 1`, or `bytes=<offset>-` when open-ended.
    pub fn header_value(&self) -> String {
        match self.size {
            Some(size) => format!("bytes={}-{}", self.offset, self.offset + size - 1),
            None => format!("bytes={}-", self.offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_header() {
        let bounded = ByteRange { offset: 100, size: Some(50) };
        assert_eq!(bounded.header_value(), "bytes=100-149");

        let open = ByteRange { offset: 0, size: None };
        assert_eq!(open.header_value(), "bytes=0-");

        let single = ByteRange { offset: 7, size: Some(1) };
        assert_eq!(single.header_value(), "bytes=7-7");
    }
}
