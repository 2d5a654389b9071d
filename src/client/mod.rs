//! S3 request execution
//!
//! This module provides:
//! - The HTTP transport contract and its hyper-based implementation
//! - The one-shot request executor with typed per-operation results
//! - The streaming download task

pub mod download;
pub mod executor;
pub mod transport;
pub mod types;

pub use download::{stream_download, DownloadEvent, DownloadReporter};
pub use executor::RequestExecutor;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, HyperTransport, TransportError};
pub use types::{
    ByteRange, CommitResult, DeleteResult, DownloadResult, PartResult, StatResult, UploadResult,
};
