//! s3stream - embeddable S3 client core with SigV4 signing and streaming multipart uploads

pub mod cli;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod multipart;
pub mod sign;

pub use client::{HttpTransport, HyperTransport, RequestExecutor};
pub use credentials::{Acl, Credentials};
pub use error::{S3Error, S3ErrorResponse};
pub use multipart::{MultipartOptions, MultipartUpload, UploadOutcome};
pub use sign::{Method, SignOptions, SignQueryOptions, SignResult};
