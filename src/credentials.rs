//! Credentials bundle, canned ACLs, and endpoint/region handling

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::S3Error;

/// Immutable credential bundle shared across concurrent operations.
///
/// Shared as `Arc<Credentials>`: every in-flight task holds a strong
/// reference. Any field may be empty; a missing access key or secret is
/// only an error at signing time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Empty means "guess from the endpoint"
    #[serde(default)]
    pub region: String,
    /// Host (optionally with port), no scheme. Empty means AWS.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub session_token: String,
    /// Set when the configured endpoint used an `http://` prefix
    #[serde(default)]
    pub insecure_http: bool,
}

impl Credentials {
    /// Build a bundle from a raw endpoint URL, stripping the scheme and
    /// recording whether it was plain HTTP.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        endpoint: &str,
        bucket: impl Into<String>,
    ) -> Self {
        let (endpoint, insecure_http) = split_endpoint(endpoint);
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: String::new(),
            endpoint: endpoint.to_string(),
            bucket: bucket.into(),
            session_token: String::new(),
            insecure_http,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = token.into();
        self
    }

    /// Explicit region, or guessed from the endpoint.
    pub fn region_or_guess(&self) -> &str {
        if !self.region.is_empty() {
            return &self.region;
        }
        guess_region(&self.endpoint)
    }

    /// Request host: the endpoint if set, else the regional AWS host.
    pub fn host(&self) -> Result<String, S3Error> {
        if self.endpoint.is_empty() {
            return Ok(format!("s3.{}.amazonaws.com", self.region_or_guess()));
        }
        // A bare scheme or embedded whitespace cannot form a Host header
        if self.endpoint.contains([' ', '\t', '\r', '\n', '/']) {
            return Err(S3Error::InvalidEndpoint);
        }
        Ok(self.endpoint.clone())
    }

    /// URL scheme for requests against this endpoint.
    pub fn scheme(&self) -> &'static str {
        if self.insecure_http {
            "http"
        } else {
            "https"
        }
    }
}

/// Strip an optional scheme prefix; `http://` toggles insecure mode,
/// anything else (or no prefix) stays HTTPS.
pub fn split_endpoint(endpoint: &str) -> (&str, bool) {
    if let Some(rest) = endpoint.strip_prefix("http://") {
        (rest.trim_end_matches('/'), true)
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        (rest.trim_end_matches('/'), false)
    } else {
        (endpoint.trim_end_matches('/'), false)
    }
}

/// Guess the signing region from an endpoint host.
///
/// Cloudflare R2 signs with the pseudo-region "auto"; AWS virtual hosts
/// carry the region between `s3.` and `.amazonaws.com`; anything else
/// falls back to us-east-1.
pub fn guess_region(endpoint: &str) -> &str {
    if endpoint.ends_with(".r2.cloudflarestorage.com") {
        return "auto";
    }
    if let Some(start) = endpoint.find("s3.") {
        let after = &endpoint[start + 3..];
        if let Some(end) = after.find(".amazonaws.com") {
            if end > 0 {
                return &after[..end];
            }
        }
    }
    "us-east-1"
}

/// Canned ACLs with their fixed wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Acl {
    Private,
    PublicRead,
    PublicReadWrite,
    AwsExecRead,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
    LogDeliveryWrite,
}

impl Acl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
            Acl::PublicReadWrite => "public-read-write",
            Acl::AwsExecRead => "aws-exec-read",
            Acl::AuthenticatedRead => "authenticated-read",
            Acl::BucketOwnerRead => "bucket-owner-read",
            Acl::BucketOwnerFullControl => "bucket-owner-full-control",
            Acl::LogDeliveryWrite => "log-delivery-write",
        }
    }
}

impl FromStr for Acl {
    type Err = S3Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Acl::Private),
            "public-read" => Ok(Acl::PublicRead),
            "public-read-write" => Ok(Acl::PublicReadWrite),
            "aws-exec-read" => Ok(Acl::AwsExecRead),
            "authenticated-read" => Ok(Acl::AuthenticatedRead),
            "bucket-owner-read" => Ok(Acl::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(Acl::BucketOwnerFullControl),
            "log-delivery-write" => Ok(Acl::LogDeliveryWrite),
            _ => Err(S3Error::InvalidAcl(s.to_string())),
        }
    }
}

impl TryFrom<String> for Acl {
    type Error = S3Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Acl> for String {
    fn from(acl: Acl) -> Self {
        acl.as_str().to_string()
    }
}
