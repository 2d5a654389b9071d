//! One-shot request executor
//!
//! Signs a request descriptor, assembles the final header set,
//! dispatches through the transport, and routes the outcome into the
//! typed result for the operation. Signing errors fail synchronously
//! before any request is made.

use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::transport::{HttpRequest, HttpResponse, HttpTransport, StreamingResponse};
use super::types::{
    ByteRange, CommitResult, DeleteResult, DownloadResult, PartResult, StatResult, UploadResult,
};
use crate::credentials::{Acl, Credentials};
use crate::error::{self, S3ErrorResponse};
use crate::sign::{self, encode, Method, SignOptions};

/// Request descriptor for the executor.
#[derive(Debug, Clone, Default)]
pub struct RequestParams<'a> {
    pub path: &'a str,
    pub method: Option<Method>,
    pub search_params: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub content_disposition: Option<&'a str>,
    pub acl: Option<Acl>,
    pub content_hash: Option<&'a str>,
    pub range: Option<ByteRange>,
    pub body: Bytes,
}

/// Executes signed S3 requests against a transport.
///
/// Clone is cheap; credentials and transport are shared by reference.
#[derive(Clone)]
pub struct RequestExecutor {
    credentials: Arc<Credentials>,
    transport: Arc<dyn HttpTransport>,
    proxy: Option<String>,
}

impl RequestExecutor {
    pub fn new(credentials: Arc<Credentials>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            credentials,
            transport,
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    fn build_request(&self, params: &RequestParams<'_>) -> Result<HttpRequest, S3ErrorResponse> {
        let method = params.method.unwrap_or(Method::Get);
        let sign_result = sign::sign(
            &self.credentials,
            &SignOptions {
                path: params.path,
                method: Some(method),
                content_hash: params.content_hash,
                search_params: params.search_params,
                content_disposition: params.content_disposition,
                acl: params.acl,
            },
        )
        .map_err(|e| S3ErrorResponse::new(e.code(), e.to_string()))?;

        let mut headers: Vec<(String, String)> = sign_result
            .headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        if let Some(range) = params.range {
            headers.push(("Range".to_string(), range.header_value()));
        }
        if let Some(content_type) = params.content_type {
            headers.push(("Content-Type".to_string(), content_type.to_string()));
        }
        if matches!(method, Method::Put | Method::Post) {
            headers.push(("Content-Length".to_string(), params.body.len().to_string()));
        }

        let http_method = match method {
            Method::Get => hyper::Method::GET,
            Method::Post => hyper::Method::POST,
            Method::Put => hyper::Method::PUT,
            Method::Delete => hyper::Method::DELETE,
            Method::Head => hyper::Method::HEAD,
        };

        Ok(HttpRequest {
            method: http_method,
            url: sign_result.url,
            headers,
            body: params.body.clone(),
            proxy: self.proxy.clone(),
        })
    }

    /// Sign and dispatch, buffering the response.
    pub async fn send(&self, params: RequestParams<'_>) -> Result<HttpResponse, S3ErrorResponse> {
        let request = self.build_request(&params)?;
        self.transport
            .execute(request)
            .await
            .map_err(|e| S3ErrorResponse::new(e.code(), e.to_string()))
    }

    /// Sign and dispatch, streaming the response body.
    pub async fn send_streaming(
        &self,
        params: RequestParams<'_>,
    ) -> Result<StreamingResponse, S3ErrorResponse> {
        let request = self.build_request(&params)?;
        self.transport
            .execute_streaming(request)
            .await
            .map_err(|e| S3ErrorResponse::new(e.code(), e.to_string()))
    }

    /// HEAD an object.
    pub async fn stat(&self, path: &str) -> StatResult {
        let params = RequestParams {
            path,
            method: Some(Method::Head),
            ..Default::default()
        };
        let response = match self.send(params).await {
            Ok(response) => response,
            Err(e) => return StatResult::Failure(e),
        };
        match response.status.as_u16() {
            200 => {
                let etag = header_str(&response, "etag")
                    .trim_matches('"')
                    .to_string();
                let content_length = header_str(&response, "content-length")
                    .parse()
                    .unwrap_or(0);
                StatResult::Success {
                    etag,
                    content_length,
                }
            }
            404 => StatResult::NotFound(error::error_with_body(404, &response.body)),
            status => StatResult::Failure(error::error_with_body(status, &response.body)),
        }
    }

    /// GET an object (optionally a byte range), buffered.
    pub async fn download(&self, path: &str, range: Option<ByteRange>) -> DownloadResult {
        let params = RequestParams {
            path,
            method: Some(Method::Get),
            range,
            ..Default::default()
        };
        let response = match self.send(params).await {
            Ok(response) => response,
            Err(e) => return DownloadResult::Failure(e),
        };
        match response.status.as_u16() {
            200 | 204 | 206 => DownloadResult::Success {
                body: response.body,
            },
            404 => DownloadResult::NotFound(error::error_with_body(404, &response.body)),
            status => DownloadResult::Failure(error::error_with_body(status, &response.body)),
        }
    }

    /// PUT a whole object in one request.
    pub async fn upload(
        &self,
        path: &str,
        body: Bytes,
        content_type: Option<&str>,
        acl: Option<Acl>,
    ) -> UploadResult {
        let params = RequestParams {
            path,
            method: Some(Method::Put),
            content_type,
            acl,
            body,
            ..Default::default()
        };
        let response = match self.send(params).await {
            Ok(response) => response,
            Err(e) => return UploadResult::Failure(e),
        };
        match response.status.as_u16() {
            200 => UploadResult::Success,
            status => UploadResult::Failure(error::error_with_body(status, &response.body)),
        }
    }

    /// DELETE an object.
    pub async fn delete(&self, path: &str) -> DeleteResult {
        let params = RequestParams {
            path,
            method: Some(Method::Delete),
            ..Default::default()
        };
        let response = match self.send(params).await {
            Ok(response) => response,
            Err(e) => return DeleteResult::Failure(e),
        };
        match response.status.as_u16() {
            200 | 204 => DeleteResult::Success,
            404 => DeleteResult::NotFound(error::error_with_body(404, &response.body)),
            status => DeleteResult::Failure(error::error_with_body(status, &response.body)),
        }
    }

    /// `POST <path>?uploads=` returning the new upload id.
    pub async fn initiate_multipart(
        &self,
        path: &str,
        content_type: Option<&str>,
        acl: Option<Acl>,
    ) -> Result<String, S3ErrorResponse> {
        let params = RequestParams {
            path,
            method: Some(Method::Post),
            search_params: Some("uploads"),
            content_type,
            acl,
            ..Default::default()
        };
        let response = self.send(params).await?;
        if response.status.as_u16() != 200 {
            return Err(error::error_with_body(
                response.status.as_u16(),
                &response.body,
            ));
        }
        match parse_upload_id(&response.body) {
            Some(upload_id) => Ok(upload_id),
            None => Err(S3ErrorResponse::new(
                "UnknownError",
                "Failed to initiate multipart upload",
            )),
        }
    }

    /// `PUT <path>?partNumber=<n>&uploadId=<id>&x-id=UploadPart`.
    pub async fn upload_part(
        &self,
        path: &str,
        upload_id: &str,
        part_number: u16,
        data: Bytes,
    ) -> PartResult {
        let query = format!(
            "partNumber={}&uploadId={}&x-id=UploadPart",
            part_number,
            encode::uri_encode(upload_id, true)
        );
        let params = RequestParams {
            path,
            method: Some(Method::Put),
            search_params: Some(&query),
            body: data,
            ..Default::default()
        };
        let response = match self.send(params).await {
            Ok(response) => response,
            Err(e) => return PartResult::Failure(e),
        };
        if response.status.as_u16() != 200 {
            return PartResult::Failure(error::error_with_body(
                response.status.as_u16(),
                &response.body,
            ));
        }
        // Any anomaly fails the part, including an error under 200
        if let Some(err) = error::body_contains_error(&response.body) {
            return PartResult::Failure(err);
        }
        let etag = header_str(&response, "etag").trim_matches('"').to_string();
        if etag.is_empty() {
            return PartResult::Failure(S3ErrorResponse::new(
                "UnknownError",
                "part response carried no ETag",
            ));
        }
        PartResult::Success { etag }
    }

    /// `POST <path>?uploadId=<id>` with the completion XML.
    pub async fn commit_multipart(
        &self,
        path: &str,
        upload_id: &str,
        body: Bytes,
    ) -> CommitResult {
        let query = format!("uploadId={}", encode::uri_encode(upload_id, true));
        // The body is small; sign its real hash like any other XML POST
        let content_hash = hex::encode(Sha256::digest(&body));
        let params = RequestParams {
            path,
            method: Some(Method::Post),
            search_params: Some(&query),
            content_type: Some("application/xml"),
            content_hash: Some(&content_hash),
            body,
            ..Default::default()
        };
        let response = match self.send(params).await {
            Ok(response) => response,
            Err(e) => return CommitResult::Failure(e),
        };
        match response.status.as_u16() {
            200 | 206 => match error::body_contains_error(&response.body) {
                Some(err) => CommitResult::Failure(err),
                None => CommitResult::Success,
            },
            status => CommitResult::Failure(error::error_with_body(status, &response.body)),
        }
    }

    /// `DELETE <path>?uploadId=<id>` aborting an in-progress upload.
    pub async fn abort_multipart(&self, path: &str, upload_id: &str) -> DeleteResult {
        let query = format!("uploadId={}", encode::uri_encode(upload_id, true));
        let params = RequestParams {
            path,
            method: Some(Method::Delete),
            search_params: Some(&query),
            ..Default::default()
        };
        let response = match self.send(params).await {
            Ok(response) => response,
            Err(e) => return DeleteResult::Failure(e),
        };
        match response.status.as_u16() {
            200 | 204 => DeleteResult::Success,
            404 => DeleteResult::NotFound(error::error_with_body(404, &response.body)),
            status => DeleteResult::Failure(error::error_with_body(status, &response.body)),
        }
    }
}

fn header_str<'a>(response: &'a HttpResponse, name: &str) -> &'a str {
    response
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Pull `<UploadId>` out of an InitiateMultipartUploadResult body.
fn parse_upload_id(body: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut current_text = String::with_capacity(128);
    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                if let Ok(text) = e.unescape() {
                    current_text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"UploadId" && !current_text.is_empty() {
                    return Some(std::mem::take(&mut current_text));
                }
                current_text.clear();
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
    }
}
