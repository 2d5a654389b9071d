//! HTTP transport contract and hyper-based implementation
//!
//! The executor and coordinator only see the `HttpTransport` trait, so
//! tests script responses with a mock and the embedding host can swap
//! in its own stack. `HyperTransport` is the default:
//! - HTTP/1.1 with a tuned connection pool
//! - TCP_NODELAY, 90s keepalive
//! - native-tls, with an insecure mode for self-signed endpoints

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::header::HeaderMap;
use hyper::{Request, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::{TokioExecutor, TokioIo};
use native_tls::TlsConnector;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;

/// Transport-level failures, surfaced to callers as
/// `failure { code: <error name> }`.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to build request: {0}")]
    Build(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Error name used as the classification code.
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Build(_) => "RequestBuildFailed",
            TransportError::Connect(_) => "ConnectionFailed",
            TransportError::Body(_) => "BodyReadFailed",
        }
    }
}

/// A fully signed request ready for the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: hyper::Method,
    pub url: String,
    /// Ordered header pairs, sent verbatim
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Forward-proxy URL, if any
    pub proxy: Option<String>,
}

/// A buffered response.
#[derive(Debug)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A response whose body arrives as a chunk stream.
pub struct StreamingResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

/// Async request executor contract.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Dispatch and buffer the full response body.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Dispatch and hand back the body as a chunk stream.
    async fn execute_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError>;
}

/// Default transport over hyper.
///
/// Clone is cheap - the underlying client uses Arc internally.
#[derive(Clone)]
pub struct HyperTransport {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl HyperTransport {
    /// Build a transport with the tuned pool settings.
    ///
    /// `reject_unauthorized = false` disables certificate verification
    /// for self-signed test endpoints.
    pub fn new(reject_unauthorized: bool) -> Self {
        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if reject_unauthorized {
            TlsConnector::new().expect("Failed to build TLS connector")
        } else {
            tracing::warn!("TLS certificate verification disabled");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .expect("Failed to build TLS connector")
        };

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(64)
            .retry_canceled_requests(true)
            // Host is always set explicitly because it is signed
            .set_host(false)
            .build(https);

        Self { client }
    }

    fn build_request(request: &HttpRequest) -> Result<Request<Full<Bytes>>, TransportError> {
        let mut builder = Request::builder()
            .method(request.method.clone())
            .uri(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| TransportError::Build(e.to_string()))
    }

    /// Send through a forward proxy using an absolute-form request line.
    ///
    /// Only plain-HTTP targets are supported this way.
    /// TODO: CONNECT tunneling so TLS endpoints can be proxied too.
    async fn send_via_proxy(
        &self,
        request: &HttpRequest,
        proxy: &str,
    ) -> Result<hyper::Response<hyper::body::Incoming>, TransportError> {
        if !request.url.starts_with("http://") {
            tracing::warn!(proxy = %proxy, "proxy ignored for TLS endpoint, connecting directly");
            return self
                .client
                .request(Self::build_request(request)?)
                .await
                .map_err(|e| TransportError::Connect(e.to_string()));
        }

        let authority = proxy
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        let stream = TcpStream::connect(&authority)
            .await
            .map_err(|e| TransportError::Connect(format!("proxy {authority}: {e}")))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "proxy connection closed");
            }
        });

        sender
            .send_request(Self::build_request(request)?)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }

    async fn dispatch(
        &self,
        request: &HttpRequest,
    ) -> Result<hyper::Response<hyper::body::Incoming>, TransportError> {
        match &request.proxy {
            Some(proxy) => self.send_via_proxy(request, proxy).await,
            None => self
                .client
                .request(Self::build_request(request)?)
                .await
                .map_err(|e| TransportError::Connect(e.to_string())),
        }
    }
}

#[async_trait]
impl HttpTransport for HyperTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = self.dispatch(&request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .collect()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?
            .to_bytes();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn execute_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let response = self.dispatch(&request).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = BodyStream::new(response.into_body())
            .filter_map(|frame| async move {
                match frame {
                    Ok(frame) => frame.into_data().ok().map(Ok),
                    Err(e) => Some(Err(TransportError::Body(e.to_string()))),
                }
            })
            .boxed();
        Ok(StreamingResponse {
            status,
            headers,
            body,
        })
    }
}
