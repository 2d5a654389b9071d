//! Error taxonomy and S3 XML error classification
//!
//! Signing errors are synchronous and carry a closed set of codes.
//! Protocol errors come back as XML `<Error>` envelopes; commit and
//! part responses can carry one even under HTTP 200.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Synchronous client-side errors.
#[derive(Debug, Clone, Error)]
pub enum S3Error {
    #[error("missing access key id or secret access key")]
    MissingCredentials,

    #[error("method must be GET, POST, PUT, DELETE or HEAD")]
    InvalidMethod,

    #[error("invalid S3 path: {0}")]
    InvalidPath(String),

    #[error("invalid endpoint")]
    InvalidEndpoint,

    #[error("session token cannot be sent as a header")]
    InvalidSessionToken,

    #[error("failed to generate request signature")]
    InvalidSignature,

    #[error("unknown ACL: {0}")]
    InvalidAcl(String),

    #[error("invalid upload option: {0}")]
    InvalidOption(String),
}

impl S3Error {
    /// Stable machine-readable code for each variant.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::MissingCredentials => "ERR_S3_MISSING_CREDENTIALS",
            S3Error::InvalidMethod => "ERR_S3_INVALID_METHOD",
            S3Error::InvalidPath(_) => "ERR_S3_INVALID_PATH",
            S3Error::InvalidEndpoint => "ERR_S3_INVALID_ENDPOINT",
            S3Error::InvalidSessionToken => "ERR_S3_INVALID_SESSION_TOKEN",
            S3Error::InvalidSignature => "ERR_S3_INVALID_SIGNATURE",
            S3Error::InvalidAcl(_) => "ERR_S3_INVALID_ACL",
            S3Error::InvalidOption(_) => "ERR_S3_INVALID_OPTION",
        }
    }
}

/// A classified S3 failure: either parsed from an XML `<Error>` body or
/// synthesized from the HTTP status / transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3ErrorResponse {
    pub code: String,
    pub message: String,
}

impl S3ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for S3ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Extract the first `<Code>` and `<Message>` from an error body.
fn parse_error_envelope(body: &[u8]) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut code: Option<String> = None;
    let mut message: Option<String> = None;
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
                match e.local_name().as_ref() {
                    b"Code" => {
                        if code.is_none() {
                            code = Some(std::mem::take(&mut current_text));
                        }
                    }
                    b"Message" => {
                        if message.is_none() {
                            message = Some(std::mem::take(&mut current_text));
                        }
                    }
                    _ => {}
                }
                current_text.clear();
                if code.is_some() && message.is_some() {
                    break;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
    }

    (code, message)
}

/// Strict classification of a failed response.
///
/// Missing `<Code>`/`<Message>` falls back to `NoSuchKey` for 404-class
/// responses and `UnknownError` otherwise.
pub fn error_with_body(status: u16, body: &[u8]) -> S3ErrorResponse {
    let (code, message) = parse_error_envelope(body);
    match (code, message) {
        (Some(code), Some(message)) => S3ErrorResponse { code, message },
        (Some(code), None) => S3ErrorResponse::new(code, "an unexpected error has occurred"),
        _ if status == 404 => {
            S3ErrorResponse::new("NoSuchKey", "The specified key does not exist.")
        }
        _ => S3ErrorResponse::new("UnknownError", "an unexpected error has occurred"),
    }
}

/// Commit/part check: a 2xx response still fails when the body carries
/// an `<Error>` element.
pub fn body_contains_error(body: &[u8]) -> Option<S3ErrorResponse> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"Error" {
                    return Some(error_with_body(200, body));
                }
            }
            Ok(Event::Eof) => return None,
            Err(_) => return None,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERROR_BODY: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <Error><Code>SlowDown</Code><Message>Please reduce your request rate.</Message>\
        <RequestId>abc</RequestId></Error>";

    #[test]
    fn test_error_with_body_parses_code_and_message() {
        let err = error_with_body(503, ERROR_BODY);
        assert_eq!(err.code, "SlowDown");
        assert_eq!(err.message, "Please reduce your request rate.");
    }

    #[test]
    fn test_not_found_defaults() {
        let err = error_with_body(404, b"");
        assert_eq!(err.code, "NoSuchKey");
        assert_eq!(err.message, "The specified key does not exist.");
    }

    #[test]
    fn test_unknown_defaults() {
        let err = error_with_body(500, b"not xml at all");
        assert_eq!(err.code, "UnknownError");
        assert_eq!(err.message, "an unexpected error has occurred");
    }

    #[test]
    fn test_body_contains_error() {
        assert!(body_contains_error(ERROR_BODY).is_some());

        let ok_body = b"<CompleteMultipartUploadResult><ETag>\"abc\"</ETag>\
            </CompleteMultipartUploadResult>";
        assert!(body_contains_error(ok_body).is_none());
        assert!(body_contains_error(b"").is_none());
    }

    #[test]
    fn test_error_codes_closed_set() {
        assert_eq!(S3Error::MissingCredentials.code(), "ERR_S3_MISSING_CREDENTIALS");
        assert_eq!(S3Error::InvalidMethod.code(), "ERR_S3_INVALID_METHOD");
        assert_eq!(S3Error::InvalidPath("x".into()).code(), "ERR_S3_INVALID_PATH");
        assert_eq!(S3Error::InvalidEndpoint.code(), "ERR_S3_INVALID_ENDPOINT");
        assert_eq!(S3Error::InvalidSessionToken.code(), "ERR_S3_INVALID_SESSION_TOKEN");
        assert_eq!(S3Error::InvalidSignature.code(), "ERR_S3_INVALID_SIGNATURE");
    }
}
