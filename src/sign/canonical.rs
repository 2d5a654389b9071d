//! Canonical request assembly for AWS Signature Version 4
//!
//! The canonical string is hashed into the string-to-sign, so every
//! byte here is load-bearing: header order, the signed-header list, and
//! query canonicalization must match what the server reconstructs.

use super::encode::{uri_encode, uri_encode_into};
use crate::credentials::Acl;

/// Payload hash used when the body is not hashed into the signature.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// The optional signed headers for one request, values already in wire
/// form. `host`, `x-amz-content-sha256` and `x-amz-date` are always
/// present; the cross product of these three selects the rest.
pub struct CanonicalHeaders<'a> {
    pub host: &'a str,
    pub content_hash: &'a str,
    pub amz_date: &'a str,
    pub acl: Option<Acl>,
    /// Percent-encoded (slash-encoded) Content-Disposition value
    pub content_disposition: Option<&'a str>,
    pub session_token: Option<&'a str>,
}

impl<'a> CanonicalHeaders<'a> {
    /// Render the `name:value\n` block, names in lexicographic order.
    pub fn canonical_block(&self) -> String {
        let mut block = String::with_capacity(192);
        if let Some(cd) = self.content_disposition {
            block.push_str("content-disposition:");
            block.push_str(cd);
            block.push('\n');
        }
        block.push_str("host:");
        block.push_str(self.host);
        block.push('\n');
        if let Some(acl) = self.acl {
            block.push_str("x-amz-acl:");
            block.push_str(acl.as_str());
            block.push('\n');
        }
        block.push_str("x-amz-content-sha256:");
        block.push_str(self.content_hash);
        block.push('\n');
        block.push_str("x-amz-date:");
        block.push_str(self.amz_date);
        block.push('\n');
        if let Some(token) = self.session_token {
            block.push_str("x-amz-security-token:");
            block.push_str(token);
            block.push('\n');
        }
        block
    }

    /// Semicolon-joined lowercase signed-header list, same order as the
    /// canonical block.
    pub fn signed_list(&self) -> String {
        let mut list = String::with_capacity(96);
        if self.content_disposition.is_some() {
            list.push_str("content-disposition;");
        }
        list.push_str("host;");
        if self.acl.is_some() {
            list.push_str("x-amz-acl;");
        }
        list.push_str("x-amz-content-sha256;x-amz-date");
        if self.session_token.is_some() {
            list.push_str(";x-amz-security-token");
        }
        list
    }
}

/// Assemble the full canonical request for header-based signing.
pub fn canonical_request(
    method: &str,
    canonical_path: &str,
    canonical_query: &str,
    headers: &CanonicalHeaders<'_>,
) -> String {
    let header_block = headers.canonical_block();
    let signed = headers.signed_list();
    let mut request = String::with_capacity(
        method.len()
            + canonical_path.len()
            + canonical_query.len()
            + header_block.len()
            + signed.len()
            + headers.content_hash.len()
            + 8,
    );
    request.push_str(method);
    request.push('\n');
    request.push_str(canonical_path);
    request.push('\n');
    request.push_str(canonical_query);
    request.push('\n');
    request.push_str(&header_block);
    request.push('\n');
    request.push_str(&signed);
    request.push('\n');
    request.push_str(headers.content_hash);
    request
}

/// Canonicalize a search-param string (leading `?` already stripped).
///
/// Fast path: already-canonical, sorted input with explicit `=` on every
/// pair passes through untouched. Anything else is decoded, re-encoded
/// and sorted; valueless params normalize to `name=`.
pub fn canonical_query_string(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }

    let all_canonical = query.bytes().all(|b| {
        matches!(b,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9'
            | b'-' | b'_' | b'.' | b'~'
            | b'=' | b'&' | b'%'
        )
    });

    if all_canonical {
        let mut sorted = true;
        let mut all_have_equals = true;
        let mut last_key: &str = "";
        for pair in query.split('&') {
            let key = match pair.find('=') {
                Some(pos) => &pair[..pos],
                None => {
                    all_have_equals = false;
                    pair
                }
            };
            if key < last_key {
                sorted = false;
                break;
            }
            last_key = key;
        }
        if sorted && all_have_equals {
            return query.to_string();
        }
    }

    let mut params: Vec<(String, String)> = Vec::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        if let Some(pos) = pair.find('=') {
            let key = &pair[..pos];
            let value = &pair[pos + 1..];
            let decoded_key = urlencoding::decode(key).unwrap_or_else(|_| key.into());
            let decoded_value = urlencoding::decode(value).unwrap_or_else(|_| value.into());
            params.push((
                uri_encode(&decoded_key, true),
                uri_encode(&decoded_value, true),
            ));
        } else {
            let decoded = urlencoding::decode(pair).unwrap_or_else(|_| pair.into());
            params.push((uri_encode(&decoded, true), String::new()));
        }
    }

    params.sort_unstable_by(|a, b| a.0.cmp(&b.0));

    let mut result = String::with_capacity(query.len() + 16);
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            result.push('&');
        }
        result.push_str(k);
        result.push('=');
        result.push_str(v);
    }
    result
}

/// Append one `name=value` pair to a query string under construction,
/// percent-encoding the value in slash-encoded mode.
pub fn push_query_param(buf: &mut String, name: &str, value: &str) {
    if !buf.is_empty() {
        buf.push('&');
    }
    buf.push_str(name);
    buf.push('=');
    uri_encode_into(buf, value, true);
}
