//! Daily signing key derivation and process-global cache
//!
//! The SigV4 signing key is four chained HMAC operations over values
//! that only change once per UTC day, so the derived key is cached per
//! `(day, region, service, secret)`. Last-writer-wins on concurrent
//! insertion: every derivation for the same inputs is identical.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use super::datetime::AmzDate;

type HmacSha256 = Hmac<Sha256>;

struct CacheEntry {
    numeric_day: i64,
    key: [u8; 32],
}

static SIGNING_KEY_CACHE: OnceLock<Mutex<HashMap<String, CacheEntry>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<String, CacheEntry>> {
    SIGNING_KEY_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// HMAC-SHA256 returning a fixed-size array (no heap allocation)
pub fn hmac_sha256(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(msg);
    let result = mac.finalize().into_bytes();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result);
    output
}

/// Derive the signing key chain for one day.
fn derive_signing_key(date: &str, region: &str, service: &str, secret: &str) -> [u8; 32] {
    let mut aws4_key = Vec::with_capacity(4 + secret.len());
    aws4_key.extend_from_slice(b"AWS4");
    aws4_key.extend_from_slice(secret.as_bytes());

    let k_date = hmac_sha256(&aws4_key, date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Fetch the cached signing key for the given day, deriving on miss.
///
/// Entries from earlier days are evicted on insert; only the current
/// day's key is ever useful.
pub fn signing_key(date: &AmzDate, region: &str, service: &str, secret: &str) -> [u8; 32] {
    let mut composite = String::with_capacity(region.len() + service.len() + secret.len());
    composite.push_str(region);
    composite.push_str(service);
    composite.push_str(secret);

    {
        let map = cache().lock().unwrap();
        if let Some(entry) = map.get(&composite) {
            if entry.numeric_day == date.numeric_day {
                return entry.key;
            }
        }
    }

    let key = derive_signing_key(&date.date, region, service, secret);

    let mut map = cache().lock().unwrap();
    map.retain(|_, entry| entry.numeric_day >= date.numeric_day);
    map.insert(
        composite,
        CacheEntry {
            numeric_day: date.numeric_day,
            key,
        },
    );
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha256_fixed_size() {
        let result = hmac_sha256(b"test_key", b"test_message");
        assert_eq!(result.len(), 32);
    }

    #[test]
    fn test_derivation_matches_reference() {
        // AWS SigV4 documented example key derivation
        let key = derive_signing_key(
            "20120215",
            "us-east-1",
            "iam",
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_cache_stable_within_day() {
        let date = AmzDate::from_unix(1369353600);
        let a = signing_key(&date, "us-east-1", "s3", "secret-a");
        let b = signing_key(&date, "us-east-1", "s3", "secret-a");
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_rolls_over_at_midnight() {
        let day1 = AmzDate::from_unix(1369353600);
        let day2 = AmzDate::from_unix(1369353600 + 86400);
        let a = signing_key(&day1, "us-east-1", "s3", "secret-b");
        let b = signing_key(&day2, "us-east-1", "s3", "secret-b");
        assert_ne!(a, b);
    }

    #[test]
    fn test_distinct_secrets_distinct_keys() {
        let date = AmzDate::from_unix(1369353600);
        let a = signing_key(&date, "us-east-1", "s3", "secret-c");
        let b = signing_key(&date, "us-east-1", "s3", "secret-d");
        assert_ne!(a, b);
    }
}
