//! AWS Signature V4 signing for outgoing S3 requests.
//!
//! Client side of the [AWS Signature Version 4 signing process][sigv4-docs]. Every
//! header handed to [`sign_request`] is signed, so `x-amz-meta-*` metadata is
//! covered by the signature as S3-compatible servers require.
//!
//! [sigv4-docs]: https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-header-based-auth.html

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Payload hash sent when the body is streamed from disk.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Credentials and scope used to sign requests.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Region in the credential scope.
    pub region: String,
}

/// Hex-encoded SHA-256 of a payload.
pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Percent-encode per the SigV4 rules: unreserved characters pass through,
/// everything else becomes `%XX`. Slashes survive only when `keep_slash`.
pub fn uri_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if keep_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Canonical header value: trimmed, inner runs of spaces collapsed.
fn canonical_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the canonical request string.
///
/// ```text
/// <HTTPMethod>\n<CanonicalURI>\n<CanonicalQueryString>\n<CanonicalHeaders>\n<SignedHeaders>\n<HashedPayload>
/// ```
fn canonical_request(
    method: &str,
    canonical_uri: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> (String, String) {
    let mut sorted: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), canonical_value(value)))
        .collect();
    sorted.sort();

    let mut canonical_headers = String::new();
    for (name, value) in &sorted {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value);
        canonical_headers.push('\n');
    }
    let signed_headers = sorted
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let request = format!(
        "{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    (request, signed_headers)
}

/// Derive the signing key via the HMAC chain:
///
/// ```text
/// DateKey    = HMAC-SHA256("AWS4" + secret, date)
/// RegionKey  = HMAC-SHA256(DateKey, region)
/// ServiceKey = HMAC-SHA256(RegionKey, "s3")
/// SigningKey = HMAC-SHA256(ServiceKey, "aws4_request")
/// ```
fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{secret}");
    let date_key = hmac_sha256(key.as_bytes(), date.as_bytes());
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, b"s3");
    hmac_sha256(&service_key, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sign a request.
///
/// `headers` must contain every header that will be sent and signed,
/// including `host`. Returns the extra headers to attach:
/// `x-amz-date`, `x-amz-content-sha256` and `authorization`.
pub fn sign_request(
    key: &SigningKey,
    method: &str,
    canonical_uri: &str,
    headers: &[(String, String)],
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut all_headers = headers.to_vec();
    all_headers.push(("x-amz-date".to_string(), timestamp.clone()));
    all_headers.push(("x-amz-content-sha256".to_string(), payload_hash.to_string()));

    let (request, signed_headers) =
        canonical_request(method, canonical_uri, &all_headers, payload_hash);

    let scope = format!("{date}/{}/s3/aws4_request", key.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{timestamp}\n{scope}\n{}",
        hex::encode(Sha256::digest(request.as_bytes()))
    );
    let signing_key = derive_signing_key(&key.secret_access_key, &date, &key.region);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        key.access_key_id
    );

    vec![
        ("x-amz-date".to_string(), timestamp),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("authorization".to_string(), authorization),
    ]
}
