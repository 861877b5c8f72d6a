//! Canonical-request HMAC signing
//!
//! SigV4-style scheme used by the Volcengine Visual API:
//!
//! ```text
//! CanonicalRequest = METHOD \n URI \n CanonicalQuery \n CanonicalHeaders \n SignedHeaders \n BodyHash
//! StringToSign     = "HMAC-SHA256" \n YYYYMMDDTHHMMSSZ \n {date}/{region}/{service}/request \n hex(sha256(CanonicalRequest))
//! kSigning         = HMAC(HMAC(HMAC(HMAC(secret, date), region), service), "request")
//! Authorization    = HMAC-SHA256 Credential={ak}/{scope}, SignedHeaders=..., Signature=hex(HMAC(kSigning, StringToSign))
//! ```
//!
//! Every request is signed with a fresh timestamp. A skewed local clock surfaces as an
//! authentication failure from the provider, indistinguishable from bad credentials.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Formatter, Result as FmtResult};

use genflow_core::{GenflowError, GenflowResult};

const ALGORITHM: &str = "HMAC-SHA256";
const SCOPE_TERMINATOR: &str = "request";
const SIGNED_HEADERS: &str = "content-type;host;x-content-sha256;x-date";

/// RFC 3986 unreserved characters are left as-is; everything else is escaped
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Credentials and scope for one signing provider. Immutable after startup.
#[derive(Clone)]
pub struct SigningContext {
    access_key: String,
    secret_key: String,
    region: String,
    service: String,
}

impl Debug for SigningContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("SigningContext")
            .field("region", &self.region)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// The parts of an HTTP request covered by the signature
#[derive(Debug, Clone)]
pub struct RequestParts<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub query: &'a [(&'a str, &'a str)],
    pub host: &'a str,
    pub content_type: &'a str,
    pub body: &'a [u8],
}

/// Headers to attach to a signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub content_type: String,
    pub host: String,
    pub x_content_sha256: String,
    pub x_date: String,
    pub authorization: String,
}

impl SignedHeaders {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Content-Type", &self.content_type)
            .header("Host", &self.host)
            .header("X-Content-Sha256", &self.x_content_sha256)
            .header("X-Date", &self.x_date)
            .header("Authorization", &self.authorization)
    }
}

impl SigningContext {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            service: service.into(),
        }
    }

    /// Sign `request` as of `now`
    pub fn sign(&self, request: &RequestParts<'_>, now: DateTime<Utc>) -> GenflowResult<SignedHeaders> {
        let date = now.format("%Y%m%d").to_string();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let body_hash = sha256_hex(request.body);

        let canonical_request = canonical_request(request, &body_hash, &timestamp);
        let scope = format!(
            "{}/{}/{}/{}",
            date, self.region, self.service, SCOPE_TERMINATOR
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            timestamp,
            scope,
            sha256_hex(canonical_request.as_bytes())
        );

        let signing_key = self.signing_key(&date)?;
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

        Ok(SignedHeaders {
            content_type: request.content_type.to_string(),
            host: request.host.to_string(),
            x_content_sha256: body_hash,
            x_date: timestamp,
            authorization: format!(
                "{} Credential={}/{}, SignedHeaders={}, Signature={}",
                ALGORITHM, self.access_key, scope, SIGNED_HEADERS, signature
            ),
        })
    }

    fn signing_key(&self, date: &str) -> GenflowResult<Vec<u8>> {
        let k_date = hmac_sha256(self.secret_key.as_bytes(), date.as_bytes())?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, self.service.as_bytes())?;
        hmac_sha256(&k_service, SCOPE_TERMINATOR.as_bytes())
    }
}

fn canonical_request(request: &RequestParts<'_>, body_hash: &str, timestamp: &str) -> String {
    // Already in sorted order: content-type < host < x-content-sha256 < x-date
    let canonical_headers = format!(
        "content-type:{}\nhost:{}\nx-content-sha256:{}\nx-date:{}\n",
        request.content_type.trim(),
        request.host.trim(),
        body_hash,
        timestamp
    );

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method.to_uppercase(),
        request.uri,
        canonical_query_string(request.query),
        canonical_headers,
        SIGNED_HEADERS,
        body_hash
    )
}

/// Percent-encode every key and value (RFC 3986, space as `+`), sort by key, join with `&`
pub fn canonical_query_string(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (encode_component(k), encode_component(v)))
        .collect();
    encoded.sort();

    encoded
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE_SET)
        .to_string()
        .replace("%20", "+")
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> GenflowResult<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| GenflowError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn context() -> SigningContext {
        SigningContext::new("AKTEST", "c2VjcmV0", "cn-north-1", "cv")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 8, 30, 5).unwrap()
    }

    fn parts<'a>(query: &'a [(&'a str, &'a str)], body: &'a [u8]) -> RequestParts<'a> {
        RequestParts {
            method: "POST",
            uri: "/",
            query,
            host: "visual.volcengineapi.com",
            content_type: "application/json",
            body,
        }
    }

    #[test]
    fn body_hash_of_empty_body() {
        assert_eq!(sha256_hex(b""), EMPTY_SHA256);
    }

    #[test]
    fn query_string_is_sorted_and_encoded() {
        let query = [
            ("Version", "2022-08-31"),
            ("Action", "CVSync2AsyncSubmitTask"),
            ("note", "a b/c*~"),
        ];
        assert_eq!(
            canonical_query_string(&query),
            "Action=CVSync2AsyncSubmitTask&Version=2022-08-31&note=a+b%2Fc%2A~"
        );
        assert_eq!(canonical_query_string(&[]), "");
    }

    #[test]
    fn signature_is_deterministic() {
        let query = [("Action", "CVSync2AsyncGetResult"), ("Version", "2022-08-31")];
        let body = br#"{"req_key":"jimeng_ti2v_v30_pro","task_id":"123"}"#;

        let first = context().sign(&parts(&query, body), now()).unwrap();
        let second = context().sign(&parts(&query, body), now()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.x_date, "20250115T083005Z");
        assert_eq!(first.x_content_sha256, sha256_hex(body));
        assert!(first.authorization.starts_with(
            "HMAC-SHA256 Credential=AKTEST/20250115/cn-north-1/cv/request, \
             SignedHeaders=content-type;host;x-content-sha256;x-date, Signature="
        ));
        let signature = first.authorization.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn any_body_change_changes_signature() {
        let a = context().sign(&parts(&[], br#"{"seed":-1}"#), now()).unwrap();
        let b = context().sign(&parts(&[], br#"{"seed":-2}"#), now()).unwrap();
        assert_ne!(a.authorization, b.authorization);
        assert_ne!(a.x_content_sha256, b.x_content_sha256);
    }

    #[test]
    fn timestamp_and_scope_change_signature() {
        let later = now() + chrono::Duration::seconds(1);
        let a = context().sign(&parts(&[], b""), now()).unwrap();
        let b = context().sign(&parts(&[], b""), later).unwrap();
        assert_ne!(a.authorization, b.authorization);

        let other_region = SigningContext::new("AKTEST", "c2VjcmV0", "cn-beijing", "cv");
        let c = other_region.sign(&parts(&[], b""), now()).unwrap();
        assert_ne!(a.authorization, c.authorization);
    }

    #[test]
    fn canonical_request_layout() {
        let query = [("Action", "X")];
        let request = parts(&query, b"");
        let canonical = canonical_request(&request, EMPTY_SHA256, "20250115T083005Z");
        let expected = format!(
            "POST\n/\nAction=X\ncontent-type:application/json\nhost:visual.volcengineapi.com\n\
             x-content-sha256:{hash}\nx-date:20250115T083005Z\n\n\
             content-type;host;x-content-sha256;x-date\n{hash}",
            hash = EMPTY_SHA256
        );
        assert_eq!(canonical, expected);
    }

    #[test]
    fn debug_hides_keys() {
        let rendered = format!("{:?}", context());
        assert!(!rendered.contains("AKTEST"));
        assert!(!rendered.contains("c2VjcmV0"));
    }
}
