//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! Requests are handled as `http::Request<Vec<u8>>` so the same code signs
//! outgoing client requests and verifies requests captured by the mock
//! federation server.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use http::{HeaderMap, HeaderValue, Request};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{Signature as Pkcs1v15Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::client::ActorClient;
use crate::error::HarnessError;
use crate::media::{split_unquoted, unquote};
use crate::metrics::SIGNATURES_VERIFIED_TOTAL;

/// Pseudo-header covering the method and path
pub const REQUEST_TARGET: &str = "(request-target)";

/// Headers signed when the caller does not choose
pub const DEFAULT_SIGNED_HEADERS: [&str; 4] = [REQUEST_TARGET, "host", "date", "digest"];

/// Signature failure reasons
///
/// All variants display as an invalid signature to callers; the variant
/// itself is kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("no signature found in headers")]
    Missing,

    #[error("malformed signature field '{0}'")]
    MalformedField(String),

    #[error("duplicate field {0} in signature")]
    DuplicateField(String),

    #[error("{0} missing in signature")]
    MissingField(&'static str),

    #[error("created time is in the future")]
    CreatedInFuture,

    #[error("expires time is in the past")]
    Expired,

    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("header {0} not found in request")]
    MissingHeader(String),

    #[error("header {0} is not valid visible ASCII")]
    MalformedHeader(String),

    #[error("headers listed in signature mismatch with request: expected '{expected}', got '{actual}'")]
    HeaderMismatch { expected: String, actual: String },

    #[error("digest of body is invalid")]
    DigestMismatch,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding")]
    Encoding,

    #[error("signature verification failed")]
    Verification,
}

/// Parsed `Signature` header fields, in header order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFields {
    fields: Vec<(String, String)>,
}

impl SignatureFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn key_id(&self) -> &str {
        self.get("keyId").unwrap_or_default()
    }

    pub fn signature(&self) -> &str {
        self.get("signature").unwrap_or_default()
    }

    pub fn algorithm(&self) -> Option<&str> {
        self.get("algorithm")
    }

    /// Signed header names; `(created)` when the field is absent
    pub fn headers(&self) -> Vec<String> {
        match self.get("headers") {
            Some(headers) => headers
                .split_whitespace()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            None => vec!["(created)".to_string()],
        }
    }

    pub fn created(&self) -> Option<i64> {
        self.get("created").and_then(|v| v.parse().ok())
    }

    pub fn expires(&self) -> Option<i64> {
        self.get("expires").and_then(|v| v.parse().ok())
    }
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
///
/// # Errors
/// - duplicate field names
/// - missing `keyId` or `signature`
/// - `created` in the future or `expires` in the past
pub fn parse_signature_header(header: &str) -> Result<SignatureFields, SignatureError> {
    let mut fields: Vec<(String, String)> = Vec::new();

    for part in split_unquoted(header, ',') {
        if part.is_empty() {
            continue;
        }
        let (name, value) = part
            .split_once('=')
            .ok_or_else(|| SignatureError::MalformedField(part.to_string()))?;
        let name = name.trim();
        if fields.iter().any(|(existing, _)| existing == name) {
            return Err(SignatureError::DuplicateField(name.to_string()));
        }
        fields.push((name.to_string(), unquote(value.trim())));
    }

    let parsed = SignatureFields { fields };

    if parsed.get("keyId").is_none() {
        return Err(SignatureError::MissingField("keyId"));
    }
    if parsed.get("signature").is_none() {
        return Err(SignatureError::MissingField("signature"));
    }

    let now = chrono::Utc::now().timestamp();
    if let Some(created) = parsed.get("created") {
        let created: i64 = created
            .parse()
            .map_err(|_| SignatureError::MalformedField(format!("created={}", created)))?;
        if created > now {
            return Err(SignatureError::CreatedInFuture);
        }
    }
    if let Some(expires) = parsed.get("expires") {
        let expires: i64 = expires
            .parse()
            .map_err(|_| SignatureError::MalformedField(format!("expires={}", expires)))?;
        if expires < now {
            return Err(SignatureError::Expired);
        }
    }

    Ok(parsed)
}

/// Locate and parse the signature of a request
///
/// Reads `Signature`, falling back to `Authorization: Signature <params>`.
pub fn signature_fields_from_headers(
    headers: &HeaderMap,
) -> Result<SignatureFields, SignatureError> {
    if let Some(value) = headers.get("signature") {
        let value = value
            .to_str()
            .map_err(|_| SignatureError::MalformedHeader("signature".to_string()))?;
        return parse_signature_header(value);
    }

    if let Some(value) = headers.get(http::header::AUTHORIZATION) {
        let value = value
            .to_str()
            .map_err(|_| SignatureError::MalformedHeader("authorization".to_string()))?;
        if let Some((scheme, params)) = value.split_once(' ') {
            if scheme.eq_ignore_ascii_case("signature") {
                return parse_signature_header(params);
            }
        }
    }

    Err(SignatureError::Missing)
}

/// Add any of `Date`, `Digest`, `Host` named in `headers` that the request
/// does not already carry
pub fn synthesize_headers<S: AsRef<str>>(
    request: &mut Request<Vec<u8>>,
    headers: &[S],
) -> Result<(), SignatureError> {
    for header in headers {
        let name = header.as_ref().to_ascii_lowercase();
        if request.headers().contains_key(name.as_str()) {
            continue;
        }
        let value = match name.as_str() {
            "date" => http_date(),
            "digest" => generate_digest(request.body()),
            "host" => request
                .uri()
                .authority()
                .map(|authority| authority.as_str().to_string())
                .ok_or_else(|| SignatureError::MissingHeader("host".to_string()))?,
            _ => continue,
        };
        let value =
            HeaderValue::from_str(&value).map_err(|_| SignatureError::MalformedHeader(name.clone()))?;
        let header_name = http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| SignatureError::MalformedHeader(name.clone()))?;
        request.headers_mut().insert(header_name, value);
    }
    Ok(())
}

/// Build the signing string and the space-joined header list actually used
///
/// `fields` supplies the values of the `(created)` and `(expires)`
/// pseudo-headers when verifying.
pub fn construct_signature_data<S: AsRef<str>>(
    request: &Request<Vec<u8>>,
    headers: &[S],
    fields: Option<&SignatureFields>,
) -> Result<(String, String), SignatureError> {
    let mut signing_parts = Vec::with_capacity(headers.len());
    let mut used_headers = Vec::with_capacity(headers.len());

    for header in headers {
        let name = header.as_ref().to_ascii_lowercase();
        let value = match name.as_str() {
            REQUEST_TARGET => request_target(request),
            "(created)" | "(expires)" => {
                let field = &name[1..name.len() - 1];
                fields
                    .and_then(|f| f.get(field))
                    .ok_or_else(|| SignatureError::MissingHeader(name.clone()))?
                    .to_string()
            }
            _ => request
                .headers()
                .get(name.as_str())
                .ok_or_else(|| SignatureError::MissingHeader(name.clone()))?
                .to_str()
                .map_err(|_| SignatureError::MalformedHeader(name.clone()))?
                .to_string(),
        };
        signing_parts.push(format!("{}: {}", name, value));
        used_headers.push(name);
    }

    Ok((signing_parts.join("\n"), used_headers.join(" ")))
}

/// Sign an HTTP request in place
///
/// Missing `Date`, `Digest`, and `Host` headers named in `headers` are
/// synthesized first, then a `Signature` header is attached.
///
/// # Example
/// ```ignore
/// let mut request = http::Request::post("https://remote.example/inbox")
///     .body(body)?;
/// sign_request(&mut request, "https://me.example/actor#main-key", &key, &DEFAULT_SIGNED_HEADERS)?;
/// ```
pub fn sign_request<S: AsRef<str>>(
    request: &mut Request<Vec<u8>>,
    key_id: &str,
    private_key: &RsaPrivateKey,
    headers: &[S],
) -> Result<(), SignatureError> {
    synthesize_headers(request, headers)?;
    let (signing_string, headers_text) = construct_signature_data(request, headers, None)?;

    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, signing_string.as_bytes());
    let signature_b64 = BASE64.encode(signature.to_bytes());

    let signature_header = [
        format!("keyId=\"{}\"", key_id),
        "algorithm=\"rsa-sha256\"".to_string(),
        format!("headers=\"{}\"", headers_text),
        format!("signature=\"{}\"", signature_b64),
    ]
    .join(",");

    let value = HeaderValue::from_str(&signature_header)
        .map_err(|_| SignatureError::MalformedHeader("signature".to_string()))?;
    request.headers_mut().insert("signature", value);

    tracing::debug!(key_id, headers = %headers_text, "Signed request");
    Ok(())
}

/// Verify a request against an expected signed-header list
///
/// # Returns
/// The `keyId` asserted by the signature
///
/// # Errors
/// - `HeaderMismatch` if the signature covers a different header list
///   (order-sensitive)
/// - `DigestMismatch` if `digest` is signed and does not match the body
/// - `Verification` if the RSA signature does not match
pub fn verify_request<S: AsRef<str>>(
    request: &Request<Vec<u8>>,
    expected_headers: &[S],
    public_key: &RsaPublicKey,
) -> Result<String, SignatureError> {
    let result = verify_with_fields(request, expected_headers, public_key);
    record_verification(&result);
    result
}

/// Verify a request using the header list the signature itself claims
pub fn verify_signed_request(
    request: &Request<Vec<u8>>,
    public_key: &RsaPublicKey,
) -> Result<String, SignatureError> {
    let result = signature_fields_from_headers(request.headers())
        .and_then(|fields| verify_with_fields(request, fields.headers().as_slice(), public_key));
    record_verification(&result);
    result
}

fn verify_with_fields<S: AsRef<str>>(
    request: &Request<Vec<u8>>,
    expected_headers: &[S],
    public_key: &RsaPublicKey,
) -> Result<String, SignatureError> {
    let fields = signature_fields_from_headers(request.headers())?;

    match fields.algorithm() {
        None | Some("rsa-sha256") | Some("hs2019") => {}
        Some(other) => return Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
    }

    let expected = expected_headers
        .iter()
        .map(|h| h.as_ref().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let claimed = fields.headers().join(" ");
    if claimed != expected {
        return Err(SignatureError::HeaderMismatch {
            expected,
            actual: claimed,
        });
    }

    let (signing_string, _) = construct_signature_data(request, expected_headers, Some(&fields))?;

    if expected.split(' ').any(|h| h == "digest") {
        let digest = request
            .headers()
            .get("digest")
            .ok_or_else(|| SignatureError::MissingHeader("digest".to_string()))?;
        if digest.as_bytes() != generate_digest(request.body()).as_bytes() {
            return Err(SignatureError::DigestMismatch);
        }
    }

    let signature_bytes = BASE64
        .decode(fields.signature())
        .map_err(|_| SignatureError::Encoding)?;
    let signature = Pkcs1v15Signature::try_from(signature_bytes.as_slice())
        .map_err(|_| SignatureError::Encoding)?;

    let verifier = VerifyingKey::<Sha256>::new(public_key.clone());
    verifier
        .verify(signing_string.as_bytes(), &signature)
        .map_err(|_| SignatureError::Verification)?;

    Ok(fields.key_id().to_string())
}

fn record_verification(result: &Result<String, SignatureError>) {
    match result {
        Ok(key_id) => {
            SIGNATURES_VERIFIED_TOTAL.with_label_values(&["valid"]).inc();
            tracing::debug!(%key_id, "Signature verified");
        }
        Err(error) => {
            SIGNATURES_VERIFIED_TOTAL.with_label_values(&["invalid"]).inc();
            tracing::debug!(%error, "Signature rejected");
        }
    }
}

/// `(request-target)` value: lowercased method and path with query
fn request_target(request: &Request<Vec<u8>>) -> String {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{} {}", request.method().as_str().to_lowercase(), path)
}

/// Current time in the RFC 5322 form HTTP uses
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Generate SHA-256 digest for body
///
/// # Returns
/// `SHA-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let hash = hasher.finalize();
    format!("SHA-256={}", BASE64.encode(hash))
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}

/// Parse an RSA public key from SPKI or PKCS#1 PEM
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, SignatureError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))
}

/// Parse an RSA private key from PKCS#8 or PKCS#1 PEM
pub fn private_key_from_pem(pem: &str) -> Result<RsaPrivateKey, SignatureError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))
}

/// Fetch the public key a keyId refers to
///
/// Dereferences the actor document (keyId without fragment) and returns its
/// `publicKey.publicKeyPem`. When the keyId has a fragment, the actor must
/// advertise exactly that key id.
pub fn fetch_public_key(client: &dyn ActorClient, key_id: &str) -> Result<String, HarnessError> {
    let actor_url = key_id.split('#').next().unwrap_or(key_id);
    let actor = client.get_json(actor_url)?;

    let public_key = actor.get("publicKey").ok_or_else(|| {
        HarnessError::Validation(format!("Missing publicKey in actor {}", actor_url))
    })?;

    if key_id.contains('#') {
        let advertised_key_id = public_key
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| HarnessError::Validation("Missing publicKey.id in actor".to_string()))?;

        if advertised_key_id != key_id {
            return Err(HarnessError::Validation(
                "Signature keyId does not match actor public key id".to_string(),
            ));
        }
    }

    let public_key_pem = public_key
        .get("publicKeyPem")
        .and_then(|pem| pem.as_str())
        .ok_or_else(|| HarnessError::Validation("Missing publicKeyPem in actor".to_string()))?;

    Ok(public_key_pem.to_string())
}
