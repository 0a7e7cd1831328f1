//! Federation authentication
//!
//! Handles:
//! - HTTP Signatures (signing and verification)
//! - Key pair generation and caching
//! - Authenticators attached to outgoing requests

mod auth;
mod key_cache;
mod signature;

pub use auth::{Authenticator, SignatureAuth, TokenAuth};
pub use key_cache::{KEY_BITS, KeyPair, KeyPairCache, generate_key_pair};
pub use signature::{
    DEFAULT_SIGNED_HEADERS, REQUEST_TARGET, SignatureError, SignatureFields,
    construct_signature_data, fetch_public_key, generate_digest, http_date, key_id_matches_actor,
    parse_signature_header, private_key_from_pem, public_key_from_pem, sign_request,
    signature_fields_from_headers, synthesize_headers, verify_request, verify_signed_request,
};
