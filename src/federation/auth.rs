//! Request authenticators
//!
//! Attached to an [`HttpActor`](crate::client::HttpActor) and applied to
//! every outgoing request just before it is sent.

use http::{HeaderValue, Request};
use rsa::RsaPrivateKey;

use super::signature::{DEFAULT_SIGNED_HEADERS, private_key_from_pem, sign_request};
use crate::error::HarnessError;

/// Adds credentials to an outgoing request
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, request: &mut Request<Vec<u8>>) -> Result<(), HarnessError>;
}

/// HTTP Signature authentication
pub struct SignatureAuth {
    key_id: String,
    private_key: RsaPrivateKey,
    headers: Vec<String>,
}

impl SignatureAuth {
    /// Sign with the default header list
    /// (`(request-target) host date digest`)
    pub fn new(key_id: impl Into<String>, private_key_pem: &str) -> Result<Self, HarnessError> {
        Ok(Self {
            key_id: key_id.into(),
            private_key: private_key_from_pem(private_key_pem)?,
            headers: DEFAULT_SIGNED_HEADERS.iter().map(|h| h.to_string()).collect(),
        })
    }

    /// Override the signed header list; order is preserved in the signature
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl Authenticator for SignatureAuth {
    fn authenticate(&self, request: &mut Request<Vec<u8>>) -> Result<(), HarnessError> {
        sign_request(request, &self.key_id, &self.private_key, self.headers.as_slice())?;
        Ok(())
    }
}

/// Bearer token authentication
pub struct TokenAuth {
    header: String,
}

impl TokenAuth {
    pub fn new(token: &str) -> Self {
        Self {
            header: format!("Bearer {}", token),
        }
    }
}

impl Authenticator for TokenAuth {
    fn authenticate(&self, request: &mut Request<Vec<u8>>) -> Result<(), HarnessError> {
        let value = HeaderValue::from_str(&self.header)
            .map_err(|_| HarnessError::Validation("Invalid bearer token".to_string()))?;
        request
            .headers_mut()
            .insert(http::header::AUTHORIZATION, value);
        Ok(())
    }
}
