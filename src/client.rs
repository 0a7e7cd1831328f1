//! HTTP client for talking to the server-under-test
//!
//! [`ActorClient`] is the seam collection traversal and key lookup go
//! through, so unit tests can substitute a mock. [`HttpActor`] is the real
//! implementation on top of a blocking reqwest client.

use std::sync::Arc;
use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, Request, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{HarnessError, Result};
use crate::federation::Authenticator;

/// Fully buffered HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Deserialize the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }
}

/// Something that can dereference and post ActivityPub documents
#[cfg_attr(test, mockall::automock)]
pub trait ActorClient: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse>;

    fn post(&self, url: &str, body: &Value) -> Result<HttpResponse>;

    /// GET and parse as JSON
    ///
    /// # Errors
    /// `HttpStatus` for any non-2xx response
    fn get_json(&self, url: &str) -> Result<Value> {
        let response = self.get(url)?;
        if !response.is_success() {
            return Err(HarnessError::HttpStatus {
                url: url.to_string(),
                status: response.status.as_u16(),
            });
        }
        response.json()
    }
}

/// Blocking HTTP client acting as a (possibly authenticated) actor
///
/// Must not be created or dropped from inside an async runtime.
pub struct HttpActor {
    client: reqwest::blocking::Client,
    authenticator: Option<Arc<dyn Authenticator>>,
    media_type: HeaderValue,
}

impl HttpActor {
    pub fn new(config: &ClientConfig, authenticator: Option<Arc<dyn Authenticator>>) -> Result<Self> {
        let media_type = HeaderValue::from_str(&config.media_type).map_err(|_| {
            HarnessError::Config(format!("Invalid client media type: {}", config.media_type))
        })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            authenticator,
            media_type,
        })
    }

    /// Client that sends requests without credentials
    pub fn unauthenticated(config: &ClientConfig) -> Result<Self> {
        Self::new(config, None)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticator.is_some()
    }

    fn send(&self, mut request: Request<Vec<u8>>) -> Result<HttpResponse> {
        if let Some(authenticator) = &self.authenticator {
            authenticator.authenticate(&mut request)?;
        }

        let method = request.method().clone();
        let url = request.uri().to_string();
        let request = reqwest::blocking::Request::try_from(request)?;
        let response = self.client.execute(request)?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes()?.to_vec();

        tracing::debug!(%method, %url, status = status.as_u16(), "Actor request completed");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl ActorClient for HttpActor {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let request = Request::get(url)
            .header(ACCEPT, self.media_type.clone())
            .body(Vec::new())
            .map_err(|e| HarnessError::Validation(format!("Invalid request to {}: {}", url, e)))?;
        self.send(request)
    }

    fn post(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        let request = Request::post(url)
            .header(CONTENT_TYPE, self.media_type.clone())
            .body(serde_json::to_vec(body)?)
            .map_err(|e| HarnessError::Validation(format!("Invalid request to {}: {}", url, e)))?;
        self.send(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: &[u8]) -> HttpResponse {
        HttpResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: body.to_vec(),
        }
    }

    struct StaticClient(u16, &'static [u8]);

    impl ActorClient for StaticClient {
        fn get(&self, _url: &str) -> Result<HttpResponse> {
            Ok(response(self.0, self.1))
        }

        fn post(&self, _url: &str, _body: &Value) -> Result<HttpResponse> {
            Ok(response(self.0, self.1))
        }
    }

    #[test]
    fn get_json_parses_success_body() {
        let client = StaticClient(200, br#"{"id":"http://x/a","type":"Person"}"#);
        let value = client.get_json("http://x/a").unwrap();
        assert_eq!(value, json!({"id": "http://x/a", "type": "Person"}));
    }

    #[test]
    fn get_json_rejects_error_status() {
        let client = StaticClient(410, br#"{"type":"Tombstone"}"#);
        match client.get_json("http://x/gone") {
            Err(HarnessError::HttpStatus { url, status }) => {
                assert_eq!(url, "http://x/gone");
                assert_eq!(status, 410);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn get_json_rejects_invalid_body() {
        let client = StaticClient(200, b"<html>");
        assert!(matches!(client.get_json("http://x/"), Err(HarnessError::Json(_))));
    }

    #[test]
    fn response_header_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("http://x/note/1"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/activity+json"));
        let response = HttpResponse {
            status: StatusCode::CREATED,
            headers,
            body: Vec::new(),
        };
        assert_eq!(response.location(), Some("http://x/note/1"));
        assert_eq!(response.content_type(), Some("application/activity+json"));
        assert!(response.is_success());
    }

    #[test]
    fn http_actor_rejects_bad_media_type() {
        let config = ClientConfig {
            media_type: "bad\nvalue".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            HttpActor::unauthenticated(&config),
            Err(HarnessError::Config(_))
        ));
    }
}
