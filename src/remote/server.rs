//! Mock federation server
//!
//! Stands in for "the rest of the network" during a test: serves registered
//! JSON documents (actor profiles, objects, collections) and records every
//! request the server-under-test sends.
//!
//! The listener runs on its own thread with a dedicated tokio runtime, so
//! callers use a plain blocking API whether or not they run inside async
//! code themselves.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::JoinHandle;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Router;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use serde_json::Value;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use super::observer::RequestObserver;
use crate::error::{HarnessError, Result};
use crate::metrics::MOCK_REQUESTS_TOTAL;
use crate::vocab::{ACTIVITY_JSON_MEDIA_TYPE, TOMBSTONE, get_id, is_type};

/// A request received by the mock server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Absolute URL as seen by the mock server
    pub url: String,
    /// Path including `?query`
    pub path: String,
    /// Parsed body; `None` for anything but POST
    pub json: Option<Value>,
    pub headers: HeaderMap,
    /// Raw body bytes, kept for digest and signature checks
    pub body: Vec<u8>,
    /// Receipt order, starting at 0 after each reset
    pub sequence: u64,
}

impl RecordedRequest {
    pub fn is_post(&self) -> bool {
        self.method == Method::POST
    }

    /// Rebuild the request in the form the signature verifier consumes
    pub fn to_http_request(&self) -> http::Request<Vec<u8>> {
        let mut request = http::Request::new(self.body.clone());
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self
            .path
            .parse()
            .unwrap_or_else(|_| Uri::from_static("/"));
        *request.headers_mut() = self.headers.clone();
        request
    }
}

#[derive(Default)]
struct ServerState {
    /// Path (+ query) -> document
    documents: HashMap<String, Value>,
    requests: Vec<RecordedRequest>,
    observers: Vec<Arc<dyn RequestObserver>>,
    next_sequence: u64,
}

impl ServerState {
    fn has_post(&self) -> bool {
        self.requests.iter().any(RecordedRequest::is_post)
    }

    fn record(&mut self, mut request: RecordedRequest) {
        request.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.requests.push(request);
    }
}

/// State shared between the listener thread and callers
///
/// `post_received` is always waited on and notified with `state` held.
struct Shared {
    state: Mutex<ServerState>,
    post_received: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RequestContext {
    shared: Arc<Shared>,
    base_url: String,
}

struct RunningServer {
    local_addr: SocketAddr,
    base_url: String,
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

/// Simulated remote federation peer
pub struct MockFederationServer {
    host: String,
    port: u16,
    public_base_url: Option<String>,
    shared: Arc<Shared>,
    running: Mutex<Option<RunningServer>>,
}

impl MockFederationServer {
    /// Create a stopped server for `host:port` (port 0 picks a free port)
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            public_base_url: None,
            shared: Arc::new(Shared {
                state: Mutex::new(ServerState::default()),
                post_received: Condvar::new(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Advertise `base_url` instead of `http://<host>:<port>`
    ///
    /// For when the server-under-test reaches the mock through a different
    /// name than the one it binds to (containers, proxies).
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Start the listener
    ///
    /// Returns once the socket is bound and accepting connections. Calling
    /// `start` on a running server returns the existing address.
    pub fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(server) = running.as_ref() {
            return Ok(server.local_addr);
        }

        let (ready_tx, ready_rx) = mpsc::sync_channel::<std::io::Result<SocketAddr>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let shared = self.shared.clone();
        let host = self.host.clone();
        let port = self.port;
        let public_base_url = self.public_base_url.clone();

        let thread = std::thread::Builder::new()
            .name("mock-federation".to_string())
            .spawn(move || serve(host, port, public_base_url, shared, ready_tx, shutdown_rx))?;

        let local_addr = match ready_rx.recv() {
            Ok(Ok(addr)) => addr,
            Ok(Err(error)) => {
                let _ = thread.join();
                return Err(error.into());
            }
            Err(_) => {
                let _ = thread.join();
                return Err(HarnessError::Io(std::io::Error::other(
                    "mock server thread exited before binding",
                )));
            }
        };

        let base_url = self
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, local_addr.port()));
        tracing::info!(%local_addr, %base_url, "Mock federation server started");

        *running = Some(RunningServer {
            local_addr,
            base_url,
            shutdown: shutdown_tx,
            thread,
        });
        Ok(local_addr)
    }

    /// Stop the listener and wait for its thread to exit
    pub fn stop(&self) {
        let server = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(server) = server {
            let _ = server.shutdown.send(());
            if server.thread.join().is_err() {
                tracing::error!("Mock federation server thread panicked");
            }
            tracing::info!(local_addr = %server.local_addr, "Mock federation server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|server| server.local_addr)
            .ok_or(HarnessError::ServerNotRunning)
    }

    /// Base URL of the running server, `http://<host>:<port>` unless a
    /// public base URL was configured
    pub fn base_url(&self) -> Result<String> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|server| server.base_url.clone())
            .ok_or(HarnessError::ServerNotRunning)
    }

    /// Register a document under the path (+ query) of `url`
    ///
    /// `url` may be absolute or a bare path. Later registrations for the
    /// same path replace earlier ones.
    pub fn serve_document(&self, url: &str, document: Value) -> Result<()> {
        let path = document_path(url)?;
        tracing::debug!(%path, "Serving document");
        self.shared.lock().documents.insert(path, document);
        Ok(())
    }

    /// Register documents under their own `id`
    pub fn serve_objects<I>(&self, objects: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        for object in objects {
            let id = get_id(&object)
                .map(str::to_string)
                .ok_or_else(|| HarnessError::Validation("Served object has no id".to_string()))?;
            self.serve_document(&id, object)?;
        }
        Ok(())
    }

    /// Copy of the document registered for `url`
    pub fn document(&self, url: &str) -> Result<Option<Value>> {
        let path = document_path(url)?;
        Ok(self.shared.lock().documents.get(&path).cloned())
    }

    /// Clear documents, the request log, and observers
    pub fn reset(&self) {
        let mut state = self.shared.lock();
        *state = ServerState::default();
        tracing::debug!("Mock federation server reset");
    }

    /// Observers are invoked for every request, in registration order
    pub fn add_observer(&self, observer: Arc<dyn RequestObserver>) {
        self.shared.lock().observers.push(observer);
    }

    /// Copy of the request log in receipt order
    pub fn requests(&self) -> Result<Vec<RecordedRequest>> {
        self.ensure_running()?;
        Ok(self.shared.lock().requests.clone())
    }

    /// Block until at least one POST has been received
    ///
    /// Returns immediately when a POST is already in the log. `None` or a
    /// zero timeout waits without a deadline.
    ///
    /// # Returns
    /// `true` if a POST is in the log, `false` on timeout
    pub fn wait_for_post(&self, timeout: Option<Duration>) -> Result<bool> {
        self.ensure_running()?;
        let state = self.shared.lock();
        let state = match timeout.filter(|t| !t.is_zero()) {
            Some(timeout) => {
                self.shared
                    .post_received
                    .wait_timeout_while(state, timeout, |s| !s.has_post())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .shared
                .post_received
                .wait_while(state, |s| !s.has_post())
                .unwrap_or_else(PoisonError::into_inner),
        };
        Ok(state.has_post())
    }

    /// First request (in receipt order) matching `predicate`
    ///
    /// # Errors
    /// `NoPostReceived` if no POST arrives within `timeout`
    pub fn find_request<F>(
        &self,
        predicate: F,
        timeout: Option<Duration>,
    ) -> Result<Option<RecordedRequest>>
    where
        F: Fn(&RecordedRequest) -> bool,
    {
        self.require_post(timeout)?;
        let state = self.shared.lock();
        Ok(state.requests.iter().find(|r| predicate(r)).cloned())
    }

    /// Latest POST received
    ///
    /// # Errors
    /// `NoPostReceived` if no POST arrives within `timeout`
    pub fn most_recent_post(&self, timeout: Option<Duration>) -> Result<Option<RecordedRequest>> {
        self.require_post(timeout)?;
        let state = self.shared.lock();
        Ok(state.requests.iter().rev().find(|r| r.is_post()).cloned())
    }

    fn require_post(&self, timeout: Option<Duration>) -> Result<()> {
        if self.wait_for_post(timeout)? {
            Ok(())
        } else {
            Err(HarnessError::NoPostReceived(timeout.unwrap_or_default()))
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(HarnessError::ServerNotRunning)
        }
    }
}

impl Drop for MockFederationServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Listener thread body
fn serve(
    host: String,
    port: u16,
    public_base_url: Option<String>,
    shared: Arc<Shared>,
    ready: mpsc::SyncSender<std::io::Result<SocketAddr>>,
    shutdown: oneshot::Receiver<()>,
) {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("mock-federation-worker")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            let _ = ready.send(Err(error));
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match tokio::net::TcpListener::bind((host.as_str(), port)).await {
            Ok(listener) => listener,
            Err(error) => {
                let _ = ready.send(Err(error));
                return;
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(error) => {
                let _ = ready.send(Err(error));
                return;
            }
        };

        let context = Arc::new(RequestContext {
            shared,
            base_url: public_base_url
                .unwrap_or_else(|| format!("http://{}:{}", host, local_addr.port())),
        });
        let app = Router::new()
            .fallback(handle_request)
            .layer(TraceLayer::new_for_http())
            .with_state(context);

        let _ = ready.send(Ok(local_addr));

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown.await;
            })
            .await;
        if let Err(error) = result {
            tracing::error!(%error, "Mock federation server failed");
        }
    });
}

async fn handle_request(
    State(context): State<Arc<RequestContext>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut recorded = RecordedRequest {
        method: method.clone(),
        url: format!("{}{}", context.base_url, path),
        path: path.clone(),
        json: None,
        headers,
        body: body.to_vec(),
        sequence: 0,
    };

    let response = match method {
        Method::GET => {
            let (document, observers) = {
                let mut state = context.shared.lock();
                state.record(recorded.clone());
                (state.documents.get(&path).cloned(), state.observers.clone())
            };
            let response = document_response(document);
            dispatch_observers(&context.shared, observers, &method, recorded);
            response
        }
        Method::POST => {
            let payload: Value = match serde_json::from_slice(&body) {
                Ok(payload) => payload,
                Err(error) => {
                    tracing::warn!(%path, %error, "Rejecting POST with invalid JSON body");
                    MOCK_REQUESTS_TOTAL.with_label_values(&["POST", "400"]).inc();
                    return StatusCode::BAD_REQUEST.into_response();
                }
            };
            recorded.json = Some(payload);

            let observers = {
                let mut state = context.shared.lock();
                state.record(recorded.clone());
                state.observers.clone()
            };
            let response =
                json_response(StatusCode::OK, "application/json", b"\"OK\"".to_vec());
            dispatch_observers(&context.shared, observers, &method, recorded);
            response
        }
        _ => {
            let observers = {
                let mut state = context.shared.lock();
                state.record(recorded.clone());
                state.observers.clone()
            };
            let response = StatusCode::METHOD_NOT_ALLOWED.into_response();
            dispatch_observers(&context.shared, observers, &method, recorded);
            response
        }
    };

    let status = response.status();
    MOCK_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), status.as_str()])
        .inc();
    tracing::debug!(%method, %path, status = status.as_u16(), "Mock request handled");
    response
}

fn document_response(document: Option<Value>) -> Response {
    let Some(document) = document else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let status = if is_type(&document, TOMBSTONE) {
        StatusCode::GONE
    } else {
        StatusCode::OK
    };

    match serde_json::to_vec(&document) {
        Ok(body) => json_response(status, ACTIVITY_JSON_MEDIA_TYPE, body),
        Err(error) => {
            tracing::error!(%error, "Failed to serialize served document");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn json_response(status: StatusCode, content_type: &'static str, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Hand the request to observers on the blocking pool so the response is
/// not held back by them. POST waiters are woken once every observer has
/// seen the delivery.
fn dispatch_observers(
    shared: &Arc<Shared>,
    observers: Vec<Arc<dyn RequestObserver>>,
    method: &Method,
    request: RecordedRequest,
) {
    let wakes_post_waiters = *method == Method::POST;
    if observers.is_empty() && !wakes_post_waiters {
        return;
    }
    let shared = Arc::clone(shared);
    let method = method.clone();
    tokio::task::spawn_blocking(move || {
        for observer in &observers {
            observer.on_request_received(&method, &request);
        }
        if wakes_post_waiters {
            let _state = shared.lock();
            shared.post_received.notify_all();
        }
    });
}

/// Lookup key for a document URL: path plus `?query` when present
fn document_path(url: &str) -> Result<String> {
    if url.starts_with('/') {
        return Ok(url.to_string());
    }
    let parsed = url::Url::parse(url)
        .map_err(|e| HarnessError::Validation(format!("Invalid document URL {}: {}", url, e)))?;
    Ok(match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_path_keeps_query() {
        assert_eq!(
            document_path("http://localhost:8000/actor/outbox?page=2").unwrap(),
            "/actor/outbox?page=2"
        );
        assert_eq!(document_path("http://localhost:8000/actor").unwrap(), "/actor");
        assert_eq!(document_path("/note/1").unwrap(), "/note/1");
        assert!(document_path("not a url").is_err());
    }

    #[test]
    fn accessors_fail_before_start() {
        let server = MockFederationServer::new("127.0.0.1", 0);
        assert!(matches!(server.requests(), Err(HarnessError::ServerNotRunning)));
        assert!(matches!(
            server.wait_for_post(Some(Duration::from_millis(10))),
            Err(HarnessError::ServerNotRunning)
        ));
        assert!(matches!(server.base_url(), Err(HarnessError::ServerNotRunning)));
    }

    #[test]
    fn serve_objects_overwrites_by_id() {
        let server = MockFederationServer::new("127.0.0.1", 0);
        server
            .serve_objects([
                json!({"id": "http://127.0.0.1:1/note/1", "type": "Note", "content": "a"}),
                json!({"id": "http://127.0.0.1:1/note/1", "type": "Note", "content": "b"}),
            ])
            .unwrap();

        let document = server.document("/note/1").unwrap().expect("document");
        assert_eq!(document["content"], "b");
    }

    #[test]
    fn serve_objects_requires_id() {
        let server = MockFederationServer::new("127.0.0.1", 0);
        assert!(matches!(
            server.serve_objects([json!({"type": "Note"})]),
            Err(HarnessError::Validation(_))
        ));
    }

    #[test]
    fn reset_clears_documents_and_log() {
        let server = MockFederationServer::new("127.0.0.1", 0);
        server.start().unwrap();
        server.serve_document("/a", json!({"id": "/a"})).unwrap();
        server.shared.lock().record(RecordedRequest {
            method: Method::POST,
            url: "http://127.0.0.1/inbox".to_string(),
            path: "/inbox".to_string(),
            json: Some(json!({})),
            headers: HeaderMap::new(),
            body: b"{}".to_vec(),
            sequence: 0,
        });

        server.reset();

        assert!(server.document("/a").unwrap().is_none());
        assert!(server.requests().unwrap().is_empty());
        assert!(!server.wait_for_post(Some(Duration::from_millis(10))).unwrap());
        server.stop();
    }

    #[test]
    fn recorded_request_rebuilds_http_request() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("localhost:9"));
        let recorded = RecordedRequest {
            method: Method::POST,
            url: "http://localhost:9/inbox?x=1".to_string(),
            path: "/inbox?x=1".to_string(),
            json: Some(json!({"type": "Like"})),
            headers,
            body: br#"{"type":"Like"}"#.to_vec(),
            sequence: 3,
        };

        let request = recorded.to_http_request();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path_and_query().unwrap().as_str(), "/inbox?x=1");
        assert_eq!(request.headers()["host"], "localhost:9");
        assert_eq!(request.body(), &recorded.body);
    }
}
