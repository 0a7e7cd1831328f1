//! Request observers
//!
//! Hooks the mock server calls for every request it handles, after the
//! request is logged.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use http::Method;

use super::server::RecordedRequest;

/// Callback invoked for each request the mock server handles
pub trait RequestObserver: Send + Sync {
    fn on_request_received(&self, method: &Method, request: &RecordedRequest);
}

/// Signals waiters when a matching request arrives
///
/// Counts matching requests from the moment it is registered, so a request
/// arriving before `wait` is called is not missed.
pub struct RequestNotifier {
    method: Option<Method>,
    received: Mutex<usize>,
    arrived: Condvar,
}

impl Default for RequestNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestNotifier {
    /// Notifier for requests of any method
    pub fn new() -> Self {
        Self {
            method: None,
            received: Mutex::new(0),
            arrived: Condvar::new(),
        }
    }

    /// Notifier that only counts requests with `method`
    pub fn for_method(method: Method) -> Self {
        Self {
            method: Some(method),
            ..Self::new()
        }
    }

    pub fn received(&self) -> usize {
        *self.received.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until at least one matching request has arrived
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wait_for(1, timeout)
    }

    /// Wait until at least `count` matching requests have arrived
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let received = self.received.lock().unwrap_or_else(PoisonError::into_inner);
        let (received, _) = self
            .arrived
            .wait_timeout_while(received, timeout, |received| *received < count)
            .unwrap_or_else(PoisonError::into_inner);
        *received >= count
    }
}

impl RequestObserver for RequestNotifier {
    fn on_request_received(&self, method: &Method, _request: &RecordedRequest) {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return;
        }
        let mut received = self.received.lock().unwrap_or_else(PoisonError::into_inner);
        *received += 1;
        self.arrived.notify_all();
    }
}

/// Keeps a copy of every request for later assertions
#[derive(Default)]
pub struct RequestRecorder {
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RequestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Paths requested with `method`, in arrival order
    pub fn paths(&self, method: &Method) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| &r.method == method)
            .map(|r| r.path.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RequestObserver for RequestRecorder {
    fn on_request_received(&self, _method: &Method, request: &RecordedRequest) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
    }
}

/// Emits a tracing event per request
pub struct LoggingObserver;

impl RequestObserver for LoggingObserver {
    fn on_request_received(&self, method: &Method, request: &RecordedRequest) {
        let activity_type = request
            .json
            .as_ref()
            .and_then(|json| json.get("type"))
            .and_then(|t| t.as_str())
            .unwrap_or("-");
        tracing::info!(
            %method,
            path = %request.path,
            sequence = request.sequence,
            activity_type,
            "Request received"
        );
    }
}
