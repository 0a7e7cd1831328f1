//! Test-facing view of the mock server's request log
//!
//! Applies the configured post-wait timeout so test code does not repeat
//! it at every call site.

use std::sync::Arc;
use std::time::Duration;

use super::server::{MockFederationServer, RecordedRequest};
use crate::config::RemoteConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct RemoteCommunicator {
    server: Arc<MockFederationServer>,
    timeout: Option<Duration>,
}

impl RemoteCommunicator {
    /// `None` waits without a deadline
    pub fn new(server: Arc<MockFederationServer>, timeout: Option<Duration>) -> Self {
        Self { server, timeout }
    }

    pub fn from_config(server: Arc<MockFederationServer>, config: &RemoteConfig) -> Self {
        Self::new(server, config.post_wait_timeout())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn server(&self) -> &Arc<MockFederationServer> {
        &self.server
    }

    pub fn wait_for_post(&self) -> Result<bool> {
        self.server.wait_for_post(self.timeout)
    }

    pub fn find_request<F>(&self, predicate: F) -> Result<Option<RecordedRequest>>
    where
        F: Fn(&RecordedRequest) -> bool,
    {
        self.server.find_request(predicate, self.timeout)
    }

    /// First POST whose activity has the given `type`
    pub fn find_activity(&self, activity_type: &str) -> Result<Option<RecordedRequest>> {
        self.find_request(|r| {
            r.is_post()
                && r
                    .json
                    .as_ref()
                    .is_some_and(|json| crate::vocab::is_type(json, activity_type))
        })
    }

    pub fn most_recent_post(&self) -> Result<Option<RecordedRequest>> {
        self.server.most_recent_post(self.timeout)
    }

    pub fn requests(&self) -> Result<Vec<RecordedRequest>> {
        self.server.requests()
    }
}
