//! fedisim - ActivityPub federation test harness
//!
//! Simulates the remote side of federation for conformance tests run
//! against a server-under-test.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Test code / TestSession                   │
//! │  - remote actors, communicator, poller                      │
//! └─────────────────────────────────────────────────────────────┘
//!            │ serve / inspect               │ GET / POST
//! ┌──────────────────────────────┐  ┌─────────────────────────────┐
//! │  Mock federation server      │  │  HttpActor (reqwest)        │
//! │  - documents, request log    │  │  - HTTP Signatures / token  │
//! │  - observers, post waiters   │  │  - collection traversal     │
//! └──────────────────────────────┘  └─────────────────────────────┘
//!            ▲                                 │
//!            └────── server-under-test ◄───────┘
//! ```
//!
//! # Modules
//!
//! - `remote`: mock federation server, observers, simulated actors
//! - `federation`: HTTP Signatures, key pairs, authenticators
//! - `client`: HTTP client abstraction used to reach the server-under-test
//! - `collection`: collection traversal and eventual-consistency polling
//! - `media`: Accept / Content-Type parsing
//! - `vocab`: ActivityStreams constants and helpers
//! - `config`: Configuration management
//! - `error`: Error types

pub mod client;
pub mod collection;
pub mod config;
pub mod error;
pub mod federation;
pub mod media;
pub mod metrics;
pub mod remote;
pub mod vocab;

use std::sync::Arc;

pub use error::{HarnessError, Result};

use collection::EventualConsistencyPoller;
use config::HarnessConfig;
use federation::KeyPairCache;
use remote::{MockFederationServer, RemoteActor, RemoteCommunicator};

/// Resources shared by the tests of one session
///
/// Owns the running mock server and the key-pair cache; everything handed
/// out holds `Arc` clones of them.
pub struct TestSession {
    pub config: Arc<HarnessConfig>,
    pub server: Arc<MockFederationServer>,
    pub keys: Arc<KeyPairCache>,
}

impl TestSession {
    /// Validate `config` and start the mock server
    pub fn start(config: HarnessConfig) -> Result<Self> {
        config.validate()?;

        let mut server = MockFederationServer::new(config.remote.host.clone(), config.remote.port);
        if let Some(base_url) = &config.remote.public_base_url {
            server = server.with_public_base_url(base_url.clone());
        }
        server.start()?;

        Ok(Self {
            keys: Arc::new(KeyPairCache::with_key_size(config.remote.key_bits)),
            server: Arc::new(server),
            config: Arc::new(config),
        })
    }

    /// Signing actor named `name`, served on the mock server
    pub fn remote_actor(&self, name: &str) -> Result<RemoteActor> {
        RemoteActor::new(self.server.clone(), &self.keys, &self.config.client, name, true)
    }

    /// Actor whose requests carry no signature
    pub fn unauthenticated_actor(&self, name: &str) -> Result<RemoteActor> {
        RemoteActor::new(self.server.clone(), &self.keys, &self.config.client, name, false)
    }

    pub fn communicator(&self) -> RemoteCommunicator {
        RemoteCommunicator::from_config(self.server.clone(), &self.config.remote)
    }

    pub fn poller(&self) -> EventualConsistencyPoller {
        EventualConsistencyPoller::from_config(&self.config.polling)
    }

    /// Clear served documents, the request log and observers between tests
    pub fn reset(&self) {
        self.server.reset();
    }

    pub fn base_url(&self) -> Result<String> {
        self.server.base_url()
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        self.server.stop();
    }
}
