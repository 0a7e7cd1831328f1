//! Simulated remote federation peer
//!
//! Handles:
//! - Serving actor, object and collection documents
//! - Recording requests sent by the server-under-test
//! - Waiting for deliveries and observing requests

mod actor;
mod communicator;
mod observer;
mod server;

pub use actor::RemoteActor;
pub use communicator::RemoteCommunicator;
pub use observer::{LoggingObserver, RequestNotifier, RequestObserver, RequestRecorder};
pub use server::{MockFederationServer, RecordedRequest};
