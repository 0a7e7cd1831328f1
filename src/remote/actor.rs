//! Simulated remote actors
//!
//! A [`RemoteActor`] lives on the mock federation server: its profile,
//! inbox and outbox are served from there, and the requests it sends to the
//! server-under-test are signed with its own key.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{Map, Value, json};
use ulid::Ulid;

use super::observer::RequestNotifier;
use super::server::MockFederationServer;
use crate::client::{ActorClient, HttpActor, HttpResponse};
use crate::config::ClientConfig;
use crate::error::{HarnessError, Result};
use crate::federation::{Authenticator, KeyPair, KeyPairCache, SignatureAuth};
use crate::vocab::{AS2_CONTEXT, RECIPIENT_FIELDS, SECURITY_CONTEXT, TOMBSTONE, get_types};

/// Actor hosted on the mock federation server
pub struct RemoteActor {
    server: Arc<MockFederationServer>,
    client: HttpActor,
    base_url: String,
    id: String,
    key_id: String,
    key_pair: Arc<KeyPair>,
    profile: Value,
    notifier: Mutex<Option<Arc<RequestNotifier>>>,
}

impl RemoteActor {
    /// Create the actor and serve its profile, inbox and outbox
    ///
    /// The server must be running. With `authenticated = false` the actor
    /// sends unsigned requests.
    pub fn new(
        server: Arc<MockFederationServer>,
        keys: &KeyPairCache,
        client_config: &ClientConfig,
        name: &str,
        authenticated: bool,
    ) -> Result<Self> {
        let base_url = server.base_url()?;
        let id = format!("{}/{}", base_url, name);
        let key_id = format!("{}#main-key", id);
        let key_pair = keys.get_or_generate(name)?;

        let authenticator: Option<Arc<dyn Authenticator>> = if authenticated {
            Some(Arc::new(SignatureAuth::new(
                key_id.clone(),
                &key_pair.private_key_pem,
            )?))
        } else {
            None
        };
        let client = HttpActor::new(client_config, authenticator)?;

        let profile = json!({
            "@context": [AS2_CONTEXT, SECURITY_CONTEXT],
            "id": id,
            "type": "Person",
            "inbox": format!("{}/inbox", id),
            "outbox": format!("{}/outbox", id),
            "preferredUsername": name,
            "publicKey": {
                "id": key_id,
                "owner": id,
                "publicKeyPem": key_pair.public_key_pem,
            },
        });

        let actor = Self {
            server,
            client,
            base_url,
            id,
            key_id,
            key_pair,
            profile,
            notifier: Mutex::new(None),
        };
        actor.server.serve_objects([
            actor.profile.clone(),
            actor.empty_ordered_collection("inbox"),
            actor.empty_ordered_collection("outbox"),
        ])?;

        tracing::debug!(actor = %actor.id, authenticated, "Remote actor created");
        Ok(actor)
    }

    fn empty_ordered_collection(&self, name: &str) -> Value {
        json!({
            "id": format!("{}/{}", self.id, name),
            "type": "OrderedCollection",
            "attributedTo": self.id,
            "totalItems": 0,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    pub fn profile(&self) -> &Value {
        &self.profile
    }

    pub fn inbox(&self) -> String {
        format!("{}/inbox", self.id)
    }

    pub fn outbox(&self) -> String {
        format!("{}/outbox", self.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.is_authenticated()
    }

    /// Fresh URI on the mock server, namespaced by the object's types
    pub fn make_uri(&self, object: Option<&Value>) -> String {
        let namespace = object
            .map(|o| get_types(o).join("_").to_lowercase())
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| "object".to_string());
        format!("{}/{}/{}", self.base_url, namespace, new_token())
    }

    /// Object with `@context` and `type` (Note) defaulted
    pub fn make_object(&self, properties: Value, with_id: bool) -> Value {
        let mut object = into_map(properties);
        object
            .entry("@context")
            .or_insert_with(|| json!(AS2_CONTEXT));
        object.entry("type").or_insert_with(|| json!("Note"));
        let mut object = Value::Object(object);
        if with_id && object.get("id").is_none() {
            let uri = self.make_uri(Some(&object));
            object["id"] = json!(uri);
        }
        object
    }

    /// Activity by this actor, `type` defaulting to Create
    pub fn make_activity(&self, properties: Value, with_id: bool) -> Value {
        let mut activity = into_map(properties);
        activity
            .entry("@context")
            .or_insert_with(|| json!(AS2_CONTEXT));
        let missing_type = activity
            .get("type")
            .is_none_or(|t| t.is_null() || t.as_str() == Some(""));
        if missing_type {
            activity.insert("type".to_string(), json!("Create"));
        }
        activity
            .entry("actor")
            .or_insert_with(|| json!(self.id));
        let mut activity = Value::Object(activity);
        if with_id && activity.get("id").is_none() {
            let uri = self.make_uri(Some(&activity));
            activity["id"] = json!(uri);
        }
        activity
    }

    /// Unpaged collection; `items` or `orderedItems` depending on type
    pub fn make_collection(&self, properties: Value, ordered: bool, name: &str) -> Value {
        let collection_type = if ordered {
            "OrderedCollection"
        } else {
            "Collection"
        };
        let items_key = if ordered { "orderedItems" } else { "items" };
        let mut collection = json!({
            "id": format!("{}/{}/{}", self.id, name, new_token()),
            "type": collection_type,
            items_key: [],
            "totalItems": 0,
        });
        if let (Some(target), Value::Object(properties)) = (collection.as_object_mut(), properties) {
            target.extend(properties);
        }
        collection
    }

    /// Make and serve a collection
    pub fn setup_collection(&self, properties: Value, ordered: bool, name: &str) -> Result<Value> {
        let collection = self.make_collection(properties, ordered, name);
        self.server.serve_objects([collection.clone()])?;
        Ok(collection)
    }

    /// Make and serve an object
    pub fn setup_object(&self, properties: Value) -> Result<Value> {
        let object = self.make_object(properties, true);
        self.server.serve_objects([object.clone()])?;
        Ok(object)
    }

    /// Make and serve an activity with id `<actor>/<Type>/<token>`
    ///
    /// Addressing on an embedded `object` is copied onto the activity when
    /// the activity does not set that field itself.
    pub fn setup_activity(&self, properties: Value) -> Result<Value> {
        let mut properties = into_map(properties);
        let addressing: Vec<(String, Value)> = match properties.get("object") {
            Some(Value::Object(object)) => RECIPIENT_FIELDS
                .iter()
                .filter(|field| !properties.contains_key(**field))
                .filter_map(|field| {
                    object
                        .get(*field)
                        .map(|value| (field.to_string(), value.clone()))
                })
                .collect(),
            _ => Vec::new(),
        };
        properties.extend(addressing);
        if !properties.contains_key("id") {
            let activity_type = match properties.get("type") {
                Some(Value::Array(types)) => types
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("_"),
                Some(Value::String(t)) if !t.is_empty() => t.clone(),
                _ => "Create".to_string(),
            };
            properties.insert(
                "id".to_string(),
                json!(format!("{}/{}/{}", self.id, activity_type, new_token())),
            );
        }
        let activity = self.make_activity(Value::Object(properties), true);
        self.server.serve_objects([activity.clone()])?;
        Ok(activity)
    }

    /// Replace the object at `uri` with a Tombstone (served as 410)
    pub fn delete_object(&self, uri: &str) -> Result<()> {
        self.server
            .serve_objects([json!({"id": uri, "type": TOMBSTONE})])
    }

    /// Start watching for the next request to the mock server
    pub fn expect_request(&self) {
        let notifier = Arc::new(RequestNotifier::new());
        self.server.add_observer(notifier.clone());
        *self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(notifier);
    }

    /// Wait for a request after [`expect_request`](Self::expect_request)
    ///
    /// # Errors
    /// `Validation` if `expect_request` was never called
    pub fn wait_for_request(&self, timeout: Duration) -> Result<bool> {
        let notifier = self
            .notifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                HarnessError::Validation("wait_for_request called before expect_request".to_string())
            })?;
        Ok(notifier.wait(timeout))
    }
}

impl ActorClient for RemoteActor {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.client.get(url)
    }

    fn post(&self, url: &str, body: &Value) -> Result<HttpResponse> {
        self.client.post(url, body)
    }
}

fn into_map(properties: Value) -> Map<String, Value> {
    match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn new_token() -> String {
    Ulid::new().to_string().to_lowercase()
}
