//! ActivityStreams vocabulary helpers
//!
//! Constants and small accessors over untyped JSON-LD documents. Documents
//! stay as `serde_json::Value` because conformance tests must be able to
//! observe (and send) anything a server produces, including invalid shapes.

use serde_json::Value;

pub const PUBLIC_URI: &str = "https://www.w3.org/ns/activitystreams#Public";
pub const AS2_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const SECURITY_CONTEXT: &str = "https://w3id.org/security/v1";

pub const DEFAULT_AP_MEDIA_TYPE: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";
pub const ACTIVITY_JSON_MEDIA_TYPE: &str = "application/activity+json";

/// Values that address the public collection
pub const PUBLIC_VALUES: [&str; 3] = ["Public", "as:Public", PUBLIC_URI];

/// Addressing properties of an activity or object
pub const RECIPIENT_FIELDS: [&str; 5] = ["to", "bto", "cc", "bcc", "audience"];

pub const COLLECTION_TYPES: [&str; 4] = [
    "Collection",
    "CollectionPage",
    "OrderedCollection",
    "OrderedCollectionPage",
];

/// Marker type for deleted objects
pub const TOMBSTONE: &str = "Tombstone";

/// Identifier of a reference: the `id` of an object or the string itself
pub fn get_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) => Some(id),
        Value::Object(map) => map.get("id").and_then(Value::as_str),
        _ => None,
    }
}

/// `type` normalised to a list
pub fn get_types(value: &Value) -> Vec<&str> {
    match value.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

pub fn is_type(value: &Value, activity_type: &str) -> bool {
    get_types(value).contains(&activity_type)
}

pub fn is_type_any(value: &Value, activity_types: &[&str]) -> bool {
    activity_types.iter().any(|t| is_type(value, t))
}

pub fn is_collection(value: &Value) -> bool {
    is_type_any(value, &COLLECTION_TYPES)
}

pub fn is_ordered_collection(value: &Value) -> bool {
    is_type_any(value, &["OrderedCollection", "OrderedCollectionPage"])
}

pub fn is_public(value: &str) -> bool {
    PUBLIC_VALUES.contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_id_handles_objects_and_strings() {
        assert_eq!(get_id(&json!("https://a.example/1")), Some("https://a.example/1"));
        assert_eq!(
            get_id(&json!({"id": "https://a.example/2", "type": "Note"})),
            Some("https://a.example/2")
        );
        assert_eq!(get_id(&json!({"type": "Note"})), None);
        assert_eq!(get_id(&json!(42)), None);
    }

    #[test]
    fn types_may_be_scalar_or_list() {
        let single = json!({"type": "OrderedCollection"});
        let multiple = json!({"type": ["Collection", "ex:Custom"]});

        assert!(is_ordered_collection(&single));
        assert!(is_collection(&multiple));
        assert!(!is_ordered_collection(&multiple));
        assert!(is_type(&multiple, "ex:Custom"));
        assert!(get_types(&json!({})).is_empty());
    }

    #[test]
    fn public_addressing_forms() {
        assert!(is_public("as:Public"));
        assert!(is_public(PUBLIC_URI));
        assert!(!is_public("https://example.com/followers"));
    }
}
