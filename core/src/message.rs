//! The JSON-RPC 2.0 message envelope.
//!
//! A single `Envelope` type models every shape on the wire: request,
//! notification, success response, and error response are all represented by
//! which optional fields are populated, matching the JSON-RPC 2.0 protocol
//! itself rather than introducing a Rust-side sum type that has to be kept in
//! sync with it (see `mgeisler-tokio-jsonrpc`'s `Message` enum, whose
//! trial-parse-each-variant decoding is fragile by comparison).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProtocolVersion;

impl Serialize for ProtocolVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(ProtocolVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version `{s}`, expected \"2.0\""
            )))
        }
    }
}

/// The `error` member of a JSON-RPC 2.0 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code (see [`crate::error`] for the standard ones).
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error payload.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

/// A single top-level JSON-RPC 2.0 message: request, notification, or
/// response. Either `method` is present (request or notification) or
/// `result`/`error` is present (a response); a response's `id` matches some
/// prior request's, and a notification has no `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    jsonrpc: ProtocolVersion,

    /// Present on requests and responses; absent on notifications.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,

    /// Present on requests and notifications; absent on responses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub method: Option<String>,

    /// By-name object, by-position array, or a single bare value.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub params: Option<Value>,

    /// Present on successful responses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,

    /// Present on failed responses.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<RpcError>,
}

impl Envelope {
    /// Builds an outbound request envelope (expects a response).
    pub fn request(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope {
            jsonrpc: ProtocolVersion,
            id: Some(id),
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Builds an outbound notification envelope (no response expected).
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope {
            jsonrpc: ProtocolVersion,
            id: None,
            method: Some(method.into()),
            params,
            result: None,
            error: None,
        }
    }

    /// Builds a success response to a previously received request.
    pub fn success(id: i64, result: Value) -> Self {
        Envelope {
            jsonrpc: ProtocolVersion,
            id: Some(id),
            method: None,
            params: None,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response to a previously received request.
    pub fn failure(id: i64, error: RpcError) -> Self {
        Envelope {
            jsonrpc: ProtocolVersion,
            id: Some(id),
            method: None,
            params: None,
            result: None,
            error: Some(error),
        }
    }

    /// True if this envelope has the shape of a response (no `method`).
    pub fn is_response(&self) -> bool {
        self.method.is_none()
    }

    /// True if this envelope is a notification (method, no id).
    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }

    /// True if this envelope is a request (method and id both present).
    pub fn is_request(&self) -> bool {
        self.method.is_some() && self.id.is_some()
    }
}

/// Reads a named parameter out of a by-name `params` object, a by-position
/// `params` array (matched against `index`), or a single bare value (only
/// valid when `index == 0` and there is exactly one declared parameter).
///
/// Accepts all three params shapes a peer may send: by-name object,
/// by-position array, or a single bare value.
pub fn param_by_name_or_position<'a>(
    params: &'a Option<Value>,
    name: &str,
    index: usize,
) -> Option<&'a Value> {
    match params {
        Some(Value::Object(map)) => map.get(name),
        Some(Value::Array(values)) => values.get(index),
        Some(single) if index == 0 => Some(single),
        _ => None,
    }
}

/// Splits a `params` value into a positional list, for handlers declared
/// with purely positional signatures (e.g. `[handle, row_limit, timeout]`).
pub fn params_as_array(params: &Option<Value>) -> Vec<Value> {
    match params {
        Some(Value::Array(values)) => values.clone(),
        Some(single) => vec![single.clone()],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_round_trip() {
        let env = Envelope::request(7, "noop", Some(json!([])));
        let text = serde_json::to_string(&env).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":7,"method":"noop","params":[]}"#);
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back, env);
        assert!(back.is_request());
    }

    #[test]
    fn notification_omits_id() {
        let env = Envelope::notification("poll0", Some(json!({"added": []})));
        let text = serde_json::to_string(&env).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(Envelope::from_str_for_test(&text).is_notification());
    }

    #[test]
    fn success_response_omits_method_and_error() {
        let env = Envelope::success(1, Value::Null);
        let text = serde_json::to_string(&env).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","id":1,"result":null}"#);
        assert!(Envelope::from_str_for_test(&text).is_response());
    }

    #[test]
    fn failure_response_round_trips_error_object() {
        let env = Envelope::failure(
            2,
            RpcError { code: -32601, message: "Method not found".into(), data: None },
        );
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(back.error.unwrap().code, -32601);
    }

    #[test]
    fn rejects_wrong_protocol_version() {
        let bad = r#"{"jsonrpc":"1.0","id":1,"result":null}"#;
        assert!(serde_json::from_str::<Envelope>(bad).is_err());
    }

    #[test]
    fn param_lookup_by_name_array_and_single_value() {
        let by_name = Some(json!({"handle": 42}));
        assert_eq!(param_by_name_or_position(&by_name, "handle", 0), Some(&json!(42)));

        let by_position = Some(json!([42, 10, null]));
        assert_eq!(param_by_name_or_position(&by_position, "handle", 0), Some(&json!(42)));
        assert_eq!(param_by_name_or_position(&by_position, "row_limit", 1), Some(&json!(10)));

        let single = Some(json!(42));
        assert_eq!(param_by_name_or_position(&single, "handle", 0), Some(&json!(42)));
        assert_eq!(param_by_name_or_position(&single, "handle", 1), None);
    }

    impl Envelope {
        fn from_str_for_test(s: &str) -> Envelope {
            serde_json::from_str(s).unwrap()
        }
    }
}
