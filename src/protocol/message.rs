//! JSON-RPC envelopes exchanged with the mutation server.
//!
//! Outbound requests carry an id; responses echo it back. Notifications
//! never carry one. The presence of an `id` key is the only thing used to
//! tell an inbound response from an inbound notification.
//!
//! # Example
//!
//! ```
//! use mutation_server_client::protocol::IncomingMessage;
//!
//! let msg = IncomingMessage::parse(br#"{"id":"1","result":[]}"#).unwrap();
//! assert!(matches!(msg, IncomingMessage::Response(_)));
//!
//! let msg = IncomingMessage::parse(br#"{"method":"progress","params":{"token":"t1","value":{}}}"#).unwrap();
//! assert!(matches!(msg, IncomingMessage::Notification(_)));
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::codec::JsonCodec;
use crate::error::{MutationServerError, Result};

/// JSON-RPC version tag sent on every outbound envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Notification method used for streamed partial results.
pub const PROGRESS_METHOD: &str = "progress";

/// JSON-RPC "internal error" code, used when the engine sends an error
/// payload that does not follow the `{code, message}` shape.
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// Correlation id of a request.
///
/// Ids are generated as decimal strings. Inbound ids may be strings or
/// numbers; numbers are compared by their decimal text, so `1` and `"1"`
/// correlate with the same request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create an id from its text form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Text form of the id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => RequestId(text),
            RawId::Number(number) => RequestId(number.to_string()),
        })
    }
}

/// Outbound request envelope.
#[derive(Debug, Serialize)]
pub struct Request<'a> {
    jsonrpc: &'static str,
    /// Correlation id.
    pub id: &'a RequestId,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: &'a Value,
}

impl<'a> Request<'a> {
    /// Create a request envelope.
    pub fn new(id: &'a RequestId, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// Outbound notification envelope (no id, no response expected).
#[derive(Debug, Serialize)]
pub struct OutgoingNotification<'a> {
    jsonrpc: &'static str,
    /// Method name.
    pub method: &'a str,
    /// Method parameters.
    pub params: &'a Value,
}

impl<'a> OutgoingNotification<'a> {
    /// Create a notification envelope.
    pub fn new(method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Error payload of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error from an arbitrary `error` payload.
    ///
    /// Payloads that do not match `{code, message, data?}` are kept whole in
    /// `data` under [`INTERNAL_ERROR_CODE`].
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<RpcError>(value.clone()) {
            Ok(err) => err,
            Err(_) => {
                let message = match &value {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                Self {
                    code: INTERNAL_ERROR_CODE,
                    message,
                    data: Some(value),
                }
            }
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Inbound response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request this answers. `None` for `"id": null`.
    pub id: Option<RequestId>,
    /// Result payload or error payload.
    pub outcome: std::result::Result<Value, RpcError>,
}

/// Inbound notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Parameters (`null` when absent).
    #[serde(default)]
    pub params: Value,
}

/// Token correlating progress notifications with the call that asked for them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// Numeric token.
    Number(i64),
    /// String token.
    Text(String),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressToken::Number(n) => write!(f, "{}", n),
            ProgressToken::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for ProgressToken {
    fn from(value: &str) -> Self {
        ProgressToken::Text(value.to_string())
    }
}

impl From<String> for ProgressToken {
    fn from(value: String) -> Self {
        ProgressToken::Text(value)
    }
}

impl From<i64> for ProgressToken {
    fn from(value: i64) -> Self {
        ProgressToken::Number(value)
    }
}

/// Parameters of a `progress` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressParams {
    /// Token of the streaming call.
    pub token: ProgressToken,
    /// Operation specific payload.
    #[serde(default)]
    pub value: Value,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Has an `id` key.
    Response(Response),
    /// Has no `id` key.
    Notification(Notification),
}

impl IncomingMessage {
    /// Parse and classify one frame.
    ///
    /// # Errors
    ///
    /// Returns `Json` if the frame is not valid JSON and `Protocol` if it is
    /// not an object, has an unusable id, carries both `result` and
    /// `error`, or is a notification without a method.
    pub fn parse(frame: &[u8]) -> Result<Self> {
        let value: Value = JsonCodec::decode(frame)?;
        let Value::Object(map) = value else {
            return Err(MutationServerError::Protocol(
                "frame is not a JSON object".to_string(),
            ));
        };

        if map.contains_key("id") {
            Self::parse_response(map).map(IncomingMessage::Response)
        } else {
            Self::parse_notification(map).map(IncomingMessage::Notification)
        }
    }

    fn parse_response(mut map: Map<String, Value>) -> Result<Response> {
        let id = match map.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(serde_json::from_value::<RequestId>(raw).map_err(|e| {
                MutationServerError::Protocol(format!("invalid response id: {}", e))
            })?),
        };

        let result = map.remove("result");
        let error = map.remove("error").filter(|e| !e.is_null());

        let outcome = match (result, error) {
            (Some(_), Some(_)) => {
                return Err(MutationServerError::Protocol(
                    "response carries both result and error".to_string(),
                ))
            }
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(RpcError::from_value(error)),
            // A void method may omit `result` entirely.
            (None, None) => Ok(Value::Null),
        };

        Ok(Response { id, outcome })
    }

    fn parse_notification(mut map: Map<String, Value>) -> Result<Notification> {
        let method = match map.remove("method") {
            Some(Value::String(method)) => method,
            _ => {
                return Err(MutationServerError::Protocol(
                    "notification without a method".to_string(),
                ))
            }
        };
        let params = map.remove("params").unwrap_or(Value::Null);

        Ok(Notification { method, params })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope_shape() {
        let id = RequestId::new("7");
        let params = json!({ "globPatterns": ["src/**/*.ts"] });
        let encoded = serde_json::to_value(Request::new(&id, "instrument", &params)).unwrap();

        assert_eq!(encoded["jsonrpc"], "2.0");
        assert_eq!(encoded["id"], "7");
        assert_eq!(encoded["method"], "instrument");
        assert_eq!(encoded["params"]["globPatterns"][0], "src/**/*.ts");
    }

    #[test]
    fn test_outgoing_notification_has_no_id() {
        let params = json!({ "id": "3" });
        let encoded =
            serde_json::to_value(OutgoingNotification::new("$/cancelRequest", &params)).unwrap();

        assert!(encoded.get("id").is_none());
        assert_eq!(encoded["params"]["id"], "3");
    }

    #[test]
    fn test_parse_result_response() {
        let msg = IncomingMessage::parse(br#"{"id":"1","result":[]}"#).unwrap();
        assert_eq!(
            msg,
            IncomingMessage::Response(Response {
                id: Some(RequestId::new("1")),
                outcome: Ok(json!([])),
            })
        );
    }

    #[test]
    fn test_parse_numeric_id_matches_text_id() {
        let msg = IncomingMessage::parse(br#"{"id":12,"result":null}"#).unwrap();
        let IncomingMessage::Response(response) = msg else {
            panic!("expected response");
        };
        assert_eq!(response.id, Some(RequestId::new("12")));
        assert_eq!(response.outcome, Ok(Value::Null));
    }

    #[test]
    fn test_parse_error_response() {
        let msg = IncomingMessage::parse(
            br#"{"jsonrpc":"2.0","id":"2","error":{"code":-32601,"message":"no such method"}}"#,
        )
        .unwrap();
        let IncomingMessage::Response(response) = msg else {
            panic!("expected response");
        };
        let err = response.outcome.unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "no such method");
        assert!(err.data.is_none());
    }

    #[test]
    fn test_parse_unshaped_error_payload() {
        let msg = IncomingMessage::parse(br#"{"id":"2","error":"boom"}"#).unwrap();
        let IncomingMessage::Response(response) = msg else {
            panic!("expected response");
        };
        let err = response.outcome.unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR_CODE);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn test_parse_both_result_and_error_rejected() {
        let result =
            IncomingMessage::parse(br#"{"id":"1","result":1,"error":{"code":1,"message":"x"}}"#);
        assert!(matches!(result, Err(MutationServerError::Protocol(_))));
    }

    #[test]
    fn test_parse_null_error_is_ignored() {
        let msg = IncomingMessage::parse(br#"{"id":"1","result":5,"error":null}"#).unwrap();
        let IncomingMessage::Response(response) = msg else {
            panic!("expected response");
        };
        assert_eq!(response.outcome, Ok(json!(5)));
    }

    #[test]
    fn test_parse_missing_result_is_null() {
        let msg = IncomingMessage::parse(br#"{"id":"4"}"#).unwrap();
        let IncomingMessage::Response(response) = msg else {
            panic!("expected response");
        };
        assert_eq!(response.outcome, Ok(Value::Null));
    }

    #[test]
    fn test_parse_null_id_is_response_without_id() {
        let msg = IncomingMessage::parse(br#"{"id":null,"error":{"code":-32700,"message":"parse"}}"#)
            .unwrap();
        let IncomingMessage::Response(response) = msg else {
            panic!("expected response");
        };
        assert!(response.id.is_none());
    }

    #[test]
    fn test_parse_notification() {
        let msg = IncomingMessage::parse(
            br#"{"jsonrpc":"2.0","method":"progress","params":{"token":"t1","value":{"mutants":[]}}}"#,
        )
        .unwrap();
        let IncomingMessage::Notification(notification) = msg else {
            panic!("expected notification");
        };
        assert_eq!(notification.method, PROGRESS_METHOD);

        let params: ProgressParams = serde_json::from_value(notification.params).unwrap();
        assert_eq!(params.token, ProgressToken::from("t1"));
        assert_eq!(params.value, json!({ "mutants": [] }));
    }

    #[test]
    fn test_parse_notification_without_method_rejected() {
        let result = IncomingMessage::parse(br#"{"params":{}}"#);
        assert!(matches!(result, Err(MutationServerError::Protocol(_))));
    }

    #[test]
    fn test_parse_non_object_rejected() {
        assert!(matches!(
            IncomingMessage::parse(b"[1,2,3]"),
            Err(MutationServerError::Protocol(_))
        ));
        assert!(matches!(
            IncomingMessage::parse(br#"{"id":"1","res"#),
            Err(MutationServerError::Json(_))
        ));
    }

    #[test]
    fn test_progress_token_forms() {
        let numeric: ProgressToken = serde_json::from_value(json!(3)).unwrap();
        let text: ProgressToken = serde_json::from_value(json!("3")).unwrap();

        assert_eq!(numeric, ProgressToken::Number(3));
        assert_eq!(text, ProgressToken::Text("3".to_string()));
        assert_ne!(numeric, text);
        assert_eq!(numeric.to_string(), text.to_string());
    }
}
