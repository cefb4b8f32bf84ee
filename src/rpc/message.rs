//! JSON-RPC 2.0 messages and tool-call results.
//!
//! Outbound messages are built with [`serde_json::json!`]; inbound lines are
//! classified by which of `id`, `method`, `result` and `error` they carry.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request id. Servers echo whatever the client sent, so both JSON
/// representations are accepted inbound.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (what this client issues).
    Number(u64),
    /// String id.
    Text(String),
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::Number(n)
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Numeric error code.
    #[serde(default)]
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// Call expecting a response.
    Request {
        /// Correlation id.
        id: RequestId,
        /// Method name.
        method: String,
        /// Parameters, if any.
        params: Option<Value>,
    },
    /// Fire-and-forget call.
    Notification {
        /// Method name.
        method: String,
        /// Parameters, if any.
        params: Option<Value>,
    },
    /// Reply to a request.
    Response {
        /// Id of the request being answered.
        id: RequestId,
        /// `Ok(result)` or `Err(error object)`.
        outcome: std::result::Result<Value, RpcErrorObject>,
    },
}

/// Wire envelope used to classify inbound lines.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

impl RpcMessage {
    /// Build a request.
    #[must_use]
    pub fn request(id: impl Into<RequestId>, method: &str, params: Option<Value>) -> Self {
        Self::Request {
            id: id.into(),
            method: method.to_owned(),
            params,
        }
    }

    /// Build a notification.
    #[must_use]
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.to_owned(),
            params,
        }
    }

    /// Id carried by requests and responses.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(id),
            Self::Notification { .. } => None,
        }
    }

    /// Wire representation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Request { id, method, params } => {
                let mut msg = json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "method": method });
                if let Some(params) = params {
                    msg["params"] = params.clone();
                }
                msg
            }
            Self::Notification { method, params } => {
                let mut msg = json!({ "jsonrpc": JSONRPC_VERSION, "method": method });
                if let Some(params) = params {
                    msg["params"] = params.clone();
                }
                msg
            }
            Self::Response { id, outcome } => match outcome {
                Ok(result) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": result }),
                Err(error) => json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "error": error }),
            },
        }
    }

    /// Compact single-line JSON, without the trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        self.to_value().to_string()
    }

    /// Parse one inbound line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::RpcProtocol` when the line is not a JSON object or
    /// carries neither a method nor an id.
    pub fn parse_line(line: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(line.trim())
            .map_err(|e| AppError::RpcProtocol(format!("malformed json: {e}")))?;

        match (envelope.id, envelope.method) {
            (Some(id), Some(method)) => Ok(Self::Request {
                id,
                method,
                params: envelope.params,
            }),
            (None, Some(method)) => Ok(Self::Notification {
                method,
                params: envelope.params,
            }),
            (Some(id), None) => {
                let outcome = match envelope.error {
                    Some(error) => Err(error),
                    None => Ok(envelope.result.unwrap_or(Value::Null)),
                };
                Ok(Self::Response { id, outcome })
            }
            (None, None) => Err(AppError::RpcProtocol(
                "message has neither id nor method".into(),
            )),
        }
    }
}

/// One item of a tool result's `content` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Kind tag (`text`, `image`, `resource`, …).
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload for `text` items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remaining kind-specific fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentItem {
    /// A `text` item.
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(payload.into()),
            extra: Map::new(),
        }
    }
}

/// Error reported by the tool server for a call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    /// JSON-RPC error code, when the failure came as an error object.
    pub code: Option<i64>,
    /// Message to show.
    pub message: String,
}

/// Result of a `tools/call`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallResult {
    /// Structured content, in server order. `is_error` mirrors the
    /// result's `isError` flag.
    Content {
        /// Content items.
        items: Vec<ContentItem>,
        /// Whether the tool flagged this content as an error report.
        is_error: bool,
    },
    /// A JSON-RPC error object answered the call.
    Error(ToolFailure),
    /// A result without a `content` array.
    Other(Value),
}

impl ToolCallResult {
    /// Interpret the outcome of a `tools/call` response.
    #[must_use]
    pub fn from_outcome(outcome: std::result::Result<Value, RpcErrorObject>) -> Self {
        match outcome {
            Err(error) => Self::Error(ToolFailure {
                code: Some(error.code),
                message: error.message,
            }),
            Ok(result) => Self::from_result(result),
        }
    }

    fn from_result(result: Value) -> Self {
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if let Some(content) = result.get("content").and_then(Value::as_array) {
            // Items that do not even carry a `type` are dropped rather than
            // failing the whole result.
            let items = content
                .iter()
                .filter_map(|item| serde_json::from_value::<ContentItem>(item.clone()).ok())
                .collect();
            return Self::Content { items, is_error };
        }

        if let Some(message) = result.get("error") {
            let message = message
                .as_str()
                .map_or_else(|| message.to_string(), str::to_owned);
            return Self::Error(ToolFailure {
                code: None,
                message,
            });
        }

        Self::Other(result)
    }

    /// Whether the tool reported failure, either as an error object or via
    /// `isError`.
    #[must_use]
    pub fn is_error(&self) -> bool {
        match self {
            Self::Content { is_error, .. } => *is_error,
            Self::Error(_) => true,
            Self::Other(_) => false,
        }
    }

    /// Turn a tool-reported failure into `AppError::Tool`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Tool` carrying the extracted text when
    /// [`is_error`](Self::is_error) is true.
    pub fn into_success(self) -> Result<Self> {
        match self {
            Self::Error(failure) => Err(AppError::Tool(failure.message)),
            Self::Content { is_error: true, .. } => Err(AppError::Tool(self.extract_text())),
            other => Ok(other),
        }
    }

    /// Normalise into plain text.
    ///
    /// - content: the payload of every `text` item, in order, joined by `\n`
    /// - error: `Error: <message>`
    /// - anything else: pretty-printed JSON
    #[must_use]
    pub fn extract_text(&self) -> String {
        match self {
            Self::Content { items, .. } => items
                .iter()
                .filter(|item| item.kind == "text")
                .map(|item| item.text.as_deref().unwrap_or_default())
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Error(failure) => format!("Error: {}", failure.message),
            Self::Other(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }
}

/// Render any call outcome, failed or not, in the same text shape.
#[must_use]
pub fn render_outcome(outcome: &Result<ToolCallResult>) -> String {
    match outcome {
        Ok(result) => result.extract_text(),
        Err(err) => format!("Error: {err}"),
    }
}
