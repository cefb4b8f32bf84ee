//! Tool-call client over a stdio JSON-RPC server.
//!
//! Every [`RpcClient::call_tool`] spawns a fresh server and sends a fixed
//! three-message sequence:
//!
//! 1. `initialize` request (protocol version, client identity)
//! 2. `notifications/initialized` notification
//! 3. `tools/call` request with `{ name, arguments }`
//!
//! Only the response whose id matches the `tools/call` request is taken as
//! the result. Anything else the server says (the initialize response,
//! log notifications, stray responses) is ignored.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RpcConfig;
use crate::rpc::message::{RequestId, RpcMessage, ToolCallResult};
use crate::rpc::transport::{self, Exchange, ServerSpec};
use crate::{AppError, Result};

/// Method names used by the handshake and call.
pub const METHOD_INITIALIZE: &str = "initialize";
/// Notification sent after the initialize request.
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// Tool invocation method.
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Default protocol version announced in `initialize`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Monotonic request ids for one server process, starting at 1.
#[derive(Debug)]
pub struct IdSequence {
    next: u64,
}

impl IdSequence {
    /// Start a fresh sequence at 1.
    #[must_use]
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Take the next id.
    pub fn next_id(&mut self) -> RequestId {
        let id = self.next;
        self.next += 1;
        RequestId::Number(id)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool name plus its arguments, written `NAME` or `NAME=JSON`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    /// Tool name.
    pub name: String,
    /// Arguments object (`null` when omitted).
    pub arguments: Value,
}

impl FromStr for ToolRequest {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self> {
        let (name, arguments) = match raw.split_once('=') {
            Some((name, json)) => (name, serde_json::from_str(json)?),
            None => (raw, Value::Null),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::InvalidCommand(format!("missing tool name in {raw:?}")));
        }
        Ok(Self {
            name: name.to_owned(),
            arguments,
        })
    }
}

/// Identity announced in `initialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// Calls tools on a stdio JSON-RPC server, one process per call.
#[derive(Debug, Clone)]
pub struct RpcClient {
    server: ServerSpec,
    protocol_version: String,
    client_info: ClientInfo,
    require_tools_capability: bool,
}

impl RpcClient {
    /// Client for `server` with default identity and protocol version.
    #[must_use]
    pub fn new(server: ServerSpec) -> Self {
        Self {
            server,
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
            client_info: ClientInfo::default(),
            require_tools_capability: false,
        }
    }

    /// Client built from the `[rpc]` section plus resolved environment.
    #[must_use]
    pub fn from_config(rpc: &RpcConfig, env: BTreeMap<String, String>) -> Self {
        let server = ServerSpec {
            program: rpc.server.clone(),
            args: rpc.args.clone(),
            env,
            current_dir: None,
        };
        Self::new(server)
            .with_protocol_version(&rpc.protocol_version)
            .with_client_info(ClientInfo {
                name: rpc.client_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            })
            .require_tools_capability(rpc.require_tools_capability)
    }

    /// Override the announced protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: &str) -> Self {
        version.clone_into(&mut self.protocol_version);
        self
    }

    /// Override the announced client identity.
    #[must_use]
    pub fn with_client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }

    /// Refuse to trust a server whose initialize response lacks
    /// `capabilities.tools`.
    #[must_use]
    pub fn require_tools_capability(mut self, required: bool) -> Self {
        self.require_tools_capability = required;
        self
    }

    /// Server launch spec.
    #[must_use]
    pub fn server(&self) -> &ServerSpec {
        &self.server
    }

    /// Invoke tool `name` with `arguments` (a JSON object; `null` means `{}`).
    ///
    /// A tool-level failure (error object or `isError`) is returned as
    /// `Ok` data; render it with [`ToolCallResult::extract_text`].
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidCommand` if `arguments` is not an object.
    /// - `AppError::RpcTimeout` if the server did not finish within `timeout`.
    /// - `AppError::RpcProtocol` if no response carried the call's id; the
    ///   message includes the exit status and stderr.
    /// - `AppError::Io` if the server could not be spawned.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolCallResult> {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            Value::Object(map) => Value::Object(map),
            other => {
                return Err(AppError::InvalidCommand(format!(
                    "tool arguments must be a JSON object, got {other}"
                )))
            }
        };

        let mut ids = IdSequence::new();
        let init_id = ids.next_id();
        let call_id = ids.next_id();

        let outbound = [
            self.initialize_request(init_id.clone()),
            RpcMessage::notification(METHOD_INITIALIZED, None),
            RpcMessage::request(
                call_id.clone(),
                METHOD_TOOLS_CALL,
                Some(json!({ "name": name, "arguments": arguments })),
            ),
        ];

        async move {
            let exchange = transport::exchange(&self.server, &outbound, timeout).await?;

            if self.require_tools_capability {
                check_tools_capability(&exchange, &init_id)?;
            }

            let result = take_response(exchange, &call_id)?;
            if result.is_error() {
                warn!(tool = name, "tool reported an error");
            } else {
                info!(tool = name, "tool call succeeded");
            }
            Ok(result)
        }
        .instrument(info_span!("call_tool", tool = name, server = %self.server.program))
        .await
    }

    fn initialize_request(&self, id: RequestId) -> RpcMessage {
        RpcMessage::request(
            id,
            METHOD_INITIALIZE,
            Some(json!({
                "protocolVersion": self.protocol_version,
                "capabilities": {},
                "clientInfo": {
                    "name": self.client_info.name,
                    "version": self.client_info.version,
                }
            })),
        )
    }
}

/// Pull the response for `call_id` out of an exchange.
fn take_response(exchange: Exchange, call_id: &RequestId) -> Result<ToolCallResult> {
    let Exchange {
        messages,
        stderr,
        status,
        ..
    } = exchange;

    for msg in messages {
        match msg {
            RpcMessage::Response { id, outcome } if &id == call_id => {
                return Ok(ToolCallResult::from_outcome(outcome));
            }
            other => debug!(id = ?other.id(), "ignoring uncorrelated message"),
        }
    }

    let stderr = stderr.trim();
    let mut message = format!("no response for request {call_id} (server {status})");
    if !stderr.is_empty() {
        message.push_str(": ");
        message.push_str(stderr);
    }
    Err(AppError::RpcProtocol(message))
}

fn check_tools_capability(exchange: &Exchange, init_id: &RequestId) -> Result<()> {
    let advertised = exchange.messages.iter().any(|msg| match msg {
        RpcMessage::Response {
            id,
            outcome: Ok(result),
        } if id == init_id => result.pointer("/capabilities/tools").is_some(),
        _ => false,
    });

    if advertised {
        Ok(())
    } else {
        Err(AppError::RpcProtocol(
            "server did not advertise tools capability in its initialize response".into(),
        ))
    }
}
