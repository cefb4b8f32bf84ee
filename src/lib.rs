#![forbid(unsafe_code)]

//! Drive an interactive agent running inside a terminal multiplexer session
//! and call tools on a stdio JSON-RPC server.
//!
//! The session path resolves a target session, records a baseline line
//! count, types a command, waits, and returns the lines that appeared after
//! the baseline. The RPC path spawns a tool server per call, performs the
//! initialize handshake, and correlates the tool result by request id.

pub mod agent_cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod mux;
pub mod report;
pub mod rpc;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
