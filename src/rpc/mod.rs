//! Stdio JSON-RPC tool client.
//!
//! [`transport`] owns the child process and its line framing,
//! [`client`] owns the handshake and response correlation.

pub mod client;
pub mod codec;
pub mod message;
pub mod transport;
