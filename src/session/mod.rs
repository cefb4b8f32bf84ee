//! Session resolution and buffer diffing.
//!
//! - `locator`: find the target session by terminal or name, or create one.
//! - `differ`: record a line-count baseline and slice off what came after it.

pub mod differ;
pub mod locator;

/// A session chosen as the dispatch target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    /// Session name, used as the multiplexer target.
    pub name: String,
    /// Controlling terminal, when known.
    pub tty: Option<String>,
}
