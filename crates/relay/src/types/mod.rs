//! Wire and domain types.
//!
//! - `jsonrpc` - JSON-RPC 2.0 framing
//! - `error` - error objects and standard codes
//! - `protocol` - the `initialize` handshake
//! - `tool` - `Tool` listing entries and `tools/call` payloads
//! - `descriptor` - typed tool descriptors and argument validation
//! - `invocation` - invocation requests, results, and failure kinds
//! - `content` - content blocks inside tool results

pub mod content;
pub mod descriptor;
pub mod error;
pub mod invocation;
pub mod jsonrpc;
pub mod protocol;
pub mod tool;
