//! JSON-RPC 2.0 over newline-delimited stdio.
//!
//! Layered bottom-up: [`codec`] frames bytes into lines, [`message`] models
//! the JSON-RPC envelope, [`endpoint`] correlates requests and responses and
//! dispatches inbound messages, and [`transport`] owns the reader loop and
//! the single-writer task.

pub mod codec;
pub mod endpoint;
pub mod message;
pub mod transport;

pub use endpoint::{RpcEndpoint, RpcHandler};
