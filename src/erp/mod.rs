//! Client for Odoo-compatible ERP servers speaking JSON-RPC 2.0.
//!
//! - [`rpc`]: envelopes, the HTTP transport and error classification
//! - [`session`]: the authenticated identity and its persistence
//! - [`client`]: typed model operations (`search_read`, `create`, ...)

pub mod client;
pub mod error;
pub mod rpc;
pub mod session;

#[cfg(test)]
pub mod testing;

pub use client::{CallParams, ErpClient, SearchRead};
pub use error::{ErpError, ErpResult};
pub use rpc::{HttpTransport, RpcClient, Transport};
pub use session::SessionStore;
