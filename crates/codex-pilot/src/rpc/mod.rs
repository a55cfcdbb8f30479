//! JSON-RPC 2.0 layer: method names, id allocation, pending table and
//! inbound classification.

pub mod method;
mod session;

pub use method::{ClientMethod, ServerMethod};
pub use session::{Inbound, OutgoingRequest, RequestId, RpcFailure, RpcSession, auto_reply};
