//! Client session layer for a Codex app-server.
//!
//! Connects over a hand-written WebSocket transport, speaks JSON-RPC 2.0,
//! and projects the server's notifications into a [`Snapshot`] of threads,
//! thread detail, personas, a bounded event log and rate limits.
//!
//! The session logic lives in [`engine::PilotCore`], which performs no IO and
//! returns [`engine::Effect`]s. [`PilotClient`] drives it on a tokio task.

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod parse;
pub mod persona;
pub mod rpc;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod wire_log;

pub use client::PilotClient;
pub use config::PilotConfig;
pub use engine::{Effect, Intent, PilotCore, TimerEvent};
pub use error::{PilotError, Result};
pub use model::{
    ConnectionStatus, DisplayItem, ItemKind, Persona, PersonaMood, ServerEvent, Snapshot, Thread,
};
pub use persona::{HashNamer, PersonaNamer};
